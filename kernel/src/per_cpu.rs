//! Per-processor descriptors
//!
//! One descriptor per simulated processor. They live inside the kernel
//! state and are only touched with the big kernel lock held.

/// Maximum number of simulated processors
pub const MAX_CPUS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    /// Never entered the scheduler
    Unused,
    /// Running environments
    Started,
    /// Idle, waiting for an interrupt
    Halted,
}

#[derive(Debug, Clone, Copy)]
pub struct CpuInfo {
    pub id: usize,
    pub status: CpuStatus,
    /// Slot of the environment this processor is running
    pub current: Option<usize>,
    /// Slot the round-robin scan continues after
    pub last_index: Option<usize>,
}

impl CpuInfo {
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            status: CpuStatus::Unused,
            current: None,
            last_index: None,
        }
    }
}
