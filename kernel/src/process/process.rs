//! Environment control block and identity

use alloc::sync::Arc;
use core::fmt;
use x86_64::VirtAddr;

use crate::memory::process_memory::ProcessPageTable;
use crate::task::context::TrapFrame;
use crate::task::program::UserProgram;

/// log2 of the largest supported environment table
pub const LOG2NENV: u32 = 10;
pub const NENV_MAX: usize = 1 << LOG2NENV;
/// Generation increment applied on every reuse of a slot
pub const ENVGENSHIFT: u32 = 12;

/// Environment identifier: slot index in the low bits, generation above.
///
/// The generation changes every time a slot is reused, so an id held by
/// anyone after the environment died never resolves to the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EnvId(u32);

impl EnvId {
    /// At the syscall boundary, id 0 names the calling environment.
    pub const SELF: EnvId = EnvId(0);

    pub const fn from_raw(raw: u32) -> Self {
        EnvId(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Slot index in the environment table
    pub const fn index(self) -> usize {
        self.0 as usize & (NENV_MAX - 1)
    }

    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Id for the next occupant of the slot this id belongs to.
    pub(crate) fn next_generation(self, index: usize) -> EnvId {
        let mut generation = self.0.wrapping_add(1 << ENVGENSHIFT) & !(NENV_MAX as u32 - 1);
        // Don't create a negative or zero id
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        EnvId(generation | index as u32)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::LowerHex for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Environment status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot unused
    Free = 0,
    /// Destroyed while running elsewhere; reaped at next kernel entry
    Dying = 1,
    /// Eligible for scheduling
    Runnable = 2,
    /// Currently executing on exactly one processor
    Running = 3,
    /// Allocated but not schedulable (e.g. fork child under construction)
    NotRunnable = 4,
}

impl EnvStatus {
    pub const fn as_raw(self) -> u64 {
        self as u32 as u64
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(EnvStatus::Free),
            1 => Some(EnvStatus::Dying),
            2 => Some(EnvStatus::Runnable),
            3 => Some(EnvStatus::Running),
            4 => Some(EnvStatus::NotRunnable),
            _ => None,
        }
    }
}

/// An environment: one isolated address space with one thread of control
pub struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,

    /// Saved registers while not running
    pub tf: TrapFrame,

    /// Page table; `None` only while the slot is free
    pub pgdir: Option<ProcessPageTable>,

    /// User entry point for page faults
    pub pgfault_upcall: Option<VirtAddr>,

    /// Set while a fault upcall is running on the exception stack
    pub in_upcall: bool,

    /// Processor this environment is running on
    pub cpunum: Option<usize>,

    /// Number of times this environment has been scheduled
    pub runs: u64,

    /// Page faults delivered to this environment's upcall
    pub pgfault_upcalls: u64,

    /// Program image the environment executes
    pub program: Option<Arc<dyn UserProgram>>,
}

impl Env {
    pub(crate) fn empty() -> Self {
        Self {
            id: EnvId::default(),
            parent_id: EnvId::default(),
            status: EnvStatus::Free,
            tf: TrapFrame::default(),
            pgdir: None,
            pgfault_upcall: None,
            in_upcall: false,
            cpunum: None,
            runs: 0,
            pgfault_upcalls: 0,
            program: None,
        }
    }

    pub fn name(&self) -> &str {
        self.program.as_deref().map(|p| p.name()).unwrap_or("<none>")
    }

    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent_id: self.parent_id,
            status: self.status,
            cpunum: self.cpunum,
            runs: self.runs,
            pgfault_upcalls: self.pgfault_upcalls,
            mapped_pages: self.pgdir.as_ref().map_or(0, |pt| pt.len()),
        }
    }
}

/// Read-only snapshot of an environment, as user code sees the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub cpunum: Option<usize>,
    pub runs: u64,
    pub pgfault_upcalls: u64,
    pub mapped_pages: usize,
}
