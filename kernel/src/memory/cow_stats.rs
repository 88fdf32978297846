//! Page-fault and copy-on-write statistics
//!
//! Counters are kept per kernel instance and updated without the big
//! kernel lock, so they can be sampled from anywhere.

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CowCounters {
    /// User page faults taken
    total_faults: AtomicU64,
    /// Faults delivered to a registered upcall
    upcalls: AtomicU64,
    /// Faults that destroyed the faulting environment
    fatal: AtomicU64,
    /// Pages marked copy-on-write through a syscall mapping
    pages_marked_cow: AtomicU64,
    /// Private copies installed over a COW mapping
    pages_copied: AtomicU64,
}

impl CowCounters {
    pub const fn new() -> Self {
        Self {
            total_faults: AtomicU64::new(0),
            upcalls: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
            pages_marked_cow: AtomicU64::new(0),
            pages_copied: AtomicU64::new(0),
        }
    }

    pub fn record_fault(&self) {
        self.total_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upcall(&self) {
        self.upcalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal(&self) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cow_mark(&self) {
        self.pages_marked_cow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy(&self) {
        self.pages_copied.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics
    pub fn snapshot(&self) -> CowStats {
        CowStats {
            total_faults: self.total_faults.load(Ordering::Relaxed),
            upcalls: self.upcalls.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
            pages_marked_cow: self.pages_marked_cow.load(Ordering::Relaxed),
            pages_copied: self.pages_copied.load(Ordering::Relaxed),
        }
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CowStats {
    pub total_faults: u64,
    pub upcalls: u64,
    pub fatal: u64,
    pub pages_marked_cow: u64,
    pub pages_copied: u64,
}

impl core::fmt::Display for CowStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[COW STATS] faults={} upcalls={} fatal={} marked={} copied={}",
            self.total_faults, self.upcalls, self.fatal, self.pages_marked_cow, self.pages_copied
        )
    }
}
