//! Page permission encoding
//!
//! Page table entries use the x86 flag layout. Two of the three bits the
//! hardware leaves to software carry meaning here:
//!
//! - `PTE_COW` (bit 11): read-only now, privately copied on first write
//! - `PTE_SHARE` (bit 10): aliased across fork, never copied
//!
//! Code that decides what to do with a mapping works with [`PagePerm`];
//! conversion to raw flags happens only where a request crosses into the
//! kernel.

use x86_64::structures::paging::PageTableFlags;

/// Copy-on-write marker
pub const PTE_COW: PageTableFlags = PageTableFlags::BIT_11;
/// Shared-across-fork marker
pub const PTE_SHARE: PageTableFlags = PageTableFlags::BIT_10;

/// Bits the hardware ignores and software may use
pub const PTE_AVAIL: PageTableFlags = PageTableFlags::BIT_9
    .union(PageTableFlags::BIT_10)
    .union(PageTableFlags::BIT_11);

/// Every bit a syscall is allowed to request
pub const PTE_SYSCALL: PageTableFlags = PTE_AVAIL
    .union(PageTableFlags::PRESENT)
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

/// Minimum bits for any user mapping
pub const PTE_USER: PageTableFlags =
    PageTableFlags::PRESENT.union(PageTableFlags::USER_ACCESSIBLE);

/// Private writable user page
pub const PTE_UW: PageTableFlags = PTE_USER.union(PageTableFlags::WRITABLE);

/// Classification of a present user mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePerm {
    ReadOnly,
    Writable,
    CopyOnWrite,
    Shared { writable: bool },
}

impl PagePerm {
    /// Classify raw entry flags. Returns `None` for entries that are not
    /// present user mappings.
    pub fn from_flags(flags: PageTableFlags) -> Option<Self> {
        if !flags.contains(PTE_USER) {
            return None;
        }
        let writable = flags.contains(PageTableFlags::WRITABLE);
        Some(if flags.contains(PTE_SHARE) {
            PagePerm::Shared { writable }
        } else if flags.contains(PTE_COW) {
            PagePerm::CopyOnWrite
        } else if writable {
            PagePerm::Writable
        } else {
            PagePerm::ReadOnly
        })
    }

    /// Raw flags for a request. A COW page is never writable.
    pub fn flags(self) -> PageTableFlags {
        match self {
            PagePerm::ReadOnly => PTE_USER,
            PagePerm::Writable => PTE_UW,
            PagePerm::CopyOnWrite => PTE_USER | PTE_COW,
            PagePerm::Shared { writable: true } => PTE_UW | PTE_SHARE,
            PagePerm::Shared { writable: false } => PTE_USER | PTE_SHARE,
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(self, PagePerm::Writable | PagePerm::Shared { writable: true })
    }
}

/// Check a permission word supplied by a syscall.
pub fn valid_syscall_perm(perm: PageTableFlags) -> bool {
    perm.contains(PTE_USER) && PTE_SYSCALL.contains(perm)
}
