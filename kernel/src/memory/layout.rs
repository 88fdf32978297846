//! Virtual address space layout shared by every environment
//!
//! ```text
//!    KERNBASE ->  +------------------------------+ 0xf0000000
//!                 |   kernel image (shared)      |
//!    ULIM     ->  +------------------------------+ 0xef800000
//!                 |   read-only page tables      |
//!    UVPT     ->  +------------------------------+ 0xef400000
//!                 |   read-only frame info       |
//!    UPAGES   ->  +------------------------------+ 0xef000000
//!                 |   read-only env table        |
//!    UTOP,UENVS,  +------------------------------+ 0xeec00000
//!    UXSTACKTOP   |   user exception stack       | one page
//!                 +------------------------------+ 0xeebff000
//!                 |   empty guard page           |
//!    USTACKTOP -> +------------------------------+ 0xeebfe000
//!                 |   normal user stack          | grows down
//!                 ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//!                 |   program data and heap      |
//!    UTEXT     -> +------------------------------+ 0x00800000
//!    PFTEMP    -> |   fault-handler scratch page | 0x007ff000
//!                 |                              |
//!    UTEMP     -> +------------------------------+ 0x00400000
//!                 |   empty                      |
//!    0         -> +------------------------------+
//! ```
//!
//! Everything at or above `UTOP` belongs to the shared kernel image and is
//! never present in a per-environment page table.

use x86_64::structures::paging::Page;
use x86_64::VirtAddr;

pub const PAGE_SIZE: u64 = 4096;

/// Bytes mapped by one page directory entry
pub const PTSIZE: u64 = PAGE_SIZE * 1024;

pub const KERNBASE: u64 = 0xf000_0000;
pub const ULIM: u64 = KERNBASE - PTSIZE;
pub const UVPT: u64 = ULIM - PTSIZE;
pub const UPAGES: u64 = UVPT - PTSIZE;
pub const UENVS: u64 = UPAGES - PTSIZE;

/// Top of user-accessible, user-writable memory
pub const UTOP: u64 = UENVS;
pub const UXSTACKTOP: u64 = UTOP;
/// Leaves one unmapped guard page between the two stacks
pub const USTACKTOP: u64 = UTOP - 2 * PAGE_SIZE;

pub const UTEXT: u64 = 2 * PTSIZE;
pub const UTEMP: u64 = PTSIZE;
/// Scratch page the page-fault handler copies through
pub const PFTEMP: u64 = UTEMP + PTSIZE - PAGE_SIZE;

/// Lowest address of the one-page user exception stack
pub const fn uxstack_bottom() -> u64 {
    UXSTACKTOP - PAGE_SIZE
}

pub fn is_page_aligned(va: u64) -> bool {
    va % PAGE_SIZE == 0
}

/// True if `va` lies in the per-environment part of the address space.
pub fn is_user(va: u64) -> bool {
    va < UTOP
}

pub fn page_of(va: u64) -> Page {
    Page::containing_address(VirtAddr::new(va))
}
