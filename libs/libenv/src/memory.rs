//! User address space layout and memory helpers
//!
//! Every program built on this library gets the same image: text at
//! `UTEXT`, initialised data at [`DATA_BASE`], the library's own private
//! page at [`LIB_DATA`], and a one-page stack just below `USTACKTOP`.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use kernel::memory::layout::PAGE_SIZE;
use kernel::{UserContext, UserError};

pub use kernel::memory::layout::{
    uxstack_bottom, PFTEMP, USTACKTOP, UTEMP, UTEXT, UTOP, UXSTACKTOP,
};
pub use kernel::memory::paging::PagePerm;

/// Program data segment
pub const DATA_BASE: u64 = 0x0090_0000;

/// Library-private page
pub const LIB_DATA: u64 = 0x00a0_0000;

/// Free for program use (extra pages, shared regions)
pub const HEAP_BASE: u64 = 0x00b0_0000;

/// `thisenv`: id recorded by the library for this environment
pub const THISENV: u64 = LIB_DATA;

/// Registered page-fault handler, as registry index + 1 (0 = none)
pub const PGFAULT_HANDLER: u64 = LIB_DATA + 8;

/// Staging buffer for console output
pub const PRINTBUF: u64 = LIB_DATA + 64;
pub const PRINTBUF_SIZE: usize = PAGE_SIZE as usize - 64;

pub fn read_u64(cx: &mut UserContext<'_>, va: u64) -> Result<u64, UserError> {
    let mut raw = [0u8; 8];
    cx.read(va, &mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

pub fn write_u64(cx: &mut UserContext<'_>, va: u64, value: u64) -> Result<(), UserError> {
    cx.write(va, &value.to_le_bytes())
}

/// Read a NUL-terminated string of at most `max` bytes.
pub fn read_str(cx: &mut UserContext<'_>, va: u64, max: usize) -> Result<String, UserError> {
    let mut raw = vec![0u8; max];
    cx.read(va, &mut raw)?;
    let len = raw.iter().position(|&b| b == 0).unwrap_or(max);
    raw.truncate(len);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Write `s` followed by a NUL.
pub fn write_str(cx: &mut UserContext<'_>, va: u64, s: &str) -> Result<(), UserError> {
    let mut raw = Vec::with_capacity(s.len() + 1);
    raw.extend_from_slice(s.as_bytes());
    raw.push(0);
    cx.write(va, &raw)
}

pub fn page_round_down(va: u64) -> u64 {
    va & !(PAGE_SIZE - 1)
}
