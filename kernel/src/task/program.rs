//! User program interface
//!
//! A user program is a resumable state machine. Its registers (including
//! the program counter it dispatches on) live in the environment's saved
//! trap frame and its data lives in the environment's memory, so a program
//! value itself is immutable and shared by every environment running it,
//! forked children included.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use x86_64::VirtAddr;

use crate::memory::paging::PagePerm;
use crate::syscall::errno::Error;
use crate::task::process_context::UserContext;

/// What the processor should do after one program step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Keep running until the timer fires
    Continue,
    /// Give up the rest of the time slice
    Yield,
    /// The environment has exited
    Exit,
}

/// Conditions that end an environment from user mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    /// The program gave up (user-level panic)
    Panic(String),
    /// A syscall failed and the program did not handle it
    Syscall(Error),
    /// The kernel destroyed the environment while it was executing
    Destroyed,
}

impl From<Error> for UserError {
    fn from(e: Error) -> Self {
        UserError::Syscall(e)
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserError::Panic(msg) => write!(f, "user panic: {}", msg),
            UserError::Syscall(e) => write!(f, "unhandled syscall error: {}", e),
            UserError::Destroyed => f.write_str("environment destroyed"),
        }
    }
}

/// A region of the program image loaded at environment creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub va: VirtAddr,
    /// Initialised contents; the rest of `mem_size` is zero-filled
    pub bytes: Vec<u8>,
    pub mem_size: usize,
    pub perm: PagePerm,
}

impl Segment {
    pub fn new(va: u64, bytes: Vec<u8>, mem_size: usize, perm: PagePerm) -> Self {
        Self {
            va: VirtAddr::new(va),
            mem_size: mem_size.max(bytes.len()),
            bytes,
            perm,
        }
    }

    /// Zero-filled segment.
    pub fn bss(va: u64, mem_size: usize, perm: PagePerm) -> Self {
        Self::new(va, Vec::new(), mem_size, perm)
    }
}

pub trait UserProgram: Send + Sync {
    fn name(&self) -> &str;

    /// Memory image mapped when the environment is created.
    fn segments(&self) -> Vec<Segment>;

    /// Initial program counter.
    fn entry(&self) -> u64 {
        0
    }

    /// Execute one step from the current saved program counter.
    fn resume(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError>;

    /// Run the user code registered at `entry` for a reflected page fault.
    /// The fault record is on the exception stack at the stack pointer.
    fn upcall(&self, entry: VirtAddr, cx: &mut UserContext<'_>) -> Result<(), UserError>;
}
