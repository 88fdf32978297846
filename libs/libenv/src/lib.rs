//! User Environment Library
//!
//! What a user program links against: wrappers around the kernel's system
//! calls, the user-level page-fault upcall machinery, and copy-on-write
//! `fork` built entirely from those two.
//!
//! # Usage
//!
//! ```rust,ignore
//! use libenv::entry::{Main, PC_UMAIN};
//! use libenv::{uprintln, Resume, UserContext, UserError};
//!
//! struct Hello;
//!
//! impl Main for Hello {
//!     const NAME: &'static str = "hello";
//!
//!     fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
//!         uprintln!(cx, "hello, world")?;
//!         libenv::process::exit(cx)
//!     }
//! }
//! ```

#![no_std]

extern crate alloc;

pub use kernel::{EnvId, Error, Resume, Segment, UserContext, UserError, UserProgram};

pub mod entry;
pub mod fork;
pub mod io;
pub mod memory;
pub mod pgfault;
pub mod process;
pub mod syscall;

#[doc(hidden)]
pub use alloc::format as __format;

/// Abort the current environment with a formatted message.
#[macro_export]
macro_rules! upanic {
    ($($arg:tt)*) => {
        return Err($crate::UserError::Panic($crate::__format!($($arg)*)))
    };
}

/// Print to the console through `sys_cputs`.
#[macro_export]
macro_rules! uprint {
    ($cx:expr, $($arg:tt)*) => {
        $crate::io::cputs($cx, &$crate::__format!($($arg)*))
    };
}

/// Print a line to the console through `sys_cputs`.
#[macro_export]
macro_rules! uprintln {
    ($cx:expr) => {
        $crate::io::cputs($cx, "\n")
    };
    ($cx:expr, $($arg:tt)*) => {
        $crate::io::cputs($cx, &$crate::__format!("{}\n", $crate::__format!($($arg)*)))
    };
}
