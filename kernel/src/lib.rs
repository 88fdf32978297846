//! Environment management core of a small teaching kernel.
//!
//! The kernel multiplexes a fixed pool of isolated environments across one
//! or more simulated processors. Physical frames, per-environment page
//! tables, page-fault delivery and timer preemption are modelled here; user
//! programs are resumable state machines driven through
//! [`task::process_context::UserContext`], which is the only way they can
//! touch memory or ask the kernel for anything.
//!
//! All kernel state lives behind one big kernel lock inside [`Kernel`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod interrupts;
pub mod log_buffer;
pub mod logger;
pub mod memory;
pub mod monitor;
pub mod per_cpu;
pub mod process;
pub mod spinlock;
pub mod state;
pub mod syscall;
pub mod task;

pub use config::KernelConfig;
pub use process::{EnvId, EnvInfo, EnvStatus};
pub use state::Kernel;
pub use syscall::errno::Error;
pub use task::program::{Resume, Segment, UserError, UserProgram};
pub use task::process_context::UserContext;
pub use task::CpuExit;

// Re-export x86_64 so user libraries share the same address and flag types
pub use x86_64;
