//! envkern: a small teaching kernel's environment core, hosted.
//!
//! The kernel itself lives in the `kernel` crate and the user library in
//! `libenv`. This crate boots a kernel instance on host threads, one per
//! simulated processor, and bundles the user programs that exercise it.

pub mod boot;
pub mod userspace;

pub use kernel::task::CpuExit;
pub use kernel::{EnvId, Kernel, KernelConfig};
