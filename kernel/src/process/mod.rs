//! Environment management
//!
//! An environment is one isolated address space plus one saved register
//! set. This module owns the environment table, identity and lifecycle, and
//! kernel-side loading of program images.

pub mod creation;
pub mod manager;
pub mod process;

pub use manager::{Destroyed, EnvTable};
pub use process::{Env, EnvId, EnvInfo, EnvStatus, NENV_MAX};
