//! Kernel configuration
//!
//! Sizes of the fixed pools (environments, physical frames, processors) and
//! the timer quantum. Everything has a sensible default; hosts override the
//! pieces they care about with the `with_*` builders.

use crate::per_cpu::MAX_CPUS;
use crate::process::NENV_MAX;
use crate::syscall::errno::Error;

/// Runtime configuration for one [`crate::Kernel`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of environment slots (power of two, at most 1024)
    pub nenv: usize,
    /// Number of simulated processors
    pub ncpu: usize,
    /// Number of 4 KiB physical frames in the pool
    pub nframes: usize,
    /// Program steps per timer tick
    pub quantum: usize,
    /// How many times a fault may recur after its handler returned
    pub max_fault_retries: u32,
    /// Optional cap on scheduler entries per processor (for bounded runs)
    pub max_slices: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            nenv: NENV_MAX,
            ncpu: 1,
            nframes: 4096,
            quantum: 8,
            max_fault_retries: 2,
            max_slices: None,
        }
    }
}

impl KernelConfig {
    pub fn with_envs(mut self, nenv: usize) -> Self {
        self.nenv = nenv;
        self
    }

    pub fn with_cpus(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    pub fn with_frames(mut self, nframes: usize) -> Self {
        self.nframes = nframes;
        self
    }

    pub fn with_quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_max_slices(mut self, max_slices: u64) -> Self {
        self.max_slices = Some(max_slices);
        self
    }

    /// Check the configuration against the hard limits of the kernel.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.nenv.is_power_of_two() || self.nenv > NENV_MAX {
            log::error!("config: nenv {} must be a power of two <= {}", self.nenv, NENV_MAX);
            return Err(Error::Inval);
        }
        if self.ncpu == 0 || self.ncpu > MAX_CPUS {
            log::error!("config: ncpu {} out of range 1..={}", self.ncpu, MAX_CPUS);
            return Err(Error::Inval);
        }
        if self.nframes < 64 {
            log::error!("config: nframes {} is below the minimum of 64", self.nframes);
            return Err(Error::Inval);
        }
        if self.quantum == 0 {
            log::error!("config: quantum must be at least one step");
            return Err(Error::Inval);
        }
        Ok(())
    }
}
