//! Processor run loop
//!
//! Each simulated processor repeatedly asks the scheduler for an
//! environment and runs it for one time slice of at most `quantum` program
//! steps. The timer interrupt is the step budget running out; a program can
//! give the slice up earlier by yielding.

pub mod context;
pub mod process_context;
pub mod program;
pub mod scheduler;

use crate::process::{EnvId, EnvStatus};
use crate::state::Kernel;
use crate::syscall::errno::Error;
use process_context::UserContext;
use program::Resume;
use scheduler::SchedDecision;

/// Why a processor stopped running environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuExit {
    /// No environment in the system can run any more
    Monitor,
    /// The configured slice limit was reached
    SliceLimit,
}

/// Spins per halted scheduling round
const HALT_SPINS: usize = 128;

/// Run processor `cpu` until the system runs out of environments.
pub fn run_cpu(kernel: &Kernel, cpu: usize) -> CpuExit {
    log::info!("cpu {} entering scheduler", cpu);
    let mut slices = 0u64;
    loop {
        if kernel.config().max_slices.is_some_and(|max| slices >= max) {
            log::warn!("cpu {}: slice limit {} reached", cpu, slices);
            return CpuExit::SliceLimit;
        }

        let cx = {
            let mut st = kernel.lock(cpu);
            match scheduler::sched_yield(&mut st, cpu) {
                SchedDecision::Run(id) => UserContext::load(kernel, &mut st, cpu, id.index()),
                SchedDecision::Halt => None,
                SchedDecision::Monitor => return CpuExit::Monitor,
            }
        };

        match cx {
            Some(cx) => {
                slices += 1;
                run_slice(kernel, cx);
            }
            None => {
                for _ in 0..HALT_SPINS {
                    core::hint::spin_loop();
                }
            }
        }
    }
}

/// Run one time slice.
fn run_slice(kernel: &Kernel, mut cx: UserContext<'_>) {
    let mut outcome = Ok(Resume::Continue);
    for _ in 0..kernel.config().quantum {
        outcome = cx.step();
        if !matches!(outcome, Ok(Resume::Continue)) {
            break;
        }
    }
    cx.leave(outcome);
}

impl Kernel {
    /// Run processor `cpu`; see [`run_cpu`].
    pub fn run_cpu(&self, cpu: usize) -> CpuExit {
        run_cpu(self, cpu)
    }

    /// Run the runnable environment `id` on `cpu` under the caller's control,
    /// outside the scheduler. Hand it back with [`UserContext::detach`].
    pub fn attach(&self, cpu: usize, id: EnvId) -> Result<UserContext<'_>, Error> {
        let mut st = self.lock(cpu);
        let idx = st.envs.envid2env(id, None, false)?;
        if st.envs.get(idx).status != EnvStatus::Runnable {
            return Err(Error::Inval);
        }
        scheduler::env_run(&mut st, cpu, idx);
        UserContext::load(self, &mut st, cpu, idx).ok_or(Error::BadEnv)
    }
}
