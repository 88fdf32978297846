//! Round-robin environment scheduler
//!
//! Each processor scans the environment table circularly, starting just
//! after the slot it ran last, and takes the first `Runnable` environment.
//! With nothing runnable it keeps running its own environment if that is
//! still `Running` here; otherwise it halts, or drops to the monitor when
//! the whole system has nothing left to do.
//!
//! Callers hold the big kernel lock for the whole decision.

use crate::per_cpu::CpuStatus;
use crate::process::{EnvId, EnvStatus};
use crate::state::KernelState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedDecision {
    /// Run this environment (already marked `Running` on the processor)
    Run(EnvId),
    /// Nothing to do here right now; wait for the next interrupt
    Halt,
    /// No environment in the system can ever run again
    Monitor,
}

/// Choose the next environment for processor `cpu`.
pub fn sched_yield(st: &mut KernelState, cpu: usize) -> SchedDecision {
    reap_current(st, cpu);

    let n = st.envs.capacity();
    let start = st.cpus[cpu].last_index.map_or(0, |last| (last + 1) % n);

    let next = (0..n)
        .map(|k| (start + k) % n)
        .find(|&idx| st.envs.get(idx).status == EnvStatus::Runnable);
    if let Some(idx) = next {
        return SchedDecision::Run(env_run(st, cpu, idx));
    }

    // Nothing else runnable: keep going with what was running here, but
    // never with something running on another processor.
    if let Some(cur) = st.cpus[cpu].current {
        let env = st.envs.get(cur);
        if env.status == EnvStatus::Running && env.cpunum == Some(cpu) {
            return SchedDecision::Run(env_run(st, cpu, cur));
        }
    }

    sched_halt(st, cpu)
}

/// Free this processor's environment if another processor destroyed it
/// after its last slice ended.
fn reap_current(st: &mut KernelState, cpu: usize) {
    let Some(cur) = st.cpus[cpu].current else {
        return;
    };
    let env = st.envs.get(cur);
    if env.status == EnvStatus::Dying && env.cpunum == Some(cpu) {
        log::debug!("cpu {} reaping dying env {}", cpu, env.id);
        st.env_free(cur);
    }
}

/// Make `idx` the running environment of processor `cpu`.
pub fn env_run(st: &mut KernelState, cpu: usize, idx: usize) -> EnvId {
    if let Some(prev) = st.cpus[cpu].current {
        let env = st.envs.get_mut(prev);
        if env.cpunum == Some(cpu) {
            if env.status == EnvStatus::Running {
                env.status = EnvStatus::Runnable;
            }
            env.cpunum = None;
        }
    }

    let env = st.envs.get_mut(idx);
    debug_assert!(
        env.status == EnvStatus::Runnable || env.cpunum.is_none(),
        "env {} already running on cpu {:?}",
        env.id,
        env.cpunum
    );
    env.status = EnvStatus::Running;
    env.cpunum = Some(cpu);
    env.runs += 1;
    let id = env.id;

    let info = &mut st.cpus[cpu];
    info.current = Some(idx);
    info.last_index = Some(idx);
    info.status = CpuStatus::Started;
    log::debug!("cpu {} runs env {}", cpu, id);
    id
}

/// Halt processor `cpu`, or report that the system is out of work.
pub fn sched_halt(st: &mut KernelState, cpu: usize) -> SchedDecision {
    let alive = st.envs.count(|s| {
        matches!(s, EnvStatus::Runnable | EnvStatus::Running | EnvStatus::Dying)
    });

    if let Some(cur) = st.cpus[cpu].current.take() {
        let env = st.envs.get_mut(cur);
        if env.cpunum == Some(cpu) {
            env.cpunum = None;
        }
    }
    st.cpus[cpu].status = CpuStatus::Halted;

    if alive == 0 {
        log::info!("cpu {}: no runnable environments in the system", cpu);
        st.console.write_str("No runnable environments in the system!\n");
        return SchedDecision::Monitor;
    }
    SchedDecision::Halt
}
