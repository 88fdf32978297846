//! Page fault delivery
//!
//! A user page fault either kills the environment or is reflected to the
//! environment's registered upcall. Reflection pushes a [`UTrapframe`] onto
//! the one-page user exception stack and redirects execution to the upcall
//! entry; the upcall returns through [`upcall_return`], which restores the
//! registers recorded in that frame.

use alloc::format;
use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::VirtAddr;

use crate::memory::cow_stats::CowCounters;
use crate::memory::layout::{page_of, uxstack_bottom, UXSTACKTOP};
use crate::state::KernelState;
use crate::task::context::{TrapFrame, UTrapframe};

/// A fault raised by a user memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    pub va: VirtAddr,
    pub err: PageFaultErrorCode,
}

impl PageFault {
    pub fn new(va: u64, err: PageFaultErrorCode) -> Self {
        Self {
            va: VirtAddr::new_truncate(va),
            err,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Run the user handler at this entry on the exception stack
    Upcall(VirtAddr),
    /// The environment was destroyed
    Destroyed,
}

/// Address of the fault record on the exception stack.
pub const fn utf_addr() -> u64 {
    UXSTACKTOP - UTrapframe::SIZE as u64
}

/// Handle a user page fault taken by environment `idx` on processor `cpu`.
///
/// The environment's saved trap frame must be current.
pub fn page_fault_handler(
    st: &mut KernelState,
    counters: &CowCounters,
    cpu: usize,
    idx: usize,
    fault: PageFault,
) -> FaultOutcome {
    counters.record_fault();
    let env = st.envs.get(idx);
    let (id, tf) = (env.id, env.tf);
    log::debug!("[{}] page fault va {:#010x} err {:?}", id, fault.va.as_u64(), fault.err);

    let Some(entry) = env.pgfault_upcall else {
        return kill(st, counters, cpu, idx, format!("user fault va {:08x} ip {:08x}", fault.va.as_u64(), tf.pc));
    };
    if env.in_upcall {
        return kill(
            st,
            counters,
            cpu,
            idx,
            format!("page fault va {:08x} while handling a page fault", fault.va.as_u64()),
        );
    }
    let stack_ok = env
        .pgdir
        .as_ref()
        .and_then(|pt| pt.lookup(page_of(uxstack_bottom())))
        .is_some_and(|pte| pte.is_writable());
    if !stack_ok {
        return kill(
            st,
            counters,
            cpu,
            idx,
            format!("user fault va {:08x} with no writable exception stack", fault.va.as_u64()),
        );
    }

    let utf = UTrapframe::new(fault.va, fault.err, &tf);
    let KernelState { envs, mem, .. } = st;
    let env = envs.get_mut(idx);
    if let Some(pt) = env.pgdir.as_ref() {
        // The exception stack page was checked above
        let _ = pt.write_bytes(mem, VirtAddr::new(utf_addr()), &utf.to_bytes());
    }
    env.in_upcall = true;
    env.pgfault_upcalls += 1;
    counters.record_upcall();
    FaultOutcome::Upcall(entry)
}

/// Return from a fault upcall: leave the exception stack and hand back the
/// registers recorded in the fault record.
pub fn upcall_return(st: &mut KernelState, idx: usize) -> Option<TrapFrame> {
    let KernelState { envs, mem, .. } = st;
    let env = envs.get_mut(idx);
    env.in_upcall = false;
    let mut raw = [0u8; UTrapframe::SIZE];
    env.pgdir
        .as_ref()?
        .read_bytes(mem, VirtAddr::new(utf_addr()), &mut raw)
        .ok()?;
    Some(UTrapframe::from_bytes(&raw).restore())
}

fn kill(
    st: &mut KernelState,
    counters: &CowCounters,
    cpu: usize,
    idx: usize,
    reason: alloc::string::String,
) -> FaultOutcome {
    let id = st.envs.get(idx).id;
    log::warn!("[{}] {}", id, reason);
    st.console.write_str(&format!("[{}] {}\n", id, reason));
    counters.record_fatal();
    st.env_destroy(idx, cpu);
    FaultOutcome::Destroyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::memory::paging::{PTE_USER, PTE_UW};
    use crate::process::{EnvId, EnvStatus};
    use x86_64::structures::paging::FrameAllocator;

    fn setup() -> (KernelState, CowCounters, usize) {
        let mut st = KernelState::new(&KernelConfig::default().with_envs(4).with_frames(64));
        let idx = st.envs.alloc(&mut st.mem, EnvId::default()).unwrap();
        st.envs.get_mut(idx).status = EnvStatus::Running;
        st.envs.get_mut(idx).cpunum = Some(0);
        st.cpus[0].current = Some(idx);
        (st, CowCounters::new(), idx)
    }

    fn map(st: &mut KernelState, idx: usize, va: u64, flags: x86_64::structures::paging::PageTableFlags) {
        let frame = st.mem.allocate_frame().unwrap();
        let KernelState { envs, mem, .. } = st;
        envs.get_mut(idx).pgdir.as_mut().unwrap().insert(mem, page_of(va), frame, flags);
    }

    fn write_fault(va: u64) -> PageFault {
        PageFault::new(
            va,
            PageFaultErrorCode::USER_MODE
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::PROTECTION_VIOLATION,
        )
    }

    #[test]
    fn fault_without_upcall_destroys_env() {
        let (mut st, counters, idx) = setup();
        let outcome = page_fault_handler(&mut st, &counters, 0, idx, write_fault(0x80_0000));
        assert_eq!(outcome, FaultOutcome::Destroyed);
        assert_eq!(st.envs.get(idx).status, EnvStatus::Free);
        assert!(st.console.contents().contains("user fault va 00800000"));
        assert_eq!(counters.snapshot().fatal, 1);
    }

    #[test]
    fn fault_is_reflected_onto_exception_stack() {
        let (mut st, counters, idx) = setup();
        map(&mut st, idx, uxstack_bottom(), PTE_UW);
        st.envs.get_mut(idx).pgfault_upcall = Some(VirtAddr::new(0x80_0100));
        st.envs.get_mut(idx).tf.pc = 0x80_0042;

        let outcome = page_fault_handler(&mut st, &counters, 0, idx, write_fault(0x90_0010));
        assert_eq!(outcome, FaultOutcome::Upcall(VirtAddr::new(0x80_0100)));
        assert!(st.envs.get(idx).in_upcall);
        assert_eq!(st.envs.get(idx).pgfault_upcalls, 1);

        let mut raw = [0u8; UTrapframe::SIZE];
        st.pgdir(idx).unwrap().read_bytes(&st.mem, VirtAddr::new(utf_addr()), &mut raw).unwrap();
        let utf = UTrapframe::from_bytes(&raw);
        assert_eq!(utf.fault_va.as_u64(), 0x90_0010);
        assert_eq!(utf.pc, 0x80_0042);

        let restored = upcall_return(&mut st, idx).unwrap();
        assert_eq!(restored.pc, 0x80_0042);
        assert!(!st.envs.get(idx).in_upcall);
    }

    #[test]
    fn nested_fault_is_fatal() {
        let (mut st, counters, idx) = setup();
        map(&mut st, idx, uxstack_bottom(), PTE_UW);
        st.envs.get_mut(idx).pgfault_upcall = Some(VirtAddr::new(0x80_0100));

        let first = page_fault_handler(&mut st, &counters, 0, idx, write_fault(0x90_0000));
        assert!(matches!(first, FaultOutcome::Upcall(_)));
        let second = page_fault_handler(&mut st, &counters, 0, idx, write_fault(0x90_1000));
        assert_eq!(second, FaultOutcome::Destroyed);
        assert_eq!(st.envs.get(idx).status, EnvStatus::Free);
    }

    #[test]
    fn read_only_exception_stack_is_fatal() {
        let (mut st, counters, idx) = setup();
        map(&mut st, idx, uxstack_bottom(), PTE_USER);
        st.envs.get_mut(idx).pgfault_upcall = Some(VirtAddr::new(0x80_0100));
        let outcome = page_fault_handler(&mut st, &counters, 0, idx, write_fault(0x90_0000));
        assert_eq!(outcome, FaultOutcome::Destroyed);
    }
}
