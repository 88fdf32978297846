//! System call interface
//!
//! User environments reach the kernel through numbered requests with up to
//! five word-sized arguments. The result register holds a non-negative
//! value on success or a negated [`errno::Error`] code.

pub mod errno;
pub mod handlers;

use crate::memory::cow_stats::CowCounters;
use crate::state::KernelState;
use errno::Error;

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    Cputs = 0,
    GetEnvId = 1,
    EnvDestroy = 2,
    Yield = 3,
    PageAlloc = 4,
    PageMap = 5,
    PageUnmap = 6,
    Exofork = 7,
    EnvSetStatus = 8,
    EnvSetPgfaultUpcall = 9,
}

impl SyscallNumber {
    /// Try to convert a u64 to a SyscallNumber
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Cputs),
            1 => Some(Self::GetEnvId),
            2 => Some(Self::EnvDestroy),
            3 => Some(Self::Yield),
            4 => Some(Self::PageAlloc),
            5 => Some(Self::PageMap),
            6 => Some(Self::PageUnmap),
            7 => Some(Self::Exofork),
            8 => Some(Self::EnvSetStatus),
            9 => Some(Self::EnvSetPgfaultUpcall),
            _ => None,
        }
    }
}

/// Kernel side of one system call: the locked state plus who is asking.
pub struct SyscallContext<'a> {
    pub st: &'a mut KernelState,
    pub counters: &'a CowCounters,
    pub cpu: usize,
    /// Slot of the calling environment
    pub caller: usize,
}

/// Decode and execute a system call, returning the result register value.
pub fn dispatch(k: &mut SyscallContext<'_>, num: u64, args: [u64; 5]) -> i64 {
    let [a1, a2, a3, a4, a5] = args;
    let result = match SyscallNumber::from_u64(num) {
        Some(SyscallNumber::Cputs) => handlers::sys_cputs(k, a1, a2),
        Some(SyscallNumber::GetEnvId) => handlers::sys_getenvid(k),
        Some(SyscallNumber::EnvDestroy) => handlers::sys_env_destroy(k, a1),
        Some(SyscallNumber::Yield) => handlers::sys_yield(k),
        Some(SyscallNumber::PageAlloc) => handlers::sys_page_alloc(k, a1, a2, a3),
        Some(SyscallNumber::PageMap) => handlers::sys_page_map(k, a1, a2, a3, a4, a5),
        Some(SyscallNumber::PageUnmap) => handlers::sys_page_unmap(k, a1, a2),
        Some(SyscallNumber::Exofork) => handlers::sys_exofork(k),
        Some(SyscallNumber::EnvSetStatus) => handlers::sys_env_set_status(k, a1, a2),
        Some(SyscallNumber::EnvSetPgfaultUpcall) => handlers::sys_env_set_pgfault_upcall(k, a1, a2),
        None => {
            log::warn!("unknown syscall {}", num);
            Err(Error::NoSys)
        }
    };

    #[cfg(feature = "trace_syscalls")]
    log::trace!(
        "[{}] syscall {} ({:#x}, {:#x}, {:#x}, {:#x}, {:#x}) -> {:?}",
        k.st.envs.get(k.caller).id,
        num,
        a1,
        a2,
        a3,
        a4,
        a5,
        result
    );

    errno::encode(result)
}
