//! System call wrappers
//!
//! Thin typed wrappers over [`UserContext::syscall`]. A negative result
//! register becomes `UserError::Syscall`; the environment disappearing
//! underneath the call becomes `UserError::Destroyed`.

use kernel::x86_64::structures::paging::PageTableFlags;
use kernel::syscall::errno;
use kernel::{EnvId, EnvStatus, UserContext, UserError};

/// Syscall numbers matching kernel/src/syscall/mod.rs
pub mod nr {
    pub const CPUTS: u64 = 0;
    pub const GETENVID: u64 = 1;
    pub const ENV_DESTROY: u64 = 2;
    pub const YIELD: u64 = 3;
    pub const PAGE_ALLOC: u64 = 4;
    pub const PAGE_MAP: u64 = 5;
    pub const PAGE_UNMAP: u64 = 6;
    pub const EXOFORK: u64 = 7;
    pub const ENV_SET_STATUS: u64 = 8;
    pub const ENV_SET_PGFAULT_UPCALL: u64 = 9;
}

pub type SysResult<T> = Result<T, UserError>;

fn syscall(cx: &mut UserContext<'_>, num: u64, args: [u64; 5]) -> SysResult<u64> {
    let ret = cx.syscall(num, args)?;
    errno::decode(ret).map_err(UserError::Syscall)
}

fn env(id: EnvId) -> u64 {
    id.as_u32() as u64
}

pub fn sys_cputs(cx: &mut UserContext<'_>, va: u64, len: usize) -> SysResult<()> {
    syscall(cx, nr::CPUTS, [va, len as u64, 0, 0, 0]).map(drop)
}

pub fn sys_getenvid(cx: &mut UserContext<'_>) -> SysResult<EnvId> {
    syscall(cx, nr::GETENVID, [0; 5]).map(|raw| EnvId::from_raw(raw as u32))
}

pub fn sys_env_destroy(cx: &mut UserContext<'_>, id: EnvId) -> SysResult<()> {
    syscall(cx, nr::ENV_DESTROY, [env(id), 0, 0, 0, 0]).map(drop)
}

pub fn sys_yield(cx: &mut UserContext<'_>) -> SysResult<()> {
    syscall(cx, nr::YIELD, [0; 5]).map(drop)
}

pub fn sys_page_alloc(
    cx: &mut UserContext<'_>,
    id: EnvId,
    va: u64,
    perm: PageTableFlags,
) -> SysResult<()> {
    syscall(cx, nr::PAGE_ALLOC, [env(id), va, perm.bits(), 0, 0]).map(drop)
}

pub fn sys_page_map(
    cx: &mut UserContext<'_>,
    src: EnvId,
    srcva: u64,
    dst: EnvId,
    dstva: u64,
    perm: PageTableFlags,
) -> SysResult<()> {
    syscall(cx, nr::PAGE_MAP, [env(src), srcva, env(dst), dstva, perm.bits()]).map(drop)
}

pub fn sys_page_unmap(cx: &mut UserContext<'_>, id: EnvId, va: u64) -> SysResult<()> {
    syscall(cx, nr::PAGE_UNMAP, [env(id), va, 0, 0, 0]).map(drop)
}

/// Allocate a blank, not yet runnable child.
pub fn sys_exofork(cx: &mut UserContext<'_>) -> SysResult<EnvId> {
    syscall(cx, nr::EXOFORK, [0; 5]).map(|raw| EnvId::from_raw(raw as u32))
}

pub fn sys_env_set_status(cx: &mut UserContext<'_>, id: EnvId, status: EnvStatus) -> SysResult<()> {
    syscall(cx, nr::ENV_SET_STATUS, [env(id), status.as_raw(), 0, 0, 0]).map(drop)
}

pub fn sys_env_set_pgfault_upcall(cx: &mut UserContext<'_>, id: EnvId, entry: u64) -> SysResult<()> {
    syscall(cx, nr::ENV_SET_PGFAULT_UPCALL, [env(id), entry, 0, 0, 0]).map(drop)
}
