//! System call handler implementations
//!
//! Every handler that names another environment resolves it with
//! permission checking: only the caller itself and its immediate children
//! can be manipulated.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use x86_64::structures::paging::{FrameAllocator, PageTableFlags};
use x86_64::VirtAddr;

use super::errno::Error;
use super::SyscallContext;
use crate::memory::layout::{is_page_aligned, is_user, page_of};
use crate::memory::paging::{valid_syscall_perm, PTE_COW, PTE_SHARE};
use crate::process::{EnvId, EnvStatus};
use crate::state::KernelState;
use crate::task::context::REG_RET;

pub type SyscallResult = Result<u64, Error>;

fn env_arg(raw: u64) -> EnvId {
    EnvId::from_raw(raw as u32)
}

/// Resolve an environment argument with permission checking.
fn lookup(k: &SyscallContext<'_>, raw: u64) -> Result<usize, Error> {
    k.st.envs.envid2env(env_arg(raw), Some(k.caller), true)
}

fn check_user_page(va: u64) -> Result<(), Error> {
    if is_user(va) && is_page_aligned(va) {
        Ok(())
    } else {
        Err(Error::Inval)
    }
}

fn check_perm(perm: u64) -> Result<PageTableFlags, Error> {
    let flags = PageTableFlags::from_bits(perm).ok_or(Error::Inval)?;
    if valid_syscall_perm(flags) {
        Ok(flags)
    } else {
        Err(Error::Inval)
    }
}

/// sys_cputs - Print a string from user memory to the console
///
/// A caller passing memory it cannot read is destroyed.
pub fn sys_cputs(k: &mut SyscallContext<'_>, va: u64, len: u64) -> SyscallResult {
    let mut buf = Vec::new();
    let copied = k
        .st
        .user_mem_check(k.caller, va, len as usize, false)
        .and_then(|()| {
            buf.resize(len as usize, 0);
            k.st.user_copy_in(k.caller, va, &mut buf)
        });
    if let Err(fault) = copied {
        let id = k.st.envs.get(k.caller).id;
        log::warn!("[{}] user_mem_check assertion failure for va {:08x}", id, fault.va.as_u64());
        k.st.console.write_str(&format!(
            "[{}] user_mem_check assertion failure for va {:08x}\n",
            id,
            fault.va.as_u64()
        ));
        k.st.env_destroy(k.caller, k.cpu);
        return Err(Error::Fault);
    }
    let text = String::from_utf8_lossy(&buf);
    k.st.console.write_str(&text);
    Ok(0)
}

/// sys_getenvid - Return the caller's environment id
pub fn sys_getenvid(k: &mut SyscallContext<'_>) -> SyscallResult {
    Ok(k.st.envs.get(k.caller).id.as_u32() as u64)
}

/// sys_env_destroy - Destroy the caller or one of its children
pub fn sys_env_destroy(k: &mut SyscallContext<'_>, envid: u64) -> SyscallResult {
    let idx = lookup(k, envid)?;
    let caller_id = k.st.envs.get(k.caller).id;
    if idx == k.caller {
        log::info!("[{}] exiting gracefully", caller_id);
    } else {
        log::info!("[{}] destroying {}", caller_id, k.st.envs.get(idx).id);
    }
    k.st.env_destroy(idx, k.cpu);
    Ok(0)
}

/// sys_yield - Give up the processor
///
/// The reschedule itself happens when the program returns to the kernel
/// with `Resume::Yield`.
pub fn sys_yield(_k: &mut SyscallContext<'_>) -> SyscallResult {
    Ok(0)
}

/// sys_page_alloc - Map a fresh zeroed page at `va` in `envid`
///
/// Any page already mapped there is unmapped first.
pub fn sys_page_alloc(k: &mut SyscallContext<'_>, envid: u64, va: u64, perm: u64) -> SyscallResult {
    let idx = lookup(k, envid)?;
    check_user_page(va)?;
    let flags = check_perm(perm)?;

    let KernelState { envs, mem, .. } = &mut *k.st;
    let pt = envs.get_mut(idx).pgdir.as_mut().ok_or(Error::BadEnv)?;
    let frame = mem.allocate_frame().ok_or(Error::NoMem)?;
    pt.insert(mem, page_of(va), frame, flags);
    log::debug!("[{}] page_alloc {:#010x} {:?}", envs.get(idx).id, va, flags);
    Ok(0)
}

/// sys_page_map - Map the page at `srcva` in `srcenv` at `dstva` in `dstenv`
///
/// Both environments see the same frame afterwards. Write permission can
/// only be granted if the source mapping is writable.
pub fn sys_page_map(
    k: &mut SyscallContext<'_>,
    srcenv: u64,
    srcva: u64,
    dstenv: u64,
    dstva: u64,
    perm: u64,
) -> SyscallResult {
    let src = lookup(k, srcenv)?;
    let dst = lookup(k, dstenv)?;
    check_user_page(srcva)?;
    check_user_page(dstva)?;

    let src_pte = k
        .st
        .pgdir(src)?
        .lookup(page_of(srcva))
        .ok_or(Error::Inval)?;
    let flags = check_perm(perm)?;
    if flags.contains(PageTableFlags::WRITABLE) && !src_pte.is_writable() {
        return Err(Error::Inval);
    }

    let KernelState { envs, mem, .. } = &mut *k.st;
    let pt = envs.get_mut(dst).pgdir.as_mut().ok_or(Error::BadEnv)?;
    let replaced = pt.lookup(page_of(dstva));

    if flags.contains(PTE_COW) {
        k.counters.record_cow_mark();
    } else if let Some(old) = replaced {
        let private_copy = flags.contains(PageTableFlags::WRITABLE) && !flags.contains(PTE_SHARE);
        if old.flags.contains(PTE_COW) && old.frame != src_pte.frame && private_copy {
            k.counters.record_copy();
        }
    }

    pt.insert(mem, page_of(dstva), src_pte.frame, flags);
    log::debug!(
        "page_map {}:{:#010x} -> {}:{:#010x} {:?}",
        envs.get(src).id,
        srcva,
        envs.get(dst).id,
        dstva,
        flags
    );
    Ok(0)
}

/// sys_page_unmap - Unmap the page at `va` in `envid`; no-op if unmapped
pub fn sys_page_unmap(k: &mut SyscallContext<'_>, envid: u64, va: u64) -> SyscallResult {
    let idx = lookup(k, envid)?;
    check_user_page(va)?;
    let KernelState { envs, mem, .. } = &mut *k.st;
    if let Some(pt) = envs.get_mut(idx).pgdir.as_mut() {
        pt.remove(mem, page_of(va));
    }
    Ok(0)
}

/// sys_exofork - Allocate a blank child environment
///
/// The child has an empty user address space, the caller's registers with
/// a zero result register, and stays `NotRunnable` until the caller
/// commits it with `sys_env_set_status`.
pub fn sys_exofork(k: &mut SyscallContext<'_>) -> SyscallResult {
    let (parent_id, tf, program) = {
        let parent = k.st.envs.get(k.caller);
        (parent.id, parent.tf, parent.program.clone())
    };

    let KernelState { envs, mem, .. } = &mut *k.st;
    let idx = envs.alloc(mem, parent_id)?;
    let child = envs.get_mut(idx);
    child.tf = tf;
    child.tf.regs[REG_RET] = 0;
    child.program = program;
    log::debug!("[{}] exofork -> {}", parent_id, child.id);
    Ok(child.id.as_u32() as u64)
}

/// sys_env_set_status - Move an environment between `Runnable` and
/// `NotRunnable`
///
/// Environments currently executing (or being torn down) cannot be changed.
pub fn sys_env_set_status(k: &mut SyscallContext<'_>, envid: u64, status: u64) -> SyscallResult {
    let status = match EnvStatus::from_raw(status) {
        Some(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
        _ => return Err(Error::Inval),
    };
    let idx = lookup(k, envid)?;
    let env = k.st.envs.get_mut(idx);
    if matches!(env.status, EnvStatus::Running | EnvStatus::Dying) {
        return Err(Error::Inval);
    }
    env.status = status;
    log::debug!("env {} -> {:?}", env.id, status);
    Ok(0)
}

/// sys_env_set_pgfault_upcall - Register the user page-fault entry point
pub fn sys_env_set_pgfault_upcall(k: &mut SyscallContext<'_>, envid: u64, func: u64) -> SyscallResult {
    let idx = lookup(k, envid)?;
    if !is_user(func) {
        return Err(Error::Inval);
    }
    k.st.envs.get_mut(idx).pgfault_upcall = Some(VirtAddr::new(func));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::memory::cow_stats::CowCounters;
    use crate::memory::layout::{PFTEMP, UTEXT, UTOP};
    use crate::memory::paging::{PTE_USER, PTE_UW};
    use crate::syscall::{dispatch, SyscallNumber};

    fn setup() -> (KernelState, CowCounters, usize) {
        let mut st = KernelState::new(&KernelConfig::default().with_envs(8).with_frames(64));
        let idx = st.envs.alloc(&mut st.mem, EnvId::default()).unwrap();
        st.envs.get_mut(idx).status = EnvStatus::Running;
        st.envs.get_mut(idx).cpunum = Some(0);
        st.cpus[0].current = Some(idx);
        (st, CowCounters::new(), idx)
    }

    fn call(st: &mut KernelState, counters: &CowCounters, caller: usize, nr: SyscallNumber, args: &[u64]) -> i64 {
        let mut full = [0u64; 5];
        full[..args.len()].copy_from_slice(args);
        let mut k = SyscallContext {
            st,
            counters,
            cpu: 0,
            caller,
        };
        dispatch(&mut k, nr as u64, full)
    }

    #[test]
    fn page_alloc_validates_address_and_permissions() {
        let (mut st, c, me) = setup();
        let uw = PTE_UW.bits();
        assert_eq!(call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTEXT, uw]), 0);
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTEXT + 1, uw]),
            Error::Inval.errno()
        );
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTOP, uw]),
            Error::Inval.errno()
        );
        // PRESENT without USER
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTEXT, 1]),
            Error::Inval.errno()
        );
        // bit outside the syscall mask
        let huge = (PTE_UW | PageTableFlags::HUGE_PAGE).bits();
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTEXT, huge]),
            Error::Inval.errno()
        );
    }

    #[test]
    fn page_map_refuses_to_upgrade_read_only_source() {
        let (mut st, c, me) = setup();
        call(&mut st, &c, me, SyscallNumber::PageAlloc, &[0, UTEXT, PTE_USER.bits()]);
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageMap, &[0, UTEXT, 0, PFTEMP, PTE_UW.bits()]),
            Error::Inval.errno()
        );
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageMap, &[0, UTEXT, 0, PFTEMP, PTE_USER.bits()]),
            0
        );
        let pt = st.pgdir(me).unwrap();
        assert_eq!(
            pt.lookup(page_of(UTEXT)).unwrap().frame,
            pt.lookup(page_of(PFTEMP)).unwrap().frame
        );
    }

    #[test]
    fn page_map_of_unmapped_source_is_invalid() {
        let (mut st, c, me) = setup();
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::PageMap, &[0, UTEXT, 0, PFTEMP, PTE_USER.bits()]),
            Error::Inval.errno()
        );
    }

    #[test]
    fn exofork_child_is_not_runnable_with_zero_result() {
        let (mut st, c, me) = setup();
        st.envs.get_mut(me).tf.regs[REG_RET] = 77;
        st.envs.get_mut(me).tf.pc = 0x42;
        let raw = call(&mut st, &c, me, SyscallNumber::Exofork, &[]);
        assert!(raw > 0);
        let child = EnvId::from_raw(raw as u32);
        let env = st.envs.get(child.index());
        assert_eq!(env.status, EnvStatus::NotRunnable);
        assert_eq!(env.parent_id, st.envs.get(me).id);
        assert_eq!(env.tf.regs[REG_RET], 0);
        assert_eq!(env.tf.pc, 0x42);
        assert_eq!(env.pgdir.as_ref().unwrap().len(), 0);
        assert_eq!(env.pgfault_upcall, None);
    }

    #[test]
    fn set_status_only_accepts_runnable_or_not_runnable() {
        let (mut st, c, me) = setup();
        let child = call(&mut st, &c, me, SyscallNumber::Exofork, &[]) as u64;
        for bad in [EnvStatus::Free, EnvStatus::Dying, EnvStatus::Running] {
            assert_eq!(
                call(&mut st, &c, me, SyscallNumber::EnvSetStatus, &[child, bad.as_raw()]),
                Error::Inval.errno()
            );
        }
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::EnvSetStatus, &[child, EnvStatus::Runnable.as_raw()]),
            0
        );
        assert_eq!(
            st.envs.get(EnvId::from_raw(child as u32).index()).status,
            EnvStatus::Runnable
        );
    }

    #[test]
    fn child_cannot_touch_parent() {
        let (mut st, c, me) = setup();
        let child = call(&mut st, &c, me, SyscallNumber::Exofork, &[]) as u64;
        let child_idx = EnvId::from_raw(child as u32).index();
        let parent = st.envs.get(me).id.as_u32() as u64;
        assert_eq!(
            call(&mut st, &c, child_idx, SyscallNumber::PageAlloc, &[parent, UTEXT, PTE_UW.bits()]),
            Error::BadEnv.errno()
        );
        assert_eq!(
            call(&mut st, &c, child_idx, SyscallNumber::EnvDestroy, &[parent]),
            Error::BadEnv.errno()
        );
    }

    #[test]
    fn cputs_of_unmapped_buffer_destroys_caller() {
        let (mut st, c, me) = setup();
        assert_eq!(
            call(&mut st, &c, me, SyscallNumber::Cputs, &[UTEXT, 4]),
            Error::Fault.errno()
        );
        assert_eq!(st.envs.get(me).status, EnvStatus::Free);
    }

    #[test]
    fn unknown_syscall_is_not_implemented() {
        let (mut st, c, me) = setup();
        let mut k = SyscallContext {
            st: &mut st,
            counters: &c,
            cpu: 0,
            caller: me,
        };
        assert_eq!(dispatch(&mut k, 99, [0; 5]), Error::NoSys.errno());
    }
}
