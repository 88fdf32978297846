//! Copy-on-write fork
//!
//! Built entirely in user space from `sys_exofork`, `sys_page_map`,
//! `sys_page_alloc` and the page-fault upcall. The parent shares every
//! page of its address space with the child: `PTE_SHARE` pages stay shared
//! as they are, writable and copy-on-write pages become copy-on-write in
//! both, and read-only pages are shared read-only. The first write to a
//! copy-on-write page in either environment faults into [`pgfault`], which
//! gives the writer a private copy.
//!
//! The child starts with the parent's registers, so it re-enters the
//! program step that called `fork`. Anything the step does before calling
//! `fork` runs again in the child.

use alloc::vec;

use crate::memory::{page_round_down, uxstack_bottom, PagePerm, PFTEMP, USTACKTOP, UTEXT};
use crate::pgfault::{fatal, set_pgfault_handler, PGFAULT_UPCALL};
use crate::process::{set_thisenv, thisenv};
use crate::syscall::{
    sys_env_set_pgfault_upcall, sys_env_set_status, sys_exofork, sys_getenvid, sys_page_alloc,
    sys_page_map, sys_page_unmap,
};
use kernel::memory::layout::PAGE_SIZE;
use kernel::memory::process_memory::Pte;
use kernel::task::context::UTrapframe;
use kernel::x86_64::structures::idt::PageFaultErrorCode;
use kernel::{EnvId, EnvStatus, Error, UserContext, UserError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// Returned in the parent, with the new child's id
    Parent(EnvId),
    /// Returned in the child
    Child,
}

/// Page-fault handler that resolves writes to copy-on-write pages.
///
/// Any other fault is fatal for the environment.
pub fn pgfault(utf: &UTrapframe, cx: &mut UserContext<'_>) -> Result<(), UserError> {
    let va = utf.fault_va.as_u64();
    let is_cow = cx
        .uvpt(va)
        .is_some_and(|pte| PagePerm::from_flags(pte.flags) == Some(PagePerm::CopyOnWrite));
    if !utf.err.contains(PageFaultErrorCode::CAUSED_BY_WRITE) || !is_cow {
        return Err(UserError::Panic(alloc::format!(
            "pgfault: va {:08x} err {:?} ip {:08x} is not a write to a copy-on-write page",
            va,
            utf.err,
            utf.pc
        )));
    }

    let page = page_round_down(va);
    let rw = PagePerm::Writable.flags();
    let mut buf = vec![0u8; PAGE_SIZE as usize];
    sys_page_alloc(cx, EnvId::SELF, PFTEMP, rw).map_err(|e| fatal("pgfault: sys_page_alloc", e))?;
    cx.read(page, &mut buf)?;
    cx.write(PFTEMP, &buf)?;
    sys_page_map(cx, EnvId::SELF, PFTEMP, EnvId::SELF, page, rw)
        .map_err(|e| fatal("pgfault: sys_page_map", e))?;
    sys_page_unmap(cx, EnvId::SELF, PFTEMP).map_err(|e| fatal("pgfault: sys_page_unmap", e))?;
    log::trace!("[{}] copied cow page {:08x}", cx.env_id(), page);
    Ok(())
}

/// Map our page at `va` into `child` according to its kind.
fn duppage(cx: &mut UserContext<'_>, child: EnvId, va: u64, pte: Pte) -> Result<(), UserError> {
    let result = match PagePerm::from_flags(pte.flags) {
        Some(shared @ PagePerm::Shared { .. }) => {
            sys_page_map(cx, EnvId::SELF, va, child, va, shared.flags())
        }
        Some(PagePerm::Writable | PagePerm::CopyOnWrite) => {
            // The child's mapping must exist before ours turns copy-on-write
            let cow = PagePerm::CopyOnWrite.flags();
            sys_page_map(cx, EnvId::SELF, va, child, va, cow)
                .and_then(|()| sys_page_map(cx, EnvId::SELF, va, EnvId::SELF, va, cow))
        }
        Some(PagePerm::ReadOnly) => {
            sys_page_map(cx, EnvId::SELF, va, child, va, PagePerm::ReadOnly.flags())
        }
        None => return Ok(()),
    };
    result.map_err(|e| fatal("duppage", e))
}

/// Create a child environment with a copy-on-write copy of our address
/// space.
///
/// Must be the first thing the calling program step does that the child
/// should not repeat. Any failure is fatal to the caller; a half-built child
/// is left `NotRunnable` and is reclaimed when the caller is destroyed.
pub fn fork(cx: &mut UserContext<'_>) -> Result<ForkResult, UserError> {
    let me = sys_getenvid(cx)?;
    if thisenv(cx)? != me {
        set_thisenv(cx, me)?;
        return Ok(ForkResult::Child);
    }

    set_pgfault_handler(cx, pgfault)?;
    let child = sys_exofork(cx).map_err(|e| fatal("sys_exofork", e))?;

    for (va, pte) in cx.uvpt_range(UTEXT, USTACKTOP) {
        duppage(cx, child, va.as_u64(), pte)?;
    }

    sys_page_alloc(cx, child, uxstack_bottom(), PagePerm::Writable.flags())
        .map_err(|e| fatal("fork: child exception stack", e))?;
    sys_env_set_pgfault_upcall(cx, child, PGFAULT_UPCALL).map_err(|e| fatal("fork: child upcall", e))?;
    sys_env_set_status(cx, child, EnvStatus::Runnable).map_err(|e| fatal("fork: child status", e))?;

    log::debug!("[{}] forked {}", me, child);
    Ok(ForkResult::Parent(child))
}

/// Shared-memory fork. Not implemented.
pub fn sfork(_cx: &mut UserContext<'_>) -> Result<ForkResult, UserError> {
    Err(UserError::Syscall(Error::NoSys))
}
