//! User-level page fault handling
//!
//! The kernel reflects a page fault by switching to the exception stack,
//! pushing a `UTrapframe`, and jumping to the upcall entry registered with
//! `sys_env_set_pgfault_upcall`. Every environment using this library
//! registers the same entry, [`PGFAULT_UPCALL`]; it reads the fault record
//! and calls the Rust handler recorded in the library's private page.
//!
//! Handlers are registered in a process-wide table and referred to by
//! index, so the choice of handler lives in user memory and is inherited by
//! forked children along with the rest of the address space.

use alloc::vec::Vec;
use spin::RwLock;

use crate::memory::{read_u64, uxstack_bottom, write_u64, PagePerm, PGFAULT_HANDLER, UTEXT};
use crate::syscall::{sys_env_set_pgfault_upcall, sys_page_alloc};
use kernel::task::context::UTrapframe;
use kernel::x86_64::VirtAddr;
use kernel::{EnvId, UserContext, UserError};

/// Upcall entry point shared by every environment
pub const PGFAULT_UPCALL: u64 = UTEXT + 0x10;

pub type PgfaultHandler = fn(&UTrapframe, &mut UserContext<'_>) -> Result<(), UserError>;

static HANDLERS: RwLock<Vec<PgfaultHandler>> = RwLock::new(Vec::new());

fn handler_index(handler: PgfaultHandler) -> usize {
    let mut table = HANDLERS.write();
    match table.iter().position(|&h| h as usize == handler as usize) {
        Some(idx) => idx,
        None => {
            table.push(handler);
            table.len() - 1
        }
    }
}

/// Install `handler` for this environment's page faults.
///
/// The first call allocates the exception stack and registers the upcall
/// with the kernel.
pub fn set_pgfault_handler(cx: &mut UserContext<'_>, handler: PgfaultHandler) -> Result<(), UserError> {
    let slot = handler_index(handler) as u64 + 1;
    let current = read_u64(cx, PGFAULT_HANDLER)?;
    if current == 0 {
        sys_page_alloc(cx, EnvId::SELF, uxstack_bottom(), PagePerm::Writable.flags())
            .map_err(|e| fatal("set_pgfault_handler: exception stack", e))?;
        sys_env_set_pgfault_upcall(cx, EnvId::SELF, PGFAULT_UPCALL)
            .map_err(|e| fatal("set_pgfault_handler: upcall", e))?;
    }
    if current != slot {
        write_u64(cx, PGFAULT_HANDLER, slot)?;
    }
    Ok(())
}

/// Code at [`PGFAULT_UPCALL`]: decode the fault record at the stack pointer
/// and run the installed handler.
pub fn upcall(entry: VirtAddr, cx: &mut UserContext<'_>) -> Result<(), UserError> {
    if entry.as_u64() != PGFAULT_UPCALL {
        return Err(UserError::Panic(alloc::format!(
            "jump to {:08x}: no code there",
            entry.as_u64()
        )));
    }

    let mut raw = [0u8; UTrapframe::SIZE];
    let sp = cx.tf().sp;
    cx.read(sp, &mut raw)?;
    let utf = UTrapframe::from_bytes(&raw);

    let slot = read_u64(cx, PGFAULT_HANDLER)? as usize;
    let handler = slot
        .checked_sub(1)
        .and_then(|idx| HANDLERS.read().get(idx).copied());
    match handler {
        Some(handler) => handler(&utf, cx),
        None => Err(UserError::Panic(alloc::format!(
            "page fault at va {:08x} with no handler installed",
            utf.fault_va.as_u64()
        ))),
    }
}

/// Turn a failed library syscall into a user panic naming the step.
pub(crate) fn fatal(what: &str, e: UserError) -> UserError {
    match e {
        UserError::Syscall(err) => UserError::Panic(alloc::format!("{}: {}", what, err)),
        other => other,
    }
}
