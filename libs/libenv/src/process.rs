//! Environment lifecycle helpers

use crate::memory::{read_u64, write_u64, THISENV};
use crate::syscall::{sys_env_destroy, sys_getenvid, sys_yield};
use kernel::{EnvId, EnvStatus, Resume, UserContext, UserError};

/// The id the library recorded for this environment.
pub fn thisenv(cx: &mut UserContext<'_>) -> Result<EnvId, UserError> {
    read_u64(cx, THISENV).map(|raw| EnvId::from_raw(raw as u32))
}

pub(crate) fn set_thisenv(cx: &mut UserContext<'_>, id: EnvId) -> Result<(), UserError> {
    write_u64(cx, THISENV, id.as_u32() as u64)
}

/// Get this environment's id from the kernel.
pub fn getenvid(cx: &mut UserContext<'_>) -> Result<EnvId, UserError> {
    sys_getenvid(cx)
}

/// Exit the current environment.
///
/// Return the result straight from the program step.
pub fn exit(cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
    match sys_env_destroy(cx, EnvId::SELF) {
        Ok(()) | Err(UserError::Destroyed) => Ok(Resume::Exit),
        Err(e) => Err(e),
    }
}

/// Yield the CPU to the scheduler.
pub fn yield_now(cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
    sys_yield(cx)?;
    Ok(Resume::Yield)
}

/// Check whether environment `id` has finished.
///
/// Callers poll from the same step, yielding in between:
///
/// ```rust,ignore
/// if !wait(cx, child) {
///     return yield_now(cx);
/// }
/// ```
pub fn wait(cx: &UserContext<'_>, id: EnvId) -> bool {
    match cx.env_info(id) {
        Some(info) => info.id != id || info.status == EnvStatus::Free,
        None => true,
    }
}
