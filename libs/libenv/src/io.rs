//! Console output

use crate::memory::{PRINTBUF, PRINTBUF_SIZE};
use crate::syscall::sys_cputs;
use kernel::{UserContext, UserError};

/// Write `s` to the console.
///
/// The text is staged in the library's print buffer in user memory and
/// handed to the kernel from there, one buffer's worth at a time.
pub fn cputs(cx: &mut UserContext<'_>, s: &str) -> Result<(), UserError> {
    for chunk in s.as_bytes().chunks(PRINTBUF_SIZE) {
        cx.write(PRINTBUF, chunk)?;
        sys_cputs(cx, PRINTBUF, chunk.len())?;
    }
    Ok(())
}
