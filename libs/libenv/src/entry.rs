//! Program entry and image layout
//!
//! A program is a state machine over its saved program counter. The library
//! owns state [`PC_LIBMAIN`], which records `thisenv` and continues at
//! [`PC_UMAIN`]; from there the program's own [`Main::step`] dispatches on
//! `cx.tf().pc` and moves it forward by assigning `cx.tf_mut().pc`.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::memory::{PagePerm, DATA_BASE, LIB_DATA, UTEXT};
use crate::pgfault;
use crate::process::{getenvid, set_thisenv};
use kernel::memory::layout::PAGE_SIZE;
use kernel::x86_64::VirtAddr;
use kernel::{Resume, Segment, UserContext, UserError, UserProgram};

/// Library start-up state
pub const PC_LIBMAIN: u64 = 0;
/// First state of the program proper
pub const PC_UMAIN: u64 = 1;

pub trait Main: Send + Sync + 'static {
    const NAME: &'static str;

    /// Initial contents of the data segment at [`DATA_BASE`].
    fn data(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Additional segments beyond text, data and the library page.
    fn segments(&self) -> Vec<Segment> {
        Vec::new()
    }

    /// Run one step of the program from `cx.tf().pc`.
    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError>;
}

/// Adapts a [`Main`] into a loadable [`UserProgram`].
pub struct Program<M>(M);

impl<M: Main> Program<M> {
    pub fn new(main: M) -> Arc<dyn UserProgram> {
        Arc::new(Program(main))
    }
}

fn libmain(cx: &mut UserContext<'_>) -> Result<(), UserError> {
    let me = getenvid(cx)?;
    set_thisenv(cx, me)?;
    log::debug!("[{}] libmain: {}", me, cx.program_name());
    Ok(())
}

impl<M: Main> UserProgram for Program<M> {
    fn name(&self) -> &str {
        M::NAME
    }

    fn segments(&self) -> Vec<Segment> {
        let mut segs = vec![Segment::new(
            UTEXT,
            M::NAME.as_bytes().to_vec(),
            PAGE_SIZE as usize,
            PagePerm::ReadOnly,
        )];
        let data = self.0.data();
        if !data.is_empty() {
            let size = data.len();
            segs.push(Segment::new(DATA_BASE, data, size, PagePerm::Writable));
        }
        segs.push(Segment::bss(LIB_DATA, PAGE_SIZE as usize, PagePerm::Writable));
        segs.extend(self.0.segments());
        segs
    }

    fn entry(&self) -> u64 {
        PC_LIBMAIN
    }

    fn resume(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        if cx.tf().pc == PC_LIBMAIN {
            libmain(cx)?;
            cx.tf_mut().pc = PC_UMAIN;
            return Ok(Resume::Continue);
        }
        self.0.step(cx)
    }

    fn upcall(&self, entry: VirtAddr, cx: &mut UserContext<'_>) -> Result<(), UserError> {
        pgfault::upcall(entry, cx)
    }
}
