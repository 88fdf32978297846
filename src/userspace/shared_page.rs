//! Shared page demo
//!
//! A page mapped with `PTE_SHARE` is not copied by fork: the child writes a
//! value into it and the parent, once the child is gone, reads it back.

use libenv::entry::{Main, PC_UMAIN};
use libenv::fork::{fork, ForkResult};
use libenv::memory::{read_u64, write_u64, PagePerm, HEAP_BASE};
use libenv::process::{exit, wait, yield_now};
use libenv::{upanic, uprintln, EnvId, Resume, Segment, UserContext, UserError};

pub const SHARED_VA: u64 = HEAP_BASE;
pub const CHILD_VALUE: u64 = 0xbeef;

const PC_PARENT_WAIT: u64 = 2;

#[derive(Default)]
pub struct SharedPage;

impl Main for SharedPage {
    const NAME: &'static str = "shared_page";

    fn segments(&self) -> Vec<Segment> {
        vec![Segment::bss(SHARED_VA, 4096, PagePerm::Shared { writable: true })]
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => match fork(cx)? {
                ForkResult::Parent(child) => {
                    cx.tf_mut().regs[1] = child.as_u32() as u64;
                    cx.tf_mut().pc = PC_PARENT_WAIT;
                    Ok(Resume::Continue)
                }
                ForkResult::Child => {
                    write_u64(cx, SHARED_VA, CHILD_VALUE)?;
                    uprintln!(cx, "child: wrote {:x} to shared page", CHILD_VALUE)?;
                    exit(cx)
                }
            },
            PC_PARENT_WAIT => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if !wait(cx, child) {
                    return yield_now(cx);
                }
                let seen = read_u64(cx, SHARED_VA)?;
                uprintln!(cx, "parent: shared page holds {:x}", seen)?;
                exit(cx)
            }
            pc => upanic!("shared_page: bad pc {}", pc),
        }
    }
}
