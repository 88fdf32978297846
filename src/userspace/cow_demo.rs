//! Copy-on-write isolation demo
//!
//! The parent stores `V`, forks, and waits. The child checks it reads `V`,
//! overwrites it with `V2` and exits. The parent must still read `V`.

use libenv::entry::{Main, PC_UMAIN};
use libenv::fork::{fork, ForkResult};
use libenv::memory::{read_u64, write_u64, DATA_BASE};
use libenv::process::{exit, wait, yield_now};
use libenv::{upanic, uprintln, EnvId, Resume, UserContext, UserError};

pub const V: u64 = 0x1111;
pub const V2: u64 = 0x2222;

const PC_PARENT_WAIT: u64 = 2;
const PC_CHILD: u64 = 3;

#[derive(Default)]
pub struct CowDemo;

impl Main for CowDemo {
    const NAME: &'static str = "cow_demo";

    fn data(&self) -> Vec<u8> {
        vec![0; 8]
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => {
                if read_u64(cx, DATA_BASE)? == 0 {
                    write_u64(cx, DATA_BASE, V)?;
                    uprintln!(cx, "parent: wrote {:x}", V)?;
                }
                match fork(cx)? {
                    ForkResult::Parent(child) => {
                        cx.tf_mut().regs[1] = child.as_u32() as u64;
                        cx.tf_mut().pc = PC_PARENT_WAIT;
                    }
                    ForkResult::Child => cx.tf_mut().pc = PC_CHILD,
                }
                Ok(Resume::Continue)
            }
            PC_PARENT_WAIT => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if !wait(cx, child) {
                    return yield_now(cx);
                }
                let seen = read_u64(cx, DATA_BASE)?;
                if seen != V {
                    upanic!("parent: child's write leaked, read {:x}", seen);
                }
                uprintln!(cx, "parent: still reads {:x}", seen)?;
                exit(cx)
            }
            PC_CHILD => {
                let seen = read_u64(cx, DATA_BASE)?;
                uprintln!(cx, "child: read {:x}", seen)?;
                write_u64(cx, DATA_BASE, V2)?;
                uprintln!(cx, "child: wrote {:x}", V2)?;
                exit(cx)
            }
            pc => upanic!("cow_demo: bad pc {}", pc),
        }
    }
}
