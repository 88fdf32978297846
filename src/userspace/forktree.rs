//! Binary process tree
//!
//! Every environment prints its position in the tree, then forks a `0`
//! child and a `1` child until the path reaches the configured depth. The
//! path lives in the data page and each child extends its own copy in
//! place, so every write to it is a copy-on-write fault.

use libenv::entry::{Main, PC_UMAIN};
use libenv::fork::{fork, ForkResult};
use libenv::memory::{read_str, write_str, DATA_BASE};
use libenv::process::{exit, getenvid};
use libenv::{upanic, uprintln, Resume, UserContext, UserError};

pub const DEFAULT_DEPTH: usize = 3;

/// Longest path the data page buffer holds
pub const MAX_DEPTH: usize = 32;

const PATH_BUF: usize = MAX_DEPTH + 1;

/// Fork the next child; the branch to fork is in `regs[1]`
const PC_FORK: u64 = 2;

pub struct ForkTree {
    depth: usize,
}

impl ForkTree {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.min(MAX_DEPTH),
        }
    }
}

impl Default for ForkTree {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

impl Main for ForkTree {
    const NAME: &'static str = "forktree";

    fn data(&self) -> Vec<u8> {
        vec![0; PATH_BUF]
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => {
                let path = read_str(cx, DATA_BASE, PATH_BUF)?;
                let me = getenvid(cx)?;
                uprintln!(cx, "{:04x}: I am '{}'", me, path)?;
                cx.tf_mut().regs[1] = 0;
                cx.tf_mut().pc = PC_FORK;
                Ok(Resume::Continue)
            }
            PC_FORK => {
                let branch = cx.tf().regs[1];
                let path = read_str(cx, DATA_BASE, PATH_BUF)?;
                if branch > 1 || path.len() >= self.depth {
                    return exit(cx);
                }
                match fork(cx)? {
                    ForkResult::Parent(_) => cx.tf_mut().regs[1] = branch + 1,
                    ForkResult::Child => {
                        let next = format!("{}{}", path, branch);
                        write_str(cx, DATA_BASE, &next)?;
                        cx.tf_mut().regs[1] = 0;
                        cx.tf_mut().pc = PC_UMAIN;
                    }
                }
                Ok(Resume::Continue)
            }
            pc => upanic!("forktree: bad pc {}", pc),
        }
    }
}
