//! Saved register state
//!
//! [`TrapFrame`] is what the kernel saves on every entry from user mode and
//! restores when the environment runs again. [`UTrapframe`] is the record
//! pushed onto the user exception stack when a page fault is reflected to
//! user space; its byte layout is part of the user ABI.

use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::VirtAddr;

/// Number of general purpose registers
pub const NREGS: usize = 8;
/// Register carrying syscall and fork return values
pub const REG_RET: usize = 0;
/// Frame pointer register
pub const REG_FP: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: [u64; NREGS],
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
}

/// Fault record delivered to a user page-fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: VirtAddr,
    pub err: PageFaultErrorCode,
    pub regs: [u64; NREGS],
    pub pc: u64,
    pub sp: u64,
}

impl UTrapframe {
    /// Encoded size: fault_va, err, regs, pc, sp as little-endian words
    pub const SIZE: usize = 8 * (NREGS + 4);

    pub fn new(fault_va: VirtAddr, err: PageFaultErrorCode, tf: &TrapFrame) -> Self {
        Self {
            fault_va,
            err,
            regs: tf.regs,
            pc: tf.pc,
            sp: tf.sp,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let words = [self.fault_va.as_u64(), self.err.bits()]
            .into_iter()
            .chain(self.regs)
            .chain([self.pc, self.sp]);
        for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u64; NREGS + 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw);
        }
        let mut regs = [0u64; NREGS];
        regs.copy_from_slice(&words[2..2 + NREGS]);
        Self {
            fault_va: VirtAddr::new_truncate(words[0]),
            err: PageFaultErrorCode::from_bits_truncate(words[1]),
            regs,
            pc: words[NREGS + 2],
            sp: words[NREGS + 3],
        }
    }

    /// Registers as the trampoline restores them after the handler returns.
    pub fn restore(&self) -> TrapFrame {
        TrapFrame {
            regs: self.regs,
            pc: self.pc,
            sp: self.sp,
        }
    }
}
