//! Frame metadata for reference counting
//!
//! Every physical frame in the pool has a reference count: the number of
//! page table entries, across all environments, that point at it. Mapping a
//! frame increments the count, unmapping decrements it, and the frame goes
//! back to the free list when the count drops to zero. A count above one
//! means the frame is shared, either through copy-on-write or an explicit
//! shared mapping.

use alloc::vec;
use alloc::vec::Vec;

/// Reference counts indexed by frame number.
#[derive(Debug)]
pub struct FrameMetadata {
    refcount: Vec<u32>,
}

impl FrameMetadata {
    pub fn new(nframes: usize) -> Self {
        Self {
            refcount: vec![0; nframes],
        }
    }

    /// Reset a freshly allocated frame to refcount 0
    pub fn register(&mut self, frame_no: usize) {
        self.refcount[frame_no] = 0;
    }

    /// Increment reference count for a frame
    /// Called for every new page table entry pointing at the frame
    pub fn incref(&mut self, frame_no: usize) -> u32 {
        let count = &mut self.refcount[frame_no];
        *count += 1;
        *count
    }

    /// Decrement reference count for a frame
    /// Returns true if frame can be freed (refcount reached 0)
    pub fn decref(&mut self, frame_no: usize) -> bool {
        let count = &mut self.refcount[frame_no];
        match *count {
            0 => {
                // This shouldn't happen - underflow protection
                log::error!("frame_decref: underflow for frame {:#x}", frame_no);
                false
            }
            1 => {
                *count = 0;
                true
            }
            _ => {
                *count -= 1;
                false
            }
        }
    }

    pub fn refcount(&self, frame_no: usize) -> u32 {
        self.refcount[frame_no]
    }

    /// Check if a frame is shared (refcount > 1)
    pub fn is_shared(&self, frame_no: usize) -> bool {
        self.refcount(frame_no) > 1
    }

    /// Returns (referenced_frames, total_refcount)
    pub fn stats(&self) -> (usize, u64) {
        let referenced = self.refcount.iter().filter(|&&c| c > 0).count();
        let total = self.refcount.iter().map(|&c| c as u64).sum();
        (referenced, total)
    }
}
