//! Physical frame pool
//!
//! A fixed number of 4 KiB frames, frame `n` living at physical address
//! `n * PAGE_SIZE`. Frame 0 is never handed out so a zero frame number can
//! never be confused with a valid mapping. Frame contents are materialised
//! lazily and zero-filled on every allocation.

use alloc::boxed::Box;
use alloc::vec::Vec;
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::PhysAddr;

use super::frame_metadata::FrameMetadata;
use super::layout::PAGE_SIZE;

type FrameData = Box<[u8; PAGE_SIZE as usize]>;

pub struct PhysicalMemory {
    frames: Vec<Option<FrameData>>,
    /// Free frame numbers; popped from the back, lowest number last pushed
    free_list: Vec<usize>,
    metadata: FrameMetadata,
}

pub fn frame_number(frame: PhysFrame) -> usize {
    (frame.start_address().as_u64() / PAGE_SIZE) as usize
}

pub fn frame_at(frame_no: usize) -> PhysFrame {
    PhysFrame::containing_address(PhysAddr::new(frame_no as u64 * PAGE_SIZE))
}

impl PhysicalMemory {
    pub fn new(nframes: usize) -> Self {
        let mut frames = Vec::with_capacity(nframes);
        frames.resize_with(nframes, || None);
        // Hand out low frames first
        let free_list = (1..nframes).rev().collect();
        log::info!("frame pool: {} frames ({} KiB)", nframes, nframes as u64 * PAGE_SIZE / 1024);
        Self {
            frames,
            free_list,
            metadata: FrameMetadata::new(nframes),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frames currently available for allocation
    pub fn free_frames(&self) -> usize {
        self.free_list.len()
    }

    pub fn refcount(&self, frame: PhysFrame) -> u32 {
        self.metadata.refcount(frame_number(frame))
    }

    pub fn is_shared(&self, frame: PhysFrame) -> bool {
        self.metadata.is_shared(frame_number(frame))
    }

    /// Record one more page table reference to `frame`.
    pub fn incref(&mut self, frame: PhysFrame) {
        self.metadata.incref(frame_number(frame));
    }

    /// Drop one page table reference, returning the frame to the pool when
    /// nothing points at it any more.
    pub fn decref(&mut self, frame: PhysFrame) {
        if self.metadata.decref(frame_number(frame)) {
            // SAFETY: the last reference is gone, nothing can reach the frame
            unsafe { self.deallocate_frame(frame) };
        }
    }

    pub fn read(&self, frame: PhysFrame) -> &[u8] {
        match &self.frames[frame_number(frame)] {
            Some(data) => &data[..],
            None => &ZERO_PAGE[..],
        }
    }

    pub fn write(&mut self, frame: PhysFrame) -> &mut [u8] {
        let slot = &mut self.frames[frame_number(frame)];
        &mut slot.get_or_insert_with(|| Box::new([0; PAGE_SIZE as usize]))[..]
    }

    /// Returns (referenced_frames, total_refcount)
    pub fn metadata_stats(&self) -> (usize, u64) {
        self.metadata.stats()
    }
}

static ZERO_PAGE: [u8; PAGE_SIZE as usize] = [0; PAGE_SIZE as usize];

unsafe impl FrameAllocator<Size4KiB> for PhysicalMemory {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let Some(frame_no) = self.free_list.pop() else {
            log::warn!("frame pool exhausted ({} frames)", self.frames.len());
            return None;
        };
        if let Some(data) = self.frames[frame_no].as_mut() {
            data.fill(0);
        }
        self.metadata.register(frame_no);
        log::trace!("allocated frame {:#x}", frame_no);
        Some(frame_at(frame_no))
    }
}

impl FrameDeallocator<Size4KiB> for PhysicalMemory {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        let frame_no = frame_number(frame);
        debug_assert!(frame_no != 0, "frame 0 is reserved");
        debug_assert!(!self.free_list.contains(&frame_no), "double free of frame {:#x}", frame_no);
        log::trace!("freed frame {:#x}", frame_no);
        self.free_list.push(frame_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_hands_out_frame_zero() {
        let mut mem = PhysicalMemory::new(4);
        let mut got = Vec::new();
        while let Some(frame) = mem.allocate_frame() {
            got.push(frame_number(frame));
        }
        assert_eq!(got, [1, 2, 3]);
        assert_eq!(mem.free_frames(), 0);
    }

    #[test]
    fn reallocated_frames_are_zeroed() {
        let mut mem = PhysicalMemory::new(4);
        let frame = mem.allocate_frame().unwrap();
        mem.incref(frame);
        mem.write(frame)[10] = 0xaa;
        mem.decref(frame);
        assert_eq!(mem.free_frames(), 3);

        let again = mem.allocate_frame().unwrap();
        assert_eq!(again, frame);
        assert!(mem.read(again).iter().all(|&b| b == 0));
    }

    #[test]
    fn shared_frame_survives_first_decref() {
        let mut mem = PhysicalMemory::new(4);
        let frame = mem.allocate_frame().unwrap();
        mem.incref(frame);
        mem.incref(frame);
        assert!(mem.is_shared(frame));
        mem.decref(frame);
        assert_eq!(mem.refcount(frame), 1);
        assert_eq!(mem.free_frames(), 2);
        mem.decref(frame);
        assert_eq!(mem.free_frames(), 3);
    }
}
