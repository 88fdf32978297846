//! Per-environment page tables
//!
//! Each environment owns a page table rooted at its own directory frame.
//! Only the user part of the address space (below `UTOP`) is stored here;
//! the kernel part is identical in every environment and never copied, so
//! it is not represented per table at all.
//!
//! Insert and remove keep frame reference counts exact: every present entry
//! holds exactly one reference on its frame.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use x86_64::structures::paging::{Page, PageTableFlags, PhysFrame};
use x86_64::VirtAddr;

use super::frame_allocator::PhysicalMemory;
use super::layout::{is_user, PAGE_SIZE};

/// A present page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub frame: PhysFrame,
    pub flags: PageTableFlags,
}

impl Pte {
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PageTableFlags::WRITABLE)
    }
}

pub struct ProcessPageTable {
    /// Frame holding the page directory
    root: PhysFrame,
    entries: BTreeMap<Page, Pte>,
}

impl ProcessPageTable {
    /// Takes ownership of one reference on `root`.
    pub fn new(root: PhysFrame) -> Self {
        Self {
            root,
            entries: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, page: Page) -> Option<Pte> {
        self.entries.get(&page).copied()
    }

    /// Map `frame` at `page` with `flags`, replacing whatever was there.
    ///
    /// Re-inserting the same frame at the same page only changes the
    /// permissions; the reference count is not disturbed.
    pub fn insert(
        &mut self,
        mem: &mut PhysicalMemory,
        page: Page,
        frame: PhysFrame,
        flags: PageTableFlags,
    ) {
        debug_assert!(
            is_user(page.start_address().as_u64()),
            "attempt to map kernel region at {:#x}",
            page.start_address().as_u64()
        );

        // Take the new reference before dropping the old one so that
        // remapping the sole reference of a frame cannot free it.
        mem.incref(frame);
        if let Some(old) = self.entries.insert(page, Pte { frame, flags }) {
            mem.decref(old.frame);
        }
        log::trace!(
            "map {:#x} -> frame {:#x} ({:?})",
            page.start_address().as_u64(),
            frame.start_address().as_u64(),
            flags
        );
    }

    /// Unmap `page`. Silently does nothing if it was not mapped.
    pub fn remove(&mut self, mem: &mut PhysicalMemory, page: Page) -> Option<Pte> {
        let old = self.entries.remove(&page)?;
        mem.decref(old.frame);
        Some(old)
    }

    /// Present mappings with `lo <= va < hi`, in ascending address order.
    pub fn mappings(&self, lo: VirtAddr, hi: VirtAddr) -> Vec<(Page, Pte)> {
        if lo >= hi {
            return Vec::new();
        }
        let lo = Page::containing_address(lo);
        let hi = Page::containing_address(hi - 1u64);
        self.entries.range(lo..=hi).map(|(&p, &e)| (p, e)).collect()
    }

    /// Copy `bytes` into the address space at `va` without permission
    /// checks. Fails with the first unmapped address.
    pub fn write_bytes(
        &self,
        mem: &mut PhysicalMemory,
        va: VirtAddr,
        bytes: &[u8],
    ) -> Result<(), VirtAddr> {
        let mut done = 0;
        while done < bytes.len() {
            let at = va + done as u64;
            let (frame, offset, n) = self.chunk(at, bytes.len() - done)?;
            mem.write(frame)[offset..offset + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy from the address space at `va` into `buf` without permission
    /// checks. Fails with the first unmapped address.
    pub fn read_bytes(
        &self,
        mem: &PhysicalMemory,
        va: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), VirtAddr> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done as u64;
            let (frame, offset, n) = self.chunk(at, buf.len() - done)?;
            buf[done..done + n].copy_from_slice(&mem.read(frame)[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// Frame, in-page offset and length of the part of an access of `len`
    /// bytes at `va` that falls in the page containing `va`.
    fn chunk(&self, va: VirtAddr, len: usize) -> Result<(PhysFrame, usize, usize), VirtAddr> {
        let page = Page::containing_address(va);
        let pte = self.lookup(page).ok_or(va)?;
        let offset = (va - page.start_address()) as usize;
        let n = len.min(PAGE_SIZE as usize - offset);
        Ok((pte.frame, offset, n))
    }

    /// Number of present user mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every user mapping and the directory frame itself.
    pub fn teardown(mut self, mem: &mut PhysicalMemory) -> usize {
        let unmapped = self.entries.len();
        for (_, pte) in core::mem::take(&mut self.entries) {
            mem.decref(pte.frame);
        }
        mem.decref(self.root);
        unmapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::paging::{PTE_USER, PTE_UW};
    use x86_64::structures::paging::FrameAllocator;

    fn page(va: u64) -> Page {
        Page::containing_address(VirtAddr::new(va))
    }

    fn table(mem: &mut PhysicalMemory) -> ProcessPageTable {
        let root = mem.allocate_frame().unwrap();
        mem.incref(root);
        ProcessPageTable::new(root)
    }

    #[test]
    fn replacing_a_mapping_releases_the_old_frame() {
        let mut mem = PhysicalMemory::new(16);
        let mut pt = table(&mut mem);
        let a = mem.allocate_frame().unwrap();
        let b = mem.allocate_frame().unwrap();
        let free_before = mem.free_frames();

        pt.insert(&mut mem, page(0x80_0000), a, PTE_UW);
        pt.insert(&mut mem, page(0x80_0000), b, PTE_UW);

        assert_eq!(mem.refcount(a), 0);
        assert_eq!(mem.refcount(b), 1);
        assert_eq!(mem.free_frames(), free_before + 1);
    }

    #[test]
    fn reinserting_same_frame_only_changes_permissions() {
        let mut mem = PhysicalMemory::new(16);
        let mut pt = table(&mut mem);
        let a = mem.allocate_frame().unwrap();
        pt.insert(&mut mem, page(0x80_0000), a, PTE_UW);
        pt.insert(&mut mem, page(0x80_0000), a, PTE_USER);

        assert_eq!(mem.refcount(a), 1);
        assert_eq!(pt.lookup(page(0x80_0000)).unwrap().flags, PTE_USER);
    }

    #[test]
    fn mappings_are_ascending_and_bounded() {
        let mut mem = PhysicalMemory::new(16);
        let mut pt = table(&mut mem);
        for va in [0x90_0000u64, 0x80_0000, 0x80_1000, 0xeebf_d000] {
            let f = mem.allocate_frame().unwrap();
            pt.insert(&mut mem, page(va), f, PTE_UW);
        }
        let got: Vec<u64> = pt
            .mappings(VirtAddr::new(0x80_0000), VirtAddr::new(0x90_0000))
            .iter()
            .map(|(p, _)| p.start_address().as_u64())
            .collect();
        assert_eq!(got, [0x80_0000, 0x80_1000]);
    }

    #[test]
    fn teardown_returns_every_frame() {
        let mut mem = PhysicalMemory::new(16);
        let initial = mem.free_frames();
        let mut pt = table(&mut mem);
        for i in 0..4 {
            let f = mem.allocate_frame().unwrap();
            pt.insert(&mut mem, page(0x80_0000 + i * 0x1000), f, PTE_UW);
        }
        assert_eq!(pt.teardown(&mut mem), 4);
        assert_eq!(mem.free_frames(), initial);
    }

    #[test]
    fn byte_copies_cross_page_boundaries() {
        let mut mem = PhysicalMemory::new(16);
        let mut pt = table(&mut mem);
        for va in [0x80_0000u64, 0x80_1000] {
            let f = mem.allocate_frame().unwrap();
            pt.insert(&mut mem, page(va), f, PTE_UW);
        }
        let data: Vec<u8> = (0..32).collect();
        pt.write_bytes(&mut mem, VirtAddr::new(0x80_0ff0), &data).unwrap();
        let mut back = [0u8; 32];
        pt.read_bytes(&mem, VirtAddr::new(0x80_0ff0), &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);

        let err = pt.write_bytes(&mut mem, VirtAddr::new(0x80_1ff8), &data);
        assert_eq!(err, Err(VirtAddr::new(0x80_2000)));
    }
}
