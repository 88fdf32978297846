//! Environment creation from a program image
//!
//! The kernel-side loader: allocate an environment, map the program's
//! segments and a one-page user stack, point the saved registers at the
//! entry, and make it runnable.

use alloc::sync::Arc;
use x86_64::structures::paging::{FrameAllocator, Page};
use x86_64::VirtAddr;

use super::manager::EnvTable;
use super::process::{EnvId, EnvStatus};
use crate::memory::frame_allocator::PhysicalMemory;
use crate::memory::layout::{PAGE_SIZE, USTACKTOP, UTOP};
use crate::memory::paging::PagePerm;
use crate::memory::process_memory::ProcessPageTable;
use crate::per_cpu::CpuInfo;
use crate::syscall::errno::Error;
use crate::task::program::{Segment, UserProgram};

/// Create a runnable environment executing `program`.
pub fn env_create(
    envs: &mut EnvTable,
    mem: &mut PhysicalMemory,
    cpus: &mut [CpuInfo],
    program: Arc<dyn UserProgram>,
    parent: EnvId,
) -> Result<EnvId, Error> {
    let idx = envs.alloc(mem, parent)?;

    let loaded = {
        let env = envs.get_mut(idx);
        match env.pgdir.as_mut() {
            Some(pt) => load_image(pt, mem, &program.segments()),
            None => Err(Error::Unspecified),
        }
    };
    if let Err(e) = loaded {
        log::error!("env_create: loading '{}' failed: {}", program.name(), e);
        envs.free(mem, cpus, idx);
        return Err(e);
    }

    let env = envs.get_mut(idx);
    env.tf.pc = program.entry();
    env.tf.sp = USTACKTOP;
    env.status = EnvStatus::Runnable;
    log::info!("env {} loaded '{}'", env.id, program.name());
    env.program = Some(program);
    Ok(env.id)
}

fn load_image(
    pt: &mut ProcessPageTable,
    mem: &mut PhysicalMemory,
    segments: &[Segment],
) -> Result<(), Error> {
    for seg in segments {
        load_segment(pt, mem, seg)?;
    }

    // One page of normal user stack
    let stack = Segment::bss(USTACKTOP - PAGE_SIZE, PAGE_SIZE as usize, PagePerm::Writable);
    load_segment(pt, mem, &stack)
}

fn load_segment(
    pt: &mut ProcessPageTable,
    mem: &mut PhysicalMemory,
    seg: &Segment,
) -> Result<(), Error> {
    let end = seg.va.as_u64() + seg.mem_size as u64;
    if end > UTOP || end < seg.va.as_u64() {
        log::error!("segment {:#x}+{:#x} reaches into the kernel region", seg.va.as_u64(), seg.mem_size);
        return Err(Error::Inval);
    }
    if seg.mem_size == 0 {
        return Ok(());
    }

    let first = Page::containing_address(seg.va);
    let last = Page::containing_address(VirtAddr::new(end - 1));
    for page in Page::range_inclusive(first, last) {
        if pt.lookup(page).is_some() {
            continue;
        }
        let frame = mem.allocate_frame().ok_or(Error::NoMem)?;
        pt.insert(mem, page, frame, seg.perm.flags());
    }

    pt.write_bytes(mem, seg.va, &seg.bytes).map_err(|_| Error::Fault)
}
