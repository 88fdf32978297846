//! Environment table
//!
//! A fixed array of environment slots with a free list. Slot indices are
//! stable; environment ids add a generation on top so stale ids are
//! rejected after a slot is reused.

use alloc::vec::Vec;
use x86_64::structures::paging::FrameAllocator;

use super::process::{Env, EnvId, EnvStatus};
use crate::memory::frame_allocator::PhysicalMemory;
use crate::memory::process_memory::ProcessPageTable;
use crate::per_cpu::CpuInfo;
use crate::syscall::errno::Error;
use crate::task::context::TrapFrame;

/// Result of destroying an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destroyed {
    /// Reaped immediately
    Freed,
    /// Running on another processor; that processor reaps it
    Deferred,
}

pub struct EnvTable {
    envs: Vec<Env>,
    /// Free slots, next allocation popped from the back
    free_list: Vec<usize>,
}

impl EnvTable {
    pub fn new(nenv: usize) -> Self {
        let mut envs = Vec::with_capacity(nenv);
        envs.resize_with(nenv, Env::empty);
        // Slot 0 is handed out first
        let free_list = (0..nenv).rev().collect();
        Self { envs, free_list }
    }

    pub fn capacity(&self) -> usize {
        self.envs.len()
    }

    pub fn get(&self, idx: usize) -> &Env {
        &self.envs[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Env {
        &mut self.envs[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.envs.iter()
    }

    /// Number of slots in one of the given states.
    pub fn count(&self, pred: impl Fn(EnvStatus) -> bool) -> usize {
        self.envs.iter().filter(|e| pred(e.status)).count()
    }

    /// Resolve `id` to a slot.
    ///
    /// Id 0 means `caller`. With `checkperm`, the target must be the caller
    /// itself or one of its immediate children.
    pub fn envid2env(
        &self,
        id: EnvId,
        caller: Option<usize>,
        checkperm: bool,
    ) -> Result<usize, Error> {
        if id.is_self() {
            return caller.ok_or(Error::BadEnv);
        }

        let idx = id.index();
        let env = self.envs.get(idx).ok_or(Error::BadEnv)?;
        if env.status == EnvStatus::Free || env.id != id {
            return Err(Error::BadEnv);
        }

        if checkperm {
            let caller = caller.ok_or(Error::BadEnv)?;
            if idx != caller && env.parent_id != self.envs[caller].id {
                return Err(Error::BadEnv);
            }
        }
        Ok(idx)
    }

    /// Allocate an environment with a fresh, empty address space.
    ///
    /// The new environment is `NotRunnable` with zeroed registers.
    pub fn alloc(&mut self, mem: &mut PhysicalMemory, parent: EnvId) -> Result<usize, Error> {
        let idx = *self.free_list.last().ok_or(Error::NoFreeEnv)?;
        let root = mem.allocate_frame().ok_or(Error::NoMem)?;
        mem.incref(root);
        self.free_list.pop();

        let env = &mut self.envs[idx];
        env.id = env.id.next_generation(idx);
        env.parent_id = parent;
        env.status = EnvStatus::NotRunnable;
        env.tf = TrapFrame::default();
        env.pgdir = Some(ProcessPageTable::new(root));
        env.pgfault_upcall = None;
        env.in_upcall = false;
        env.cpunum = None;
        env.runs = 0;
        env.pgfault_upcalls = 0;
        env.program = None;

        log::info!("[{}] new env {}", parent, env.id);
        Ok(idx)
    }

    /// Reap an environment: release its address space and return the slot
    /// to the free list. Freeing a free slot does nothing.
    pub fn free(&mut self, mem: &mut PhysicalMemory, cpus: &mut [CpuInfo], idx: usize) {
        let env = &mut self.envs[idx];
        if env.status == EnvStatus::Free {
            return;
        }

        let unmapped = env.pgdir.take().map_or(0, |pt| pt.teardown(mem));
        log::info!("[{}] free env {} ({} pages)", env.parent_id, env.id, unmapped);

        env.status = EnvStatus::Free;
        env.program = None;
        env.pgfault_upcall = None;
        env.in_upcall = false;
        env.cpunum = None;

        for cpu in cpus.iter_mut().filter(|c| c.current == Some(idx)) {
            cpu.current = None;
        }
        self.free_list.push(idx);
    }

    /// Destroy an environment on behalf of processor `cpu`.
    ///
    /// If it is executing on a different processor it is only marked
    /// `Dying`; that processor reaps it the next time it enters the kernel.
    pub fn destroy(
        &mut self,
        mem: &mut PhysicalMemory,
        cpus: &mut [CpuInfo],
        idx: usize,
        cpu: usize,
    ) -> Destroyed {
        let env = &mut self.envs[idx];
        let elsewhere = env.cpunum.is_some_and(|c| c != cpu);
        if elsewhere && matches!(env.status, EnvStatus::Running | EnvStatus::Dying) {
            log::debug!("env {} running on cpu {:?}, marking dying", env.id, env.cpunum);
            env.status = EnvStatus::Dying;
            return Destroyed::Deferred;
        }
        self.free(mem, cpus, idx);
        Destroyed::Freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(nenv: usize) -> (EnvTable, PhysicalMemory, Vec<CpuInfo>) {
        (
            EnvTable::new(nenv),
            PhysicalMemory::new(64),
            (0..2).map(CpuInfo::new).collect(),
        )
    }

    #[test]
    fn alloc_hands_out_lowest_slot_first() {
        let (mut envs, mut mem, _) = setup(4);
        let a = envs.alloc(&mut mem, EnvId::default()).unwrap();
        let b = envs.alloc(&mut mem, EnvId::default()).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(envs.get(a).id.as_u32(), 0x1000);
        assert_eq!(envs.get(b).id.as_u32(), 0x1001);
        assert_eq!(envs.get(a).status, EnvStatus::NotRunnable);
    }

    #[test]
    fn table_exhaustion_reports_no_free_env() {
        let (mut envs, mut mem, _) = setup(2);
        envs.alloc(&mut mem, EnvId::default()).unwrap();
        envs.alloc(&mut mem, EnvId::default()).unwrap();
        assert_eq!(envs.alloc(&mut mem, EnvId::default()), Err(Error::NoFreeEnv));
    }

    #[test]
    fn stale_id_is_rejected_after_reuse() {
        let (mut envs, mut mem, mut cpus) = setup(4);
        let idx = envs.alloc(&mut mem, EnvId::default()).unwrap();
        let old = envs.get(idx).id;
        envs.free(&mut mem, &mut cpus, idx);
        assert_eq!(envs.envid2env(old, None, false), Err(Error::BadEnv));

        let again = envs.alloc(&mut mem, EnvId::default()).unwrap();
        assert_eq!(again, idx);
        assert_ne!(envs.get(again).id, old);
        assert_eq!(envs.envid2env(old, None, false), Err(Error::BadEnv));
        assert_eq!(envs.envid2env(envs.get(again).id, None, false), Ok(idx));
    }

    #[test]
    fn checkperm_allows_self_and_children_only() {
        let (mut envs, mut mem, _) = setup(4);
        let parent = envs.alloc(&mut mem, EnvId::default()).unwrap();
        let parent_id = envs.get(parent).id;
        let child = envs.alloc(&mut mem, parent_id).unwrap();
        let stranger = envs.alloc(&mut mem, EnvId::default()).unwrap();
        let child_id = envs.get(child).id;

        assert_eq!(envs.envid2env(EnvId::SELF, Some(child), true), Ok(child));
        assert_eq!(envs.envid2env(child_id, Some(parent), true), Ok(child));
        assert_eq!(envs.envid2env(child_id, Some(stranger), true), Err(Error::BadEnv));
        assert_eq!(envs.envid2env(parent_id, Some(child), true), Err(Error::BadEnv));
        assert_eq!(envs.envid2env(parent_id, Some(child), false), Ok(parent));
    }

    #[test]
    fn destroy_running_elsewhere_defers_to_owner() {
        let (mut envs, mut mem, mut cpus) = setup(4);
        let idx = envs.alloc(&mut mem, EnvId::default()).unwrap();
        envs.get_mut(idx).status = EnvStatus::Running;
        envs.get_mut(idx).cpunum = Some(1);
        cpus[1].current = Some(idx);

        assert_eq!(envs.destroy(&mut mem, &mut cpus, idx, 0), Destroyed::Deferred);
        assert_eq!(envs.get(idx).status, EnvStatus::Dying);
        // A second request from another processor must not free it either
        assert_eq!(envs.destroy(&mut mem, &mut cpus, idx, 0), Destroyed::Deferred);

        assert_eq!(envs.destroy(&mut mem, &mut cpus, idx, 1), Destroyed::Freed);
        assert_eq!(envs.get(idx).status, EnvStatus::Free);
        assert_eq!(cpus[1].current, None);
    }

    #[test]
    fn free_releases_directory_frame() {
        let (mut envs, mut mem, mut cpus) = setup(4);
        let initial = mem.free_frames();
        let idx = envs.alloc(&mut mem, EnvId::default()).unwrap();
        assert_eq!(mem.free_frames(), initial - 1);
        envs.free(&mut mem, &mut cpus, idx);
        envs.free(&mut mem, &mut cpus, idx);
        assert_eq!(mem.free_frames(), initial);
    }
}
