//! Kernel instance and the state behind the big kernel lock

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::structures::paging::PageTableFlags;
use x86_64::VirtAddr;

use crate::config::KernelConfig;
use crate::console::Console;
use crate::interrupts::PageFault;
use crate::memory::cow_stats::{CowCounters, CowStats};
use crate::memory::frame_allocator::PhysicalMemory;
use crate::memory::layout::{page_of, PAGE_SIZE, UTOP};
use crate::memory::process_memory::{ProcessPageTable, Pte};
use crate::per_cpu::{CpuInfo, MAX_CPUS};
use crate::process::creation::env_create;
use crate::process::{Destroyed, EnvId, EnvInfo, EnvStatus, EnvTable};
use crate::spinlock::{BigKernelLock, KernelGuard};
use crate::syscall::errno::Error;
use crate::task::program::UserProgram;

/// Lock holder id used by the host (boot code, inspection, tests).
pub const HOST_CPU: usize = MAX_CPUS;

/// Everything guarded by the big kernel lock.
pub struct KernelState {
    pub envs: EnvTable,
    pub mem: PhysicalMemory,
    pub cpus: Vec<CpuInfo>,
    pub console: Console,
}

impl KernelState {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            envs: EnvTable::new(config.nenv),
            mem: PhysicalMemory::new(config.nframes),
            cpus: (0..config.ncpu).map(CpuInfo::new).collect(),
            console: Console::new(),
        }
    }

    pub fn env_create(
        &mut self,
        program: Arc<dyn UserProgram>,
        parent: EnvId,
    ) -> Result<EnvId, Error> {
        env_create(&mut self.envs, &mut self.mem, &mut self.cpus, program, parent)
    }

    pub fn env_destroy(&mut self, idx: usize, cpu: usize) -> Destroyed {
        self.envs.destroy(&mut self.mem, &mut self.cpus, idx, cpu)
    }

    pub fn env_free(&mut self, idx: usize) {
        self.envs.free(&mut self.mem, &mut self.cpus, idx)
    }

    pub fn pgdir(&self, idx: usize) -> Result<&ProcessPageTable, Error> {
        self.envs.get(idx).pgdir.as_ref().ok_or(Error::BadEnv)
    }

    /// Check that environment `idx` may access `[va, va+len)`.
    ///
    /// On failure, returns the page fault the access raises at the first
    /// offending address.
    pub fn user_mem_check(
        &self,
        idx: usize,
        va: u64,
        len: usize,
        write: bool,
    ) -> Result<(), PageFault> {
        if len == 0 {
            return Ok(());
        }
        let mut err = PageFaultErrorCode::USER_MODE;
        if write {
            err |= PageFaultErrorCode::CAUSED_BY_WRITE;
        }

        let end = va.checked_add(len as u64).unwrap_or(u64::MAX);
        let mut at = va;
        while at < end {
            if at >= UTOP {
                // Kernel region: present but not user accessible
                return Err(PageFault::new(at, err | PageFaultErrorCode::PROTECTION_VIOLATION));
            }
            let pte = self.pgdir(idx).ok().and_then(|pt| pt.lookup(page_of(at)));
            match pte {
                None => return Err(PageFault::new(at, err)),
                Some(pte) if !user_allows(&pte, write) => {
                    return Err(PageFault::new(at, err | PageFaultErrorCode::PROTECTION_VIOLATION))
                }
                Some(_) => {}
            }
            at = (at & !(PAGE_SIZE - 1)) + PAGE_SIZE;
        }
        Ok(())
    }

    /// Copy from user memory, as environment `idx` would read it.
    pub fn user_copy_in(&self, idx: usize, va: u64, buf: &mut [u8]) -> Result<(), PageFault> {
        self.user_mem_check(idx, va, buf.len(), false)?;
        let pt = self.pgdir(idx).map_err(|_| PageFault::new(va, PageFaultErrorCode::USER_MODE))?;
        pt.read_bytes(&self.mem, VirtAddr::new(va), buf)
            .map_err(|at| PageFault::new(at.as_u64(), PageFaultErrorCode::USER_MODE))
    }

    /// Copy into user memory, as environment `idx` would write it.
    pub fn user_copy_out(&mut self, idx: usize, va: u64, data: &[u8]) -> Result<(), PageFault> {
        self.user_mem_check(idx, va, data.len(), true)?;
        let KernelState { envs, mem, .. } = self;
        let write_err = PageFaultErrorCode::USER_MODE | PageFaultErrorCode::CAUSED_BY_WRITE;
        let pt = envs.get(idx).pgdir.as_ref().ok_or(PageFault::new(va, write_err))?;
        pt.write_bytes(mem, VirtAddr::new(va), data)
            .map_err(|at| PageFault::new(at.as_u64(), write_err))
    }
}

fn user_allows(pte: &Pte, write: bool) -> bool {
    pte.flags.contains(PageTableFlags::USER_ACCESSIBLE) && (!write || pte.is_writable())
}

/// One kernel instance: configuration, the locked state, and counters.
pub struct Kernel {
    config: KernelConfig,
    state: BigKernelLock<KernelState>,
    counters: CowCounters,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Result<Self, Error> {
        config.validate()?;
        log::info!(
            "kernel: {} envs, {} cpus, {} frames, quantum {}",
            config.nenv,
            config.ncpu,
            config.nframes,
            config.quantum
        );
        Ok(Self {
            state: BigKernelLock::new(KernelState::new(&config)),
            config,
            counters: CowCounters::new(),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Take the big kernel lock on behalf of `cpu`.
    pub fn lock(&self, cpu: usize) -> KernelGuard<'_, KernelState> {
        self.state.lock(cpu)
    }

    pub(crate) fn counters(&self) -> &CowCounters {
        &self.counters
    }

    pub fn stats(&self) -> CowStats {
        self.counters.snapshot()
    }

    /// Create a runnable environment with no parent.
    pub fn create_env(&self, program: Arc<dyn UserProgram>) -> Result<EnvId, Error> {
        self.lock(HOST_CPU).env_create(program, EnvId::default())
    }

    /// Snapshot of the slot `id` refers to, if that environment exists.
    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        let st = self.lock(HOST_CPU);
        let idx = st.envs.envid2env(id, None, false).ok()?;
        Some(st.envs.get(idx).info())
    }

    /// Snapshots of every allocated environment, in slot order.
    pub fn live_envs(&self) -> Vec<EnvInfo> {
        let st = self.lock(HOST_CPU);
        st.envs
            .iter()
            .filter(|e| e.status != EnvStatus::Free)
            .map(|e| e.info())
            .collect()
    }

    /// Present user mappings of environment `id`, ascending.
    pub fn mappings(&self, id: EnvId) -> Option<Vec<(VirtAddr, Pte)>> {
        let st = self.lock(HOST_CPU);
        let idx = st.envs.envid2env(id, None, false).ok()?;
        let pt = st.pgdir(idx).ok()?;
        Some(
            pt.mappings(VirtAddr::new(0), VirtAddr::new(UTOP))
                .into_iter()
                .map(|(page, pte)| (page.start_address(), pte))
                .collect(),
        )
    }

    pub fn free_frames(&self) -> usize {
        self.lock(HOST_CPU).mem.free_frames()
    }

    pub fn console_output(&self) -> String {
        String::from(self.lock(HOST_CPU).console.contents())
    }

    pub fn console_lines(&self) -> Vec<String> {
        self.lock(HOST_CPU).console.lines()
    }
}
