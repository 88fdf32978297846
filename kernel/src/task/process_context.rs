//! User execution context
//!
//! [`UserContext`] is what a user program holds while it runs on a
//! processor: its live registers and the only doors into the kernel.
//! Memory accesses go through [`UserContext::read`] and
//! [`UserContext::write`], which raise page faults exactly where the
//! environment's page table says they would. A fault the environment has
//! registered an upcall for runs that upcall on the exception stack and then
//! retries the access.
//!
//! Every entry takes the big kernel lock and first checks that the
//! environment still exists. One destroyed from another processor is reaped
//! here, and the program sees [`UserError::Destroyed`].

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use x86_64::structures::paging::Page;
use x86_64::VirtAddr;

use crate::interrupts::{page_fault_handler, upcall_return, utf_addr, FaultOutcome, PageFault};
use crate::memory::layout::{page_of, UTOP};
use crate::memory::process_memory::Pte;
use crate::process::{EnvId, EnvInfo, EnvStatus};
use crate::spinlock::KernelGuard;
use crate::state::{Kernel, KernelState};
use crate::syscall::{dispatch, SyscallContext};
use crate::task::context::{TrapFrame, REG_RET};
use crate::task::program::{Resume, UserError, UserProgram};

pub struct UserContext<'k> {
    kernel: &'k Kernel,
    cpu: usize,
    env: EnvId,
    idx: usize,
    program: Arc<dyn UserProgram>,
    tf: TrapFrame,
}

impl<'k> UserContext<'k> {
    /// Load the context of environment `idx`, which the caller has just made
    /// `Running` on `cpu`.
    pub(crate) fn load(kernel: &'k Kernel, st: &mut KernelState, cpu: usize, idx: usize) -> Option<Self> {
        let env = st.envs.get(idx);
        let id = env.id;
        let tf = env.tf;
        match env.program.clone() {
            Some(program) => Some(Self {
                kernel,
                cpu,
                env: id,
                idx,
                program,
                tf,
            }),
            None => {
                log::error!("[{}] has no program image, destroying", id);
                st.env_destroy(idx, cpu);
                None
            }
        }
    }

    pub fn env_id(&self) -> EnvId {
        self.env
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    pub fn program_name(&self) -> &str {
        self.program.name()
    }

    pub fn tf(&self) -> &TrapFrame {
        &self.tf
    }

    pub fn tf_mut(&mut self) -> &mut TrapFrame {
        &mut self.tf
    }

    /// Take the big kernel lock for this environment, reaping it first if it
    /// was destroyed while running.
    fn enter_kernel(&self) -> Result<KernelGuard<'k, KernelState>, UserError> {
        let mut st = self.kernel.lock(self.cpu);
        let env = st.envs.get(self.idx);
        if env.id != self.env || env.status == EnvStatus::Free {
            return Err(UserError::Destroyed);
        }
        if env.status == EnvStatus::Dying {
            log::debug!("[{}] reaping dying env on cpu {}", self.env, self.cpu);
            st.env_free(self.idx);
            return Err(UserError::Destroyed);
        }
        Ok(st)
    }

    /// Trap into the kernel with system call `num`.
    ///
    /// Returns the raw result register. Fails only if the environment no
    /// longer exists when the call completes, including when the call
    /// destroyed the caller itself.
    pub fn syscall(&mut self, num: u64, args: [u64; 5]) -> Result<i64, UserError> {
        let ret = {
            let mut st = self.enter_kernel()?;
            st.envs.get_mut(self.idx).tf = self.tf;
            let mut k = SyscallContext {
                st: &mut *st,
                counters: self.kernel.counters(),
                cpu: self.cpu,
                caller: self.idx,
            };
            let ret = dispatch(&mut k, num, args);
            let env = st.envs.get(self.idx);
            if env.id != self.env || env.status == EnvStatus::Free {
                return Err(UserError::Destroyed);
            }
            ret
        };
        self.tf.regs[REG_RET] = ret as u64;
        Ok(ret)
    }

    /// Read user memory at `va`.
    pub fn read(&mut self, va: u64, buf: &mut [u8]) -> Result<(), UserError> {
        let idx = self.idx;
        self.access(|st| st.user_copy_in(idx, va, buf))
    }

    /// Write user memory at `va`.
    pub fn write(&mut self, va: u64, data: &[u8]) -> Result<(), UserError> {
        let idx = self.idx;
        self.access(|st| st.user_copy_out(idx, va, data))
    }

    fn access<F>(&mut self, mut op: F) -> Result<(), UserError>
    where
        F: FnMut(&mut KernelState) -> Result<(), PageFault>,
    {
        let max_retries = self.kernel.config().max_fault_retries;
        let mut last: Option<(Page, u32)> = None;
        loop {
            let fault = {
                let mut st = self.enter_kernel()?;
                match op(&mut *st) {
                    Ok(()) => return Ok(()),
                    Err(fault) => fault,
                }
            };

            let page = Page::containing_address(fault.va);
            let tries = match last {
                Some((p, n)) if p == page => n + 1,
                _ => 1,
            };
            if tries > max_retries + 1 {
                return Err(self.kill(format!(
                    "page fault at va {:08x} not resolved by handler",
                    fault.va.as_u64()
                )));
            }
            last = Some((page, tries));
            self.handle_fault(fault)?;
        }
    }

    /// Deliver `fault` and run the upcall if there is one.
    fn handle_fault(&mut self, fault: PageFault) -> Result<(), UserError> {
        let entry = {
            let mut st = self.enter_kernel()?;
            st.envs.get_mut(self.idx).tf = self.tf;
            match page_fault_handler(&mut st, self.kernel.counters(), self.cpu, self.idx, fault) {
                FaultOutcome::Upcall(entry) => entry,
                FaultOutcome::Destroyed => return Err(UserError::Destroyed),
            }
        };

        self.tf.sp = utf_addr();
        self.tf.pc = entry.as_u64();
        let program = self.program.clone();
        program.upcall(entry, self)?;

        let mut st = self.enter_kernel()?;
        match upcall_return(&mut st, self.idx) {
            Some(tf) => {
                self.tf = tf;
                Ok(())
            }
            None => {
                drop(st);
                Err(self.kill(String::from("corrupt exception stack on upcall return")))
            }
        }
    }

    fn kill(&self, reason: String) -> UserError {
        if let Ok(mut st) = self.enter_kernel() {
            log::warn!("[{}] {}", self.env, reason);
            st.console.write_str(&format!("[{}] {}\n", self.env, reason));
            self.kernel.counters().record_fatal();
            st.env_destroy(self.idx, self.cpu);
        }
        UserError::Destroyed
    }

    /// This environment's page table entry for `va`, as the read-only
    /// page-table view at UVPT shows it.
    pub fn uvpt(&self, va: u64) -> Option<Pte> {
        if va >= UTOP {
            return None;
        }
        let st = self.kernel.lock(self.cpu);
        let env = st.envs.get(self.idx);
        if env.id != self.env {
            return None;
        }
        env.pgdir.as_ref()?.lookup(page_of(va))
    }

    /// Present mappings in `[lo, hi)`, ascending.
    pub fn uvpt_range(&self, lo: u64, hi: u64) -> Vec<(VirtAddr, Pte)> {
        let st = self.kernel.lock(self.cpu);
        let env = st.envs.get(self.idx);
        match env.pgdir.as_ref() {
            Some(pt) if env.id == self.env => pt
                .mappings(VirtAddr::new(lo), VirtAddr::new(hi.min(UTOP)))
                .into_iter()
                .map(|(page, pte)| (page.start_address(), pte))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The environment table slot `id` names, as the read-only UENVS view
    /// shows it. The slot may hold a different generation than `id`.
    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        let st = self.kernel.lock(self.cpu);
        let idx = if id.is_self() { self.idx } else { id.index() };
        (idx < st.envs.capacity()).then(|| st.envs.get(idx).info())
    }

    /// Execute one program step.
    pub(crate) fn step(&mut self) -> Result<Resume, UserError> {
        let program = self.program.clone();
        program.resume(self)
    }

    /// End the time slice and report how it ended.
    pub(crate) fn leave(self, outcome: Result<Resume, UserError>) {
        let mut st = self.kernel.lock(self.cpu);
        let env = st.envs.get(self.idx);
        if env.id != self.env || env.status == EnvStatus::Free {
            return;
        }
        if env.status == EnvStatus::Dying {
            st.env_free(self.idx);
            return;
        }

        match outcome {
            Ok(Resume::Continue) | Ok(Resume::Yield) => {
                st.envs.get_mut(self.idx).tf = self.tf;
            }
            Ok(Resume::Exit) => {
                log::info!("[{}] exiting gracefully", self.env);
                st.env_destroy(self.idx, self.cpu);
            }
            Err(e) => {
                let line = match &e {
                    UserError::Panic(msg) => {
                        format!("[{}] user panic in {}: {}\n", self.env, self.program.name(), msg)
                    }
                    other => format!("[{}] {} in {}\n", self.env, other, self.program.name()),
                };
                log::warn!("{}", line.trim_end());
                st.console.write_str(&line);
                st.env_destroy(self.idx, self.cpu);
            }
        }
    }

    /// Stop running this environment here and make it schedulable again.
    pub fn detach(self) {
        let mut st = self.kernel.lock(self.cpu);
        let env = st.envs.get_mut(self.idx);
        if env.id != self.env {
            return;
        }
        if env.status == EnvStatus::Dying {
            st.env_free(self.idx);
            return;
        }
        if env.status != EnvStatus::Running {
            return;
        }
        env.tf = self.tf;
        env.status = EnvStatus::Runnable;
        env.cpunum = None;
        if st.cpus[self.cpu].current == Some(self.idx) {
            st.cpus[self.cpu].current = None;
        }
    }
}
