//! The big kernel lock
//!
//! A single spin lock around all kernel state. Whoever holds it may touch
//! the environment table, physical memory, processor descriptors and the
//! console; nobody else may. The lock records which processor holds it so
//! lock-order mistakes show up in logs and assertions instead of hangs.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

const NO_HOLDER: usize = usize::MAX;

pub struct BigKernelLock<T> {
    inner: Mutex<T>,
    holder: AtomicUsize,
}

impl<T> BigKernelLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: AtomicUsize::new(NO_HOLDER),
        }
    }

    /// Acquire the lock on behalf of processor `cpu`.
    pub fn lock(&self, cpu: usize) -> KernelGuard<'_, T> {
        debug_assert!(
            self.holder.load(Ordering::Relaxed) != cpu,
            "cpu {} re-acquiring the big kernel lock",
            cpu
        );
        let guard = self.inner.lock();
        self.holder.store(cpu, Ordering::Relaxed);
        KernelGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Processor currently holding the lock, if any.
    pub fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::Relaxed) {
            NO_HOLDER => None,
            cpu => Some(cpu),
        }
    }
}

/// RAII guard for the big kernel lock
pub struct KernelGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a AtomicUsize,
}

impl<T> Deref for KernelGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for KernelGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for KernelGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared before the mutex itself is released by the field drop
        self.holder.store(NO_HOLDER, Ordering::Relaxed);
    }
}
