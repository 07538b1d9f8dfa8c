// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronisation primitives shared by the ulink/rpcall stack
//! OWNERS: @runtime
//! PUBLIC API: SpinLock (short critical sections, e.g. channel lists), Completion
//! DEPENDS_ON: parking_lot (Completion)

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A simple spin lock for short, non-blocking critical sections.
pub struct SpinLock<T: ?Sized> {
    flag: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self { flag: AtomicBool::new(false), value: UnsafeCell::new(value) }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.flag.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists only while `flag` is held.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists only while `flag` is held.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Counting completion with kernel `struct completion` semantics.
///
/// Each `complete()` banks one wake-up; each successful wait consumes one.
/// `complete_all()` saturates the count so every current and future waiter
/// passes until `reinit()`.
#[derive(Default)]
pub struct Completion {
    done: Mutex<u32>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals one waiter.
    pub fn complete(&self) {
        let mut done = self.done.lock();
        if *done != u32::MAX {
            *done += 1;
        }
        self.cond.notify_one();
    }

    /// Signals every waiter, now and until [`Completion::reinit`].
    pub fn complete_all(&self) {
        *self.done.lock() = u32::MAX;
        self.cond.notify_all();
    }

    /// Blocks until completed.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while *done == 0 {
            self.cond.wait(&mut done);
        }
        consume(&mut done);
    }

    /// Blocks until completed or `timeout` elapses; returns `false` on timeout.
    ///
    /// A timeout past the clock's range waits like [`Completion::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut done = self.done.lock();
        while *done == 0 {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                if *done == 0 {
                    return false;
                }
                break;
            }
        }
        consume(&mut done);
        true
    }

    /// Consumes a pending completion without blocking.
    pub fn try_wait(&self) -> bool {
        let mut done = self.done.lock();
        if *done == 0 {
            return false;
        }
        consume(&mut done);
        true
    }

    /// Returns `true` if a wait would not block.
    pub fn is_done(&self) -> bool {
        *self.done.lock() != 0
    }

    /// Drops any banked completions.
    pub fn reinit(&self) {
        *self.done.lock() = 0;
    }
}

fn consume(done: &mut u32) {
    if *done != u32::MAX {
        *done -= 1;
    }
}
