//! Kernel synchronization primitives.
//!
//! The original kernel backs its spinlock with a raw interrupt-disable
//! critical section, because the code that needs it runs with no
//! scheduler underneath. This crate runs as an ordinary user-space
//! library under a real OS and real threads, so `SpinLock` here is a
//! thin wrapper over [`spin::Mutex`] (short, non-blocking critical
//! sections: slot flags, the disk's active-IRP slot) while anything
//! that genuinely blocks a thread — the device shared/exclusive lock,
//! the controller lock, the IRP wait object — is backed by
//! `std::sync` so the testable blocking/wakeup properties in this
//! crate's test suite observe real thread scheduling rather than a
//! busy loop.

use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// A short, non-blocking critical section.
pub struct SpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<spin::MutexGuard<'_, T>> {
        self.inner.try_lock()
    }
}

/// Per-device shared/exclusive lock.
///
/// Synchronous helpers take this shared while submitting an IRP;
/// device state transitions (start, remove) take it exclusive.
pub struct SharedExclusiveLock<T> {
    inner: RwLock<T>,
}

impl<T> SharedExclusiveLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().expect("shared-exclusive lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().expect("shared-exclusive lock poisoned")
    }
}

/// The slot's per-controller queued lock.
///
/// Serializes DMA and polled I/O on a single controller; a "pend" can
/// hold this across several completion callbacks, so it is a real
/// blocking mutex rather than a spinlock.
pub struct QueuedLock<T> {
    inner: Mutex<T>,
}

impl<T> QueuedLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().expect("controller lock poisoned")
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }
}

/// The IRP's signalable wait object.
///
/// `sendSynchronous` blocks on this when an intermediate driver pends
/// the IRP, and `complete`/`continueIrp` wake it. Mirrors
/// `KeEvent`'s notification semantics (a `set` wakes every current
/// waiter and leaves the event signaled until reset) but is backed by
/// a real condition variable since the sender is a genuine OS thread.
pub struct WaitEvent {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl WaitEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Reset to the unsignaled state. Called at the top of each wait
    /// iteration in `sendSynchronous`.
    pub fn reset(&self) {
        *self.state.lock().expect("wait event poisoned") = false;
    }

    /// Signal the event, waking any thread blocked in `wait`.
    pub fn signal(&self) {
        *self.state.lock().expect("wait event poisoned") = true;
        self.condvar.notify_all();
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut signaled = self.state.lock().expect("wait event poisoned");
        while !*signaled {
            signaled = self.condvar.wait(signaled).expect("wait event poisoned");
        }
    }

    /// Block until signaled or `timeout` elapses. Returns `true` if
    /// woken by a signal, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.lock().expect("wait event poisoned");
        while !*signaled {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self
                .condvar
                .wait_timeout(signaled, remaining)
                .expect("wait event poisoned");
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
        true
    }
}

impl Default for WaitEvent {
    fn default() -> Self {
        Self::new()
    }
}
