//! Non-reentrant sync guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// At most one holder at a time; never blocks.
#[derive(Debug, Default)]
pub struct SyncGuard {
    held: AtomicBool,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard. False if it is already held.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the guard back. Idempotent.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Take the guard for the lifetime of the returned permit.
    pub fn enter(&self) -> Option<SyncPermit<'_>> {
        if self.try_acquire() {
            Some(SyncPermit { guard: self })
        } else {
            None
        }
    }
}

/// Releases its [`SyncGuard`] on drop, including during unwinding.
#[derive(Debug)]
pub struct SyncPermit<'a> {
    guard: &'a SyncGuard,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}
