//! Extension trait to ignore mutex poisoning.
//!
//! Transport bookkeeping, job progress and dialect caches only hold plain
//! values: a panic in another worker thread leaves them consistent, so the
//! locks are taken with `.lock_ignore_poison()` instead of `.lock().unwrap()`.

use std::sync::{Mutex, MutexGuard};

pub(crate) trait IgnorePoison<T> {
    /// Locks the mutex, ignoring poison.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
