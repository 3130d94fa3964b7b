//! Poison-tolerant lock helpers.
//!
//! A panic while a cache lock is held leaves the guarded map in a usable
//! state (every mutation is a single insert or remove), so the cache keeps
//! serving instead of cascading the panic into every later request.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn report_poisoned(source: &'static str, op: &'static str, lock_kind: &'static str) {
    warn!(
        op,
        source_module = source,
        lock_kind,
        result = "poisoned_recovered",
        "recovered cache lock poisoned by a panicking thread"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        report_poisoned(source, op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        report_poisoned(source, op, "rwlock.write");
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        report_poisoned(source, op, "mutex.lock");
        poisoned.into_inner()
    })
}
