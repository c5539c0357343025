//! In-memory store for tests.
//!
//! Enforces the same locking rules as [`LocalStore`](super::LocalStore) so
//! tests catch unlocked access. Threads sharing one instance take turns;
//! separate instances do not exclude each other.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use super::lock::{LockMode, ReentrantLock, Transition};
use super::Store;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    lock: ReentrantLock,
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Signalled whenever a session closes.
    released: Condvar,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`, as if left behind by an earlier run.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                lock: ReentrantLock::new(),
                entries,
            }),
            released: Condvar::new(),
        }
    }

    /// All keys currently stored, ignoring the lock; test inspection only.
    pub fn keys(&self) -> Vec<String> {
        self.inner().entries.keys().cloned().collect()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // The map is never left half-updated, so a poisoned guard is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(&self, mode: LockMode) -> Result<()> {
        let mut inner = self.inner();
        while inner.lock.acquire(mode)? == Transition::Wait {
            inner = self
                .released
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<String> {
        let inner = self.inner();
        inner.lock.check_read()?;
        inner.entries.get(key).cloned().ok_or_else(|| Error::NotFound {
            key: key.to_owned(),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.lock.check_write(key)?;
        inner.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.lock.check_write(key)?;
        inner
            .entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                key: key.to_owned(),
            })
    }

    fn lock_read(&self) -> Result<()> {
        self.acquire(LockMode::Read)
    }

    fn lock_write(&self) -> Result<()> {
        self.acquire(LockMode::Write)
    }

    fn unlock(&self) -> Result<()> {
        if let Transition::Release(_) = self.inner().lock.release()? {
            self.released.notify_all();
        }
        Ok(())
    }
}
