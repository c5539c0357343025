//! Persistent Store - Lock-Guarded String Key-Value Substrate
//!
//! All pool bookkeeping lives in a [`Store`]: a flat `String -> String`
//! mapping that every cooperating process on the host sees. Access is only
//! valid inside a lock session; [`read_locked`] and [`write_locked`] open one
//! and close it again when the returned [`LockGuard`] drops.
//!
//! # Key layout
//! ```text
//! pool/<name>       comma-joined sorted ids owned by <name>
//! allocated/<name>  comma-joined sorted ids checked out from <name>
//! resource/<id>     name of the pool owning <id>
//! ```
//!
//! Implementations:
//! - [`LocalStore`]: `state.json` guarded by `flock(2)`; the default.
//! - [`MemoryStore`]: in-process map for tests.

pub mod local;
pub mod lock;
pub mod memory;

pub use local::LocalStore;
pub use lock::LockMode;
pub use memory::MemoryStore;

use std::collections::BTreeSet;
use std::ops::Deref;

use tracing::error;

use crate::error::{Error, Result};

/// Contract for store back ends.
///
/// Changes committed in one lock session must be visible to any other
/// session, in this or another process, as soon as it acquires its lock.
pub trait Store: Send + Sync {
    /// Fails with [`Error::NotFound`] if `key` is absent.
    fn get(&self, key: &str) -> Result<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Fails with [`Error::NotFound`] if `key` is absent.
    fn delete(&self, key: &str) -> Result<()>;

    fn lock_read(&self) -> Result<()>;

    fn lock_write(&self) -> Result<()>;

    fn unlock(&self) -> Result<()>;
}

/// An open lock session; unlocks the store when dropped.
///
/// Dropping cannot report a failed unlock, and for a write session the unlock
/// is where changes are committed. Mutating code therefore closes the session
/// with [`finish`](LockGuard::finish) and leaves `Drop` to error paths.
#[must_use = "the store is unlocked as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    store: &'a dyn Store,
    open: bool,
}

impl LockGuard<'_> {
    /// Close the session, returning the result of the unlock (and commit).
    pub fn finish(mut self) -> Result<()> {
        self.open = false;
        self.store.unlock()
    }
}

impl<'a> Deref for LockGuard<'a> {
    type Target = dyn Store + 'a;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(e) = self.store.unlock() {
            error!(error = %e, "Failed to release store lock");
        }
    }
}

pub fn read_locked(store: &dyn Store) -> Result<LockGuard<'_>> {
    store.lock_read()?;
    Ok(LockGuard { store, open: true })
}

pub fn write_locked(store: &dyn Store) -> Result<LockGuard<'_>> {
    store.lock_write()?;
    Ok(LockGuard { store, open: true })
}

/// `get` with absence mapped to `None`.
pub fn get_opt(store: &dyn Store, key: &str) -> Result<Option<String>> {
    match store.get(key) {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read a comma-joined id set; an absent key is the empty set.
pub fn load_set(store: &dyn Store, key: &str) -> Result<BTreeSet<String>> {
    Ok(get_opt(store, key)?
        .map(|raw| decode_set(&raw))
        .unwrap_or_default())
}

pub fn save_set(store: &dyn Store, key: &str, ids: &BTreeSet<String>) -> Result<()> {
    store.set(key, &encode_set(ids))
}

pub fn decode_set(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Sorted comma-join; `BTreeSet` iteration is already lexicographic.
pub fn encode_set(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

pub fn pool_key(name: &str) -> String {
    format!("pool/{name}")
}

pub fn allocated_key(name: &str) -> String {
    format!("allocated/{name}")
}

pub fn resource_key(id: &str) -> String {
    format!("resource/{id}")
}
