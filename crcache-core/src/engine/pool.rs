//! ResourcePool - Watermarked Cache of Resource Instances
//!
//! A [`ResourcePool`] keeps the accounting for one named pool in the shared
//! [`Store`] and asks its [`Source`] for new instances only when its idle
//! (cached) instances cannot cover a request.
//!
//! # Watermarks
//! - `reserve`: idle instances retained on release and pre-provisioned by
//!   [`fill_reserve`](ResourcePool::fill_reserve).
//! - `maximum`: cap on owned (cached + allocated) instances; 0 is unbounded.
//!
//! # Instance lifecycle
//! ```text
//! Unowned -> Pooled -> Allocated -> Pooled (retained) ... -> Discarded
//! ```
//! Every release goes through [`discard`](ResourcePool::discard), which
//! decides between retaining and really discarding.
//!
//! # Locking
//! Mutations hold the store's write lock for their whole read-modify-write,
//! including the backend call in `provision`. `discard` commits its
//! bookkeeping and releases the lock before the backend call: a crash between
//! the two leaks a resource the pool no longer tracks.

use std::collections::BTreeSet;
use std::fmt;
use std::process::Child;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::ExecMode;
use crate::source::Source;
use crate::store::{
    allocated_key, get_opt, load_set, pool_key, read_locked, resource_key, save_set, write_locked,
    Store,
};

/// Point-in-time view of one pool, read under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub name: String,
    pub cached: usize,
    pub in_use: usize,
    pub maximum: usize,
    pub reserve: usize,
}

pub struct ResourcePool {
    name: String,
    reserve: usize,
    maximum: usize,
    source: Source,
    store: Arc<dyn Store>,
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("reserve", &self.reserve)
            .field("maximum", &self.maximum)
            .field("source", &self.source.kind())
            .finish()
    }
}

impl ResourcePool {
    /// Create a pool, deriving the effective watermarks from the source.
    ///
    /// The reserve is raised to the source's reserve floor (the children's
    /// total for a pool source). The maximum is the smaller of the configured
    /// value and the source's own maximum, with 0 on either side meaning
    /// "no limit from this side".
    pub fn new(
        name: impl Into<String>,
        source: Source,
        store: Arc<dyn Store>,
        reserve: usize,
        maximum: usize,
    ) -> Self {
        let name = name.into();
        let reserve = reserve.max(source.reserve_floor());
        let maximum = bounded_min(maximum, source.maximum());
        if maximum != 0 && reserve > maximum {
            warn!(pool = %name, reserve, maximum, "Reserve exceeds maximum; fill_reserve stops at maximum");
        }
        info!(pool = %name, source = source.kind(), reserve, maximum, "Resource pool ready");
        Self {
            name,
            reserve,
            maximum,
            source,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// High watermark; 0 is unbounded.
    pub fn maximum(&self) -> usize {
        self.maximum
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Check out `count` instances, reusing cached ones first.
    ///
    /// Fails with [`Error::InstanceLimitExceeded`] before touching the store
    /// or the source if the pool would grow past its maximum.
    pub fn provision(&self, count: usize) -> Result<BTreeSet<String>> {
        let guard = write_locked(self.store.as_ref())?;
        let store = &*guard;
        let mut pool = load_set(store, &pool_key(&self.name))?;
        let mut allocated = load_set(store, &allocated_key(&self.name))?;

        if self.maximum != 0 && pool.len() + count > self.maximum {
            return Err(Error::InstanceLimitExceeded {
                pool: self.name.clone(),
                requested: count,
                owned: pool.len(),
                maximum: self.maximum,
            });
        }

        let mut taken: Vec<String> = pool
            .difference(&allocated)
            .take(count)
            .cloned()
            .collect();
        let shortfall = count - taken.len();
        debug!(pool = %self.name, count, reused = taken.len(), shortfall, "Provisioning");

        if shortfall > 0 {
            let fresh = self.source.provision(shortfall)?;
            self.admit(store, &mut pool, &fresh)?;
            save_set(store, &pool_key(&self.name), &pool)?;
            taken.extend(fresh);
        }

        allocated.extend(taken.iter().cloned());
        save_set(store, &allocated_key(&self.name), &allocated)?;
        guard.finish()?;
        Ok(taken.iter().map(|id| self.prefixed(id)).collect())
    }

    /// Check out up to `count` cached instances without calling the source.
    ///
    /// Returns fewer than `count` (possibly none) when the cache runs short.
    pub fn provision_from_cache(&self, count: usize) -> Result<BTreeSet<String>> {
        let guard = write_locked(self.store.as_ref())?;
        let store = &*guard;
        let pool = load_set(store, &pool_key(&self.name))?;
        let mut allocated = load_set(store, &allocated_key(&self.name))?;

        let taken: Vec<String> = pool
            .difference(&allocated)
            .take(count)
            .cloned()
            .collect();
        if taken.is_empty() {
            guard.finish()?;
            return Ok(BTreeSet::new());
        }
        debug!(pool = %self.name, count, reused = taken.len(), "Provisioning from cache");

        allocated.extend(taken.iter().cloned());
        save_set(store, &allocated_key(&self.name), &allocated)?;
        guard.finish()?;
        Ok(taken.iter().map(|id| self.prefixed(id)).collect())
    }

    /// Release `instances` back to the pool.
    ///
    /// Instances are retained as cached while the reserve allows, in the
    /// order given; the rest (or all of them with `force`) are removed from
    /// the pool and handed to the source for real discard once the store
    /// lock is released.
    pub fn discard(&self, instances: &[String], force: bool) -> Result<()> {
        let mut releasing: Vec<String> = Vec::with_capacity(instances.len());
        for instance in instances {
            let raw = self.strip_prefix(instance)?;
            if !releasing.iter().any(|id| id == raw) {
                releasing.push(raw.to_owned());
            }
        }

        let to_discard = {
            let guard = write_locked(self.store.as_ref())?;
            let store = &*guard;
            let mut pool = load_set(store, &pool_key(&self.name))?;
            let mut allocated = load_set(store, &allocated_key(&self.name))?;

            if let Some(unknown) = releasing.iter().find(|id| !allocated.contains(*id)) {
                return Err(Error::unknown_instance(self.prefixed(unknown)));
            }

            // Ignores currently cached instances; repeated small releases can
            // over- or under-fill the reserve.
            let keep_count =
                self.reserve as i64 - allocated.len() as i64 + releasing.len() as i64;
            let to_discard: Vec<String> = releasing
                .iter()
                .enumerate()
                .filter(|(position, _)| force || *position as i64 >= keep_count)
                .map(|(_, id)| id.clone())
                .collect();

            for id in &releasing {
                allocated.remove(id);
            }
            for id in &to_discard {
                pool.remove(id);
                match store.delete(&resource_key(id)) {
                    Ok(()) => {}
                    Err(Error::NotFound { key }) => {
                        warn!(pool = %self.name, %key, "Resource index entry already missing")
                    }
                    Err(e) => return Err(e),
                }
            }
            save_set(store, &allocated_key(&self.name), &allocated)?;
            save_set(store, &pool_key(&self.name), &pool)?;
            debug!(
                pool = %self.name,
                released = releasing.len(),
                retained = releasing.len() - to_discard.len(),
                "Released instances"
            );
            guard.finish()?;
            to_discard
        };

        if to_discard.is_empty() {
            return Ok(());
        }
        info!(pool = %self.name, instances = ?to_discard, "Discarding instances");
        self.source.discard(&to_discard)
    }

    /// Pre-provision idle instances up to the reserve, never past the maximum.
    pub fn fill_reserve(&self) -> Result<()> {
        let guard = write_locked(self.store.as_ref())?;
        let store = &*guard;
        let mut pool = load_set(store, &pool_key(&self.name))?;

        let target = bounded_min(self.reserve, self.maximum);
        if pool.len() >= target {
            return guard.finish();
        }
        let wanted = target - pool.len();
        debug!(pool = %self.name, wanted, "Filling reserve");

        let fresh = self.source.provision(wanted)?;
        self.admit(store, &mut pool, &fresh)?;
        save_set(store, &pool_key(&self.name), &pool)?;
        guard.finish()
    }

    /// Instances that may still be checked out; 0 for unbounded pools.
    pub fn available(&self) -> Result<usize> {
        if self.maximum == 0 {
            return Ok(0);
        }
        Ok(self.maximum.saturating_sub(self.in_use()?))
    }

    /// Owned but idle instances.
    pub fn cached(&self) -> Result<usize> {
        Ok(self.status()?.cached)
    }

    pub fn in_use(&self) -> Result<usize> {
        let guard = read_locked(self.store.as_ref())?;
        Ok(load_set(&*guard, &allocated_key(&self.name))?.len())
    }

    pub fn status(&self) -> Result<PoolStatus> {
        let guard = read_locked(self.store.as_ref())?;
        let store = &*guard;
        let pool = load_set(store, &pool_key(&self.name))?;
        let allocated = load_set(store, &allocated_key(&self.name))?;
        Ok(PoolStatus {
            name: self.name.clone(),
            cached: pool.difference(&allocated).count(),
            in_use: allocated.len(),
            maximum: self.maximum,
            reserve: self.reserve,
        })
    }

    /// Run `command` on one of this pool's instances.
    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        let raw = self.strip_prefix(instance)?;
        self.source.execute_on(raw, command, mode)
    }

    /// Index freshly provisioned `ids` as ours and add them to `pool`.
    ///
    /// Every id is checked before anything is written: an id already in the
    /// pool, repeated in the batch, or indexed under another pool fails with
    /// [`Error::DuplicateInstance`] and leaves the store untouched.
    fn admit(&self, store: &dyn Store, pool: &mut BTreeSet<String>, ids: &[String]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for id in ids {
            let owner = match get_opt(store, &resource_key(id))? {
                Some(owner) if owner != self.name => Some(owner),
                _ if pool.contains(id) || !seen.insert(id.as_str()) => Some(self.name.clone()),
                _ => None,
            };
            if let Some(owner) = owner {
                return Err(Error::DuplicateInstance {
                    pool: self.name.clone(),
                    instance: id.clone(),
                    owner,
                });
            }
        }
        for id in ids {
            store.set(&resource_key(id), &self.name)?;
            pool.insert(id.clone());
        }
        Ok(())
    }

    fn prefixed(&self, id: &str) -> String {
        format!("{}-{}", self.name, id)
    }

    /// Split on the first `-`; the part before it must be this pool's name.
    fn strip_prefix<'a>(&self, instance: &'a str) -> Result<&'a str> {
        match instance.split_once('-') {
            Some((name, raw)) if name == self.name => Ok(raw),
            _ => Err(Error::Ownership {
                pool: self.name.clone(),
                instance: instance.to_owned(),
            }),
        }
    }
}

/// Minimum where 0 stands for "unbounded".
fn bounded_min(a: usize, b: usize) -> usize {
    match (a, b) {
        (0, other) | (other, 0) => other,
        (a, b) => a.min(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LocalSource, ModelCall, ModelSource, PoolSource};
    use crate::store::MemoryStore;

    fn model_pool(name: &str, reserve: usize, maximum: usize) -> (ResourcePool, ModelSource) {
        let model = ModelSource::new();
        let pool = ResourcePool::new(
            name,
            Source::Model(model.clone()),
            Arc::new(MemoryStore::new()),
            reserve,
            maximum,
        );
        (pool, model)
    }

    fn stored(pool: &ResourcePool, key: &str) -> Option<String> {
        let guard = read_locked(pool.store().as_ref()).unwrap();
        crate::store::get_opt(&*guard, key).unwrap()
    }

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn vec_of(set: BTreeSet<String>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn test_bounded_min() {
        assert_eq!(bounded_min(0, 0), 0);
        assert_eq!(bounded_min(0, 3), 3);
        assert_eq!(bounded_min(5, 0), 5);
        assert_eq!(bounded_min(5, 3), 3);
    }

    #[test]
    fn test_maximum_capped_by_source_maximum() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let unlimited = ResourcePool::new("foo", Source::Local(LocalSource::new()), store.clone(), 0, 0);
        assert_eq!(unlimited.maximum(), 1);
        let too_high = ResourcePool::new("foo", Source::Local(LocalSource::new()), store, 0, 2);
        assert_eq!(too_high.maximum(), 1);
    }

    #[test]
    fn test_pool_backed_watermarks() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let child = Arc::new(ResourcePool::new(
            "c",
            Source::Model(ModelSource::new()),
            store.clone(),
            2,
            4,
        ));
        let pooled = ResourcePool::new(
            "bar",
            Source::Pool(PoolSource::from_children(vec![child.clone()])),
            store.clone(),
            0,
            10,
        );
        assert_eq!(pooled.maximum(), 4);
        assert_eq!(pooled.reserve(), 2);

        let unbounded = Arc::new(ResourcePool::new(
            "c2",
            Source::Model(ModelSource::new()),
            store.clone(),
            0,
            0,
        ));
        let pooled = ResourcePool::new(
            "bar",
            Source::Pool(PoolSource::from_children(vec![child, unbounded])),
            store,
            3,
            10,
        );
        assert_eq!(pooled.maximum(), 10);
        assert_eq!(pooled.reserve(), 3);
    }

    #[test]
    fn test_provision_single() {
        let (pool, _) = model_pool("foo", 0, 0);
        assert_eq!(pool.in_use().unwrap(), 0);
        assert_eq!(pool.provision(1).unwrap(), ids(&["foo-0"]));
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0"));
        assert_eq!(stored(&pool, "resource/0").as_deref(), Some("foo"));
    }

    #[test]
    fn test_provision_several() {
        let (pool, _) = model_pool("foo", 0, 0);
        assert_eq!(pool.provision(3).unwrap(), ids(&["foo-0", "foo-1", "foo-2"]));
        assert_eq!(pool.in_use().unwrap(), 3);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0,1,2"));
        for id in ["0", "1", "2"] {
            assert_eq!(stored(&pool, &format!("resource/{id}")).as_deref(), Some("foo"));
        }
    }

    #[test]
    fn test_provision_separate_calls() {
        let (pool, _) = model_pool("foo", 0, 0);
        assert_eq!(pool.provision(2).unwrap(), ids(&["foo-0", "foo-1"]));
        assert_eq!(pool.provision(2).unwrap(), ids(&["foo-2", "foo-3"]));
        assert_eq!(pool.in_use().unwrap(), 4);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0,1,2,3"));
    }

    #[test]
    fn test_provision_zero_skips_source() {
        let (pool, model) = model_pool("foo", 0, 0);
        assert!(pool.provision(0).unwrap().is_empty());
        assert_eq!(model.provision_calls(), 0);
    }

    #[test]
    fn test_provision_pulls_from_reserve() {
        let (pool, model) = model_pool("foo", 2, 0);
        pool.discard(&vec_of(pool.provision(2).unwrap()), false).unwrap();
        assert_eq!(pool.in_use().unwrap(), 0);
        assert_eq!(pool.cached().unwrap(), 2);

        assert_eq!(pool.provision(3).unwrap(), ids(&["foo-0", "foo-1", "foo-2"]));
        assert_eq!(pool.in_use().unwrap(), 3);
        assert_eq!(pool.cached().unwrap(), 0);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0,1,2"));
        assert_eq!(
            model.calls(),
            vec![ModelCall::Provision(2), ModelCall::Provision(1)]
        );
    }

    #[test]
    fn test_provision_to_cap() {
        let (pool, _) = model_pool("foo", 0, 2);
        assert_eq!(pool.available().unwrap(), 2);
        pool.provision(2).unwrap();
        assert_eq!(pool.available().unwrap(), 0);
    }

    #[test]
    fn test_provision_at_cap() {
        let (pool, model) = model_pool("foo", 0, 2);
        pool.provision(2).unwrap();
        assert!(matches!(
            pool.provision(1),
            Err(Error::InstanceLimitExceeded { maximum: 2, owned: 2, .. })
        ));
        assert_eq!(model.provision_calls(), 1);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0,1"));
        assert_eq!(stored(&pool, "resource/2"), None);
    }

    #[test]
    fn test_provision_beyond_cap() {
        let (pool, model) = model_pool("foo", 0, 2);
        assert!(matches!(
            pool.provision(3),
            Err(Error::InstanceLimitExceeded { .. })
        ));
        assert_eq!(model.provision_calls(), 0);
        assert_eq!(stored(&pool, "pool/foo"), None);
    }

    #[test]
    fn test_provision_from_cache_returns_shortfall() {
        let (pool, model) = model_pool("foo", 2, 0);
        pool.discard(&vec_of(pool.provision(2).unwrap()), false).unwrap();
        assert_eq!(pool.provision_from_cache(5).unwrap(), ids(&["foo-0", "foo-1"]));
        assert!(pool.provision_from_cache(1).unwrap().is_empty());
        assert_eq!(model.provision_calls(), 1);
    }

    #[test]
    fn test_discard_single() {
        let (pool, _) = model_pool("foo", 0, 0);
        pool.provision(2).unwrap();
        pool.discard(&["foo-0".to_string()], false).unwrap();
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(pool.cached().unwrap(), 0);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("1"));
        assert_eq!(stored(&pool, "resource/0"), None);
    }

    #[test]
    fn test_discard_multiple() {
        let (pool, model) = model_pool("foo", 0, 0);
        pool.provision(4).unwrap();
        pool.discard(&["foo-0".to_string(), "foo-2".to_string()], false)
            .unwrap();
        assert_eq!(pool.in_use().unwrap(), 2);
        assert_eq!(
            model.calls(),
            vec![
                ModelCall::Provision(4),
                ModelCall::Discard(vec!["0".to_string(), "2".to_string()]),
            ]
        );
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("1,3"));
    }

    #[test]
    fn test_discard_keeps_reserve_level() {
        let (pool, model) = model_pool("foo", 1, 0);
        pool.discard(&vec_of(pool.provision(2).unwrap()), false).unwrap();
        assert_eq!(pool.in_use().unwrap(), 0);
        assert_eq!(pool.cached().unwrap(), 1);
        assert_eq!(
            model.calls(),
            vec![
                ModelCall::Provision(2),
                ModelCall::Discard(vec!["1".to_string()]),
            ]
        );
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0"));
        assert_eq!(stored(&pool, "resource/0").as_deref(), Some("foo"));
        assert_eq!(stored(&pool, "resource/1"), None);
    }

    #[test]
    fn test_discard_retains_all_within_reserve() {
        let (pool, model) = model_pool("foo", 2, 0);
        pool.discard(&vec_of(pool.provision(2).unwrap()), false).unwrap();
        assert_eq!(pool.cached().unwrap(), 2);
        assert_eq!(pool.in_use().unwrap(), 0);
        assert_eq!(model.discard_calls(), 0);
    }

    #[test]
    fn test_discard_increases_available() {
        let (pool, _) = model_pool("foo", 1, 4);
        assert_eq!(pool.available().unwrap(), 4);
        pool.discard(&vec_of(pool.provision(2).unwrap()), false).unwrap();
        assert_eq!(pool.available().unwrap(), 4);
    }

    #[test]
    fn test_discard_force_ignores_reserve() {
        let (pool, model) = model_pool("foo", 1, 0);
        pool.discard(&vec_of(pool.provision(2).unwrap()), true).unwrap();
        assert_eq!(
            model.calls(),
            vec![
                ModelCall::Provision(2),
                ModelCall::Discard(vec!["0".to_string(), "1".to_string()]),
            ]
        );
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some(""));
        assert_eq!(stored(&pool, "resource/0"), None);
        assert_eq!(stored(&pool, "resource/1"), None);
    }

    #[test]
    fn test_discard_foreign_prefix_refused() {
        let (pool, model) = model_pool("foo", 0, 0);
        pool.provision(1).unwrap();
        for bad in ["bar-0", "0", "foobar-0"] {
            assert!(matches!(
                pool.discard(&[bad.to_string()], true),
                Err(Error::Ownership { .. })
            ));
        }
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(model.discard_calls(), 0);
    }

    #[test]
    fn test_discard_unallocated_refused() {
        let (pool, model) = model_pool("foo", 0, 0);
        pool.provision(1).unwrap();
        assert!(matches!(
            pool.discard(&["foo-0".to_string(), "foo-9".to_string()], false),
            Err(Error::UnknownInstance { .. })
        ));
        // Nothing was released, not even the valid id.
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(model.discard_calls(), 0);
    }

    #[test]
    fn test_discard_collapses_duplicates() {
        let (pool, model) = model_pool("foo", 0, 0);
        pool.provision(1).unwrap();
        pool.discard(&["foo-0".to_string(), "foo-0".to_string()], false)
            .unwrap();
        assert_eq!(
            model.calls().last(),
            Some(&ModelCall::Discard(vec!["0".to_string()]))
        );
    }

    #[test]
    fn test_fill_reserve() {
        let (pool, _) = model_pool("foo", 3, 0);
        pool.provision(1).unwrap();
        pool.fill_reserve().unwrap();
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(pool.cached().unwrap(), 2);
        assert_eq!(stored(&pool, "pool/foo").as_deref(), Some("0,1,2"));
        assert_eq!(stored(&pool, "allocated/foo").as_deref(), Some("0"));
        for id in ["0", "1", "2"] {
            assert_eq!(stored(&pool, &format!("resource/{id}")).as_deref(), Some("foo"));
        }
    }

    #[test]
    fn test_fill_reserve_when_full_skips_source() {
        let (pool, model) = model_pool("foo", 1, 0);
        pool.fill_reserve().unwrap();
        pool.fill_reserve().unwrap();
        assert_eq!(model.provision_calls(), 1);
    }

    #[test]
    fn test_fill_reserve_stops_at_maximum() {
        let (pool, _) = model_pool("foo", 5, 2);
        pool.fill_reserve().unwrap();
        assert_eq!(pool.cached().unwrap(), 2);
    }

    #[test]
    fn test_available_unbounded_is_zero() {
        let (pool, _) = model_pool("foo", 0, 0);
        pool.provision(3).unwrap();
        assert_eq!(pool.available().unwrap(), 0);
    }

    #[test]
    fn test_status_snapshot() {
        let (pool, _) = model_pool("foo", 2, 5);
        pool.fill_reserve().unwrap();
        pool.provision(3).unwrap();
        assert_eq!(
            pool.status().unwrap(),
            PoolStatus {
                name: "foo".to_string(),
                cached: 0,
                in_use: 3,
                maximum: 5,
                reserve: 2,
            }
        );
    }

    #[test]
    fn test_execute_on_checks_prefix() {
        let (pool, model) = model_pool("foo", 0, 0);
        assert!(matches!(
            pool.execute_on("bar-0", &["true".to_string()], ExecMode::Capture),
            Err(Error::Ownership { .. })
        ));
        let child = pool
            .execute_on("foo-0", &["true".to_string()], ExecMode::Capture)
            .unwrap();
        assert!(child.wait_with_output().unwrap().status.success());
        assert!(matches!(&model.calls()[0], ModelCall::Execute(id, _) if id == "0"));
    }

    #[test]
    fn test_failed_commit_surfaces_from_provision() {
        let tmp = tempfile::tempdir().unwrap();
        let store = crate::store::LocalStore::open(tmp.path()).unwrap();
        // A directory where the temp state file goes makes every commit fail.
        std::fs::create_dir(tmp.path().join("state.json.tmp")).unwrap();
        let model = ModelSource::new();
        let pool = ResourcePool::new("foo", Source::Model(model.clone()), Arc::new(store), 0, 0);

        assert!(matches!(pool.provision(2), Err(Error::Io { .. })));
        assert_eq!(model.calls(), vec![ModelCall::Provision(2)]);
        assert!(!tmp.path().join("state.json").exists());
        assert!(matches!(pool.fill_reserve(), Ok(())));
    }

    #[test]
    fn test_failed_commit_skips_backend_discard() {
        let tmp = tempfile::tempdir().unwrap();
        let store = crate::store::LocalStore::open(tmp.path()).unwrap();
        let model = ModelSource::new();
        let pool = ResourcePool::new("foo", Source::Model(model.clone()), Arc::new(store), 0, 0);
        let ids = vec_of(pool.provision(2).unwrap());

        std::fs::create_dir(tmp.path().join("state.json.tmp")).unwrap();
        assert!(matches!(pool.discard(&ids, true), Err(Error::Io { .. })));
        assert_eq!(model.discard_calls(), 0);
        // Nothing was committed, so both are still checked out.
        assert_eq!(pool.in_use().unwrap(), 2);
    }

    #[test]
    fn test_backend_reusing_owned_id_refused() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_entries([
            ("pool/foo", "0"),
            ("allocated/foo", "0"),
            ("resource/0", "foo"),
        ]));
        // A fresh model counts from 0 again.
        let pool = ResourcePool::new("foo", Source::Model(ModelSource::new()), store, 0, 0);

        assert!(matches!(
            pool.provision(1),
            Err(Error::DuplicateInstance { ref owner, .. }) if owner == "foo"
        ));
        assert_eq!(pool.in_use().unwrap(), 1);
        assert_eq!(stored(&pool, "allocated/foo").as_deref(), Some("0"));
    }

    #[test]
    fn test_backend_id_indexed_elsewhere_refused() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let a = ResourcePool::new("a", Source::Model(ModelSource::new()), store.clone(), 0, 0);
        let b = ResourcePool::new("b", Source::Model(ModelSource::new()), store, 1, 0);
        a.provision(2).unwrap();

        assert!(matches!(
            b.provision(1),
            Err(Error::DuplicateInstance { ref owner, .. }) if owner == "a"
        ));
        assert!(matches!(b.fill_reserve(), Err(Error::DuplicateInstance { .. })));
        assert_eq!(stored(&b, "resource/0").as_deref(), Some("a"));
        assert_eq!(stored(&b, "pool/b"), None);
    }

    #[test]
    fn test_store_unlocked_after_failure() {
        let (pool, _) = model_pool("foo", 0, 1);
        pool.provision(1).unwrap();
        assert!(pool.provision(1).is_err());
        // A later write session must still be possible.
        pool.discard(&["foo-0".to_string()], false).unwrap();
        assert_eq!(pool.in_use().unwrap(), 0);
    }
}
