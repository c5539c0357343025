//! Registry of configured pools.
//!
//! [`PoolRegistry`] resolves a pool name through the [`Config`], builds the
//! pool (and, for pool sources, its children) on first use, and memoizes it so
//! each name maps to one [`ResourcePool`] for the registry's lifetime. Every
//! pool it builds shares the registry's store instance, which keeps nested
//! parent/child lock sessions reentrant.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::pool::{PoolStatus, ResourcePool};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::Source;
use crate::store::Store;

pub struct PoolRegistry {
    config: Config,
    store: Arc<dyn Store>,
    pools: HashMap<String, Arc<ResourcePool>>,
    /// Names currently being built, outermost first.
    building: Vec<String>,
}

impl PoolRegistry {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            pools: HashMap::new(),
            building: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The pool named `name`, built on first request.
    pub fn get(&mut self, name: &str) -> Result<Arc<ResourcePool>> {
        if let Some(pool) = self.pools.get(name) {
            return Ok(Arc::clone(pool));
        }
        if self.building.iter().any(|pending| pending == name) {
            return Err(Error::SourceCycle {
                name: name.to_owned(),
            });
        }

        self.building.push(name.to_owned());
        let built = self.build(name);
        self.building.pop();

        let pool = Arc::new(built?);
        self.pools.insert(name.to_owned(), Arc::clone(&pool));
        Ok(pool)
    }

    fn build(&mut self, name: &str) -> Result<ResourcePool> {
        let config = self.config.resolve(name)?;
        debug!(pool = name, kind = %config.kind, "Building pool");
        let source = Source::from_config(name, &config, |child| self.get(child))?;
        Ok(ResourcePool::new(
            name,
            source,
            Arc::clone(&self.store),
            config.reserve,
            config.maximum,
        ))
    }

    /// Release prefixed ids, routing each to the pool named before its first `-`.
    ///
    /// Every owning pool is resolved before anything is released, so an id
    /// naming an unknown pool fails the whole call without side effects.
    pub fn release(&mut self, instances: &[String], force: bool) -> Result<()> {
        let mut by_pool: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for instance in instances {
            let (name, _) = instance
                .split_once('-')
                .ok_or_else(|| Error::unknown_instance(instance.as_str()))?;
            by_pool.entry(name).or_default().push(instance.clone());
        }

        let mut batches = Vec::with_capacity(by_pool.len());
        for (name, ids) in by_pool {
            batches.push((self.get(name)?, ids));
        }
        for (pool, ids) in batches {
            pool.discard(&ids, force)?;
        }
        Ok(())
    }

    /// Status of every configured pool (including the implicit `local`),
    /// sorted by name.
    pub fn status_all(&mut self) -> Result<Vec<PoolStatus>> {
        self.status_of(&[])
    }

    /// Status of the configured pools named in `only` (all when empty).
    ///
    /// Pools not asked for are never built, so a broken config elsewhere
    /// does not get in the way. Names that are not configured are skipped.
    pub fn status_of(&mut self, only: &[String]) -> Result<Vec<PoolStatus>> {
        let names: Vec<String> = self
            .config
            .sources()
            .into_iter()
            .filter(|name| only.is_empty() || only.contains(name))
            .collect();
        names
            .iter()
            .map(|name| self.get(name)?.status())
            .collect()
    }
}
