//! A source built from other pools.
//!
//! Configured with `sources: [name, ...]`. Children are full
//! [`ResourcePool`]s, not raw sources, so their cached instances can be
//! harvested before anything new is provisioned. Ids handed out are the
//! children's prefixed ids (`"<child>-<raw>"`), which is also how discards
//! and commands are routed back.

use std::collections::BTreeMap;
use std::process::Child;
use std::sync::Arc;

use tracing::debug;

use crate::engine::ResourcePool;
use crate::error::{Error, Result};
use crate::executor::ExecMode;

#[derive(Debug, Clone)]
pub struct PoolSource {
    children: Vec<Arc<ResourcePool>>,
}

impl PoolSource {
    /// Resolve each child name through `lookup`, keeping the configured order.
    pub fn new<F>(names: &[String], mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Arc<ResourcePool>>,
    {
        let children = names
            .iter()
            .map(|name| lookup(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { children })
    }

    pub fn from_children(children: Vec<Arc<ResourcePool>>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[Arc<ResourcePool>] {
        &self.children
    }

    /// Sum of child maximums, or 0 (unbounded) if any child is unbounded.
    pub fn maximum(&self) -> usize {
        if self.children.iter().any(|child| child.maximum() == 0) {
            0
        } else {
            self.children.iter().map(|child| child.maximum()).sum()
        }
    }

    pub fn reserve_floor(&self) -> usize {
        self.children.iter().map(|child| child.reserve()).sum()
    }

    pub fn provision(&self, count: usize) -> Result<Vec<String>> {
        // Cached instances first, in child order.
        let mut instances = Vec::with_capacity(count);
        for child in &self.children {
            let wanted = count - instances.len();
            if wanted == 0 {
                break;
            }
            instances.extend(child.provision_from_cache(wanted)?);
        }
        let harvested = instances.len();

        let mut remaining = count - harvested;
        for child in &self.children {
            if remaining == 0 {
                break;
            }
            let request = if child.maximum() != 0 {
                child.available()?.min(remaining)
            } else {
                remaining
            };
            let fresh = child.provision(request)?;
            remaining = remaining.saturating_sub(fresh.len());
            instances.extend(fresh);
        }

        debug!(count, harvested, "Pool source provisioned");
        Ok(instances)
    }

    /// Route each id to the child named by its prefix.
    ///
    /// Ids whose prefix names a pool that is no longer a configured child are
    /// dropped.
    pub fn discard(&self, instances: &[String]) -> Result<()> {
        let mut by_child: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for instance in instances {
            let (name, _) = instance
                .split_once('-')
                .ok_or_else(|| Error::unknown_instance(instance.as_str()))?;
            by_child.entry(name).or_default().push(instance.clone());
        }

        for child in &self.children {
            if let Some(ids) = by_child.remove(child.name()) {
                child.discard(&ids, false)?;
            }
        }
        for (name, ids) in by_child {
            debug!(child = name, ?ids, "Dropping discard for unconfigured child");
        }
        Ok(())
    }

    pub fn command_for(&self, instance: &str, command: &[String]) -> Result<Vec<String>> {
        let (child, raw) = self.route(instance)?;
        child.source().command_for(raw, command)
    }

    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        let (child, raw) = self.route(instance)?;
        child.source().execute_on(raw, command, mode)
    }

    fn route<'a>(&self, instance: &'a str) -> Result<(&Arc<ResourcePool>, &'a str)> {
        let (name, raw) = instance
            .split_once('-')
            .ok_or_else(|| Error::unknown_instance(instance))?;
        self.children
            .iter()
            .find(|child| child.name() == name)
            .map(|child| (child, raw))
            .ok_or_else(|| Error::unknown_instance(instance))
    }
}
