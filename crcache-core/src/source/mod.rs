//! Source - Backend Capability Behind Each Pool
//!
//! A [`Source`] creates, destroys and runs commands against concrete
//! resources. It keeps no pool bookkeeping; the owning
//! [`ResourcePool`](crate::engine::ResourcePool) is the sole owner of that.
//!
//! The set of backends is closed: `local`, `ssh`, `model` (test double) and
//! `pool` (composite of other pools). [`Source::from_config`] maps a
//! configured type tag onto the matching constructor.

pub mod local;
pub mod model;
pub mod pool;
pub mod ssh;

pub use local::{LocalSource, LOCAL_INSTANCE};
pub use model::{ModelCall, ModelSource};
pub use pool::PoolSource;
pub use ssh::SshSource;

use std::process::Child;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::engine::ResourcePool;
use crate::error::{Error, Result};
use crate::executor::ExecMode;

#[derive(Debug, Clone)]
pub enum Source {
    Local(LocalSource),
    Ssh(SshSource),
    Model(ModelSource),
    Pool(PoolSource),
}

impl Source {
    /// Build the source configured for pool `name`.
    ///
    /// `lookup` resolves child pool names for `pool` sources and is not
    /// called for any other type.
    pub fn from_config<F>(name: &str, config: &SourceConfig, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Arc<ResourcePool>>,
    {
        match config.kind.as_str() {
            "local" => Ok(Self::Local(LocalSource::new())),
            "model" => Ok(Self::Model(ModelSource::labelled(name))),
            "ssh" => {
                let host = config.param_str("ssh_host").ok_or_else(|| Error::InvalidConfig {
                    name: name.to_owned(),
                    reason: "ssh sources need an 'ssh_host'".to_string(),
                })?;
                Ok(Self::Ssh(SshSource::new(host)))
            }
            "pool" => {
                let children = config.param_list("sources");
                if children.is_empty() {
                    return Err(Error::InvalidConfig {
                        name: name.to_owned(),
                        reason: "pool sources need a non-empty 'sources' list".to_string(),
                    });
                }
                Ok(Self::Pool(PoolSource::new(&children, lookup)?))
            }
            other => Err(Error::UnknownSourceType {
                kind: other.to_owned(),
            }),
        }
    }

    /// Configured type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Ssh(_) => "ssh",
            Self::Model(_) => "model",
            Self::Pool(_) => "pool",
        }
    }

    /// Most instances this backend can ever supply; 0 is unbounded.
    pub fn maximum(&self) -> usize {
        match self {
            Self::Local(s) => s.maximum(),
            Self::Ssh(s) => s.maximum(),
            Self::Model(s) => s.maximum(),
            Self::Pool(s) => s.maximum(),
        }
    }

    /// Lower bound for the owning pool's reserve.
    pub fn reserve_floor(&self) -> usize {
        match self {
            Self::Pool(s) => s.reserve_floor(),
            _ => 0,
        }
    }

    pub fn provision(&self, count: usize) -> Result<Vec<String>> {
        match self {
            Self::Local(s) => s.provision(count),
            Self::Ssh(s) => s.provision(count),
            Self::Model(s) => s.provision(count),
            Self::Pool(s) => s.provision(count),
        }
    }

    pub fn discard(&self, instances: &[String]) -> Result<()> {
        match self {
            Self::Local(s) => s.discard(instances),
            Self::Ssh(s) => s.discard(instances),
            Self::Model(s) => s.discard(instances),
            Self::Pool(s) => s.discard(instances),
        }
    }

    /// The argv that [`execute_on`](Self::execute_on) would spawn.
    pub fn command_for(&self, instance: &str, command: &[String]) -> Result<Vec<String>> {
        match self {
            Self::Local(s) => s.command_for(instance, command),
            Self::Ssh(s) => s.command_for(instance, command),
            Self::Model(s) => s.command_for(instance, command),
            Self::Pool(s) => s.command_for(instance, command),
        }
    }

    /// Run `command` against the unprefixed `instance`.
    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        match self {
            Self::Local(s) => s.execute_on(instance, command, mode),
            Self::Ssh(s) => s.execute_on(instance, command, mode),
            Self::Model(s) => s.execute_on(instance, command, mode),
            Self::Pool(s) => s.execute_on(instance, command, mode),
        }
    }

    /// Child pools, for status and introspection; empty for leaf sources.
    pub fn children(&self) -> &[Arc<ResourcePool>] {
        match self {
            Self::Pool(s) => s.children(),
            _ => &[],
        }
    }
}
