//! The local machine as a single resource.

use std::process::Child;

use crate::error::{Error, Result};
use crate::executor::{default_shell, ExecMode, ProcessExecutor};

/// Identifier of the one resource a [`LocalSource`] hands out.
pub const LOCAL_INSTANCE: &str = "local";

#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    executor: ProcessExecutor,
}

impl LocalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maximum(&self) -> usize {
        1
    }

    pub fn provision(&self, count: usize) -> Result<Vec<String>> {
        single_instance(LOCAL_INSTANCE, count)
    }

    /// Nothing to tear down for the local machine.
    pub fn discard(&self, _instances: &[String]) -> Result<()> {
        Ok(())
    }

    /// An empty command opens the user's shell.
    pub fn command_for(&self, instance: &str, command: &[String]) -> Result<Vec<String>> {
        if instance != LOCAL_INSTANCE {
            return Err(Error::unknown_instance(instance));
        }
        if command.is_empty() {
            Ok(vec![default_shell()])
        } else {
            Ok(command.to_vec())
        }
    }

    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        let argv = self.command_for(instance, command)?;
        self.executor.spawn(&argv, mode)
    }
}

/// Hand out `id` once, for backends that front exactly one machine.
pub(crate) fn single_instance(id: &str, count: usize) -> Result<Vec<String>> {
    if count > 1 {
        return Err(Error::TooManyInstances {
            requested: count,
            limit: 1,
        });
    }
    Ok(std::iter::repeat(id.to_owned()).take(count).collect())
}
