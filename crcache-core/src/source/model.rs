//! In-memory test double for a resource backend.
//!
//! Hands out sequential ids that are never reused and records every call so
//! tests can assert exactly what a pool asked of its backend. Clones share
//! the same counter and call log, so a test can keep a handle after moving
//! one into a [`ResourcePool`](crate::engine::ResourcePool).
//!
//! Ids are plain decimals (`0`, `1`, ...) or, for a labelled model, carry the
//! label (`m.0`, `m.1`, ...) so several models can share one store.

use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::executor::{ExecMode, ProcessExecutor};

use super::local::{LocalSource, LOCAL_INSTANCE};

/// One recorded call against a [`ModelSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCall {
    Provision(usize),
    Discard(Vec<String>),
    Execute(String, Vec<String>),
}

#[derive(Debug, Default)]
struct ModelState {
    next_id: u64,
    calls: Vec<ModelCall>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSource {
    state: Arc<Mutex<ModelState>>,
    label: Option<String>,
    executor: ProcessExecutor,
}

impl ModelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Unbounded.
    pub fn maximum(&self) -> usize {
        0
    }

    pub fn provision(&self, count: usize) -> Result<Vec<String>> {
        let mut state = self.state();
        state.calls.push(ModelCall::Provision(count));
        let start = state.next_id;
        state.next_id += count as u64;
        Ok((start..state.next_id)
            .map(|id| match &self.label {
                Some(label) => format!("{label}.{id}"),
                None => id.to_string(),
            })
            .collect())
    }

    pub fn discard(&self, instances: &[String]) -> Result<()> {
        self.state()
            .calls
            .push(ModelCall::Discard(instances.to_vec()));
        Ok(())
    }

    /// Model resources run commands on the local machine.
    pub fn command_for(&self, _instance: &str, command: &[String]) -> Result<Vec<String>> {
        LocalSource::new().command_for(LOCAL_INSTANCE, command)
    }

    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        self.state()
            .calls
            .push(ModelCall::Execute(instance.to_owned(), command.to_vec()));
        let argv = self.command_for(instance, command)?;
        self.executor.spawn(&argv, mode)
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.state().calls.clone()
    }

    pub fn provision_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, ModelCall::Provision(_)))
            .count()
    }

    pub fn discard_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, ModelCall::Discard(_)))
            .count()
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
