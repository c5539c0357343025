//! An existing machine reached over ssh.
//!
//! Configured with `ssh_host`. Like the local source it fronts exactly one
//! machine, identified by its hostname.

use std::process::Child;

use super::local::{single_instance, LocalSource, LOCAL_INSTANCE};
use crate::error::{Error, Result};
use crate::executor::ExecMode;

#[derive(Debug, Clone)]
pub struct SshSource {
    hostname: String,
    local: LocalSource,
}

impl SshSource {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            local: LocalSource::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn maximum(&self) -> usize {
        1
    }

    pub fn provision(&self, count: usize) -> Result<Vec<String>> {
        single_instance(&self.hostname, count)
    }

    pub fn discard(&self, instances: &[String]) -> Result<()> {
        match instances.iter().find(|id| **id != self.hostname) {
            Some(foreign) => Err(Error::unknown_instance(foreign.as_str())),
            None => Ok(()),
        }
    }

    /// `ssh -t <host> <command...>`; an empty command gets a login shell.
    pub fn command_for(&self, instance: &str, command: &[String]) -> Result<Vec<String>> {
        if instance != self.hostname {
            return Err(Error::unknown_instance(instance));
        }
        let mut argv = vec!["ssh".to_string(), "-t".to_string(), self.hostname.clone()];
        argv.extend_from_slice(command);
        Ok(argv)
    }

    pub fn execute_on(&self, instance: &str, command: &[String], mode: ExecMode) -> Result<Child> {
        let argv = self.command_for(instance, command)?;
        self.local.execute_on(LOCAL_INSTANCE, &argv, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basics() {
        let source = SshSource::new("localhost");
        let resources = source.provision(1).unwrap();
        assert_eq!(resources, vec!["localhost".to_string()]);
        source.discard(&resources).unwrap();
        assert_eq!(source.maximum(), 1);
    }

    #[test]
    fn test_provision_two_refused() {
        assert!(matches!(
            SshSource::new("build-1").provision(2),
            Err(Error::TooManyInstances { .. })
        ));
    }

    #[test]
    fn test_discard_foreign_refused() {
        let source = SshSource::new("build-1");
        assert!(matches!(
            source.discard(&["build-2".to_string()]),
            Err(Error::UnknownInstance { .. })
        ));
    }

    #[test]
    fn test_command_wraps_in_ssh() {
        let source = SshSource::new("build-1");
        let argv = source
            .command_for("build-1", &["make".to_string(), "check".to_string()])
            .unwrap();
        assert_eq!(argv, vec!["ssh", "-t", "build-1", "make", "check"]);
        assert_eq!(source.command_for("build-1", &[]).unwrap(), vec!["ssh", "-t", "build-1"]);
    }

    #[test]
    fn test_command_unknown_host() {
        assert!(matches!(
            SshSource::new("build-1").command_for("local", &[]),
            Err(Error::UnknownInstance { .. })
        ));
    }
}
