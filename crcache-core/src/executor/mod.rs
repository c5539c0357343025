//! Process Execution Façade
//!
//! Sources that run commands against a live resource (local slot, ssh host)
//! all end up spawning a local process. [`ProcessExecutor`] is that single
//! spawn point: it resets SIGPIPE to its default disposition in the child and
//! hands back either the [`Child`] (exit status plus stream access) or a
//! collected [`ExecutionResult`].

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use nix::sys::signal::{signal, SigHandler, Signal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Share the caller's terminal; for interactive `run`.
    #[default]
    Inherit,
    /// Null stdin, piped stdout and stderr.
    Capture,
}

/// Outcome of a command run to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code, `-1` when terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock time in milliseconds
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `argv[0]` with the remaining arguments.
    pub fn spawn(&self, argv: &[String], mode: ExecMode) -> Result<Child> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        debug!(program = %program, ?args, ?mode, "Spawning command");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if mode == ExecMode::Capture {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }

        // SAFETY: the closure runs between fork and exec and only calls
        // signal(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| {
                signal(Signal::SIGPIPE, SigHandler::SigDfl)
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        cmd.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })
    }

    /// Run to completion capturing output.
    pub fn output(&self, argv: &[String]) -> Result<ExecutionResult> {
        let start = Instant::now();
        let child = self.spawn(argv, ExecMode::Capture)?;
        let output = child.wait_with_output().map_err(|source| Error::Spawn {
            program: argv[0].clone(),
            source,
        })?;

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// The user's shell, for commands run without arguments.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}
