//! Reentrant lock bookkeeping shared by the store implementations.
//!
//! A store session may be entered many times by the same holder: a pool
//! operation takes the write lock and then calls into child pools that take it
//! again. Only the outermost acquire touches the real guard (a file lock, for
//! [`LocalStore`](super::LocalStore)) and only the matching outermost release
//! gives it back.
//!
//! A session belongs to the thread that opened it. Other threads sharing the
//! same store handle are told to [`Transition::Wait`] until it closes, and
//! their reads and writes in the meantime are refused as unlocked.

use std::thread::{self, ThreadId};

use crate::error::{Error, Result};

/// Authority granted by the current lock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// What the caller has to do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First acquisition: take the real guard in this mode.
    Acquire(LockMode),
    /// Last release: give back the real guard held in this mode.
    Release(LockMode),
    /// Nested acquire or release; nothing to do.
    Nested,
    /// Another thread holds the session; block until it is released, then retry.
    Wait,
}

#[derive(Debug, Default)]
pub struct ReentrantLock {
    mode: Option<LockMode>,
    depth: usize,
    owner: Option<ThreadId>,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquisition in `mode`.
    ///
    /// A read nested inside a write session keeps write authority. A write
    /// nested inside a read-only session is refused.
    pub fn acquire(&mut self, mode: LockMode) -> Result<Transition> {
        if self.held_elsewhere() {
            return Ok(Transition::Wait);
        }
        match (self.mode, mode) {
            (None, _) => {
                self.mode = Some(mode);
                self.depth = 1;
                self.owner = Some(thread::current().id());
                Ok(Transition::Acquire(mode))
            }
            (Some(LockMode::Read), LockMode::Write) => Err(Error::LockUpgrade),
            (Some(_), _) => {
                self.depth += 1;
                Ok(Transition::Nested)
            }
        }
    }

    /// Undo the most recent acquisition.
    ///
    /// If the real guard fails to release the caller should still treat the
    /// session as over; the count has already reached zero.
    pub fn release(&mut self) -> Result<Transition> {
        let mode = self.held_mode().ok_or(Error::NotLocked)?;
        self.depth -= 1;
        if self.depth == 0 {
            self.mode = None;
            self.owner = None;
            Ok(Transition::Release(mode))
        } else {
            Ok(Transition::Nested)
        }
    }

    pub fn check_read(&self) -> Result<()> {
        match self.held_mode() {
            Some(_) => Ok(()),
            None => Err(Error::NotLocked),
        }
    }

    pub fn check_write(&self, key: &str) -> Result<()> {
        match self.held_mode() {
            Some(LockMode::Write) => Ok(()),
            Some(LockMode::Read) => Err(Error::ReadOnly {
                key: key.to_owned(),
            }),
            None => Err(Error::NotLocked),
        }
    }

    pub fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True while a thread other than the caller holds the session.
    pub fn held_elsewhere(&self) -> bool {
        matches!(self.owner, Some(owner) if owner != thread::current().id())
    }

    /// The session mode, as seen from the calling thread.
    fn held_mode(&self) -> Option<LockMode> {
        if self.held_elsewhere() {
            None
        } else {
            self.mode
        }
    }
}
