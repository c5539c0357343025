//! The default persistent store.
//!
//! State lives in `<dir>/state.json` as one JSON object of string keys and
//! values. Cross-process exclusion is an advisory `flock(2)` on
//! `<dir>/state.lock`: shared for read sessions, exclusive for write
//! sessions. The outermost acquire takes the flock and loads the file; the
//! outermost release of a write session writes the file back (temp file and
//! rename) before the flock is dropped, so the next locker always reads
//! committed state.
//!
//! Reentrancy is per thread of one `LocalStore` instance; other threads on
//! the same instance wait for the session to close. Two instances opened on
//! the same directory exclude each other exactly as two processes would.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

use nix::fcntl::{flock, FlockArg};
use tracing::{debug, warn};

use super::lock::{LockMode, ReentrantLock, Transition};
use super::Store;
use crate::error::{Error, Result};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// Overrides the state directory; mostly for tests and sandboxes.
pub const STATE_DIR_ENV: &str = "CRCACHE_STATE_DIR";

#[derive(Debug, Default)]
struct Inner {
    lock: ReentrantLock,
    /// Open handle carrying the flock for the current session.
    lock_file: Option<File>,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

#[derive(Debug)]
pub struct LocalStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    inner: Mutex<Inner>,
    /// Signalled whenever a session closes.
    released: Condvar,
}

impl LocalStore {
    /// Open (creating if needed) the store kept in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        debug!(dir = %dir.display(), "Opening local store");
        Ok(Self {
            state_path: dir.join(STATE_FILE),
            lock_path: dir.join(LOCK_FILE),
            inner: Mutex::new(Inner::default()),
            released: Condvar::new(),
        })
    }

    /// Open the store in `$CRCACHE_STATE_DIR`, else `~/.cache/crcache`.
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_dir()?)
    }

    pub fn default_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var_os("HOME").ok_or_else(|| {
            Error::io(
                "locating the state directory",
                io::Error::new(io::ErrorKind::NotFound, "HOME is not set"),
            )
        })?;
        Ok(PathBuf::from(home).join(".cache").join("crcache"))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(&self, mode: LockMode) -> Result<()> {
        let mut inner = self.inner();
        let transition = loop {
            match inner.lock.acquire(mode)? {
                Transition::Wait => {
                    inner = self
                        .released
                        .wait(inner)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                other => break other,
            }
        };
        if let Transition::Acquire(mode) = transition {
            match self.begin_session(mode) {
                Ok((file, entries)) => {
                    inner.lock_file = Some(file);
                    inner.entries = entries;
                    inner.dirty = false;
                }
                Err(e) => {
                    // No session was opened; undo the count.
                    inner.lock.release()?;
                    self.released.notify_all();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn begin_session(&self, mode: LockMode) -> Result<(File, BTreeMap<String, String>)> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| Error::io(format!("opening {}", self.lock_path.display()), e))?;
        let arg = match mode {
            LockMode::Read => FlockArg::LockShared,
            LockMode::Write => FlockArg::LockExclusive,
        };
        flock(file.as_raw_fd(), arg).map_err(|errno| {
            Error::io(
                format!("locking {}", self.lock_path.display()),
                io::Error::from(errno),
            )
        })?;
        debug!(?mode, "Store lock acquired");
        let entries = self.load()?;
        Ok((file, entries))
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.state_path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::Corrupt {
                path: self.state_path.clone(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::io(format!("reading {}", self.state_path.display()), e)),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp_path = self.state_path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| Error::Corrupt {
            path: self.state_path.clone(),
            source,
        })?;
        let write = || -> io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.state_path)
        };
        write().map_err(|e| Error::io(format!("writing {}", self.state_path.display()), e))?;
        debug!(keys = entries.len(), "Store state committed");
        Ok(())
    }
}

impl Store for LocalStore {
    fn get(&self, key: &str) -> Result<String> {
        let inner = self.inner();
        inner.lock.check_read()?;
        inner.entries.get(key).cloned().ok_or_else(|| Error::NotFound {
            key: key.to_owned(),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.lock.check_write(key)?;
        inner.entries.insert(key.to_owned(), value.to_owned());
        inner.dirty = true;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.lock.check_write(key)?;
        if inner.entries.remove(key).is_none() {
            return Err(Error::NotFound {
                key: key.to_owned(),
            });
        }
        inner.dirty = true;
        Ok(())
    }

    fn lock_read(&self) -> Result<()> {
        self.acquire(LockMode::Read)
    }

    fn lock_write(&self) -> Result<()> {
        self.acquire(LockMode::Write)
    }

    fn unlock(&self) -> Result<()> {
        let mut inner = self.inner();
        let Transition::Release(mode) = inner.lock.release()? else {
            return Ok(());
        };

        let committed = if mode == LockMode::Write && inner.dirty {
            self.persist(&inner.entries)
        } else {
            Ok(())
        };
        inner.dirty = false;
        inner.entries.clear();

        if let Some(file) = inner.lock_file.take() {
            if let Err(errno) = flock(file.as_raw_fd(), FlockArg::Unlock) {
                // Closing the descriptor below drops the flock regardless.
                warn!(error = %errno, "Explicit flock release failed");
            }
        }
        drop(inner);
        self.released.notify_all();
        debug!(?mode, "Store lock released");
        committed
    }
}
