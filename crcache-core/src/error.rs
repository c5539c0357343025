//! Error types for the resource cache.
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! map one-to-one onto the failure classes callers need to tell apart: store
//! misuse, backend capacity, pool watermarks, and instance ownership.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for resource cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Key absent on `get` or `delete`.
    #[error("no such key in store: {key}")]
    NotFound { key: String },

    /// Store accessed outside a lock session, or unlocked more often than locked.
    #[error("store accessed without holding a lock")]
    NotLocked,

    /// Mutation attempted while holding only a read lock.
    #[error("store is read-locked; cannot modify {key}")]
    ReadOnly { key: String },

    /// A write lock was requested inside a read-only session.
    #[error("cannot upgrade a held read lock to a write lock")]
    LockUpgrade,

    /// A leaf backend was asked for more instances than it can ever supply.
    #[error("backend can supply at most {limit} instance(s), {requested} requested")]
    TooManyInstances { requested: usize, limit: usize },

    /// The pool's maximum watermark would be exceeded.
    #[error(
        "pool '{pool}' would exceed its maximum of {maximum} \
         ({owned} owned, {requested} requested)"
    )]
    InstanceLimitExceeded {
        pool: String,
        requested: usize,
        owned: usize,
        maximum: usize,
    },

    /// An id the addressed pool or source does not recognise.
    #[error("no such resource {instance:?}")]
    UnknownInstance { instance: String },

    /// An id handed to a pool that does not carry that pool's prefix.
    #[error("resource {instance:?} is not owned by pool '{pool}'")]
    Ownership { pool: String, instance: String },

    /// A backend handed out an id that some pool already owns.
    #[error("backend returned resource {instance:?} for pool '{pool}', but '{owner}' already owns it")]
    DuplicateInstance {
        pool: String,
        instance: String,
        owner: String,
    },

    #[error("no source named '{name}' is configured")]
    UnknownSource { name: String },

    #[error("unknown source type '{kind}'")]
    UnknownSourceType { kind: String },

    /// A pool source (transitively) lists itself as a child.
    #[error("source '{name}' is part of a configuration cycle")]
    SourceCycle { name: String },

    #[error("invalid configuration for source '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn unknown_instance(instance: impl Into<String>) -> Self {
        Self::UnknownInstance {
            instance: instance.into(),
        }
    }
}
