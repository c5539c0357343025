//! Configuration of sources.
//!
//! Sources are found by name under a list of roots, by default
//! `~/.config/crcache` then `./.crcache`:
//!
//! ```text
//! <root>/sources/<name>/source.json
//! ```
//!
//! ```json
//! { "type": "pool", "reserve": 1, "maximum": 4, "sources": ["a", "b"] }
//! ```
//!
//! The first root defining a name wins. A `local` source always exists even
//! when nothing configures it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

const SOURCES_DIR: &str = "sources";
const SOURCE_FILE: &str = "source.json";

/// Settings for one named source, as read from `source.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Backend type tag (`local`, `ssh`, `model`, `pool`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Low watermark of idle instances to keep.
    #[serde(default)]
    pub reserve: usize,
    /// High watermark of owned instances; 0 is unbounded.
    #[serde(default)]
    pub maximum: usize,
    /// Backend-specific parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SourceConfig {
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reserve: 0,
            maximum: 0,
            params: Map::new(),
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// A list parameter, written either as a JSON array or `"a,b"`.
    pub fn param_list(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            Some(Value::String(joined)) => joined
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    roots: Vec<PathBuf>,
}

impl Config {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Config using [`default_roots`](Self::default_roots).
    pub fn discover() -> Self {
        Self::new(Self::default_roots())
    }

    /// `~/.config/crcache` then `<cwd>/.crcache`.
    pub fn default_roots() -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(2);
        if let Some(home) = std::env::var_os("HOME") {
            roots.push(PathBuf::from(home).join(".config").join("crcache"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd.join(".crcache"));
        }
        roots
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Map of source name to its config dir; the first root wins.
    pub fn source_dirs(&self) -> BTreeMap<String, PathBuf> {
        let mut dirs = BTreeMap::new();
        for root in &self.roots {
            let Ok(entries) = fs::read_dir(root.join(SOURCES_DIR)) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                dirs.entry(name).or_insert_with(|| entry.path());
            }
        }
        dirs
    }

    /// Every configured source name, plus `local`.
    pub fn sources(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.source_dirs().into_keys().collect();
        names.insert("local".to_string());
        names
    }

    /// Settings for source `name`.
    pub fn resolve(&self, name: &str) -> Result<SourceConfig> {
        match self.source_dirs().get(name) {
            Some(dir) => load_source_config(dir),
            None if name == "local" => Ok(SourceConfig::of_kind("local")),
            None => Err(Error::UnknownSource {
                name: name.to_owned(),
            }),
        }
    }
}

fn load_source_config(dir: &Path) -> Result<SourceConfig> {
    let path = dir.join(SOURCE_FILE);
    debug!(path = %path.display(), "Loading source config");
    let raw = fs::read(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::io(format!("{} is missing", path.display()), e),
        _ => Error::io(format!("reading {}", path.display()), e),
    })?;
    serde_json::from_slice(&raw).map_err(|source| Error::Corrupt { path, source })
}
