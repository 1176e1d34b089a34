//! NodeConfig persistence
//!
//! The config lives in a single JSON file. Saves are atomic: the new content
//! is written and synced to a uniquely named temp file in the same directory,
//! then renamed over the target. The previous file is copied to a `.backup`
//! sibling first so a corrupt primary can be recovered on the next load.
//!
//! Read-modify-write callers go through [`NodeConfigStore::update`], which
//! holds the store lock from load to save.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::NamedTempFile;

use crate::config::types::{ExternalNode, NodeConfig};
use crate::error::{BootstrapError, BootstrapResult, ConfigLoadError};

/// File-backed store for the node config
#[derive(Debug)]
pub struct NodeConfigStore {
    path: PathBuf,
    // held for every load, save and update
    lock: Mutex<()>,
}

impl NodeConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the primary config file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "backup")
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load the config, substituting the zero value on any failure.
    ///
    /// Recovery order: primary file, then `.backup`, then the zero value.
    /// Corruption is logged, never returned.
    pub fn load(&self) -> NodeConfig {
        let _guard = self.guard();
        self.load_locked()
    }

    fn load_locked(&self) -> NodeConfig {
        match read_config(&self.path) {
            Ok(config) => return config,
            Err(ConfigLoadError::NotFound { .. }) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Node config unreadable, trying backup");
            }
        }

        let backup = self.backup_path();
        match read_config(&backup) {
            Ok(config) => {
                tracing::warn!(path = %backup.display(), "Recovered node config from backup");
                config
            }
            Err(ConfigLoadError::NotFound { .. }) => NodeConfig::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Node config backup unreadable, using defaults");
                NodeConfig::default()
            }
        }
    }

    /// Load the primary file, returning the typed error instead of recovering
    pub fn load_strict(&self) -> Result<NodeConfig, ConfigLoadError> {
        let _guard = self.guard();
        read_config(&self.path)
    }

    /// Atomically persist the full config
    pub fn save(&self, config: &NodeConfig) -> BootstrapResult<()> {
        let _guard = self.guard();
        self.save_locked(config)
    }

    fn save_locked(&self, config: &NodeConfig) -> BootstrapResult<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| BootstrapError::persist(&self.path, e))?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                tracing::warn!(error = %e, "Failed to back up node config");
            }
        }

        let content = serde_json::to_vec_pretty(config)?;
        let mut temp =
            NamedTempFile::new_in(parent).map_err(|e| BootstrapError::persist(parent, e))?;
        temp.write_all(&content)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| BootstrapError::persist(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| BootstrapError::persist(&self.path, e.error))?;

        tracing::debug!(path = %self.path.display(), mode = %config.mode, "Node config saved");
        Ok(())
    }

    /// Load, apply `mutate` and save while holding the store lock.
    ///
    /// `mutate` returns whether it changed anything; the file is only
    /// rewritten when it did. Returns that flag.
    pub fn update<F>(&self, mutate: F) -> BootstrapResult<bool>
    where
        F: FnOnce(&mut NodeConfig) -> bool,
    {
        let _guard = self.guard();
        let mut config = self.load_locked();
        let changed = mutate(&mut config);
        if changed {
            self.save_locked(&config)?;
        }
        Ok(changed)
    }

    /// Clear the stored config back to the zero value
    pub fn reset(&self) -> BootstrapResult<()> {
        self.save(&NodeConfig::default())
    }

    /// Append `entry` to the stored history unless an equal entry exists.
    ///
    /// Returns `true` if the history changed.
    pub fn add_history_entry(&self, entry: ExternalNode) -> BootstrapResult<bool> {
        self.update(|config| config.add_history_entry(entry))
    }

    /// Remove the first stored history entry equal to `entry`.
    ///
    /// Returns `true` if the history changed.
    pub fn remove_history_entry(&self, entry: &ExternalNode) -> BootstrapResult<bool> {
        self.update(|config| config.remove_history_entry(entry))
    }
}

fn read_config(path: &Path) -> Result<NodeConfig, ConfigLoadError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigLoadError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigLoadError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&content).map_err(|source| ConfigLoadError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// `node-config.json` + `backup` -> `node-config.json.backup`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
