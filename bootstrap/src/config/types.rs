//! Persisted node configuration types
//!
//! `NodeConfig` is the durable record of how to reach the node. It is plain
//! data: the store handles persistence and the orchestrator decides when to
//! mutate it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Host substituted when an external draft leaves the host blank
pub const DEFAULT_EXTERNAL_HOST: &str = "127.0.0.1";

/// How the node is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    /// Nothing chosen yet
    #[default]
    Unset,
    /// Node process launched and supervised locally
    Internal,
    /// Node already running elsewhere, reached over the network
    External,
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Local node parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    /// Node storage directory
    pub directory: PathBuf,

    /// Saved password; empty when the user chose not to persist it
    #[serde(default)]
    pub password: String,
}

impl InternalNode {
    pub fn new(directory: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            password: password.into(),
        }
    }

    /// Whether a password was persisted alongside the directory
    pub fn has_saved_password(&self) -> bool {
        !self.password.is_empty()
    }
}

/// Remote node endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalNode {
    pub host: String,
    pub port: u16,
    /// Bearer token presented to the node
    pub token: String,
    /// PEM certificate to trust; `None` means plain HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl ExternalNode {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            certificate: None,
        }
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// `host:port` label used in history listings
    pub fn label(&self) -> String {
        let host = if self.host.is_empty() {
            DEFAULT_EXTERNAL_HOST
        } else {
            &self.host
        };
        format!("{}:{}", host, self.port)
    }

    /// Whether this endpoint can be connected to without user input
    pub fn is_usable(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }
}

/// Durable record of how to reach the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub mode: NodeMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<InternalNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalNode>,

    /// Previously used external endpoints, oldest first, no duplicates
    #[serde(default)]
    pub external_history: Vec<ExternalNode>,
}

impl NodeConfig {
    /// Internal params if the config can start a local node unattended.
    ///
    /// Requires a directory and a saved password; a config without a saved
    /// password still needs the user to type it in.
    pub fn usable_internal(&self) -> Option<&InternalNode> {
        if self.mode != NodeMode::Internal {
            return None;
        }
        self.internal
            .as_ref()
            .filter(|n| !n.directory.as_os_str().is_empty() && n.has_saved_password())
    }

    /// External endpoint if the config can connect unattended
    pub fn usable_external(&self) -> Option<&ExternalNode> {
        if self.mode != NodeMode::External {
            return None;
        }
        self.external.as_ref().filter(|n| n.is_usable())
    }

    /// Append an endpoint to history unless an equal entry already exists.
    ///
    /// Returns `true` if the entry was added.
    pub fn add_history_entry(&mut self, entry: ExternalNode) -> bool {
        if self.external_history.contains(&entry) {
            return false;
        }
        self.external_history.push(entry);
        true
    }

    /// Remove the first history entry equal to `entry`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_history_entry(&mut self, entry: &ExternalNode) -> bool {
        match self.external_history.iter().position(|e| e == entry) {
            Some(index) => {
                self.external_history.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether this is the zero-value config
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> ExternalNode {
        ExternalNode::new("10.0.0.5", port, "secret")
    }

    #[test]
    fn test_default_config_is_unset_and_empty() {
        let config = NodeConfig::default();
        assert_eq!(config.mode, NodeMode::Unset);
        assert!(config.external_history.is_empty());
        assert!(config.is_empty());
    }

    #[test]
    fn test_add_history_entry_is_idempotent() {
        let mut config = NodeConfig::default();
        assert!(config.add_history_entry(endpoint(8000)));
        assert!(!config.add_history_entry(endpoint(8000)));
        assert_eq!(config.external_history.len(), 1);
    }

    #[test]
    fn test_history_dedup_considers_every_field() {
        let mut config = NodeConfig::default();
        config.add_history_entry(endpoint(8000));
        config.add_history_entry(endpoint(8000).with_certificate("PEM"));
        config.add_history_entry(ExternalNode::new("10.0.0.5", 8000, "other"));
        config.add_history_entry(ExternalNode::new("10.0.0.6", 8000, "secret"));
        config.add_history_entry(endpoint(8001));
        assert_eq!(config.external_history.len(), 5);
    }

    #[test]
    fn test_history_preserves_insertion_order() {
        let mut config = NodeConfig::default();
        config.add_history_entry(endpoint(3));
        config.add_history_entry(endpoint(1));
        config.add_history_entry(endpoint(2));
        config.add_history_entry(endpoint(1));
        let ports: Vec<u16> = config.external_history.iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![3, 1, 2]);
    }

    #[test]
    fn test_remove_then_readd_restores_entry() {
        let mut config = NodeConfig::default();
        config.add_history_entry(endpoint(8000));
        assert!(config.remove_history_entry(&endpoint(8000)));
        assert!(config.external_history.is_empty());
        assert!(!config.remove_history_entry(&endpoint(8000)));
        assert!(config.add_history_entry(endpoint(8000)));
        assert_eq!(config.external_history, vec![endpoint(8000)]);
    }

    #[test]
    fn test_usable_internal_requires_directory_and_saved_password() {
        let mut config = NodeConfig {
            mode: NodeMode::Internal,
            internal: Some(InternalNode::new("/data/node", "")),
            ..Default::default()
        };
        assert!(config.usable_internal().is_none());

        config.internal = Some(InternalNode::new("", "pw"));
        assert!(config.usable_internal().is_none());

        config.internal = Some(InternalNode::new("/data/node", "pw"));
        assert!(config.usable_internal().is_some());

        config.mode = NodeMode::External;
        assert!(config.usable_internal().is_none());
    }

    #[test]
    fn test_usable_external_requires_host_and_port() {
        let mut config = NodeConfig {
            mode: NodeMode::External,
            external: Some(ExternalNode::new("", 8000, "t")),
            ..Default::default()
        };
        assert!(config.usable_external().is_none());

        config.external = Some(ExternalNode::new("node.local", 0, "t"));
        assert!(config.usable_external().is_none());

        config.external = Some(ExternalNode::new("node.local", 8000, "t"));
        assert!(config.usable_external().is_some());
    }

    #[test]
    fn test_label_defaults_blank_host() {
        assert_eq!(ExternalNode::new("", 9000, "t").label(), "127.0.0.1:9000");
        assert_eq!(endpoint(80).label(), "10.0.0.5:80");
    }

    #[test]
    fn test_serialized_mode_is_snake_case() {
        let json = serde_json::to_string(&NodeMode::External).unwrap();
        assert_eq!(json, "\"external\"");
    }
}
