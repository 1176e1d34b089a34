//! User-entered drafts and folder selection
//!
//! Drafts hold raw form input until the caller submits them. Parsing is
//! deliberately permissive on the external form: a blank host becomes the
//! loopback address and an unparseable port becomes 0.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ExternalNode, InternalNode, DEFAULT_EXTERNAL_HOST};

/// Whether the user is creating a node or opening one they already have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalIntent {
    #[default]
    CreateNew,
    OpenExisting,
}

/// Draft for starting a local node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalDraft {
    pub intent: InternalIntent,
    pub directory: PathBuf,
    pub password: String,
    /// Persist the password so the next run can start unattended
    pub save_password: bool,
}

impl InternalDraft {
    pub fn new(directory: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, intent: InternalIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn saving_password(mut self, save: bool) -> Self {
        self.save_password = save;
        self
    }

    /// Draft pre-filled from a stored record; a saved password is kept
    pub fn from_stored(node: &InternalNode) -> Self {
        Self {
            intent: InternalIntent::OpenExisting,
            directory: node.directory.clone(),
            password: node.password.clone(),
            save_password: node.has_saved_password(),
        }
    }

    /// Missing fields, if any
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.directory.as_os_str().is_empty() {
            missing.push("directory");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Draft for connecting to a remote node, as typed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalDraft {
    pub host: String,
    pub port: String,
    pub token: String,
    pub certificate: String,
}

impl ExternalDraft {
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        token: impl Into<String>,
        certificate: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            token: token.into(),
            certificate: certificate.into(),
        }
    }

    /// Draft that commits back to exactly `endpoint`
    pub fn from_endpoint(endpoint: &ExternalNode) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port.to_string(),
            token: endpoint.token.clone(),
            certificate: endpoint.certificate.clone().unwrap_or_default(),
        }
    }

    /// Only an empty port blocks submission; anything else parses
    pub fn is_complete(&self) -> bool {
        !self.port.trim().is_empty()
    }

    /// Port as submitted; invalid input is coerced to 0
    pub fn parsed_port(&self) -> u16 {
        self.port.trim().parse().unwrap_or(0)
    }

    /// Endpoint this draft commits to
    pub fn to_endpoint(&self) -> ExternalNode {
        let host = self.host.trim();
        let certificate = self.certificate.trim();
        ExternalNode {
            host: if host.is_empty() {
                DEFAULT_EXTERNAL_HOST.to_string()
            } else {
                host.to_string()
            },
            port: self.parsed_port(),
            token: self.token.clone(),
            certificate: if certificate.is_empty() {
                None
            } else {
                Some(self.certificate.clone())
            },
        }
    }
}

/// Result of asking the user for a node directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderSelection {
    Selected(PathBuf),
    /// User dismissed the picker
    Cancelled,
    /// User-facing problem with the chosen folder
    Error(String),
}

/// Validate a chosen directory for `intent`.
///
/// `None` means the user cancelled. For a new node the directory is created
/// if missing; an existing node's directory must already be there.
pub fn select_folder(path: Option<&Path>, intent: InternalIntent) -> FolderSelection {
    let Some(path) = path else {
        return FolderSelection::Cancelled;
    };

    match intent {
        InternalIntent::CreateNew => {
            if path.is_file() {
                return FolderSelection::Error(format!("{} is a file", path.display()));
            }
            if let Err(e) = fs::create_dir_all(path) {
                return FolderSelection::Error(format!(
                    "Cannot create {}: {}",
                    path.display(),
                    e
                ));
            }
        }
        InternalIntent::OpenExisting => {
            if !path.is_dir() {
                return FolderSelection::Error(format!(
                    "{} is not an existing directory",
                    path.display()
                ));
            }
        }
    }

    if let Err(e) = fs::read_dir(path) {
        return FolderSelection::Error(format!("Cannot read {}: {}", path.display(), e));
    }

    FolderSelection::Selected(path.to_path_buf())
}
