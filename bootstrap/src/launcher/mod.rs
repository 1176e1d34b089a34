//! Node launcher contract
//!
//! The orchestrator never spawns or inspects the node itself; it goes through
//! a [`NodeLauncher`]. [`ProcessLauncher`] is the shipped implementation.

pub mod process;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::LaunchError;

pub use process::ProcessLauncher;

/// Whether the local node is answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    pub fn is_up(self) -> bool {
        self == Self::Up
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Starts or confirms a locally running node.
///
/// `current_status` may be polled; callers must not invoke it concurrently
/// with `start` on the same launcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Start the node on `directory`, unlocking it with `password`
    async fn start(&self, directory: &Path, password: &str) -> Result<(), LaunchError>;

    /// Report whether the node is up.
    ///
    /// Returns `LaunchError::Authentication` when the node is reachable but
    /// refuses the credentials it was started with.
    async fn current_status(&self) -> Result<NodeStatus, LaunchError>;
}
