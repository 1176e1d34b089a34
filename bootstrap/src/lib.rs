//! Node Bootstrap Library
//!
//! Brings the peer-to-peer node behind a desktop client into a ready state
//! and remembers how to do so across restarts. The node is either launched
//! locally from a data directory and password (internal mode) or reached over
//! the network with a bearer token and optional certificate (external mode).
//!
//! # Components
//!
//! - [`config`]: the persisted `NodeConfig` and its atomic JSON store
//! - [`launcher`]: the `NodeLauncher` contract and a process-backed launcher
//! - [`probe`]: bounded, cancellable readiness checks
//! - [`orchestrator`]: the state machine tying it together
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use node_bootstrap::{BootstrapOrchestrator, BootstrapSettings, ProcessLauncher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = BootstrapSettings::default();
//! let launcher = Arc::new(ProcessLauncher::new("quorum-node", 8002)?);
//! let orchestrator = BootstrapOrchestrator::from_settings(&settings, launcher);
//!
//! let mut session = orchestrator.new_session();
//! let outcome = orchestrator.start(&mut session).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod forms;
pub mod launcher;
pub mod orchestrator;
pub mod probe;
pub mod session;
pub mod settings;
pub mod strategy;

pub use config::{ExternalNode, InternalNode, NodeConfig, NodeConfigStore, NodeMode};
pub use error::{BootstrapError, BootstrapResult, ConfigLoadError, FailureReason, LaunchError};
pub use forms::{select_folder, ExternalDraft, FolderSelection, InternalDraft, InternalIntent};
pub use launcher::{NodeLauncher, NodeStatus, ProcessLauncher};
pub use orchestrator::{BootstrapOrchestrator, BootstrapOutcome};
pub use probe::{
    ConnectivityProber, EndpointClient, HttpEndpointClient, ProbeCancelled, ProbeOutcome,
    RejectReason, RetryPolicy,
};
pub use session::{BootstrapSession, BootstrapStep, SelectionKind, TransitionRecord};
pub use settings::BootstrapSettings;
pub use strategy::{InternalLaunch, InternalPlan, Strategy};
