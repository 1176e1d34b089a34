//! Node configuration
//!
//! - [`types`]: the persisted `NodeConfig` record and its parts
//! - [`store`]: atomic JSON persistence with backup recovery

pub mod store;
pub mod types;

pub use store::NodeConfigStore;
pub use types::{ExternalNode, InternalNode, NodeConfig, NodeMode, DEFAULT_EXTERNAL_HOST};
