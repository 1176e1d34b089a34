//! Launch strategies
//!
//! A [`Strategy`] is the mode-specific half of a bootstrap attempt. The
//! orchestrator drives every strategy through the same four steps:
//! `launch`, `probe`, `classify` and, on success, `commit`.

use std::fmt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::{ExternalNode, InternalNode, NodeConfig, NodeMode};
use crate::error::{FailureReason, LaunchError};
use crate::forms::InternalDraft;
use crate::launcher::NodeLauncher;
use crate::probe::{ConnectivityProber, ProbeCancelled, ProbeOutcome, RejectReason};

/// Parameters for launching a local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalLaunch {
    pub directory: PathBuf,
    pub password: String,
    pub save_password: bool,
}

impl InternalLaunch {
    /// Record to persist; the password is blanked unless the user opted in
    pub fn stored(&self) -> InternalNode {
        let password = if self.save_password {
            self.password.clone()
        } else {
            String::new()
        };
        InternalNode::new(self.directory.clone(), password)
    }
}

impl From<&InternalDraft> for InternalLaunch {
    fn from(draft: &InternalDraft) -> Self {
        Self {
            directory: draft.directory.clone(),
            password: draft.password.clone(),
            save_password: draft.save_password,
        }
    }
}

impl From<&InternalNode> for InternalLaunch {
    fn from(node: &InternalNode) -> Self {
        Self {
            directory: node.directory.clone(),
            password: node.password.clone(),
            save_password: node.has_saved_password(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalPlan {
    /// A local node is already answering; probe it without launching
    Attach,
    Launch(InternalLaunch),
}

/// How this attempt reaches the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Internal(InternalPlan),
    External(ExternalNode),
}

impl Strategy {
    pub fn mode(&self) -> NodeMode {
        match self {
            Self::Internal(_) => NodeMode::Internal,
            Self::External(_) => NodeMode::External,
        }
    }

    /// Whether the attempt goes through `Starting`
    pub fn needs_launch(&self) -> bool {
        !matches!(self, Self::Internal(InternalPlan::Attach))
    }

    /// Start the node if this strategy owns it. External endpoints and an
    /// already running node need nothing.
    pub async fn launch(&self, launcher: &dyn NodeLauncher) -> Result<(), LaunchError> {
        match self {
            Self::Internal(InternalPlan::Launch(params)) => {
                launcher.start(&params.directory, &params.password).await
            }
            Self::Internal(InternalPlan::Attach) | Self::External(_) => Ok(()),
        }
    }

    pub async fn probe(
        &self,
        prober: &ConnectivityProber,
        launcher: &dyn NodeLauncher,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeCancelled> {
        match self {
            Self::Internal(_) => prober.probe_internal(launcher, cancel).await,
            Self::External(endpoint) => prober.probe_external(endpoint, cancel).await,
        }
    }

    /// Failure reason for a probe outcome, `None` when the node is ready
    pub fn classify(&self, outcome: ProbeOutcome) -> Option<FailureReason> {
        match (self, outcome) {
            (_, ProbeOutcome::Ready) => None,
            (Self::Internal(_), ProbeOutcome::Rejected(RejectReason::Password)) => {
                Some(FailureReason::InternalPassword)
            }
            (Self::Internal(_), ProbeOutcome::Unreachable) => Some(FailureReason::InternalUnknown),
            (Self::External(_), _) => Some(FailureReason::ExternalUnknown),
        }
    }

    /// Failure reason for a launcher error raised by `launch`
    pub fn classify_launch_error(&self, error: &LaunchError) -> FailureReason {
        match self {
            Self::Internal(_) if error.is_authentication() => FailureReason::InternalPassword,
            Self::Internal(_) => FailureReason::InternalUnknown,
            Self::External(_) => FailureReason::ExternalUnknown,
        }
    }

    /// Fold a successful attempt into `config`.
    ///
    /// Returns `true` if anything changed. Attaching to a running node has no
    /// new parameters to remember.
    pub fn commit(&self, config: &mut NodeConfig) -> bool {
        let before = config.clone();
        match self {
            Self::Internal(InternalPlan::Attach) => {}
            Self::Internal(InternalPlan::Launch(params)) => {
                config.mode = NodeMode::Internal;
                config.internal = Some(params.stored());
            }
            Self::External(endpoint) => {
                config.mode = NodeMode::External;
                config.external = Some(endpoint.clone());
                config.add_history_entry(endpoint.clone());
            }
        }
        *config != before
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(InternalPlan::Attach) => write!(f, "internal (running)"),
            Self::Internal(InternalPlan::Launch(params)) => {
                write!(f, "internal ({})", params.directory.display())
            }
            Self::External(endpoint) => write!(f, "external ({})", endpoint.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockNodeLauncher;

    fn launch(save_password: bool) -> Strategy {
        Strategy::Internal(InternalPlan::Launch(InternalLaunch {
            directory: PathBuf::from("/data/node"),
            password: "hunter2".to_string(),
            save_password,
        }))
    }

    #[test]
    fn test_commit_internal_respects_save_password() {
        let mut config = NodeConfig::default();
        assert!(launch(false).commit(&mut config));
        assert_eq!(config.mode, NodeMode::Internal);
        let stored = config.internal.clone().unwrap();
        assert_eq!(stored.directory, PathBuf::from("/data/node"));
        assert_eq!(stored.password, "");

        assert!(launch(true).commit(&mut config));
        assert_eq!(config.internal.unwrap().password, "hunter2");
    }

    #[test]
    fn test_commit_external_appends_history_once() {
        let endpoint = ExternalNode::new("10.0.0.1", 8002, "jwt");
        let strategy = Strategy::External(endpoint.clone());
        let mut config = NodeConfig::default();

        assert!(strategy.commit(&mut config));
        assert!(!strategy.commit(&mut config));
        assert_eq!(config.mode, NodeMode::External);
        assert_eq!(config.external, Some(endpoint.clone()));
        assert_eq!(config.external_history, vec![endpoint]);
    }

    #[test]
    fn test_commit_attach_changes_nothing() {
        let mut config = NodeConfig::default();
        assert!(!Strategy::Internal(InternalPlan::Attach).commit(&mut config));
        assert!(config.is_empty());
    }

    #[test]
    fn test_classify_outcomes() {
        let internal = launch(false);
        let external = Strategy::External(ExternalNode::new("h", 1, "t"));

        assert_eq!(internal.classify(ProbeOutcome::Ready), None);
        assert_eq!(
            internal.classify(ProbeOutcome::Rejected(RejectReason::Password)),
            Some(FailureReason::InternalPassword)
        );
        assert_eq!(
            internal.classify(ProbeOutcome::Unreachable),
            Some(FailureReason::InternalUnknown)
        );
        assert_eq!(external.classify(ProbeOutcome::Ready), None);
        assert_eq!(
            external.classify(ProbeOutcome::Unreachable),
            Some(FailureReason::ExternalUnknown)
        );
    }

    #[test]
    fn test_classify_launch_errors() {
        let internal = launch(false);
        assert_eq!(
            internal.classify_launch_error(&LaunchError::Authentication("locked".into())),
            FailureReason::InternalPassword
        );
        assert_eq!(
            internal.classify_launch_error(&LaunchError::Spawn("ENOENT".into())),
            FailureReason::InternalUnknown
        );
    }

    #[tokio::test]
    async fn test_launch_only_starts_internal_launch_plans() {
        let mut launcher = MockNodeLauncher::new();
        launcher
            .expect_start()
            .withf(|dir, pw| dir == std::path::Path::new("/data/node") && pw == "hunter2")
            .times(1)
            .returning(|_, _| Ok(()));

        launch(true).launch(&launcher).await.unwrap();
        Strategy::Internal(InternalPlan::Attach)
            .launch(&launcher)
            .await
            .unwrap();
        Strategy::External(ExternalNode::new("h", 1, "t"))
            .launch(&launcher)
            .await
            .unwrap();
    }

    #[test]
    fn test_launch_from_stored_node_keeps_saved_password() {
        let params = InternalLaunch::from(&InternalNode::new("/n", "pw"));
        assert!(params.save_password);
        assert_eq!(params.stored(), InternalNode::new("/n", "pw"));
    }
}
