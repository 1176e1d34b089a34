//! Bootstrap orchestrator
//!
//! Drives a [`BootstrapSession`] from `Idle` to `Ready` or `Failed`:
//!
//! 1. `start` loads the stored config and either attempts it unattended or
//!    parks the session on a selection screen
//! 2. `submit_internal` / `submit_external` / `connect_history` attempt the
//!    user's choice
//! 3. `retry`, `reload` and `reset` recover from `Failed` or a stalled run
//!
//! Config is written only after a probe reports the node ready.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{ExternalNode, NodeConfig, NodeConfigStore, NodeMode};
use crate::error::{BootstrapError, BootstrapResult, FailureReason};
use crate::forms::{ExternalDraft, InternalDraft};
use crate::launcher::{NodeLauncher, NodeStatus};
use crate::probe::{ConnectivityProber, EndpointClient, HttpEndpointClient, ProbeCancelled};
use crate::session::{BootstrapSession, BootstrapStep, SelectionKind};
use crate::settings::BootstrapSettings;
use crate::strategy::{InternalPlan, Strategy};

/// Where an orchestrator operation left the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Node is answering; dependent initialisation may proceed
    Ready { mode: NodeMode },
    /// The caller has to fill in a selection screen
    NeedsInput { selection: SelectionKind },
    Failed { reason: FailureReason },
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Releases the in-flight flag when an attempt ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Brings the node up and remembers how
pub struct BootstrapOrchestrator {
    store: NodeConfigStore,
    launcher: Arc<dyn NodeLauncher>,
    prober: ConnectivityProber,
    too_long_after: Duration,
    in_flight: AtomicBool,
}

impl BootstrapOrchestrator {
    pub fn new(
        store: NodeConfigStore,
        launcher: Arc<dyn NodeLauncher>,
        prober: ConnectivityProber,
        too_long_after: Duration,
    ) -> Self {
        Self {
            store,
            launcher,
            prober,
            too_long_after,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Orchestrator wired with the HTTP endpoint client
    pub fn from_settings(settings: &BootstrapSettings, launcher: Arc<dyn NodeLauncher>) -> Self {
        let client: Arc<dyn EndpointClient> =
            Arc::new(HttpEndpointClient::new(settings.request_timeout));
        Self::new(
            NodeConfigStore::new(&settings.config_path),
            launcher,
            ConnectivityProber::new(settings.internal_probe, settings.external_probe, client),
            settings.too_long_after,
        )
    }

    pub fn store(&self) -> &NodeConfigStore {
        &self.store
    }

    /// Fresh `Idle` session using this orchestrator's timing
    pub fn new_session(&self) -> BootstrapSession {
        BootstrapSession::new(self.too_long_after)
    }

    /// Currently stored config
    pub fn config(&self) -> NodeConfig {
        self.store.load()
    }

    /// Remembered external endpoints, oldest first
    pub fn history(&self) -> Vec<ExternalNode> {
        self.store.load().external_history
    }

    /// Load the stored config and try it.
    ///
    /// A node that is already answering locally is probed as is. Otherwise a
    /// usable internal config is launched, then a usable external config is
    /// connected. Without either the session waits for the user.
    pub async fn start(&self, session: &mut BootstrapSession) -> BootstrapResult<BootstrapOutcome> {
        let _guard = self.begin()?;
        session.advance(BootstrapStep::DecidingStrategy, Some("start"))?;

        let config = self.store.load();
        tracing::info!(session = %session.id(), mode = %config.mode, "Bootstrap started");

        let cancel = session.cancellation_token();
        let running = match self.local_node_running(&cancel).await {
            Ok(running) => running,
            Err(ProbeCancelled) => return Err(self.cancelled(session)),
        };

        let strategy = if running {
            Some(Strategy::Internal(InternalPlan::Attach))
        } else if let Some(node) = config.usable_internal() {
            Some(Strategy::Internal(InternalPlan::Launch(node.into())))
        } else {
            config.usable_external().cloned().map(Strategy::External)
        };

        if let Some(strategy) = strategy {
            return self.attempt(session, strategy).await;
        }

        let selection = if config.mode == NodeMode::External {
            SelectionKind::External
        } else {
            SelectionKind::Internal
        };
        if let Some(node) = &config.internal {
            session.set_internal_form(InternalDraft::from_stored(node));
        }
        if let Some(endpoint) = &config.external {
            session.set_external_form(ExternalDraft::from_endpoint(endpoint));
        }
        session.advance(selection.step(), Some("no usable config"))?;

        tracing::info!(session = %session.id(), %selection, "Waiting for node selection");
        Ok(BootstrapOutcome::NeedsInput { selection })
    }

    /// Launch a local node from `draft`
    pub async fn submit_internal(
        &self,
        session: &mut BootstrapSession,
        draft: InternalDraft,
    ) -> BootstrapResult<BootstrapOutcome> {
        let _guard = self.begin()?;
        expect_step(session, BootstrapStep::AwaitingInternalSelection)?;

        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(BootstrapError::incomplete(
                "internal",
                format!("missing {}", missing.join(", ")),
            ));
        }

        let strategy = Strategy::Internal(InternalPlan::Launch((&draft).into()));
        session.set_internal_form(draft);
        self.attempt(session, strategy).await
    }

    /// Connect to the endpoint described by `draft`
    pub async fn submit_external(
        &self,
        session: &mut BootstrapSession,
        draft: ExternalDraft,
    ) -> BootstrapResult<BootstrapOutcome> {
        let _guard = self.begin()?;
        expect_step(session, BootstrapStep::AwaitingExternalSelection)?;
        self.attempt_external(session, draft).await
    }

    /// Connect to the remembered endpoint at `index`
    pub async fn connect_history(
        &self,
        session: &mut BootstrapSession,
        index: usize,
    ) -> BootstrapResult<BootstrapOutcome> {
        let _guard = self.begin()?;
        expect_step(session, BootstrapStep::AwaitingExternalSelection)?;

        let entry = self.history_entry(index)?;
        tracing::debug!(session = %session.id(), index, endpoint = %entry.label(), "Using history entry");
        self.attempt_external(session, ExternalDraft::from_endpoint(&entry))
            .await
    }

    /// Forget the remembered endpoint at `index`.
    ///
    /// Rejected with `AlreadyRunning` while an attempt is in flight.
    pub fn delete_history(&self, index: usize) -> BootstrapResult<ExternalNode> {
        let _guard = self.begin()?;

        let mut removed = None;
        let mut len = 0;
        self.store.update(|config| {
            len = config.external_history.len();
            let Some(entry) = config.external_history.get(index).cloned() else {
                return false;
            };
            let changed = config.remove_history_entry(&entry);
            removed = Some(entry);
            changed
        })?;

        let entry = removed.ok_or(BootstrapError::HistoryEntryNotFound { index, len })?;
        tracing::info!(index, endpoint = %entry.label(), "Removed history entry");
        Ok(entry)
    }

    /// Move between the internal and external selection screens
    pub fn switch_selection(
        &self,
        session: &mut BootstrapSession,
        selection: SelectionKind,
    ) -> BootstrapResult<()> {
        let to = selection.step();
        if session.step() == to {
            return Ok(());
        }
        if !session.step().is_awaiting() {
            return Err(BootstrapError::invalid_transition(session.step(), to));
        }
        session.advance(to, Some("switch selection"))
    }

    /// Leave `Failed` for a selection screen.
    ///
    /// With `prefill` the drafts keep the failed attempt's values; otherwise
    /// the chosen screen starts blank.
    pub fn retry(
        &self,
        session: &mut BootstrapSession,
        selection: SelectionKind,
        prefill: bool,
    ) -> BootstrapResult<()> {
        if session.step() != BootstrapStep::Failed {
            return Err(BootstrapError::invalid_transition(
                session.step(),
                selection.step(),
            ));
        }

        let reason = session.failure_reason();
        session.advance(selection.step(), Some("retry"))?;
        if !prefill {
            session.clear_form(selection);
        }

        tracing::info!(
            session = %session.id(),
            %selection,
            prefill,
            previous = ?reason,
            last_attempt = ?session.last_attempt().map(|s| s.to_string()),
            "Retrying bootstrap"
        );
        Ok(())
    }

    /// Discard the session and start over from `Idle`; the config is kept
    pub fn reload(&self, session: &mut BootstrapSession) {
        session.restart("reload");
    }

    /// Clear the stored config and start over from `Idle`.
    ///
    /// Rejected with `AlreadyRunning` while an attempt is in flight.
    pub fn reset(&self, session: &mut BootstrapSession) -> BootstrapResult<()> {
        let _guard = self.begin()?;
        self.store.reset()?;
        session.restart("reset");
        Ok(())
    }

    fn begin(&self) -> BootstrapResult<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BootstrapError::AlreadyRunning)?;
        Ok(InFlightGuard(&self.in_flight))
    }

    fn history_entry(&self, index: usize) -> BootstrapResult<ExternalNode> {
        let history = self.store.load().external_history;
        let len = history.len();
        history
            .into_iter()
            .nth(index)
            .ok_or(BootstrapError::HistoryEntryNotFound { index, len })
    }

    async fn local_node_running(&self, cancel: &CancellationToken) -> Result<bool, ProbeCancelled> {
        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeCancelled),
            status = self.launcher.current_status() => status,
        };
        match status {
            Ok(NodeStatus::Up) => {
                tracing::info!("Local node already running");
                Ok(true)
            }
            Ok(NodeStatus::Down) => Ok(false),
            // Up but locked; the probe reports the password rejection
            Err(e) if e.is_authentication() => {
                tracing::info!(error = %e, "Local node already running and locked");
                Ok(true)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Local node status unavailable");
                Ok(false)
            }
        }
    }

    async fn attempt_external(
        &self,
        session: &mut BootstrapSession,
        draft: ExternalDraft,
    ) -> BootstrapResult<BootstrapOutcome> {
        if !draft.is_complete() {
            return Err(BootstrapError::incomplete("external", "port is required"));
        }

        let strategy = Strategy::External(draft.to_endpoint());
        session.set_external_form(draft);
        self.attempt(session, strategy).await
    }

    async fn attempt(
        &self,
        session: &mut BootstrapSession,
        strategy: Strategy,
    ) -> BootstrapResult<BootstrapOutcome> {
        session.record_attempt(&strategy);
        let cancel = session.cancellation_token();
        let id = session.id();
        tracing::info!(session = %id, strategy = %strategy, "Attempting bootstrap");

        if strategy.needs_launch() {
            session.advance(BootstrapStep::Starting, Some(strategy.mode().to_string().as_str()))?;

            let launched = tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled(session)),
                launched = strategy.launch(self.launcher.as_ref()) => launched,
            };
            if let Err(e) = launched {
                let reason = strategy.classify_launch_error(&e);
                tracing::warn!(session = %id, error = %e, %reason, "Node launch failed");
                session.fail(reason)?;
                return Ok(BootstrapOutcome::Failed { reason });
            }
        }

        session.advance(BootstrapStep::Probing, None)?;
        let outcome = match strategy
            .probe(&self.prober, self.launcher.as_ref(), &cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(ProbeCancelled) => return Err(self.cancelled(session)),
        };

        if let Some(reason) = strategy.classify(outcome) {
            tracing::warn!(session = %id, %outcome, %reason, "Bootstrap failed");
            session.fail(reason)?;
            return Ok(BootstrapOutcome::Failed { reason });
        }

        if let Err(e) = self.store.update(|config| strategy.commit(config)) {
            tracing::warn!(session = %id, error = %e, "Node ready but config not saved");
            session.set_notice(format!("Settings could not be saved: {}", e));
        }

        let mode = strategy.mode();
        session.advance(BootstrapStep::Ready, None)?;
        tracing::info!(session = %id, %mode, "Node ready");
        Ok(BootstrapOutcome::Ready { mode })
    }

    fn cancelled(&self, session: &mut BootstrapSession) -> BootstrapError {
        tracing::info!(session = %session.id(), step = %session.step(), "Bootstrap cancelled");
        session.restart("cancelled");
        BootstrapError::Cancelled
    }
}

fn expect_step(session: &BootstrapSession, expected: BootstrapStep) -> BootstrapResult<()> {
    if session.step() != expected {
        return Err(BootstrapError::invalid_transition(
            session.step(),
            BootstrapStep::Starting,
        ));
    }
    Ok(())
}
