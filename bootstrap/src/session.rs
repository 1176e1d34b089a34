//! Bootstrap session: explicit states, legal transition guards and the
//! per-run context every orchestrator operation receives.
//!
//! The state graph:
//! ```text
//! Idle → DecidingStrategy
//! DecidingStrategy → Probing | Starting | AwaitingInternalSelection | AwaitingExternalSelection
//! AwaitingInternalSelection ↔ AwaitingExternalSelection
//! AwaitingInternalSelection | AwaitingExternalSelection → Starting
//! Starting → Probing | Failed
//! Probing → Ready | Failed
//! Failed → AwaitingInternalSelection | AwaitingExternalSelection
//! any → Idle
//! ```
//!
//! While the session sits in `Starting` or `Probing` a background timer sets
//! the `took_too_long` flag once the configured threshold passes. Leaving
//! those steps disarms the timer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{BootstrapError, BootstrapResult, FailureReason};
use crate::forms::{ExternalDraft, FolderSelection, InternalDraft};
use crate::strategy::{InternalPlan, Strategy};

/// Steps of a bootstrap session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStep {
    Idle,
    /// Config loaded, choosing between unattended start and asking the user
    DecidingStrategy,
    AwaitingInternalSelection,
    AwaitingExternalSelection,
    /// Launching the local node (no-op for external endpoints)
    Starting,
    /// Waiting for the node to answer
    Probing,
    Ready,
    Failed,
}

impl BootstrapStep {
    /// Steps covered by the "taking too long" timer
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Starting | Self::Probing)
    }

    pub fn is_awaiting(self) -> bool {
        matches!(
            self,
            Self::AwaitingInternalSelection | Self::AwaitingExternalSelection
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::DecidingStrategy => write!(f, "DecidingStrategy"),
            Self::AwaitingInternalSelection => write!(f, "AwaitingInternalSelection"),
            Self::AwaitingExternalSelection => write!(f, "AwaitingExternalSelection"),
            Self::Starting => write!(f, "Starting"),
            Self::Probing => write!(f, "Probing"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Which choice screen the caller has to fill in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Internal,
    External,
}

impl SelectionKind {
    pub fn step(self) -> BootstrapStep {
        match self {
            Self::Internal => BootstrapStep::AwaitingInternalSelection,
            Self::External => BootstrapStep::AwaitingExternalSelection,
        }
    }

    /// Screen that lets the user fix the input behind `reason`
    pub fn for_failure(reason: FailureReason) -> Self {
        match reason {
            FailureReason::InternalPassword | FailureReason::InternalUnknown => Self::Internal,
            FailureReason::ExternalUnknown => Self::External,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Internal => Self::External,
            Self::External => Self::Internal,
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
        }
    }
}

fn is_legal_transition(from: BootstrapStep, to: BootstrapStep) -> bool {
    use BootstrapStep::*;

    // Reload and reset are always available
    if to == Idle {
        return true;
    }

    matches!(
        (from, to),
        (Idle, DecidingStrategy)
            // Node already running: skip launching
            | (DecidingStrategy, Probing)
            | (DecidingStrategy, Starting)
            | (DecidingStrategy, AwaitingInternalSelection)
            | (DecidingStrategy, AwaitingExternalSelection)
            | (AwaitingInternalSelection, AwaitingExternalSelection)
            | (AwaitingExternalSelection, AwaitingInternalSelection)
            | (AwaitingInternalSelection, Starting)
            | (AwaitingExternalSelection, Starting)
            | (Starting, Probing)
            | (Starting, Failed)
            | (Probing, Ready)
            | (Probing, Failed)
            | (Failed, AwaitingInternalSelection)
            | (Failed, AwaitingExternalSelection)
    )
}

/// A single recorded step change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: BootstrapStep,
    pub to: BootstrapStep,
    /// Milliseconds since the session was created
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One orchestrator run.
///
/// Owned by the caller and passed to every orchestrator operation, so several
/// isolated sessions can coexist. Dropping the session cancels anything it
/// still has in flight.
pub struct BootstrapSession {
    id: Uuid,
    step: BootstrapStep,
    internal_form: InternalDraft,
    external_form: ExternalDraft,
    failure_reason: Option<FailureReason>,
    /// Last strategy attempted, kept for retry pre-fill
    attempt: Option<Strategy>,
    started_at: DateTime<Utc>,
    created: Instant,
    too_long_after: Duration,
    took_too_long: Arc<AtomicBool>,
    too_long_timer: Option<CancellationToken>,
    transitions: Vec<TransitionRecord>,
    notice: Option<String>,
    cancel: CancellationToken,
    step_tx: watch::Sender<BootstrapStep>,
}

impl BootstrapSession {
    /// Fresh `Idle` session that flags itself after `too_long_after` in flight
    pub fn new(too_long_after: Duration) -> Self {
        let (step_tx, _) = watch::channel(BootstrapStep::Idle);
        Self {
            id: Uuid::new_v4(),
            step: BootstrapStep::Idle,
            internal_form: InternalDraft::default(),
            external_form: ExternalDraft::default(),
            failure_reason: None,
            attempt: None,
            started_at: Utc::now(),
            created: Instant::now(),
            too_long_after,
            took_too_long: Arc::new(AtomicBool::new(false)),
            too_long_timer: None,
            transitions: Vec::new(),
            notice: None,
            cancel: CancellationToken::new(),
            step_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> BootstrapStep {
        self.step
    }

    pub fn internal_form(&self) -> &InternalDraft {
        &self.internal_form
    }

    pub fn external_form(&self) -> &ExternalDraft {
        &self.external_form
    }

    /// Set only while the session is `Failed`
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the current or last launch/probe overran the threshold
    pub fn took_too_long(&self) -> bool {
        self.took_too_long.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Last user-facing notice, e.g. an unusable folder
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    /// Token that cancels whatever this session has in flight.
    ///
    /// Grab it before handing the session to a long operation; cancelling it
    /// returns the session to `Idle` without touching the stored config.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe step changes while an operation holds the session
    pub fn subscribe(&self) -> watch::Receiver<BootstrapStep> {
        self.step_tx.subscribe()
    }

    /// Record the outcome of the folder picker.
    ///
    /// A cancelled picker changes nothing; an error becomes the notice and
    /// never moves the session.
    pub fn apply_folder_selection(&mut self, selection: FolderSelection) {
        match selection {
            FolderSelection::Selected(path) => {
                self.internal_form.directory = path;
                self.notice = None;
            }
            FolderSelection::Cancelled => {}
            FolderSelection::Error(message) => {
                tracing::warn!(session = %self.id, %message, "Folder selection rejected");
                self.notice = Some(message);
            }
        }
    }

    /// Move to `to`, recording the transition.
    ///
    /// Fails without side effects if the edge is not in the state graph.
    pub(crate) fn advance(&mut self, to: BootstrapStep, reason: Option<&str>) -> BootstrapResult<()> {
        let from = self.step;
        if !is_legal_transition(from, to) {
            return Err(BootstrapError::invalid_transition(from, to));
        }

        self.transitions.push(TransitionRecord {
            from,
            to,
            elapsed_ms: self.created.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });

        tracing::debug!(session = %self.id, from = %from, to = %to, "State transition");

        if from.is_in_flight() && !to.is_in_flight() {
            self.disarm_too_long_timer();
        } else if !from.is_in_flight() && to.is_in_flight() {
            self.arm_too_long_timer();
        }
        if to != BootstrapStep::Failed {
            self.failure_reason = None;
        }

        self.step = to;
        self.step_tx.send_replace(to);
        Ok(())
    }

    /// Move to `Failed` with a classified reason
    pub(crate) fn fail(&mut self, reason: FailureReason) -> BootstrapResult<()> {
        self.advance(BootstrapStep::Failed, Some(reason.as_str()))?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Remember `strategy` and mirror its parameters into the drafts
    pub(crate) fn record_attempt(&mut self, strategy: &Strategy) {
        match strategy {
            Strategy::Internal(InternalPlan::Launch(launch)) => {
                self.internal_form.directory = launch.directory.clone();
                self.internal_form.password = launch.password.clone();
                self.internal_form.save_password = launch.save_password;
            }
            Strategy::Internal(InternalPlan::Attach) => {}
            Strategy::External(endpoint) => {
                self.external_form = ExternalDraft::from_endpoint(endpoint);
            }
        }
        self.attempt = Some(strategy.clone());
    }

    pub(crate) fn last_attempt(&self) -> Option<&Strategy> {
        self.attempt.as_ref()
    }

    pub(crate) fn set_internal_form(&mut self, draft: InternalDraft) {
        self.internal_form = draft;
    }

    pub(crate) fn set_external_form(&mut self, draft: ExternalDraft) {
        self.external_form = draft;
    }

    pub(crate) fn clear_form(&mut self, kind: SelectionKind) {
        match kind {
            SelectionKind::Internal => self.internal_form = InternalDraft::default(),
            SelectionKind::External => self.external_form = ExternalDraft::default(),
        }
    }

    pub(crate) fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// Discard everything and start over from `Idle`.
    ///
    /// In-flight work is cancelled and a new id and token are issued.
    /// Existing subscribers keep observing the restarted session.
    pub(crate) fn restart(&mut self, reason: &str) {
        let from = self.step;
        let previous = self.id;
        self.cancel.cancel();
        self.disarm_too_long_timer();

        self.id = Uuid::new_v4();
        self.step = BootstrapStep::Idle;
        self.internal_form = InternalDraft::default();
        self.external_form = ExternalDraft::default();
        self.failure_reason = None;
        self.attempt = None;
        self.started_at = Utc::now();
        self.created = Instant::now();
        self.took_too_long = Arc::new(AtomicBool::new(false));
        self.transitions = vec![TransitionRecord {
            from,
            to: BootstrapStep::Idle,
            elapsed_ms: 0,
            reason: Some(reason.to_string()),
        }];
        self.notice = None;
        self.cancel = CancellationToken::new();
        self.step_tx.send_replace(BootstrapStep::Idle);

        tracing::info!(session = %self.id, %previous, from = %from, reason, "Session restarted");
    }

    fn arm_too_long_timer(&mut self) {
        self.disarm_too_long_timer();
        self.took_too_long.store(false, Ordering::SeqCst);

        // Without a runtime there is nothing to drive the timer
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let token = self.cancel.child_token();
        let flag = self.took_too_long.clone();
        let after = self.too_long_after;
        let session = self.id;
        let timer = token.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    flag.store(true, Ordering::SeqCst);
                    tracing::warn!(%session, after_secs = after.as_secs(), "Bootstrap is taking too long");
                }
            }
        });
        self.too_long_timer = Some(token);
    }

    fn disarm_too_long_timer(&mut self) {
        if let Some(timer) = self.too_long_timer.take() {
            timer.cancel();
        }
    }
}

impl Drop for BootstrapSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for BootstrapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapSession")
            .field("id", &self.id)
            .field("step", &self.step)
            .field("failure_reason", &self.failure_reason)
            .field("took_too_long", &self.took_too_long())
            .field("transitions", &self.transitions.len())
            .finish_non_exhaustive()
    }
}
