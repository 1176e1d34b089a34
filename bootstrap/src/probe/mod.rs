//! Connectivity prober
//!
//! Bounded readiness checks against either a just-launched local node or a
//! remote endpoint. Both loops short-circuit on the first conclusive answer,
//! sleep a fixed delay (plus optional jitter) between attempts, and abandon
//! remaining attempts as soon as the cancellation token fires.

pub mod http;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ExternalNode;
use crate::error::LaunchError;
use crate::launcher::{NodeLauncher, NodeStatus};

pub use http::HttpEndpointClient;

/// Why a reachable node refused us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Password does not unlock the local key material
    Password,
}

/// Result of a completed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Unreachable,
    Rejected(RejectReason),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Rejected(RejectReason::Password) => write!(f, "rejected(password)"),
        }
    }
}

/// The probe was abandoned before reaching an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("probe cancelled")]
pub struct ProbeCancelled;

/// Attempt budget and pacing for a probe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Upper bound of uniformly random extra delay
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempts actually made; a zero budget still tries once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(30, Duration::from_secs(1))
    }
}

/// Transport used by the external probe
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointClient: Send + Sync {
    /// One readiness check against `endpoint`; `Err` carries a diagnostic
    async fn ping(&self, endpoint: &ExternalNode) -> Result<(), String>;
}

/// Runs internal and external probes with their own retry policies
#[derive(Clone)]
pub struct ConnectivityProber {
    internal: RetryPolicy,
    external: RetryPolicy,
    client: Arc<dyn EndpointClient>,
}

impl ConnectivityProber {
    pub fn new(internal: RetryPolicy, external: RetryPolicy, client: Arc<dyn EndpointClient>) -> Self {
        Self {
            internal,
            external,
            client,
        }
    }

    pub fn internal_policy(&self) -> RetryPolicy {
        self.internal
    }

    pub fn external_policy(&self) -> RetryPolicy {
        self.external
    }

    /// Poll the launcher until the local node is up, refuses us, or the
    /// budget runs out
    pub async fn probe_internal(
        &self,
        launcher: &dyn NodeLauncher,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeCancelled> {
        let attempts = self.internal.attempts();

        for attempt in 1..=attempts {
            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(ProbeCancelled),
                status = launcher.current_status() => status,
            };

            match status {
                Ok(NodeStatus::Up) => {
                    tracing::debug!(attempt, "Internal node is up");
                    return Ok(ProbeOutcome::Ready);
                }
                Ok(NodeStatus::Down) => {}
                Err(LaunchError::Authentication(message)) => {
                    tracing::warn!(attempt, %message, "Internal node rejected password");
                    return Ok(ProbeOutcome::Rejected(RejectReason::Password));
                }
                Err(e @ LaunchError::Exited { .. }) => {
                    tracing::warn!(attempt, error = %e, "Internal node exited while probing");
                    return Ok(ProbeOutcome::Unreachable);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Internal status check failed");
                }
            }

            if attempt < attempts {
                pause(cancel, self.internal.next_delay()).await?;
            }
        }

        tracing::warn!(attempts, "Internal node never came up");
        Ok(ProbeOutcome::Unreachable)
    }

    /// Ping a remote endpoint until it answers or the budget runs out.
    ///
    /// Wrong credentials and an unreachable host both end as `Unreachable`.
    pub async fn probe_external(
        &self,
        endpoint: &ExternalNode,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeCancelled> {
        let attempts = self.external.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ProbeCancelled),
                result = self.client.ping(endpoint) => result,
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(
                            endpoint = %endpoint.label(),
                            attempt,
                            "External node answered after retries"
                        );
                    }
                    return Ok(ProbeOutcome::Ready);
                }
                Err(e) => last_error = Some(e),
            }

            if attempt < attempts {
                pause(cancel, self.external.next_delay()).await?;
            }
        }

        tracing::warn!(
            endpoint = %endpoint.label(),
            attempts,
            last_error = last_error.as_deref().unwrap_or("none"),
            "External node unreachable"
        );
        Ok(ProbeOutcome::Unreachable)
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), ProbeCancelled> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProbeCancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockNodeLauncher;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn endpoint() -> ExternalNode {
        ExternalNode::new("127.0.0.1", 8002, "token")
    }

    fn prober(client: MockEndpointClient) -> ConnectivityProber {
        ConnectivityProber::new(
            RetryPolicy::fixed(30, Duration::from_secs(1)),
            RetryPolicy::fixed(30, Duration::from_secs(1)),
            Arc::new(client),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_probe_exhausts_budget() {
        let mut client = MockEndpointClient::new();
        client
            .expect_ping()
            .times(30)
            .returning(|_| Err("connection refused".to_string()));

        let started = tokio::time::Instant::now();
        let outcome = prober(client)
            .probe_external(&endpoint(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Unreachable);
        // 29 gaps between 30 attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(29));
        assert!(elapsed < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_probe_short_circuits_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut client = MockEndpointClient::new();
        client.expect_ping().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet".to_string())
            } else {
                Ok(())
            }
        });

        let outcome = prober(client)
            .probe_external(&endpoint(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_probe_stops_when_cancelled() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut client = MockEndpointClient::new();
        client.expect_ping().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4500)).await;
            trigger.cancel();
        });

        let result = prober(client).probe_external(&endpoint(), &cancel).await;

        assert_eq!(result, Err(ProbeCancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_precancelled_probe_makes_no_attempts() {
        let mut client = MockEndpointClient::new();
        client.expect_ping().never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = prober(client).probe_external(&endpoint(), &cancel).await;
        assert_eq!(result, Err(ProbeCancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_probe_ready_after_node_comes_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut launcher = MockNodeLauncher::new();
        launcher.expect_current_status().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(NodeStatus::Down)
            } else {
                Ok(NodeStatus::Up)
            }
        });

        let outcome = prober(MockEndpointClient::new())
            .probe_internal(&launcher, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_probe_classifies_password_rejection() {
        let mut launcher = MockNodeLauncher::new();
        launcher
            .expect_current_status()
            .times(1)
            .returning(|| Err(LaunchError::Authentication("bad key".to_string())));

        let outcome = prober(MockEndpointClient::new())
            .probe_internal(&launcher, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Rejected(RejectReason::Password));
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_probe_unreachable_when_never_up() {
        let mut launcher = MockNodeLauncher::new();
        launcher
            .expect_current_status()
            .times(30)
            .returning(|| Ok(NodeStatus::Down));

        let outcome = prober(MockEndpointClient::new())
            .probe_internal(&launcher, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_probe_gives_up_when_process_exits() {
        let mut launcher = MockNodeLauncher::new();
        launcher
            .expect_current_status()
            .times(1)
            .returning(|| Err(LaunchError::Exited { code: Some(1) }));

        let outcome = prober(MockEndpointClient::new())
            .probe_internal(&launcher, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100))
            .with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = policy.next_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_zero_budget_still_attempts_once() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::default().attempts(), 30);
    }
}
