//! Process-backed node launcher
//!
//! Spawns the node binary as a child process and checks its local status
//! route over HTTP:
//!
//! ```text
//! <binary> --data-dir <directory> --api-port <port>
//!   env NODE_KEYSTORE_PASSWORD=<password>
//!
//! GET http://127.0.0.1:<port>/api/v1/node
//!   2xx       -> up
//!   401 / 403 -> credentials rejected
//!   otherwise -> down
//! ```
//!
//! The child is owned by the launcher and killed when the launcher is
//! dropped. A caller that wants the node to outlive the bootstrap keeps the
//! launcher alive and hands the child to [`ProcessLauncher::supervise`].

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LaunchError;
use crate::launcher::{NodeLauncher, NodeStatus};

/// Environment variable carrying the keystore password to the child
pub const PASSWORD_ENV: &str = "NODE_KEYSTORE_PASSWORD";

/// Launches the node as a supervised child process
pub struct ProcessLauncher {
    binary: PathBuf,
    api_port: u16,
    /// Exit code the node uses for "wrong password"
    bad_password_exit_code: Option<i32>,
    http_client: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>, api_port: u16) -> Result<Self, LaunchError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| LaunchError::Other(format!("http client: {}", e)))?;

        Ok(Self {
            binary: binary.into(),
            api_port,
            bad_password_exit_code: None,
            http_client,
            child: Mutex::new(None),
        })
    }

    /// Treat a child exit with this code as a password rejection
    pub fn with_bad_password_exit_code(mut self, code: i32) -> Self {
        self.bad_password_exit_code = Some(code);
        self
    }

    pub fn status_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1/node", self.api_port)
    }

    fn classify_exit(&self, code: Option<i32>) -> LaunchError {
        match (code, self.bad_password_exit_code) {
            (Some(code), Some(bad)) if code == bad => {
                LaunchError::Authentication(format!("node exited with code {}", code))
            }
            _ => LaunchError::Exited { code },
        }
    }

    /// Check whether the spawned child has already exited
    async fn reap_child(&self) -> Result<(), LaunchError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                *guard = None;
                Err(self.classify_exit(status.code()))
            }
            Ok(None) => Ok(()),
            Err(e) => Err(LaunchError::Other(e.to_string())),
        }
    }

    /// Whether a node spawned by this launcher is still owned by it
    pub async fn owns_child(&self) -> bool {
        self.child.lock().await.is_some()
    }

    /// Keep the spawned node running until it exits or `shutdown` fires.
    ///
    /// Returns the node's exit status, or `None` if there was no child or it
    /// was stopped through `shutdown`.
    pub async fn supervise(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<ExitStatus>, LaunchError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(None);
        };
        let pid = child.id();
        tracing::info!(pid, "Supervising node process");

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = shutdown.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = status.map_err(|e| LaunchError::Other(e.to_string()))?;
                tracing::warn!(pid, %status, "Node process exited");
                Ok(Some(status))
            }
            None => {
                tracing::info!(pid, "Stopping node process");
                child
                    .kill()
                    .await
                    .map_err(|e| LaunchError::Other(e.to_string()))?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn start(&self, directory: &Path, password: &str) -> Result<(), LaunchError> {
        self.reap_child().await?;

        let mut guard = self.child.lock().await;
        if guard.is_some() {
            tracing::debug!(binary = %self.binary.display(), "Node process already running");
            return Ok(());
        }

        let child = Command::new(&self.binary)
            .arg("--data-dir")
            .arg(directory)
            .arg("--api-port")
            .arg(self.api_port.to_string())
            .env(PASSWORD_ENV, password)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{}: {}", self.binary.display(), e)))?;

        tracing::info!(
            binary = %self.binary.display(),
            directory = %directory.display(),
            pid = child.id(),
            "Spawned node process"
        );
        *guard = Some(child);
        Ok(())
    }

    async fn current_status(&self) -> Result<NodeStatus, LaunchError> {
        self.reap_child().await?;

        let resp = match self.http_client.get(self.status_url()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::trace!(error = %e, "Node status request failed");
                return Ok(NodeStatus::Down);
            }
        };

        match resp.status() {
            s if s.is_success() => Ok(NodeStatus::Up),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LaunchError::Authentication(
                format!("status route returned {}", resp.status()),
            )),
            other => {
                tracing::debug!(status = %other, "Node status route not ready");
                Ok(NodeStatus::Down)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url_uses_loopback_and_port() {
        let launcher = ProcessLauncher::new("quorum", 8002).unwrap();
        assert_eq!(launcher.status_url(), "http://127.0.0.1:8002/api/v1/node");
    }

    #[test]
    fn test_classify_exit_code() {
        let launcher = ProcessLauncher::new("node", 1)
            .unwrap()
            .with_bad_password_exit_code(3);
        assert!(launcher.classify_exit(Some(3)).is_authentication());
        assert_eq!(
            launcher.classify_exit(Some(1)),
            LaunchError::Exited { code: Some(1) }
        );
        assert_eq!(
            launcher.classify_exit(None),
            LaunchError::Exited { code: None }
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let launcher = ProcessLauncher::new("/nonexistent/node-binary-for-tests", 1).unwrap();
        let err = launcher
            .start(Path::new("/tmp"), "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_status_down_when_nothing_listens() {
        // Port 9 (discard) is practically never served on loopback
        let launcher = ProcessLauncher::new("node", 9).unwrap();
        assert_eq!(launcher.current_status().await.unwrap(), NodeStatus::Down);
    }

    #[tokio::test]
    async fn test_supervise_without_child_returns_immediately() {
        let launcher = ProcessLauncher::new("node", 9).unwrap();
        let status = launcher.supervise(&CancellationToken::new()).await.unwrap();
        assert!(status.is_none());
    }

    #[cfg(unix)]
    fn node_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-node");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_keeps_node_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(node_script(dir.path(), "exec sleep 30"), 9).unwrap();
        launcher.start(dir.path(), "pw").await.unwrap();
        assert!(launcher.owns_child().await);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let status = tokio::time::timeout(Duration::from_secs(10), launcher.supervise(&shutdown))
            .await
            .unwrap()
            .unwrap();

        assert!(status.is_none());
        assert!(!launcher.owns_child().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_reports_node_exit() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(node_script(dir.path(), "exit 4"), 9).unwrap();
        launcher.start(dir.path(), "pw").await.unwrap();

        let status = tokio::time::timeout(
            Duration::from_secs(10),
            launcher.supervise(&CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(status.and_then(|s| s.code()), Some(4));
    }
}
