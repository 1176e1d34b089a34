//! Runtime settings for the bootstrap orchestrator
//!
//! Every knob has a built-in default and can be overridden through an
//! environment variable, so the binary and tests share one construction path.

use std::path::PathBuf;
use std::time::Duration;

use crate::probe::RetryPolicy;

const DEFAULT_PROBE_ATTEMPTS: u32 = 30;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Where the node config is persisted
    pub config_path: PathBuf,
    /// Retry budget for pinging an external endpoint
    pub external_probe: RetryPolicy,
    /// Retry budget for polling a local node's status
    pub internal_probe: RetryPolicy,
    /// Elapsed time in Starting/Probing after which the session is flagged
    pub too_long_after: Duration,
    /// Per-request timeout for HTTP pings
    pub request_timeout: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        // NODE_BOOTSTRAP_PROBE_JITTER_MS: upper bound of random delay added per retry
        let jitter = env_parse("NODE_BOOTSTRAP_PROBE_JITTER_MS")
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);

        Self {
            // NODE_BOOTSTRAP_CONFIG: explicit config file location
            config_path: std::env::var("NODE_BOOTSTRAP_CONFIG")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_config_path),
            external_probe: RetryPolicy {
                max_attempts: env_attempts("NODE_BOOTSTRAP_EXTERNAL_ATTEMPTS"),
                delay: env_parse("NODE_BOOTSTRAP_EXTERNAL_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| Duration::from_secs(1)),
                jitter,
            },
            internal_probe: RetryPolicy {
                max_attempts: env_attempts("NODE_BOOTSTRAP_INTERNAL_ATTEMPTS"),
                delay: env_parse("NODE_BOOTSTRAP_INTERNAL_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| Duration::from_secs(1)),
                jitter,
            },
            too_long_after: env_parse("NODE_BOOTSTRAP_TOO_LONG_SECS")
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(10)),
            request_timeout: env_parse("NODE_BOOTSTRAP_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(5)),
        }
    }
}

impl BootstrapSettings {
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }
}

/// `<config dir>/node-bootstrap/node-config.json`, or the working directory
/// when the platform has no config dir
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("node-bootstrap")
        .join("node-config.json")
}

fn env_parse(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Attempt budget from `key`; values that do not fit a `u32` use the default
fn env_attempts(key: &str) -> u32 {
    env_parse(key)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(DEFAULT_PROBE_ATTEMPTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_budget() {
        let settings = BootstrapSettings::default();
        assert!(!settings.config_path.as_os_str().is_empty());
        assert!(settings.external_probe.max_attempts > 0);
        assert!(settings.internal_probe.max_attempts > 0);
        assert!(settings.too_long_after > Duration::ZERO);
    }

    #[test]
    fn test_default_config_path_file_name() {
        let path = default_config_path();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("node-config.json")
        );
    }

    #[test]
    fn test_oversized_attempt_budget_falls_back_to_default() {
        std::env::set_var("NODE_BOOTSTRAP_TEST_ATTEMPTS_OVERFLOW", "4294967296");
        std::env::set_var("NODE_BOOTSTRAP_TEST_ATTEMPTS_SET", " 12 ");

        assert_eq!(env_attempts("NODE_BOOTSTRAP_TEST_ATTEMPTS_OVERFLOW"), 30);
        assert_eq!(env_attempts("NODE_BOOTSTRAP_TEST_ATTEMPTS_SET"), 12);
        assert_eq!(env_attempts("NODE_BOOTSTRAP_TEST_ATTEMPTS_UNSET"), 30);
    }

    #[test]
    fn test_with_config_path_overrides() {
        let settings = BootstrapSettings::default().with_config_path("/tmp/x.json");
        assert_eq!(settings.config_path, PathBuf::from("/tmp/x.json"));
    }
}
