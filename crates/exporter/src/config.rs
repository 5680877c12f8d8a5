//! Exporter configuration

use anyhow::Result;
use metrics_lib::DispatchConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Exporter configuration, read from `EXPORTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Port serving `/metrics`, `/healthz` and `/readyz`
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Upper bound on a single reconciliation, in seconds; 0 disables it
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// Delay before restarting a failed watch stream
    #[serde(default = "default_watch_retry")]
    pub watch_retry_secs: u64,

    /// Kubeconfig to use instead of in-cluster or default discovery
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_reconcile_timeout() -> u64 {
    30
}

fn default_retry_base_delay() -> u64 {
    100
}

fn default_retry_max_delay() -> u64 {
    300
}

fn default_watch_retry() -> u64 {
    5
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            watch_retry_secs: default_watch_retry(),
            kubeconfig: None,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from the environment
    ///
    /// Values that fail to deserialize fall back to the defaults.
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("EXPORTER"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid exporter configuration, using defaults");
            ExporterConfig::default()
        }))
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            reconcile_timeout: (self.reconcile_timeout_secs > 0)
                .then(|| Duration::from_secs(self.reconcile_timeout_secs)),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms.max(1)),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("EXPORTER").source(Some(source))
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ExporterConfig::from_source(env(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.reconcile_timeout_secs, 30);
        assert!(config.kubeconfig.is_none());

        let dispatch = config.dispatch();
        assert_eq!(dispatch.reconcile_timeout, Some(Duration::from_secs(30)));
        assert_eq!(dispatch.retry_base_delay, Duration::from_millis(100));
        assert_eq!(dispatch.retry_max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_environment_overrides() {
        let config = ExporterConfig::from_source(
            env(&[
                ("EXPORTER_API_PORT", "9100"),
                ("EXPORTER_RECONCILE_TIMEOUT_SECS", "0"),
                ("EXPORTER_WATCH_RETRY_SECS", "1"),
            ])
            .try_parsing(true),
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.dispatch().reconcile_timeout, None);
        assert_eq!(config.watch_retry(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config =
            ExporterConfig::from_source(env(&[("EXPORTER_API_PORT", "not-a-port")])).unwrap();
        assert_eq!(config.api_port, 8080);
    }
}
