use std::time::Duration;

use crate::config::helpers::{
    minutes, parse_bool_env, parse_env, parse_optional_env, parse_string_env,
};
use crate::error::ConfigError;

/// HTTP API settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Mount the routes that create and delete jobs.
    pub allow_start_new: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allow_start_new: true,
        }
    }
}

impl ServerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            host: parse_string_env("HOST", "0.0.0.0")?,
            port: parse_optional_env("PORT", 8080)?,
            allow_start_new: parse_bool_env("ALLOW_START_NEW", true)?,
        })
    }
}

/// Kubernetes access settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub namespace: String,
    /// Upper bound on any single control-plane call.
    pub timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "browsers".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClusterConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            namespace: parse_string_env("NAMESPACE", "browsers")?,
            timeout: Duration::from_secs(parse_optional_env("CLUSTER_TIMEOUT_SECS", 30)?),
        })
    }
}

/// Cleanup policy for finished jobs.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Minimum age before a succeeded job is reclaimed.
    pub retention: Duration,
    /// Period between passes when running as a loop.
    pub interval: Option<Duration>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60 * 60),
            interval: None,
        }
    }
}

impl ReaperConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let retention_minutes: u64 = parse_optional_env("JOB_CLEANUP_INTERVAL", 60)?;
        Ok(Self {
            retention: minutes("JOB_CLEANUP_INTERVAL", retention_minutes)?,
            interval: parse_env::<u64>("REAPER_INTERVAL_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}
