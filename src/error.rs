//! Error types for browserkube.

use crate::orchestrator::identity::JobId;

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors raised by the cluster and object-store adapters.
///
/// "Not found" is never an error at this level: lookups return `None` and
/// deletions report [`crate::gateway::Deletion::AlreadyAbsent`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{backend} call timed out after {secs}s: {operation}")]
    Timeout {
        backend: &'static str,
        operation: String,
        secs: u64,
    },

    #[error("{backend} call failed: {operation}: {reason}")]
    Request {
        backend: &'static str,
        operation: String,
        reason: String,
    },

    #[error("Invalid object URL '{url}': {reason}")]
    InvalidObjectUrl { url: String, reason: String },

    #[error("Failed to connect to {backend}: {reason}")]
    Connect {
        backend: &'static str,
        reason: String,
    },
}

/// Errors surfaced by the job lifecycle manager and reaper.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job {job_id} not found")]
    NotFound { job_id: JobId },

    #[error("Job {job_id} is not owned by '{owner}'")]
    Forbidden { job_id: JobId, owner: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl OrchestratorError {
    /// Whether this is an expected absence rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
