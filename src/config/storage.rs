use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{
    minutes, optional_env, parse_env, parse_optional_env, parse_string_env,
};
use crate::error::ConfigError;

/// S3-compatible artifact storage. Absent entirely when `STORAGE_PREFIX` is unset.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Destination prefix, e.g. `s3://captures/archives`.
    pub prefix: String,
    /// Custom endpoint for MinIO and friends.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<SecretString>,
    /// Validity window of issued access URLs.
    pub access_url_expiry: Duration,
    /// File extension of produced artifacts.
    pub artifact_extension: String,
    /// Connect and per-operation timeout for storage calls.
    pub timeout: Duration,
}

impl StorageConfig {
    pub(crate) fn resolve() -> Result<Option<Self>, ConfigError> {
        let Some(prefix) = optional_env("STORAGE_PREFIX")? else {
            return Ok(None);
        };

        // Access URLs default to living as long as the job is retained.
        let retention_minutes: u64 = parse_optional_env("JOB_CLEANUP_INTERVAL", 60)?;
        let expiry_minutes =
            parse_env::<u64>("ACCESS_URL_EXPIRY_MINUTES")?.unwrap_or(retention_minutes);
        if expiry_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ACCESS_URL_EXPIRY_MINUTES".to_string(),
                message: "must be at least one minute".to_string(),
            });
        }

        Ok(Some(Self {
            prefix,
            endpoint: optional_env("AWS_ENDPOINT")?,
            region: optional_env("AWS_REGION")?,
            access_key_id: optional_env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: optional_env("AWS_SECRET_ACCESS_KEY")?.map(SecretString::from),
            access_url_expiry: minutes("ACCESS_URL_EXPIRY_MINUTES", expiry_minutes)?,
            artifact_extension: parse_string_env("ARTIFACT_EXTENSION", "wacz")?,
            timeout: Duration::from_secs(parse_optional_env("STORAGE_TIMEOUT_SECS", 30)?),
        }))
    }

    /// Destination URL for a job's artifact: `<prefix>/<name>.<ext>`.
    pub fn artifact_url(&self, name: &str) -> String {
        format!(
            "{}/{}.{}",
            self.prefix.trim_end_matches('/'),
            name,
            self.artifact_extension
        )
    }
}
