//! Configuration for browserkube.
//!
//! Settings are loaded once at startup with priority: env var > `JOB_ENV`
//! YAML file > default. A `.env` file in the working directory is loaded via
//! dotenvy first and never overwrites variables already set.

mod browser;
mod cluster;
pub(crate) mod helpers;
mod storage;

use crate::error::ConfigError;

pub use self::browser::{BrowserConfig, BrowserMode, ProfileRule, match_profile};
pub use self::cluster::{ClusterConfig, ReaperConfig, ServerConfig};
pub use self::storage::StorageConfig;

/// Main configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub browser: BrowserConfig,
    pub storage: Option<StorageConfig>,
    pub reaper: ReaperConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            server: ServerConfig::resolve()?,
            cluster: ClusterConfig::resolve()?,
            browser: BrowserConfig::resolve()?,
            storage: StorageConfig::resolve()?,
            reaper: ReaperConfig::resolve()?,
        };

        if config.browser.image_template.is_none() {
            tracing::warn!("BROWSER_IMAGE_TEMPL is not set; job submissions will be rejected");
        }
        if config.storage.is_none() {
            tracing::info!("STORAGE_PREFIX is not set; jobs will not produce archived artifacts");
        }

        Ok(config)
    }
}
