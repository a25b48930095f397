//! browserkube: ephemeral browser jobs on Kubernetes.
//!
//! Submits headless or interactive browser workloads for archival capture,
//! tracks them through their Job status, hands out attach details, and reaps
//! them (with their archived artifacts) once they are old enough.

pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod urls;

pub use config::Config;
pub use error::{ConfigError, GatewayError, OrchestratorError};
