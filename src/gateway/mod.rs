//! Narrow capability interfaces over the two external systems.
//!
//! The orchestrator never talks to Kubernetes or S3 directly; it goes
//! through these traits so every external call has one place where SDK
//! errors become [`GatewayError`]s and where timeouts are enforced.

pub mod kubernetes;
pub mod s3;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service};

use crate::error::GatewayError;

pub use kubernetes::KubeClusterGateway;
pub use s3::{ObjectLocation, S3ObjectStore};

/// Outcome of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The resource did not exist; treated as success.
    AlreadyAbsent,
}

/// Job, Service and Pod operations in the jobs namespace.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Fetch a job by name; `None` when it does not exist.
    async fn get_job(&self, name: &str) -> Result<Option<Job>, GatewayError>;

    async fn create_job(&self, job: &Job) -> Result<Job, GatewayError>;

    async fn delete_job(&self, name: &str) -> Result<Deletion, GatewayError>;

    /// List jobs, optionally restricted by a label selector such as `userid=alice`.
    async fn list_jobs(&self, label_selector: Option<&str>) -> Result<Vec<Job>, GatewayError>;

    async fn create_service(&self, service: &Service) -> Result<Service, GatewayError>;

    async fn delete_service(&self, name: &str) -> Result<Deletion, GatewayError>;

    /// List pods, optionally restricted by a field selector such as
    /// `status.phase=Succeeded`.
    async fn list_pods(&self, field_selector: Option<&str>) -> Result<Vec<Pod>, GatewayError>;

    async fn delete_pod(&self, name: &str) -> Result<Deletion, GatewayError>;
}

/// Artifact storage operations, addressed by `scheme://bucket/key` URLs.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Delete an object. Deleting a missing object succeeds.
    async fn delete_object(&self, url: &str) -> Result<(), GatewayError>;

    /// Issue a time-limited GET URL, optionally forcing a download filename.
    async fn presigned_url(
        &self,
        url: &str,
        download_filename: Option<&str>,
    ) -> Result<String, GatewayError>;
}
