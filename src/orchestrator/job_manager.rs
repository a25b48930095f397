//! Lifecycle management for ephemeral browser jobs.
//!
//! The manager holds no job state of its own. Every operation goes to the
//! cluster (and, for artifacts, the object store), so a restart loses
//! nothing and concurrent API replicas never disagree.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{BrowserConfig, BrowserMode, StorageConfig};
use crate::error::OrchestratorError;
use crate::gateway::{ClusterGateway, ObjectStoreGateway};
use crate::orchestrator::identity::{JobId, annotations, labels};
use crate::orchestrator::manifest::{self, CMD_PORT, ManifestParams, VNC_PORT};
use crate::orchestrator::state::{JobDescriptor, annotation, label};
use crate::urls::download_filename;

/// Per-request options for a capture job.
///
/// Any `None` field falls back to the process-wide [`BrowserConfig`].
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Owner label used for filtering and delete permission checks.
    pub owner: String,
    /// Free-form tag echoed back in listings.
    pub tag: String,
    /// Browser name substituted into the image template.
    pub browser: Option<String>,
    /// Ask the driver to capture embedded resources.
    pub embeds: bool,
    pub idle_timeout: Option<Duration>,
    pub use_proxy: bool,
    pub driver_image: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            owner: "user".to_string(),
            tag: String::new(),
            browser: None,
            embeds: false,
            idle_timeout: None,
            use_proxy: false,
            driver_image: None,
        }
    }
}

/// Position of a job inside a multi-URL submission.
#[derive(Debug, Clone, Copy)]
struct BatchSlot<'a> {
    batch_id: &'a str,
    index: usize,
}

/// Result of [`BrowserJobManager::submit_many`], one entry per input URL.
#[derive(Debug)]
pub struct BatchSubmission {
    pub batch_id: String,
    pub results: Vec<Result<JobId, OrchestratorError>>,
}

/// Where to reach a job's interactive display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachInfo {
    pub job_id: JobId,
    /// Service name, resolvable inside the cluster.
    pub address: String,
    pub vnc_port: i32,
    pub cmd_port: i32,
    pub password: Option<String>,
}

/// Outcome of [`BrowserJobManager::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Deleted,
    NotFound,
    /// The owner filter did not match; nothing was touched.
    Refused,
}

impl Termination {
    pub fn deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Label filter for [`BrowserJobManager::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub batch_id: Option<String>,
}

impl JobFilter {
    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            batch_id: None,
        }
    }

    fn label_selector(&self) -> Selector {
        let mut terms = Vec::new();
        for (key, value) in [
            (labels::OWNER, &self.owner),
            (labels::BATCH, &self.batch_id),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                if !is_label_value(value) {
                    return Selector::Nothing;
                }
                terms.push(format!("{}={}", key, value));
            }
        }
        if terms.is_empty() {
            Selector::All
        } else {
            Selector::Match(terms.join(","))
        }
    }
}

/// What a [`JobFilter`] asks the cluster for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    All,
    Match(String),
    /// A filter value that is not a valid label value can match no job.
    Nothing,
}

/// Kubernetes label value syntax: up to 63 of `[A-Za-z0-9._-]`,
/// alphanumeric at both ends.
pub fn is_label_value(value: &str) -> bool {
    value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.chars().next().is_none_or(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_none_or(|c| c.is_ascii_alphanumeric())
}

struct ArtifactStorage {
    gateway: Arc<dyn ObjectStoreGateway>,
    config: StorageConfig,
}

/// Submits, inspects and tears down browser jobs.
pub struct BrowserJobManager {
    config: BrowserConfig,
    cluster: Arc<dyn ClusterGateway>,
    storage: Option<ArtifactStorage>,
}

impl BrowserJobManager {
    pub fn new(config: BrowserConfig, cluster: Arc<dyn ClusterGateway>) -> Self {
        Self {
            config,
            cluster,
            storage: None,
        }
    }

    /// Enable artifact storage: jobs get a destination URL and an access URL.
    pub fn with_storage(
        mut self,
        gateway: Arc<dyn ObjectStoreGateway>,
        config: StorageConfig,
    ) -> Self {
        self.storage = Some(ArtifactStorage { gateway, config });
        self
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Submit one capture job and return its identity.
    ///
    /// With storage configured, the access URL is presigned before the job
    /// exists so callers can hold on to it right away. A presign failure only
    /// costs the access URL; the job is still submitted.
    ///
    /// If the paired service cannot be created, the job is already running and
    /// is left in place; the error is returned.
    pub async fn submit(
        &self,
        capture_url: &str,
        options: &CaptureOptions,
    ) -> Result<JobId, OrchestratorError> {
        self.submit_in_slot(capture_url, options, None).await
    }

    /// Submit one job per URL concurrently.
    ///
    /// Results line up with `urls` by position regardless of completion
    /// order. One failure does not affect the others.
    pub async fn submit_many(&self, urls: &[String], options: &CaptureOptions) -> BatchSubmission {
        let batch_id = Uuid::new_v4().simple().to_string();

        let submissions = urls.iter().enumerate().map(|(index, url)| {
            let slot = BatchSlot {
                batch_id: &batch_id,
                index,
            };
            self.submit_in_slot(url, options, Some(slot))
        });
        let results = futures::future::join_all(submissions).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(
            batch_id = %batch_id,
            submitted = results.len() - failed,
            failed,
            "Submitted capture batch"
        );

        BatchSubmission { batch_id, results }
    }

    async fn submit_in_slot(
        &self,
        capture_url: &str,
        options: &CaptureOptions,
        slot: Option<BatchSlot<'_>>,
    ) -> Result<JobId, OrchestratorError> {
        if !is_label_value(&options.owner) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "owner '{}' is not a valid label value",
                options.owner
            )));
        }

        let job_id = JobId::generate();

        let mut job_labels = BTreeMap::from([
            (labels::OWNER.to_string(), options.owner.clone()),
            (labels::JOB_ID.to_string(), job_id.to_string()),
        ]);
        if let Some(slot) = slot {
            job_labels.insert(labels::BATCH.to_string(), slot.batch_id.to_string());
            job_labels.insert(labels::INDEX.to_string(), slot.index.to_string());
        }

        let mut job_annotations = BTreeMap::from([
            (annotations::USER_TAG.to_string(), options.tag.clone()),
            (annotations::CAPTURE_URL.to_string(), capture_url.to_string()),
        ]);
        if self.config.mode == BrowserMode::Vnc {
            job_annotations.insert(
                annotations::VNC_PASS.to_string(),
                Uuid::new_v4().simple().to_string(),
            );
        }
        if options.embeds {
            job_annotations.insert(annotations::EMBEDS.to_string(), "1".to_string());
        }

        let storage_url = match self.storage {
            Some(ref storage) => {
                let storage_url = storage.config.artifact_url(&job_id.to_string());
                let access_url = self.issue_access_url(storage, &storage_url, capture_url).await;
                job_annotations.insert(annotations::STORAGE_URL.to_string(), storage_url.clone());
                job_annotations.insert(annotations::ACCESS_URL.to_string(), access_url);
                Some(storage_url)
            }
            None => None,
        };

        let params = ManifestParams::build(
            &self.config,
            job_id,
            capture_url,
            options,
            storage_url,
            job_labels,
            job_annotations,
        );
        let rendered = manifest::render(&params)?;

        self.cluster.create_job(&rendered.job).await?;

        if let Some(ref service) = rendered.service
            && let Err(e) = self.cluster.create_service(service).await
        {
            tracing::error!(
                job_id = %job_id,
                error = %e,
                "Failed to create service; job left running without an endpoint"
            );
            return Err(e.into());
        }

        tracing::info!(
            job_id = %job_id,
            url = %capture_url,
            mode = %params.mode,
            "Submitted browser job"
        );
        Ok(job_id)
    }

    async fn issue_access_url(
        &self,
        storage: &ArtifactStorage,
        storage_url: &str,
        capture_url: &str,
    ) -> String {
        let filename = download_filename(
            capture_url,
            Utc::now().date_naive(),
            &storage.config.artifact_extension,
        );
        match storage
            .gateway
            .presigned_url(storage_url, filename.as_deref())
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    storage_url,
                    error = %e,
                    "Failed to presign access URL; submitting without one"
                );
                String::new()
            }
        }
    }

    /// Connection details for a job's interactive display.
    ///
    /// Jobs only get a service when the configuration asks for an endpoint;
    /// without one there is nothing to attach to and every id is `NotFound`.
    pub async fn get_attach_info(&self, job_id: JobId) -> Result<AttachInfo, OrchestratorError> {
        if !self.config.requires_endpoint() {
            tracing::debug!(job_id = %job_id, mode = %self.config.mode, "Attach without endpoint");
            return Err(OrchestratorError::NotFound { job_id });
        }

        let job = self
            .cluster
            .get_job(&job_id.job_name())
            .await?
            .ok_or(OrchestratorError::NotFound { job_id })?;

        Ok(AttachInfo {
            job_id,
            address: job_id.service_name(),
            vnc_port: VNC_PORT,
            cmd_port: CMD_PORT,
            password: annotation(&job, annotations::VNC_PASS).map(String::from),
        })
    }

    /// Current jobs matching `filter`, with derived state.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobDescriptor>, OrchestratorError> {
        let jobs = match filter.label_selector() {
            Selector::All => self.cluster.list_jobs(None).await?,
            Selector::Match(selector) => self.cluster.list_jobs(Some(&selector)).await?,
            Selector::Nothing => {
                tracing::debug!(?filter, "Filter value is not a label value, nothing matches");
                return Ok(Vec::new());
            }
        };
        let now = Utc::now();
        Ok(jobs
            .iter()
            .map(|job| JobDescriptor::from_job(job, now))
            .collect())
    }

    /// Delete a job, its artifact and its service.
    ///
    /// With `owner` set, jobs owned by anyone else are refused untouched. The
    /// artifact is removed before the job so it can never outlive the record
    /// that points at it; if that delete fails the job stays and the error is
    /// returned. A missing service is not an error.
    pub async fn terminate(
        &self,
        job_id: JobId,
        owner: Option<&str>,
    ) -> Result<Termination, OrchestratorError> {
        let job_name = job_id.job_name();

        let Some(job) = self.cluster.get_job(&job_name).await? else {
            tracing::debug!(job_id = %job_id, "Terminate: job not found");
            return Ok(Termination::NotFound);
        };
        if job.metadata.deletion_timestamp.is_some() {
            tracing::debug!(job_id = %job_id, "Terminate: job already being deleted");
            return Ok(Termination::NotFound);
        }

        if let Some(owner) = owner
            && label(&job, labels::OWNER) != Some(owner)
        {
            tracing::warn!(job_id = %job_id, owner, "Terminate refused: owner mismatch");
            return Ok(Termination::Refused);
        }

        if let Some(storage_url) = annotation(&job, annotations::STORAGE_URL) {
            match self.storage {
                Some(ref storage) => storage.gateway.delete_object(storage_url).await?,
                None => tracing::warn!(
                    job_id = %job_id,
                    storage_url,
                    "No object store configured; artifact left in place"
                ),
            }
        }

        self.cluster.delete_job(&job_name).await?;

        if let Err(e) = self.cluster.delete_service(&job_id.service_name()).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to delete service");
        }

        tracing::info!(job_id = %job_id, "Terminated browser job");
        Ok(Termination::Deleted)
    }
}
