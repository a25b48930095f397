//! Age-based cleanup of finished jobs, their artifacts and leftover pods.
//!
//! Each pass is stateless: it works from a fresh listing, so a pass that
//! stops early is simply picked up by the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;

use crate::error::OrchestratorError;
use crate::gateway::{ClusterGateway, ObjectStoreGateway};
use crate::orchestrator::identity::{JobId, annotations};
use crate::orchestrator::state::{JobCounters, annotation, start_time};

/// Field selector for pods that ran to completion.
const SUCCEEDED_PODS: &str = "status.phase=Succeeded";

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Names of jobs deleted in this pass.
    pub jobs_deleted: Vec<String>,
    /// Succeeded jobs kept because they are younger than the retention.
    pub jobs_retained: usize,
    pub artifacts_deleted: usize,
    pub pods_deleted: usize,
    pub pod_failures: usize,
    /// The job phase stopped on an artifact deletion failure.
    pub aborted: bool,
}

/// Reclaims succeeded jobs older than the retention period.
pub struct Reaper {
    cluster: Arc<dyn ClusterGateway>,
    store: Option<Arc<dyn ObjectStoreGateway>>,
    retention: Duration,
}

impl Reaper {
    pub fn new(
        cluster: Arc<dyn ClusterGateway>,
        store: Option<Arc<dyn ObjectStoreGateway>>,
        retention: Duration,
    ) -> Self {
        Self {
            cluster,
            store,
            retention,
        }
    }

    /// Run one pass against the current time.
    pub async fn run_once(&self) -> Result<ReapReport, OrchestratorError> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass as if it were `now`.
    ///
    /// Fails only if the initial job listing fails; everything after that is
    /// logged and reflected in the report.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ReapReport, OrchestratorError> {
        let mut report = ReapReport::default();

        tracing::info!(
            retention_mins = self.retention.as_secs() / 60,
            "Reaping jobs older than retention"
        );

        let jobs = self.cluster.list_jobs(None).await?;
        for job in &jobs {
            if !self.reap_job(job, now, &mut report).await {
                report.aborted = true;
                break;
            }
        }

        self.reap_pods(now, &mut report).await;

        tracing::info!(
            jobs_deleted = report.jobs_deleted.len(),
            jobs_retained = report.jobs_retained,
            artifacts_deleted = report.artifacts_deleted,
            pods_deleted = report.pods_deleted,
            aborted = report.aborted,
            "Reaper pass done"
        );
        Ok(report)
    }

    /// Handle one job. Returns `false` when the pass must stop.
    async fn reap_job(&self, job: &Job, now: DateTime<Utc>, report: &mut ReapReport) -> bool {
        let Some(name) = job.metadata.name.as_deref() else {
            return true;
        };

        // Only fully succeeded jobs; failures are left for a human.
        if JobCounters::from_job(job).succeeded != 1 {
            return true;
        }

        if !self.is_expired(start_time(job), now) {
            tracing::debug!(job = name, "Keeping job, not old enough");
            report.jobs_retained += 1;
            return true;
        }

        if let Some(storage_url) = annotation(job, annotations::STORAGE_URL) {
            let Some(ref store) = self.store else {
                tracing::warn!(
                    job = name,
                    storage_url,
                    "Job has an artifact but no object store is configured; keeping it"
                );
                return true;
            };
            if let Err(e) = store.delete_object(storage_url).await {
                tracing::error!(
                    job = name,
                    storage_url,
                    error = %e,
                    "Failed to delete artifact; stopping this pass"
                );
                return false;
            }
            report.artifacts_deleted += 1;
        }

        tracing::info!(job = name, "Deleting job");
        if let Err(e) = self.cluster.delete_job(name).await {
            tracing::error!(job = name, error = %e, "Failed to delete job");
            return true;
        }
        report.jobs_deleted.push(name.to_string());

        if let Some(job_id) = JobId::from_job_name(name)
            && let Err(e) = self.cluster.delete_service(&job_id.service_name()).await
        {
            tracing::warn!(job = name, error = %e, "Failed to delete service");
        }

        true
    }

    async fn reap_pods(&self, now: DateTime<Utc>, report: &mut ReapReport) {
        let pods = match self.cluster.list_pods(Some(SUCCEEDED_PODS)).await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list succeeded pods");
                return;
            }
        };

        for pod in &pods {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            let started = pod
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .map(|t| t.0);
            if !self.is_expired(started, now) {
                tracing::debug!(pod = name, "Keeping pod, not old enough");
                continue;
            }

            match self.cluster.delete_pod(name).await {
                Ok(_) => report.pods_deleted += 1,
                Err(e) => {
                    tracing::warn!(pod = name, error = %e, "Failed to delete pod");
                    report.pod_failures += 1;
                }
            }
        }
    }

    /// Without a start time there is no age, so nothing expires.
    fn is_expired(&self, started: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(started) = started else {
            return false;
        };
        match (now - started).to_std() {
            Ok(age) => age >= self.retention,
            // Start time in the future: clock skew, not old.
            Err(_) => false,
        }
    }
}

/// Run passes forever, one every `interval`. Failed passes are logged.
pub async fn run_periodic(reaper: &Reaper, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = reaper.run_once().await {
            tracing::error!(error = %e, "Reaper pass failed");
        }
    }
}
