//! In-memory gateways shared by the integration tests.
//!
//! Both mocks append to one call log so tests can assert ordering across
//! the cluster and the object store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browserkube::config::{BrowserConfig, BrowserMode, StorageConfig};
use browserkube::error::GatewayError;
use browserkube::gateway::{ClusterGateway, Deletion, ObjectStoreGateway};
use browserkube::orchestrator::identity::annotations;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn request_error(operation: &str) -> GatewayError {
    GatewayError::Request {
        backend: "mock",
        operation: operation.to_string(),
        reason: "injected failure".to_string(),
    }
}

#[derive(Default)]
pub struct MockCluster {
    pub log: CallLog,
    pub jobs: Mutex<BTreeMap<String, Job>>,
    pub services: Mutex<BTreeMap<String, Service>>,
    pub pods: Mutex<BTreeMap<String, Pod>>,
    pub fail_create_service: AtomicBool,
    pub fail_delete_job: AtomicBool,
    /// Jobs whose capture URL equals this are created after a delay.
    pub slow_url: Mutex<Option<String>>,
}

impl MockCluster {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }

    pub fn insert_job(&self, job: Job) {
        let name = job.metadata.name.clone().unwrap();
        self.jobs.lock().unwrap().insert(name, job);
    }

    pub fn insert_pod(&self, name: &str, started: DateTime<Utc>) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                start_time: Some(Time(started)),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.pods.lock().unwrap().insert(name.to_string(), pod);
    }

    /// Overwrite the status counters and start time of a stored job.
    pub fn set_status(
        &self,
        name: &str,
        active: i32,
        failed: i32,
        succeeded: i32,
        started: Option<DateTime<Utc>>,
    ) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(name).unwrap();
        job.status = Some(JobStatus {
            active: Some(active),
            failed: Some(failed),
            succeeded: Some(succeeded),
            start_time: started.map(Time),
            ..Default::default()
        });
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.lock().unwrap().keys().cloned().collect()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods.lock().unwrap().keys().cloned().collect()
    }
}

fn matches_selector(job: &Job, selector: &str) -> bool {
    let labels = job.metadata.labels.clone().unwrap_or_default();
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => false,
    })
}

#[async_trait]
impl ClusterGateway for MockCluster {
    async fn get_job(&self, name: &str) -> Result<Option<Job>, GatewayError> {
        Ok(self.jobs.lock().unwrap().get(name).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, GatewayError> {
        let name = job.metadata.name.clone().unwrap_or_default();
        let capture_url = job
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::CAPTURE_URL))
            .cloned();
        let slow = self.slow_url.lock().unwrap().clone();
        if slow.is_some() && slow == capture_url {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.record(format!("create_job:{}", name));
        self.jobs.lock().unwrap().insert(name, job.clone());
        Ok(job.clone())
    }

    async fn delete_job(&self, name: &str) -> Result<Deletion, GatewayError> {
        self.record(format!("delete_job:{}", name));
        if self.fail_delete_job.load(Ordering::SeqCst) {
            return Err(request_error("delete job"));
        }
        Ok(match self.jobs.lock().unwrap().remove(name) {
            Some(_) => Deletion::Deleted,
            None => Deletion::AlreadyAbsent,
        })
    }

    async fn list_jobs(&self, label_selector: Option<&str>) -> Result<Vec<Job>, GatewayError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|job| label_selector.is_none_or(|s| matches_selector(job, s)))
            .cloned()
            .collect())
    }

    async fn create_service(&self, service: &Service) -> Result<Service, GatewayError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.record(format!("create_service:{}", name));
        if self.fail_create_service.load(Ordering::SeqCst) {
            return Err(request_error("create service"));
        }
        self.services.lock().unwrap().insert(name, service.clone());
        Ok(service.clone())
    }

    async fn delete_service(&self, name: &str) -> Result<Deletion, GatewayError> {
        self.record(format!("delete_service:{}", name));
        Ok(match self.services.lock().unwrap().remove(name) {
            Some(_) => Deletion::Deleted,
            None => Deletion::AlreadyAbsent,
        })
    }

    async fn list_pods(&self, field_selector: Option<&str>) -> Result<Vec<Pod>, GatewayError> {
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .values()
            .filter(|pod| match field_selector {
                Some("status.phase=Succeeded") => pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    == Some("Succeeded"),
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<Deletion, GatewayError> {
        self.record(format!("delete_pod:{}", name));
        Ok(match self.pods.lock().unwrap().remove(name) {
            Some(_) => Deletion::Deleted,
            None => Deletion::AlreadyAbsent,
        })
    }
}

#[derive(Default)]
pub struct MockStore {
    pub log: CallLog,
    pub fail_delete: AtomicBool,
    pub fail_presign: AtomicBool,
    pub deleted: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for MockStore {
    async fn delete_object(&self, url: &str) -> Result<(), GatewayError> {
        self.log.lock().unwrap().push(format!("delete_object:{}", url));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(request_error("delete object"));
        }
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn presigned_url(
        &self,
        url: &str,
        download_filename: Option<&str>,
    ) -> Result<String, GatewayError> {
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(request_error("presign"));
        }
        Ok(format!(
            "https://signed.example/{}?filename={}",
            url.trim_start_matches("s3://"),
            download_filename.unwrap_or_default()
        ))
    }
}

pub fn browser_config(mode: BrowserMode) -> BrowserConfig {
    BrowserConfig {
        image_template: Some("oldwebtoday/{}".to_string()),
        default_browser: Some("chrome:84".to_string()),
        mode,
        ..Default::default()
    }
}

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        prefix: "s3://captures/archives/".to_string(),
        endpoint: None,
        region: None,
        access_key_id: None,
        secret_access_key: None,
        access_url_expiry: Duration::from_secs(3600),
        artifact_extension: "wacz".to_string(),
        timeout: Duration::from_secs(5),
    }
}
