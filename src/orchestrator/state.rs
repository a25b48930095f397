//! Lifecycle state derived from live Job status.
//!
//! Nothing here is persisted. Every descriptor is rebuilt from the cluster
//! listing on each query, so the cluster stays the single source of truth.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use serde::Serialize;

use crate::orchestrator::identity::{JobId, annotations, labels};

/// Derived state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    #[serde(rename = "In progress")]
    Running,
    Failed,
    Complete,
    Unknown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "In progress"),
            Self::Failed => write!(f, "Failed"),
            Self::Complete => write!(f, "Complete"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Pod counters reported in a Job's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub active: i32,
    pub failed: i32,
    pub succeeded: i32,
}

impl JobCounters {
    pub fn from_job(job: &Job) -> Self {
        let status = job.status.as_ref();
        Self {
            active: status.and_then(|s| s.active).unwrap_or(0),
            failed: status.and_then(|s| s.failed).unwrap_or(0),
            succeeded: status.and_then(|s| s.succeeded).unwrap_or(0),
        }
    }
}

/// Running beats Failed beats Complete; anything else is Unknown.
pub fn derive_state(counters: JobCounters) -> LifecycleState {
    if counters.active > 0 {
        LifecycleState::Running
    } else if counters.failed > 0 {
        LifecycleState::Failed
    } else if counters.succeeded > 0 {
        LifecycleState::Complete
    } else {
        LifecycleState::Unknown
    }
}

/// Time from start to completion, or to `now` while unfinished.
pub fn elapsed(
    start: Option<DateTime<Utc>>,
    completion: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<chrono::Duration> {
    let start = start?;
    Some(completion.unwrap_or(now) - start)
}

pub fn start_time(job: &Job) -> Option<DateTime<Utc>> {
    job.status.as_ref()?.start_time.as_ref().map(|t| t.0)
}

pub fn completion_time(job: &Job) -> Option<DateTime<Utc>> {
    job.status.as_ref()?.completion_time.as_ref().map(|t| t.0)
}

pub(crate) fn label<'a>(job: &'a Job, key: &str) -> Option<&'a str> {
    lookup(job.metadata.labels.as_ref(), key)
}

pub(crate) fn annotation<'a>(job: &'a Job, key: &str) -> Option<&'a str> {
    lookup(job.metadata.annotations.as_ref(), key)
}

fn lookup<'a>(map: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    map?.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Public view of a submitted job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(rename = "jobid")]
    pub job_id: Option<JobId>,
    pub name: String,
    #[serde(rename = "userid")]
    pub owner: Option<String>,
    #[serde(rename = "batchid", skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub user_tag: String,
    pub capture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    /// Only present once the job is Complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
    pub status: LifecycleState,
}

impl JobDescriptor {
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        let name = job.metadata.name.clone().unwrap_or_default();
        let state = derive_state(JobCounters::from_job(job));
        let start = start_time(job);
        let completion = completion_time(job);

        // The access URL exists from submission on, but the artifact only
        // does once the job has succeeded.
        let access_url = match state {
            LifecycleState::Complete => annotation(job, annotations::ACCESS_URL).map(String::from),
            _ => None,
        };

        Self {
            job_id: label(job, labels::JOB_ID)
                .and_then(|id| id.parse().ok())
                .or_else(|| JobId::from_job_name(&name)),
            owner: label(job, labels::OWNER).map(String::from),
            batch_id: label(job, labels::BATCH).map(String::from),
            index: label(job, labels::INDEX).and_then(|i| i.parse().ok()),
            user_tag: annotation(job, annotations::USER_TAG)
                .unwrap_or_default()
                .to_string(),
            capture_url: annotation(job, annotations::CAPTURE_URL).map(String::from),
            storage_url: annotation(job, annotations::STORAGE_URL).map(String::from),
            access_url,
            start_time: start,
            completion_time: completion,
            elapsed_secs: elapsed(start, completion, now).map(|d| d.num_seconds()),
            status: state,
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    use super::*;

    fn counters(active: i32, failed: i32, succeeded: i32) -> JobCounters {
        JobCounters {
            active,
            failed,
            succeeded,
        }
    }

    fn job_with(counters: JobCounters, access_url: &str) -> Job {
        let id = JobId::generate();
        Job {
            metadata: ObjectMeta {
                name: Some(id.job_name()),
                labels: Some(BTreeMap::from([
                    (labels::OWNER.to_string(), "alice".to_string()),
                    (labels::JOB_ID.to_string(), id.to_string()),
                ])),
                annotations: Some(BTreeMap::from([
                    (annotations::ACCESS_URL.to_string(), access_url.to_string()),
                    (annotations::USER_TAG.to_string(), "tagged".to_string()),
                    (
                        annotations::CAPTURE_URL.to_string(),
                        "https://example.com/".to_string(),
                    ),
                ])),
                ..Default::default()
            },
            status: Some(JobStatus {
                active: Some(counters.active),
                failed: Some(counters.failed),
                succeeded: Some(counters.succeeded),
                start_time: Some(Time(Utc::now() - chrono::Duration::minutes(5))),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_state_is_total_with_precedence() {
        for active in 0..3 {
            for failed in 0..3 {
                for succeeded in 0..3 {
                    let state = derive_state(counters(active, failed, succeeded));
                    let expected = if active > 0 {
                        LifecycleState::Running
                    } else if failed > 0 {
                        LifecycleState::Failed
                    } else if succeeded > 0 {
                        LifecycleState::Complete
                    } else {
                        LifecycleState::Unknown
                    };
                    assert_eq!(state, expected, "a={active} f={failed} s={succeeded}");
                }
            }
        }
    }

    #[test]
    fn test_negative_counters_are_not_positive() {
        assert_eq!(derive_state(counters(-1, -1, -1)), LifecycleState::Unknown);
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let job = Job::default();
        assert_eq!(JobCounters::from_job(&job), JobCounters::default());
        assert_eq!(
            derive_state(JobCounters::from_job(&job)),
            LifecycleState::Unknown
        );
    }

    #[test]
    fn test_access_url_only_when_complete() {
        let url = "https://s3.example.com/presigned";
        let cases = [
            (counters(1, 0, 0), false),
            (counters(0, 1, 0), false),
            (counters(0, 0, 1), true),
            (counters(0, 0, 0), false),
            (counters(1, 0, 1), false),
        ];
        for (c, visible) in cases {
            let descriptor = JobDescriptor::from_job(&job_with(c, url), Utc::now());
            assert_eq!(descriptor.access_url.is_some(), visible, "{:?}", c);
        }
    }

    #[test]
    fn test_empty_access_url_is_hidden_even_when_complete() {
        let descriptor = JobDescriptor::from_job(&job_with(counters(0, 0, 1), ""), Utc::now());
        assert_eq!(descriptor.status, LifecycleState::Complete);
        assert!(descriptor.access_url.is_none());
    }

    #[test]
    fn test_elapsed_prefers_completion() {
        let start = Utc::now() - chrono::Duration::minutes(10);
        let done = start + chrono::Duration::minutes(3);
        let now = start + chrono::Duration::minutes(10);

        assert_eq!(
            elapsed(Some(start), Some(done), now),
            Some(chrono::Duration::minutes(3))
        );
        assert_eq!(
            elapsed(Some(start), None, now),
            Some(chrono::Duration::minutes(10))
        );
        assert_eq!(elapsed(None, Some(done), now), None);
    }

    #[test]
    fn test_descriptor_fields() {
        let job = job_with(counters(1, 0, 0), "https://s3/presigned");
        let descriptor = JobDescriptor::from_job(&job, Utc::now());

        assert_eq!(descriptor.owner.as_deref(), Some("alice"));
        assert_eq!(descriptor.user_tag, "tagged");
        assert_eq!(descriptor.capture_url.as_deref(), Some("https://example.com/"));
        assert_eq!(descriptor.status, LifecycleState::Running);
        assert!(descriptor.elapsed_secs.unwrap() >= 300);
        assert_eq!(
            descriptor.job_id.map(|id| id.job_name()),
            job.metadata.name.clone()
        );

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["status"], "In progress");
        assert_eq!(json["userid"], "alice");
        assert!(json.get("accessUrl").is_none());
    }
}
