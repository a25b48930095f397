//! Job identity and the resource names and metadata keys derived from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const JOB_PREFIX: &str = "job-";
pub const SERVICE_PREFIX: &str = "service-";

/// Label keys (queryable).
pub mod labels {
    pub const OWNER: &str = "userid";
    pub const JOB_ID: &str = "jobid";
    pub const BATCH: &str = "batchid";
    pub const INDEX: &str = "index";
}

/// Annotation keys (opaque metadata).
pub mod annotations {
    pub const USER_TAG: &str = "userTag";
    pub const CAPTURE_URL: &str = "captureUrl";
    pub const STORAGE_URL: &str = "storageUrl";
    pub const ACCESS_URL: &str = "accessUrl";
    pub const VNC_PASS: &str = "vnc_pass";
    pub const EMBEDS: &str = "embeds";
}

/// Unique identity of a job/service pair. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn job_name(&self) -> String {
        format!("{}{}", JOB_PREFIX, self.0)
    }

    pub fn service_name(&self) -> String {
        format!("{}{}", SERVICE_PREFIX, self.0)
    }

    /// Recover the identity from a job resource name.
    pub fn from_job_name(name: &str) -> Option<Self> {
        name.strip_prefix(JOB_PREFIX)?.parse().ok()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
