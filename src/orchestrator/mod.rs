//! Orchestrator for ephemeral browser jobs on Kubernetes.
//!
//! Each capture is one Job (plus a Service when the browser needs a
//! reachable endpoint). All state lives on those resources as labels and
//! annotations; nothing is kept in process.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Orchestrator                       │
//! │                                                    │
//! │  HTTP API (default :8080)                          │
//! │    POST   /captures                                │
//! │    GET    /captures                                │
//! │    DELETE /capture/{jobid}                         │
//! │    POST   /api/flock/start/{jobid}                 │
//! │    GET    /attach/{jobid}                          │
//! │    POST   /create/{browser}/{*url}                 │
//! │                                                    │
//! │  BrowserJobManager                                 │
//! │    submit() / submit_many() -> Job + Service       │
//! │    get_attach_info()                               │
//! │    list()                                          │
//! │    terminate() -> object, Job, Service             │
//! │                                                    │
//! │  Reaper                                            │
//! │    expired Jobs, their artifacts, succeeded Pods   │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod identity;
pub mod job_manager;
pub mod manifest;
pub mod reaper;
pub mod state;

pub use api::{ApiState, OrchestratorApi};
pub use identity::JobId;
pub use job_manager::{
    AttachInfo, BatchSubmission, BrowserJobManager, CaptureOptions, JobFilter, Termination,
};
pub use reaper::{ReapReport, Reaper};
pub use state::{JobDescriptor, LifecycleState};
