//! HTTP API for submitting, listing, attaching to and deleting browser jobs.
//!
//! Every route maps to one [`BrowserJobManager`] operation. Callers are not
//! authenticated; the owner label is a filter, not a credential.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::BrowserMode;
use crate::error::{GatewayError, OrchestratorError};
use crate::orchestrator::identity::JobId;
use crate::orchestrator::job_manager::{
    AttachInfo, BrowserJobManager, CaptureOptions, JobFilter, Termination,
};

/// Shared state for the API.
#[derive(Clone)]
pub struct ApiState {
    pub job_manager: Arc<BrowserJobManager>,
    /// Mount the routes that create or delete jobs.
    pub allow_start_new: bool,
}

/// The public API server.
pub struct OrchestratorApi;

impl OrchestratorApi {
    /// Build the axum router.
    pub fn router(state: ApiState) -> Router {
        let mut router = Router::new()
            .route("/captures", get(list_captures))
            .route("/api/flock/start/{job_id}", post(flock_start))
            .route("/health", get(health_check));

        if state.job_manager.config().mode == BrowserMode::Vnc {
            router = router.route("/attach/{job_id}", get(attach_page));
        }

        if state.allow_start_new {
            router = router
                .route("/captures", post(submit_captures))
                .route("/capture/{job_id}", delete(delete_capture))
                .route("/create/{browser}/{*url}", post(create_browser));
        }

        router.with_state(state)
    }

    /// Bind and serve until the listener fails.
    pub async fn start(
        state: ApiState,
        host: &str,
        port: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state);
        let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

        tracing::info!("Browser API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

// -- Errors --

/// A status code plus a message, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let status = match &e {
            OrchestratorError::NotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::Forbidden { .. } => StatusCode::FORBIDDEN,
            OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Gateway(GatewayError::Timeout { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            OrchestratorError::Gateway(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "Request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// -- Request / response bodies --

fn default_owner() -> String {
    "user".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_owner")]
    pub userid: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub embeds: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SubmittedJob {
    Created { index: usize, jobid: JobId },
    Failed { index: usize, error: String },
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub userid: Option<String>,
    pub batchid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub userid: Option<String>,
}

/// Attach payload in the shape the display client expects.
#[derive(Debug, Serialize)]
struct FlockContainers {
    containers: FlockServices,
}

#[derive(Debug, Serialize)]
struct FlockServices {
    xserver: FlockContainer,
}

#[derive(Debug, Serialize)]
struct FlockContainer {
    ip: String,
    ports: FlockPorts,
    environ: FlockEnviron,
}

#[derive(Debug, Serialize)]
struct FlockPorts {
    #[serde(rename = "cmd-port")]
    cmd_port: i32,
    #[serde(rename = "vnc-port")]
    vnc_port: i32,
}

#[derive(Debug, Serialize)]
struct FlockEnviron {
    #[serde(rename = "VNC_PASS")]
    vnc_pass: Option<String>,
}

impl From<AttachInfo> for FlockContainers {
    fn from(info: AttachInfo) -> Self {
        Self {
            containers: FlockServices {
                xserver: FlockContainer {
                    ip: info.address,
                    ports: FlockPorts {
                        cmd_port: info.cmd_port,
                        vnc_port: info.vnc_port,
                    },
                    environ: FlockEnviron {
                        vnc_pass: info.password,
                    },
                },
            },
        }
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_captures(
    State(state): State<ApiState>,
    Json(req): Json<CaptureRequest>,
) -> Json<serde_json::Value> {
    let options = CaptureOptions {
        owner: req.userid,
        tag: req.tag,
        browser: req.browser,
        embeds: req.embeds,
        ..Default::default()
    };

    let batch = state.job_manager.submit_many(&req.urls, &options).await;

    let jobs: Vec<SubmittedJob> = batch
        .results
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(jobid) => SubmittedJob::Created { index, jobid },
            Err(e) => {
                tracing::warn!(index, error = %e, "Capture submission failed");
                SubmittedJob::Failed {
                    index,
                    error: e.to_string(),
                }
            }
        })
        .collect();

    Json(json!({ "batchid": batch.batch_id, "jobs": jobs }))
}

async fn list_captures(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filter = JobFilter {
        owner: query.userid,
        batch_id: query.batchid,
    };
    let jobs = state.job_manager.list(&filter).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn delete_capture(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Response, ApiError> {
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return Ok(Json(json!({ "deleted": false })).into_response());
    };

    let owner = query.userid.as_deref().filter(|o| !o.is_empty());
    let outcome = state.job_manager.terminate(job_id, owner).await?;

    let response = match outcome {
        Termination::Refused => {
            let refused = OrchestratorError::Forbidden {
                job_id,
                owner: owner.unwrap_or_default().to_string(),
            };
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "deleted": false, "error": refused.to_string() })),
            )
                .into_response()
        }
        other => Json(json!({ "deleted": other.deleted() })).into_response(),
    };
    Ok(response)
}

async fn flock_start(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let not_found = || Json(json!({ "not_found": true }));

    let Ok(job_id) = job_id.parse::<JobId>() else {
        return Ok(not_found());
    };

    match state.job_manager.get_attach_info(job_id).await {
        Ok(info) => Ok(Json(json!(FlockContainers::from(info)))),
        Err(e) if e.is_not_found() => Ok(not_found()),
        Err(e) => Err(e.into()),
    }
}

async fn attach_page(Path(job_id): Path<String>) -> Result<Html<String>, ApiError> {
    // Parsing also guarantees the id is safe to embed in the page.
    let job_id: JobId = job_id.parse().map_err(|_| ApiError {
        status: StatusCode::NOT_FOUND,
        message: format!("Unknown job '{}'", job_id),
    })?;
    Ok(Html(render_attach_page(job_id)))
}

async fn create_browser(
    State(state): State<ApiState>,
    Path((browser, url)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = match query {
        Some(q) if !q.is_empty() => format!("{}?{}", url, q),
        _ => url,
    };

    let options = CaptureOptions {
        browser: Some(browser),
        ..Default::default()
    };
    let jobid = state.job_manager.submit(&url, &options).await?;
    Ok(Json(json!({ "jobid": jobid })))
}

fn render_attach_page(job_id: JobId) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Browser {job_id}</title>
</head>
<body>
<div id="status">Connecting to browser {job_id}...</div>
<div id="screen" data-jobid="{job_id}"></div>
<script>
fetch("/api/flock/start/{job_id}", {{ method: "POST" }})
  .then((res) => res.json())
  .then((data) => {{
    const status = document.getElementById("status");
    if (data.not_found) {{
      status.textContent = "Browser not found";
      return;
    }}
    const xserver = data.containers.xserver;
    status.textContent = "Browser at " + xserver.ip + ":" + xserver.ports["vnc-port"];
    window.dispatchEvent(new CustomEvent("browser-attach", {{ detail: xserver }}));
  }});
</script>
</body>
</html>
"#
    )
}
