//! Job and Service manifest rendering.
//!
//! Rendering is a pure function of [`ManifestParams`]: no clock, no
//! randomness, ordered maps everywhere, so identical parameters always
//! serialize to identical bytes.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::{BrowserConfig, BrowserMode, match_profile};
use crate::error::ConfigError;
use crate::orchestrator::identity::{JobId, annotations, labels};
use crate::orchestrator::job_manager::CaptureOptions;

pub const VNC_PORT: i32 = 6080;
pub const CMD_PORT: i32 = 6082;
pub const CDP_PORT: i32 = 9222;

const BLANK_PAGE: &str = "about:blank";

/// Everything needed to render one job. Built once per submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestParams {
    pub job_id: JobId,
    pub image_template: Option<String>,
    pub browser: Option<String>,
    pub driver_image: Option<String>,
    pub mode: BrowserMode,
    pub profile_url: Option<String>,
    pub remote_cdp: bool,
    pub use_proxy: bool,
    pub embeds: bool,
    pub job_max_duration: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    /// Page the browser opens on launch.
    pub start_url: String,
    /// Environment for the driver container, when one is configured.
    pub driver_env: BTreeMap<String, String>,
    pub storage_url: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ManifestParams {
    /// Combine process config with one request.
    ///
    /// Applies the per-URL profile rules: the first rule matching
    /// `target_url` pins its profile and lifts headless jobs to xvfb.
    pub fn build(
        config: &BrowserConfig,
        job_id: JobId,
        target_url: &str,
        options: &CaptureOptions,
        storage_url: Option<String>,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        let driver_image = options
            .driver_image
            .clone()
            .or_else(|| config.driver_image.clone());

        // With a driver the driver navigates; the browser idles on a blank page.
        let mut driver_env = BTreeMap::new();
        let start_url = if driver_image.is_some() {
            if !target_url.is_empty() {
                driver_env.insert("URL".to_string(), target_url.to_string());
            }
            BLANK_PAGE.to_string()
        } else if target_url.is_empty() {
            BLANK_PAGE.to_string()
        } else {
            target_url.to_string()
        };

        let mut mode = config.mode;
        let mut profile_url = config.profile_url.clone();
        if let Some(rule) = match_profile(&config.profile_rules, target_url) {
            profile_url = Some(rule.profile_url.clone());
            if mode == BrowserMode::Headless {
                mode = BrowserMode::Xvfb;
            }
        }

        Self {
            job_id,
            image_template: config.image_template.clone(),
            browser: options
                .browser
                .clone()
                .or_else(|| config.default_browser.clone()),
            driver_image,
            mode,
            profile_url,
            remote_cdp: config.remote_cdp,
            use_proxy: options.use_proxy || config.use_proxy,
            embeds: options.embeds,
            job_max_duration: config.job_max_duration,
            idle_timeout: options.idle_timeout.or(config.idle_timeout),
            start_url,
            driver_env,
            storage_url,
            labels,
            annotations,
        }
    }

    /// Whether the job must be reachable through a paired service.
    pub fn requires_endpoint(&self) -> bool {
        self.mode == BrowserMode::Vnc || self.remote_cdp
    }
}

/// Rendered resources for one job.
#[derive(Debug, Clone)]
pub struct RenderedManifests {
    pub job: Job,
    pub service: Option<Service>,
}

/// Render the Job and, when the mode needs network access, its Service.
pub fn render(params: &ManifestParams) -> Result<RenderedManifests, ConfigError> {
    let image = resolve_browser_image(params.image_template.as_deref(), params.browser.as_deref())?;

    let mut containers = vec![browser_container(params, image)];
    if let Some(ref driver_image) = params.driver_image {
        containers.push(driver_container(params, driver_image));
    }

    let active_deadline_seconds = params
        .job_max_duration
        .map(|d| {
            i64::try_from(d.as_secs()).map_err(|_| ConfigError::InvalidValue {
                key: "JOB_MAX_DURATION".to_string(),
                message: format!("{}s exceeds the job deadline range", d.as_secs()),
            })
        })
        .transpose()?;

    let job = Job {
        metadata: ObjectMeta {
            name: Some(params.job_id.job_name()),
            labels: Some(params.labels.clone()),
            annotations: Some(params.annotations.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector(params.job_id)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let service = params.requires_endpoint().then(|| render_service(params));

    Ok(RenderedManifests { job, service })
}

fn render_service(params: &ManifestParams) -> Service {
    let ports = exposed_ports(params)
        .into_iter()
        .map(|(name, port)| ServicePort {
            name: Some(name.to_string()),
            port,
            target_port: Some(IntOrString::Int(port)),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(params.job_id.service_name()),
            labels: Some(selector(params.job_id)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector(params.job_id)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn selector(job_id: JobId) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::JOB_ID.to_string(), job_id.to_string())])
}

fn exposed_ports(params: &ManifestParams) -> Vec<(&'static str, i32)> {
    let mut ports = Vec::new();
    if params.mode == BrowserMode::Vnc {
        ports.push(("vnc-port", VNC_PORT));
        ports.push(("cmd-port", CMD_PORT));
    }
    if params.remote_cdp {
        ports.push(("cdp-port", CDP_PORT));
    }
    ports
}

fn browser_container(params: &ManifestParams, image: String) -> Container {
    let mut env = vec![
        env_var("URL", &params.start_url),
        env_var("MODE", params.mode.as_str()),
        env_var("PROXY", if params.use_proxy { "1" } else { "0" }),
    ];
    if let Some(ref profile_url) = params.profile_url {
        env.push(env_var("PROFILE_URL", profile_url));
    }
    if let Some(idle) = params.idle_timeout {
        env.push(env_var("IDLE_TIMEOUT", &idle.as_secs().to_string()));
    }
    if let Some(password) = params.annotations.get(annotations::VNC_PASS) {
        env.push(env_var("VNC_PASS", password));
    }
    if params.remote_cdp {
        env.push(env_var("REMOTE_CDP", "1"));
    }
    // Without a driver the browser uploads its own archive.
    if params.driver_image.is_none()
        && let Some(ref storage_url) = params.storage_url
    {
        env.push(env_var("STORAGE_URL", storage_url));
    }

    let ports = exposed_ports(params)
        .into_iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.to_string()),
            container_port: port,
            ..Default::default()
        })
        .collect::<Vec<_>>();

    Container {
        name: "browser".to_string(),
        image: Some(image),
        env: Some(env),
        ports: (!ports.is_empty()).then_some(ports),
        ..Default::default()
    }
}

fn driver_container(params: &ManifestParams, image: &str) -> Container {
    let mut env: Vec<EnvVar> = params
        .driver_env
        .iter()
        .map(|(name, value)| env_var(name, value))
        .collect();
    if let Some(ref storage_url) = params.storage_url {
        env.push(env_var("STORAGE_URL", storage_url));
    }
    env.push(env_var("EMBEDS", if params.embeds { "1" } else { "0" }));

    Container {
        name: "driver".to_string(),
        image: Some(image.to_string()),
        env: Some(env),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Substitute the browser name into the image template.
fn resolve_browser_image(
    template: Option<&str>,
    browser: Option<&str>,
) -> Result<String, ConfigError> {
    let template = template
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "BROWSER_IMAGE_TEMPL".to_string(),
            hint: "Set it to an image template such as 'oldwebtoday/{}'.".to_string(),
        })?;

    let image = if template.contains("{}") {
        let browser = browser
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "DEFAULT_BROWSER".to_string(),
                hint: "The image template needs a browser name and none was requested."
                    .to_string(),
            })?;
        if !browser
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(ConfigError::InvalidValue {
                key: "browser".to_string(),
                message: format!("'{}' is not a valid image name component", browser),
            });
        }
        template.replace("{}", browser)
    } else {
        template.to_string()
    };

    if image.contains(['{', '}']) {
        return Err(ConfigError::InvalidValue {
            key: "BROWSER_IMAGE_TEMPL".to_string(),
            message: format!("unresolved placeholder in '{}'", image),
        });
    }

    Ok(image)
}
