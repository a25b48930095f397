use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::config::helpers::{minutes, optional_env, parse_bool_env, parse_env};
use crate::error::ConfigError;

/// How the browser inside a job is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// No display at all.
    Headless,
    /// Headful browser on a virtual framebuffer, not reachable from outside.
    Xvfb,
    /// Headful browser exposed over VNC for interactive attach.
    Vnc,
}

impl BrowserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headless => "headless",
            Self::Xvfb => "xvfb",
            Self::Vnc => "vnc",
        }
    }

    /// Pick the mode: an explicit mode wins, then VNC, then profile-driven
    /// xvfb, then headless.
    pub fn select(explicit: Option<Self>, enable_vnc: bool, profile_url: Option<&str>) -> Self {
        if let Some(mode) = explicit {
            mode
        } else if enable_vnc {
            Self::Vnc
        } else if profile_url.is_some_and(|p| !p.is_empty()) {
            Self::Xvfb
        } else {
            Self::Headless
        }
    }
}

impl std::fmt::Display for BrowserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BrowserMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "headless" => Ok(Self::Headless),
            "xvfb" | "headful" => Ok(Self::Xvfb),
            "vnc" | "interactive" => Ok(Self::Vnc),
            _ => Err(format!(
                "invalid browser mode '{}', expected one of: headless, xvfb, vnc",
                s
            )),
        }
    }
}

/// A URL pattern that pins a dedicated browser profile.
#[derive(Debug, Clone)]
pub struct ProfileRule {
    pub pattern: Regex,
    pub profile_url: String,
}

impl ProfileRule {
    /// Compile a rule. The pattern is anchored at the start of the URL.
    pub fn new(pattern: &str, profile_url: impl Into<String>) -> Result<Self, ConfigError> {
        let anchored = format!("^(?:{})", pattern);
        let pattern = Regex::new(&anchored).map_err(|e| ConfigError::InvalidValue {
            key: "profile_urls".to_string(),
            message: format!("bad pattern '{}': {}", pattern, e),
        })?;
        Ok(Self {
            pattern,
            profile_url: profile_url.into(),
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

/// First rule matching `url`, in configured order.
pub fn match_profile<'a>(rules: &'a [ProfileRule], url: &str) -> Option<&'a ProfileRule> {
    rules.iter().find(|rule| rule.matches(url))
}

#[derive(Debug, Deserialize)]
struct JobEnvFile {
    #[serde(default)]
    config: JobEnv,
}

#[derive(Debug, Deserialize)]
struct ProfileRuleSpec {
    #[serde(rename = "match")]
    pattern: String,
    url: String,
}

/// Contents of the `config:` map in the `JOB_ENV` YAML file.
#[derive(Debug, Default, Deserialize)]
struct JobEnv {
    mode: Option<BrowserMode>,
    #[serde(default)]
    enable_vnc: bool,
    profile_url: Option<String>,
    #[serde(default)]
    profile_urls: Vec<ProfileRuleSpec>,
    driver_image: Option<String>,
    #[serde(default)]
    remote_cdp: bool,
    #[serde(default)]
    use_proxy: bool,
    /// Minutes.
    job_max_duration: Option<u64>,
    /// Seconds.
    idle_timeout: Option<u64>,
}

impl JobEnv {
    fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: JobEnvFile = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::ParseError(format!("JOB_ENV: {}", e)))?;
        Ok(file.config)
    }

    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ParseError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }
}

/// Process-wide settings that shape every browser job.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Image template such as `oldwebtoday/{}`; `{}` is replaced by the browser name.
    pub image_template: Option<String>,
    pub default_browser: Option<String>,
    pub driver_image: Option<String>,
    pub mode: BrowserMode,
    pub profile_url: Option<String>,
    pub profile_rules: Vec<ProfileRule>,
    /// Expose the DevTools protocol port through the paired service.
    pub remote_cdp: bool,
    pub use_proxy: bool,
    pub job_max_duration: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            image_template: None,
            default_browser: None,
            driver_image: None,
            mode: BrowserMode::Headless,
            profile_url: None,
            profile_rules: Vec::new(),
            remote_cdp: false,
            use_proxy: false,
            job_max_duration: None,
            idle_timeout: None,
        }
    }
}

impl BrowserConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let mut job_env = match optional_env("JOB_ENV")? {
            Some(path) => JobEnv::load(Path::new(&path))?,
            None => JobEnv::default(),
        };

        // Env vars win over the JOB_ENV file.
        if let Some(mode) = parse_env::<BrowserMode>("BROWSER_MODE")? {
            job_env.mode = Some(mode);
        }
        if let Some(profile_url) = optional_env("PROFILE_URL")? {
            job_env.profile_url = Some(profile_url);
        }
        if let Some(minutes) = parse_env::<u64>("JOB_MAX_DURATION")? {
            job_env.job_max_duration = Some(minutes);
        }
        job_env.enable_vnc = parse_bool_env("VNC", job_env.enable_vnc)?;

        let mut config = Self::from_job_env(job_env)?;
        config.image_template = optional_env("BROWSER_IMAGE_TEMPL")?;
        config.default_browser = optional_env("DEFAULT_BROWSER")?;
        Ok(config)
    }

    fn from_job_env(env: JobEnv) -> Result<Self, ConfigError> {
        let profile_rules = env
            .profile_urls
            .iter()
            .map(|spec| ProfileRule::new(&spec.pattern, spec.url.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mode: BrowserMode::select(env.mode, env.enable_vnc, env.profile_url.as_deref()),
            profile_url: env.profile_url,
            profile_rules,
            driver_image: env.driver_image,
            remote_cdp: env.remote_cdp,
            use_proxy: env.use_proxy,
            job_max_duration: env
                .job_max_duration
                .filter(|m| *m > 0)
                .map(|m| minutes("JOB_MAX_DURATION", m))
                .transpose()?,
            idle_timeout: env
                .idle_timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            ..Self::default()
        })
    }

    /// Whether jobs in this configuration need a paired service.
    pub fn requires_endpoint(&self) -> bool {
        self.mode == BrowserMode::Vnc || self.remote_cdp
    }
}
