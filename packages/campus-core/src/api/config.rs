use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::ServiceName;

/// Default API base URL (identity, course and profile services hang off this)
pub const DEFAULT_API_URL: &str = "http://localhost:8181/api/v1";

/// Default address of the web dashboard the shell hands routes to
pub const DEFAULT_WEB_URL: &str = "http://localhost:3000";

/// Default timeout for a single request, including the identity check
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Environment variable name for API base URL override
pub const ENV_API_URL: &str = "CAMPUS_API_URL";

/// Suffix stripped from the base URL for services mounted at the host root
const VERSIONED_API_SUFFIX: &str = "/api/v1";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    api: Option<ApiConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    /// Base URL (e.g., "https://campus.example.com/api/v1")
    base_url: Option<String>,
    identity_url: Option<String>,
    course_url: Option<String>,
    assessment_url: Option<String>,
    dashboard_url: Option<String>,
    profile_url: Option<String>,
    student_management_url: Option<String>,
    web_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// Runtime endpoint configuration for every service client
#[derive(Debug, Clone)]
pub struct ApiEndpointConfig {
    /// Base URL for versioned API calls (e.g., "http://localhost:8181/api/v1")
    pub base_url: String,
    pub identity_url: String,
    pub course_url: String,
    pub assessment_url: String,
    pub dashboard_url: String,
    pub profile_url: String,
    pub student_management_url: String,
    /// Web dashboard origin, used when a route is opened in a browser
    pub web_url: String,
    /// Upper bound for each request, identity check included
    pub request_timeout: Duration,
    /// Source of the configuration (for logging)
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

impl ApiEndpointConfig {
    /// Derive every service URL from a single base URL.
    pub fn from_base_url(base_url: &str, source: ConfigSource) -> Self {
        let base = normalize_url(base_url).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let root = base
            .strip_suffix(VERSIONED_API_SUFFIX)
            .map(|s| s.to_string())
            .unwrap_or_else(|| base.clone());

        Self {
            identity_url: format!("{}/auth", base),
            course_url: base.clone(),
            assessment_url: root.clone(),
            dashboard_url: root,
            profile_url: base.clone(),
            student_management_url: base.clone(),
            base_url: base,
            web_url: DEFAULT_WEB_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            source,
        }
    }

    /// Base URL for a named service client
    pub fn url_for(&self, service: ServiceName) -> &str {
        match service {
            ServiceName::Course => &self.course_url,
            ServiceName::Identity => &self.identity_url,
            ServiceName::Assessment => &self.assessment_url,
            ServiceName::Dashboard => &self.dashboard_url,
            ServiceName::Profile => &self.profile_url,
            ServiceName::StudentManagement => &self.student_management_url,
        }
    }

    /// Browser URL for a dashboard route
    pub fn web_url_for(&self, route: &str) -> String {
        format!("{}/{}", self.web_url, route.trim_start_matches('/'))
    }

    fn apply_overrides(&mut self, api: &ApiConfig) {
        let overrides = [
            (&api.identity_url, &mut self.identity_url),
            (&api.course_url, &mut self.course_url),
            (&api.assessment_url, &mut self.assessment_url),
            (&api.dashboard_url, &mut self.dashboard_url),
            (&api.profile_url, &mut self.profile_url),
            (&api.student_management_url, &mut self.student_management_url),
            (&api.web_url, &mut self.web_url),
        ];
        for (value, slot) in overrides {
            if let Some(url) = value.as_deref().and_then(normalize_url) {
                *slot = url;
            }
        }
        if let Some(secs) = api.request_timeout_secs.filter(|s| *s > 0) {
            self.request_timeout = Duration::from_secs(secs);
        }
    }
}

impl Default for ApiEndpointConfig {
    fn default() -> Self {
        Self::from_base_url(DEFAULT_API_URL, ConfigSource::Default)
    }
}

fn normalize_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// Get the campus-dashboard config directory
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("campus-dashboard"))
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    get_config_dir().map(|p| p.join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Resolve endpoint configuration from an optional env value and parsed config file.
fn resolve_api_config(env_url: Option<String>, file: Option<ConfigFile>) -> ApiEndpointConfig {
    // Priority 1: Environment variable
    if let Some(url) = env_url.as_deref().and_then(normalize_url) {
        tracing::info!("Using API base URL from environment variable: {}", url);
        let mut config = ApiEndpointConfig::from_base_url(&url, ConfigSource::Environment);
        // Per-service overrides and timeout still come from the file
        if let Some(api) = file.as_ref().and_then(|f| f.api.as_ref()) {
            if let Some(secs) = api.request_timeout_secs.filter(|s| *s > 0) {
                config.request_timeout = Duration::from_secs(secs);
            }
            if let Some(web) = api.web_url.as_deref().and_then(normalize_url) {
                config.web_url = web;
            }
        }
        return config;
    }

    // Priority 2: Config file
    if let Some(api) = file.and_then(|f| f.api) {
        if let Some(base) = api.base_url.as_deref().and_then(normalize_url) {
            tracing::info!("Using API base URL from config file: {}", base);
            let mut config = ApiEndpointConfig::from_base_url(&base, ConfigSource::ConfigFile);
            config.apply_overrides(&api);
            return config;
        }
    }

    // Priority 3: Default values
    tracing::debug!("Using default API base URL: {}", DEFAULT_API_URL);
    ApiEndpointConfig::default()
}

/// Load API endpoint configuration with priority:
/// 1. Environment variable (CAMPUS_API_URL)
/// 2. Config file (~/.config/campus-dashboard/config.toml)
/// 3. Default values
pub fn load_api_config() -> ApiEndpointConfig {
    resolve_api_config(std::env::var(ENV_API_URL).ok(), load_config_file())
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/campus-dashboard/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Campus Dashboard Configuration
# Place this file at: ~/.config/campus-dashboard/config.toml

[api]
# Versioned API base URL; per-service URLs are derived from it
# Default: http://localhost:8181/api/v1
# base_url = "https://campus.example.com/api/v1"

# Optional per-service overrides
# identity_url = "https://auth.campus.example.com/api/v1/auth"
# dashboard_url = "https://campus.example.com"

# Web dashboard opened by `campus-dashboard open --browser`
# Default: http://localhost:3000
# web_url = "https://campus.example.com"

# Request timeout in seconds (also bounds the session check)
# request_timeout_secs = 10
"#
    .to_string()
}
