use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::GenerationKind;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

// ─── Config Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenfeedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_on_orphan_completion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointsConfig>,
}

impl GenfeedConfig {
    pub fn page_size(&self) -> u32 {
        self.page_size.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    pub fn refresh_on_orphan_completion(&self) -> bool {
        self.refresh_on_orphan_completion.unwrap_or(true)
    }

    pub fn reconnect(&self) -> ReconnectConfig {
        self.reconnect.clone().unwrap_or_default()
    }

    pub fn endpoints(&self) -> EndpointsConfig {
        self.endpoints.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    Linear,
}

/// Reconnect policy for the push stream. There is no attempt limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub backoff: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::Exponential,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based), capped at `max_delay_ms`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay_ms,
            BackoffStrategy::Linear => self.initial_delay_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => 2u64
                .checked_pow(attempt - 1)
                .and_then(|factor| self.initial_delay_ms.checked_mul(factor))
                .unwrap_or(u64::MAX),
        };
        delay.min(self.max_delay_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    /// A server `retry:` hint, held within `[initial_delay_ms, max_delay_ms]`.
    pub fn hinted_delay(&self, hint_ms: u64) -> Duration {
        let ceiling = self.max_delay_ms.max(self.initial_delay_ms);
        Duration::from_millis(hint_ms.clamp(self.initial_delay_ms, ceiling))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointsConfig {
    pub tasks: String,
    pub stream: String,
    pub submit_image: String,
    pub submit_video: String,
    pub submit_upscale: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            tasks: "/api/tasks".to_string(),
            stream: "/api/notifications/stream".to_string(),
            submit_image: "/api/generate/image".to_string(),
            submit_video: "/api/generate/video".to_string(),
            submit_upscale: "/api/generate/upscale".to_string(),
        }
    }
}

impl EndpointsConfig {
    pub fn submit_path(&self, kind: GenerationKind) -> &str {
        match kind {
            GenerationKind::Image => &self.submit_image,
            GenerationKind::Video => &self.submit_video,
            GenerationKind::Upscale => &self.submit_upscale,
        }
    }
}

// ─── Config Format ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

// ─── Environment Variable Interpolation ──────────────────────────────────────

/// Replace `${VAR_NAME}` patterns in a string with environment variable values.
/// If the environment variable is not set, the original `${VAR_NAME}` is kept.
pub fn interpolate_env_vars(value: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("invalid regex");
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

fn interpolate_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(interpolate_env_vars(&s)),
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(interpolate_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, interpolate_value(v)))
                .collect(),
        ),
        other => other,
    }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Top-level fields that may arrive as strings after `${VAR}` substitution.
const NUMERIC_FIELDS: &[&str] = &["pageSize", "requestTimeoutMs", "inboxCapacity"];

/// Parse a config string in the given format, with environment variable interpolation.
///
/// YAML is interpolated as raw text before parsing; JSON is parsed first and
/// interpolated value by value. Numeric fields that end up as strings are
/// coerced, or dropped if they do not parse.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<GenfeedConfig, ConfigError> {
    let raw: serde_json::Value = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => {
            let interpolated = interpolate_env_vars(content);
            let parsed: serde_json::Value = serde_yaml::from_str(&interpolated)?;
            // Empty YAML content parses to null
            if parsed.is_null() {
                return Ok(GenfeedConfig::default());
            }
            parsed
        }
    };

    let final_value = coerce_numeric_fields(interpolate_value(raw));
    let config: GenfeedConfig = serde_json::from_value(final_value)?;
    Ok(config)
}

fn coerce_numeric_fields(mut value: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(ref mut map) = value {
        for field in NUMERIC_FIELDS {
            if let Some(serde_json::Value::String(s)) = map.get(*field) {
                match s.trim().parse::<u64>() {
                    Ok(n) => {
                        map.insert(field.to_string(), serde_json::Value::Number(n.into()));
                    }
                    Err(_) => {
                        map.remove(*field);
                    }
                }
            }
        }
    }
    value
}

// ─── File Loading ────────────────────────────────────────────────────────────

const DEFAULT_CANDIDATES: &[&str] = &[
    "genfeed.config.yaml",
    "genfeed.config.yml",
    "genfeed.config.json",
];

/// Load the client config. An explicit `config_path` must exist. Otherwise the
/// default candidates are tried in the working directory, then in the user's
/// config directory (`~/.config/genfeed` on Linux). Nothing found yields the
/// default config.
pub fn load_config_file(config_path: Option<&str>) -> Result<GenfeedConfig, ConfigError> {
    let mut search_dirs = vec![std::env::current_dir()?];
    if let Some(dir) = dirs::config_dir() {
        search_dirs.push(dir.join("genfeed"));
    }
    load_config_file_from_dirs(config_path, &search_dirs)
}

fn load_config_file_from_dirs(
    config_path: Option<&str>,
    search_dirs: &[PathBuf],
) -> Result<GenfeedConfig, ConfigError> {
    if let Some(path) = config_path {
        let full_path = match search_dirs.first() {
            Some(base) if !Path::new(path).is_absolute() => base.join(path),
            _ => PathBuf::from(path),
        };
        if !full_path.exists() {
            return Err(ConfigError::NotFound(full_path.display().to_string()));
        }
        return read_config(&full_path);
    }

    for dir in search_dirs {
        for candidate in DEFAULT_CANDIDATES {
            let full_path = dir.join(candidate);
            if full_path.exists() {
                tracing::debug!(path = %full_path.display(), "loading config file");
                return read_config(&full_path);
            }
        }
    }

    Ok(GenfeedConfig::default())
}

fn read_config(path: &Path) -> Result<GenfeedConfig, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content = std::fs::read_to_string(path)?;
    let format = if ext == "json" {
        ConfigFormat::Json
    } else {
        ConfigFormat::Yaml
    };
    parse_config(&content, format)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
