use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";

/// How the image is placed in the body of an inference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEncoding {
    /// `{"inputs": "<base64>"}` with `Content-Type: application/json`.
    Base64Json,
    /// The raw bytes with `Content-Type: application/octet-stream`.
    RawBytes,
}

/// A captioning model reachable under `/api/<id>/upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub id: String,
    /// Repository path under the inference base URL.
    pub repo: String,
    pub encoding: RequestEncoding,
}

impl ModelEndpoint {
    fn new(id: &str, repo: &str, encoding: RequestEncoding) -> Self {
        Self {
            id: id.to_string(),
            repo: repo.to_string(),
            encoding,
        }
    }
}

fn default_models() -> Vec<ModelEndpoint> {
    vec![
        ModelEndpoint::new(
            "joycaption",
            "Salesforce/blip-image-captioning-large",
            RequestEncoding::Base64Json,
        ),
        ModelEndpoint::new(
            "interrogator",
            "Salesforce/blip-image-captioning-large",
            RequestEncoding::Base64Json,
        ),
        ModelEndpoint::new(
            "blip",
            "Salesforce/blip-image-captioning-base",
            RequestEncoding::RawBytes,
        ),
    ]
}

/// Configuration from environment
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Bearer token for the inference and translation endpoints.
    pub hf_token: Option<String>,
    /// Base URL that model repositories are appended to.
    pub inference_base: String,
    pub retry: RetryPolicy,
    pub translation_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Proxied images larger than this on either side get thumbnailed.
    pub proxy_max_dimension: Option<u32>,
    /// Caption returned when the upstream body yields nothing.
    pub caption_fallback: Option<String>,
    /// Empty means any origin.
    pub cors_allowed_origins: Vec<String>,
    pub models: Vec<ModelEndpoint>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8088,
            hf_token: None,
            inference_base: DEFAULT_INFERENCE_BASE.to_string(),
            retry: RetryPolicy::default(),
            translation_timeout: Duration::from_secs(30),
            max_upload_bytes: 10 * 1024 * 1024,
            proxy_max_dimension: Some(1200),
            caption_fallback: None,
            cors_allowed_origins: Vec::new(),
            models: default_models(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup, so tests don't
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_delay_ms: u64 = parse_or(&get, "UPSTREAM_RETRY_MAX_DELAY_MS", 30_000)?;
        let max_dimension: u32 = parse_or(&get, "PROXY_MAX_DIMENSION", 1200)?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "UPSTREAM_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_delay: Duration::from_millis(parse_or(&get, "UPSTREAM_RETRY_DELAY_MS", 2000)?),
            max_delay: (max_delay_ms > 0).then(|| Duration::from_millis(max_delay_ms)),
            attempt_timeout: Duration::from_secs(parse_or(&get, "UPSTREAM_TIMEOUT_SECS", 60)?),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "UPSTREAM_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: parse_or(&get, "PORT", defaults.port)?,
            hf_token: get("HUGGINGFACE_TOKEN"),
            inference_base: get("HF_INFERENCE_BASE").unwrap_or(defaults.inference_base),
            retry,
            translation_timeout: Duration::from_secs(parse_or(&get, "TRANSLATION_TIMEOUT_SECS", 30)?),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            proxy_max_dimension: (max_dimension > 0).then_some(max_dimension),
            caption_fallback: get("CAPTION_FALLBACK"),
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            models: defaults.models,
        })
    }

    pub fn model(&self, id: &str) -> Option<&ModelEndpoint> {
        self.models.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    /// Full URL of a repository under the inference base.
    pub fn repo_url(&self, repo: &str) -> String {
        format!("{}/{}", self.inference_base.trim_end_matches('/'), repo)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
