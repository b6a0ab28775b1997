use std::env;
use std::time::Duration;

use remix_contracts::access::DEFAULT_ACCESS_CODE;

pub const DEFAULT_ARENA_API_BASE: &str = "https://api.are.na/v2";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 5.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// Runtime settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RemixConfig {
    pub arena_api_base: String,
    pub gemini_api_base: String,
    pub gemini_api_key: Option<String>,
    pub image_model: String,
    pub proxy_prefix: Option<String>,
    pub access_code: String,
    pub request_timeout_s: f64,
}

impl Default for RemixConfig {
    fn default() -> Self {
        Self {
            arena_api_base: DEFAULT_ARENA_API_BASE.to_string(),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_api_key: None,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            proxy_prefix: None,
            access_code: DEFAULT_ACCESS_CODE.to_string(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl RemixConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let defaults = Self::default();
        Self {
            arena_api_base: value("ARENA_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.arena_api_base),
            gemini_api_base: value("GEMINI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_base),
            gemini_api_key: value("GEMINI_API_KEY").or_else(|| value("GOOGLE_API_KEY")),
            image_model: value("REMIX_IMAGE_MODEL").unwrap_or(defaults.image_model),
            proxy_prefix: value("REMIX_PROXY_PREFIX"),
            access_code: value("REMIX_ACCESS_CODE").unwrap_or(defaults.access_code),
            request_timeout_s: value("REMIX_REQUEST_TIMEOUT")
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|seconds| seconds.is_finite())
                .map(|seconds| seconds.clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S))
                .unwrap_or(defaults.request_timeout_s),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }
}
