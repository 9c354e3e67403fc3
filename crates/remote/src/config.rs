//! Configuration types for the remote cache

use serde::{Deserialize, Serialize};

/// Default environment variable holding the remote credential
pub const DEFAULT_TOKEN_ENV: &str = "ARTIFEX_TOKEN";

/// Which remote service a project talks to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteVariant {
    /// Project-scoped binary cache
    #[default]
    Project,
    /// Account-scoped shared module cache
    Module,
}

/// Configuration for the remote cache tier, usually the `[remote]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Server base URL (e.g., "https://cache.example.com")
    #[serde(default = "default_url")]
    pub url: String,

    /// Remote identity as `account/project`; no remote tier when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_handle: Option<String>,

    /// Remote service variant
    #[serde(default)]
    pub variant: RemoteVariant,

    /// Download endpoint for the module variant, defaults to `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,

    /// Maximum items transferred concurrently per batch
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Multipart upload part size in bytes
    #[serde(default = "default_multipart_chunk_size")]
    pub multipart_chunk_size: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            full_handle: None,
            variant: RemoteVariant::default(),
            cache_url: None,
            concurrency_limit: default_concurrency_limit(),
            multipart_chunk_size: default_multipart_chunk_size(),
            timeout_secs: default_timeout_secs(),
            token_env: default_token_env(),
            retry: RetryConfig::default(),
        }
    }
}

impl RemoteConfig {
    /// Server URL without a trailing slash
    #[must_use]
    pub fn server_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Download endpoint for the module variant
    #[must_use]
    pub fn module_cache_url(&self) -> &str {
        self.cache_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.url)
            .trim_end_matches('/')
    }
}

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// Default value functions
fn default_url() -> String {
    "https://cache.artifex.dev".to_string()
}

fn default_concurrency_limit() -> usize {
    15
}

fn default_multipart_chunk_size() -> usize {
    10 * 1024 * 1024
}

fn default_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
