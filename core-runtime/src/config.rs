//! # Monitor Configuration Module
//!
//! Provides configuration management for the media library monitor client.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `MonitorConfig`
//! instance that holds the backend location, the HTTP bridge and the timing
//! settings used by the sync poller and the deletion coordinators. It enforces
//! fail-fast validation so that a misconfigured dashboard never starts polling.
//!
//! ## Required Settings
//!
//! - `base_url` - Root URL of the monitor backend (`http://` or `https://`)
//!
//! ## Optional Settings (with defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `api_key` - Sent as `X-Api-Key` on every request
//! - `request_timeout` - 30 seconds
//! - `sync_poll_interval` - 2 seconds
//! - `event_buffer_size` - 100 events
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::MonitorConfig;
//! use std::time::Duration;
//!
//! let config = MonitorConfig::builder()
//!     .base_url("http://localhost:8080")
//!     .api_key("secret")
//!     .sync_poll_interval(Duration::from_secs(1))
//!     .build()?;
//! ```
//!
//! ## Environment
//!
//! [`MonitorConfigBuilder::from_env`] seeds a builder from `MLM_BASE_URL`,
//! `MLM_API_KEY`, `MLM_POLL_INTERVAL_MS` and `MLM_REQUEST_TIMEOUT_SECS`.

use crate::error::{Error, Result};
use bridge_traits::HttpClient;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_BASE_URL: &str = "MLM_BASE_URL";
pub const ENV_API_KEY: &str = "MLM_API_KEY";
pub const ENV_POLL_INTERVAL_MS: &str = "MLM_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "MLM_REQUEST_TIMEOUT_SECS";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MIN_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MAX_SYNC_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Monitor client configuration.
///
/// Use [`MonitorConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct MonitorConfig {
    /// Backend root URL without a trailing slash
    pub base_url: String,

    /// API key sent with every request
    pub api_key: Option<String>,

    /// HTTP client used for every backend call
    pub http_client: Arc<dyn HttpClient>,

    /// Timeout applied to buffered (non-streamed) requests
    pub request_timeout: Duration,

    /// Interval between sync status snapshots while syncs are tracked
    pub sync_poll_interval: Duration,

    /// Capacity of the broadcast event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("http_client", &"HttpClient { ... }")
            .field("request_timeout", &self.request_timeout)
            .field("sync_poll_interval", &self.sync_poll_interval)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl MonitorConfig {
    /// Creates a new builder for constructing a `MonitorConfig`.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Builds a configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MLM_BASE_URL` is missing, a numeric variable does not
    /// parse, or the resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        MonitorConfigBuilder::from_env()?.build()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Base URL uses an HTTP scheme and has a host part
    /// - Request timeout is within 1s..=300s
    /// - Poll interval is within 250ms..=60s
    /// - Event buffer is non-empty
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;

        if let Some(key) = &self.api_key {
            if key.trim().is_empty() {
                return Err(Error::Config(
                    "API key cannot be blank. Omit it or provide a real key.".to_string(),
                ));
            }
        }

        if self.request_timeout < MIN_REQUEST_TIMEOUT || self.request_timeout > MAX_REQUEST_TIMEOUT
        {
            return Err(Error::Config(format!(
                "Request timeout must be between {}s and {}s",
                MIN_REQUEST_TIMEOUT.as_secs(),
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        if self.sync_poll_interval < MIN_SYNC_POLL_INTERVAL
            || self.sync_poll_interval > MAX_SYNC_POLL_INTERVAL
        {
            return Err(Error::Config(format!(
                "Sync poll interval must be between {}ms and {}s",
                MIN_SYNC_POLL_INTERVAL.as_millis(),
                MAX_SYNC_POLL_INTERVAL.as_secs()
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let rest = base_url
        .strip_prefix("http://")
        .or_else(|| base_url.strip_prefix("https://"))
        .ok_or_else(|| {
            Error::Config(format!(
                "Base URL must start with http:// or https://, got {:?}",
                base_url
            ))
        })?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(Error::Config(format!(
            "Base URL is missing a host: {:?}",
            base_url
        )));
    }

    Ok(())
}

fn normalize_base_url(base_url: String) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the monitor backend. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject an implementation with .http_client()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Failed to create default ReqwestHttpClient: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for constructing [`MonitorConfig`] instances.
#[derive(Default)]
pub struct MonitorConfigBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    request_timeout: Option<Duration>,
    sync_poll_interval: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl MonitorConfigBuilder {
    /// Seeds a builder from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Seeds a builder from an arbitrary variable lookup.
    ///
    /// Unset variables leave the corresponding setting untouched.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::default();

        if let Some(url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(url);
        }

        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            builder = builder.api_key(key);
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis = parse_env_number(ENV_POLL_INTERVAL_MS, &raw)?;
            builder = builder.sync_poll_interval(Duration::from_millis(millis));
        }

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            let secs = parse_env_number(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        Ok(builder)
    }

    /// Sets the backend root URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API key sent as `X-Api-Key`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the timeout for buffered requests.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the interval between sync status snapshots.
    ///
    /// Default: 2 seconds
    pub fn sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = Some(interval);
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: 100 events
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The base URL is missing or malformed
    /// - No HTTP client is available
    /// - Any timing value is out of range
    pub fn build(self) -> Result<MonitorConfig> {
        let base_url = self.base_url.map(normalize_base_url).ok_or_else(|| {
            Error::Config(
                "Base URL is required. Use .base_url() or set MLM_BASE_URL.".to_string(),
            )
        })?;

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let config = MonitorConfig {
            base_url,
            api_key: self.api_key,
            http_client,
            request_timeout,
            sync_poll_interval: self
                .sync_poll_interval
                .unwrap_or(DEFAULT_SYNC_POLL_INTERVAL),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

fn parse_env_number(var: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| Error::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })
}
