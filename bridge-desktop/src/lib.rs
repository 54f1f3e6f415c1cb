//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop dashboards
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with retried buffered requests and
//!   non-retried streamed bodies for server-sent events
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let config = MonitorConfig::builder()
//!     .base_url("http://localhost:8080")
//!     .http_client(http_client)
//!     .build()?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
