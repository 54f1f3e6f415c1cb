//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media library monitor:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the maintenance core depends on.
//! It establishes the logging conventions, the configuration contract with the
//! host dashboard, and the broadcast channel the UI listens on for progress,
//! refresh triggers and error banners.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
