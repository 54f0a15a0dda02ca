//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `backoff`: Exponential backoff for retry scheduling
//! - `config`: Client configuration and settings
//! - `error`: Unified error types
//! - `metrics`: Prometheus metrics helpers

pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
