//! Infrastructure - configuration, metrics, and provisioning state
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `group_store` - Persisted visitor-group identifier

pub mod config;
pub mod group_store;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
