//! # Gardenlet Configuration
//!
//! Controller-level configuration loaded from environment variables (populated from ConfigMap).
//!
//! All configuration has sensible defaults and can be overridden via environment variables.

mod controller;
mod duration;
mod server;

pub use controller::{parse_condition_thresholds, ControllerConfig};
pub use duration::parse_kubernetes_duration;
pub use server::ServerConfig;

use crate::crd::UnknownValue;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Shared controller configuration
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration format '{0}'. Expected format: <number><unit> (e.g., '30s', '5m', '1h')")]
    InvalidDuration(String),

    #[error("duration '{0}' is out of range")]
    DurationOutOfRange(String),

    #[error("invalid condition threshold '{0}'. Expected format: <ConditionType>=<duration>")]
    InvalidThreshold(String),

    #[error(transparent)]
    UnknownConditionType(#[from] UnknownValue),
}

/// Controller configuration from the environment, shared between the controller and the care loop
pub fn create_shared_config() -> SharedControllerConfig {
    Arc::new(RwLock::new(ControllerConfig::from_env()))
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
