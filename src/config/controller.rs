//! # Controller Configuration
//!
//! Settings for the reconcile flow and the care loop.

use super::{env_var_or_default, parse_kubernetes_duration, ConfigError};
use crate::constants::*;
use crate::crd::ConditionType;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Grace periods before an unhealthy condition is reported as `False`
    pub condition_thresholds: HashMap<ConditionType, TimeDelta>,
    /// Extension health reports older than this are treated as unknown
    pub stale_extension_health_check_threshold: Option<TimeDelta>,
    pub care_sync_period: Duration,
    pub care_concurrency: usize,
    pub max_parallel_flow_tasks: usize,
    pub flow_task_timeout: Duration,
    pub flow_task_retry_interval: Duration,
    pub reconcile_interval: Duration,
    /// Only shoots scheduled onto this seed are handled; all shoots when unset
    pub seed_name: Option<String>,
    pub garden_namespace: String,
    pub charts_path: PathBuf,
    pub image_vector_path: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            condition_thresholds: HashMap::new(),
            stale_extension_health_check_threshold: None,
            care_sync_period: Duration::from_secs(DEFAULT_CARE_SYNC_PERIOD_SECS),
            care_concurrency: DEFAULT_CARE_CONCURRENCY,
            max_parallel_flow_tasks: DEFAULT_MAX_PARALLEL_FLOW_TASKS,
            flow_task_timeout: Duration::from_secs(DEFAULT_FLOW_TASK_TIMEOUT_SECS),
            flow_task_retry_interval: Duration::from_secs(DEFAULT_FLOW_TASK_RETRY_INTERVAL_SECS),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            seed_name: None,
            garden_namespace: DEFAULT_GARDEN_NAMESPACE.to_string(),
            charts_path: PathBuf::from(DEFAULT_CHARTS_PATH),
            image_vector_path: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// Invalid values are logged and replaced by their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            condition_thresholds: env_parsed("CONDITION_THRESHOLDS", parse_condition_thresholds)
                .unwrap_or(defaults.condition_thresholds),
            stale_extension_health_check_threshold: env_parsed(
                "STALE_EXTENSION_HEALTH_CHECK_THRESHOLD",
                parse_time_delta,
            )
            .or(defaults.stale_extension_health_check_threshold),
            care_sync_period: env_parsed("CARE_SYNC_PERIOD", parse_kubernetes_duration)
                .unwrap_or(defaults.care_sync_period),
            care_concurrency: env_var_or_default("CARE_CONCURRENCY", defaults.care_concurrency),
            max_parallel_flow_tasks: env_var_or_default(
                "MAX_PARALLEL_FLOW_TASKS",
                defaults.max_parallel_flow_tasks,
            ),
            flow_task_timeout: env_parsed("FLOW_TASK_TIMEOUT", parse_kubernetes_duration)
                .unwrap_or(defaults.flow_task_timeout),
            flow_task_retry_interval: env_parsed("FLOW_TASK_RETRY_INTERVAL", parse_kubernetes_duration)
                .unwrap_or(defaults.flow_task_retry_interval),
            reconcile_interval: env_parsed("RECONCILE_INTERVAL", parse_kubernetes_duration)
                .unwrap_or(defaults.reconcile_interval),
            seed_name: std::env::var("SEED_NAME").ok().filter(|s| !s.is_empty()),
            garden_namespace: env_var_or_default("GARDEN_NAMESPACE", defaults.garden_namespace),
            charts_path: env_var_or_default("CHARTS_PATH", defaults.charts_path),
            image_vector_path: std::env::var("IMAGE_VECTOR_PATH").ok().map(PathBuf::from),
        }
    }
}

fn env_parsed<T>(key: &str, parse: impl Fn(&str) -> Result<T, ConfigError>) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match parse(&value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, value = %value, error = %e, "Ignoring invalid configuration value");
            None
        }
    }
}

fn parse_time_delta(value: &str) -> Result<TimeDelta, ConfigError> {
    let duration = parse_kubernetes_duration(value)?;
    TimeDelta::from_std(duration).map_err(|_| ConfigError::DurationOutOfRange(value.to_string()))
}

/// Parse `ControlPlaneHealthy=1m,EveryNodeReady=5m`
pub fn parse_condition_thresholds(value: &str) -> Result<HashMap<ConditionType, TimeDelta>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (ty, duration) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidThreshold(entry.to_string()))?;
            Ok((ty.trim().parse::<ConditionType>()?, parse_time_delta(duration)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_condition_thresholds() {
        let thresholds = parse_condition_thresholds("ControlPlaneHealthy=1m, EveryNodeReady=5m").unwrap();
        assert_eq!(thresholds[&ConditionType::ControlPlaneHealthy], TimeDelta::minutes(1));
        assert_eq!(thresholds[&ConditionType::EveryNodeReady], TimeDelta::minutes(5));
        assert_eq!(thresholds.len(), 2);
    }

    #[test]
    fn test_parse_condition_thresholds_rejects_unknown_type() {
        let err = parse_condition_thresholds("NetworkHealthy=1m").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownConditionType(_)));
    }

    #[test]
    fn test_parse_condition_thresholds_rejects_missing_separator() {
        let err = parse_condition_thresholds("ControlPlaneHealthy").unwrap_err();
        assert_eq!(err, ConfigError::InvalidThreshold("ControlPlaneHealthy".to_string()));
    }

    #[test]
    fn test_empty_thresholds() {
        assert!(parse_condition_thresholds("").unwrap().is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.care_concurrency, DEFAULT_CARE_CONCURRENCY);
        assert_eq!(config.garden_namespace, "garden");
        assert!(config.condition_thresholds.is_empty());
    }
}
