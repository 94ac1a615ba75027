//! # Metrics Module
//!
//! Prometheus metrics for monitoring the gardenlet, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `controller_metrics` - Reconciliations, requeues and flow tasks
//! - `health_metrics` - Care evaluations and condition states

pub mod controller_metrics;
pub mod health_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use health_metrics::*;
pub use registry::*;
