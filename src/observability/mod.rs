//! # Observability
//!
//! Prometheus metrics for the gardenlet. Logging is plain `tracing`, set up in
//! [`crate::runtime::initialization`].

pub mod metrics;
