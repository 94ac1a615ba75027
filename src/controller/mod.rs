//! # Controller
//!
//! Shoot reconciliation and care: conditions, health checks, flows, operations.

pub mod applier;
pub mod backoff;
pub mod care;
pub mod condition;
pub mod flow;
pub mod health;
pub mod lister;
pub mod operation;
pub mod reconciler;
pub mod server;
