//! # Gardenlet
//!
//! Shoot cluster reconciliation and health evaluation for a Gardener seed.
//!
//! - [`controller::flow`] runs dependency-ordered task graphs
//! - [`controller::operation`] assembles the per-reconciliation context
//! - [`controller::health`] and [`controller::care`] evaluate shoot conditions
//! - [`runtime`] wires the controller, care loop and HTTP server together

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod provider;
pub mod runtime;
