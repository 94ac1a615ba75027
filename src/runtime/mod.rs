//! # Runtime Module
//!
//! Runtime components of the gardenlet: initialization, the shoot controller,
//! the periodic care loop and error handling.

pub mod care_loop;
pub mod controller_runner;
pub mod error_policy;
pub mod initialization;

pub use care_loop::*;
pub use controller_runner::*;
pub use error_policy::*;
pub use initialization::*;
