//! # Custom Resource Definitions
//!
//! Resource types read and written by the gardenlet.
//!
//! - `Shoot` and `Seed` from `core.gardener.cloud`
//! - extension resources (`Worker`, `Etcd`, `ManagedResource`) owned by other controllers
//! - the condition model shared by all of them

pub mod condition;
pub mod extensions;
pub mod seed;
pub mod shoot;

pub use condition::*;
pub use extensions::*;
pub use seed::*;
pub use shoot::*;

use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Deserializer, Serialize};

/// Purpose of a shoot; `testing` shoots run without monitoring and logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Evaluation,
    Testing,
    Development,
    Production,
    Infrastructure,
}

fn parse_known<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let deserializer: StrDeserializer<'_, ValueError> = raw.into_deserializer();
    T::deserialize(deserializer).ok()
}

/// Purpose as written by any API client; unknown values fall back to the default
pub(crate) fn purpose_or_default<'de, D>(deserializer: D) -> Result<Purpose, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_known(&raw).unwrap_or_default())
}

/// Error codes as written by any API client; codes this build does not know are dropped
pub(crate) fn known_error_codes<'de, D>(deserializer: D) -> Result<Vec<ErrorCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw.iter().filter_map(|code| parse_known(code)).collect())
}
