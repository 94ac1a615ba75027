//! # Image Vector
//!
//! Container image references keyed by component name, optionally constrained to
//! the Kubernetes versions of the cluster running the component (runtime) and
//! the cluster it manages (target).
//!
//! ```yaml
//! images:
//!   - name: kube-apiserver
//!     repository: registry.k8s.io/kube-apiserver
//!     targetVersion: ">= 1.28"
//!   - name: pause-container
//!     repository: registry.k8s.io/pause
//!     tag: "3.9"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageVectorError {
    #[error("could not find image {name:?} for runtime version {runtime:?} and target version {target:?}")]
    NotFound {
        name: String,
        runtime: String,
        target: String,
    },

    #[error("invalid version constraint {0:?}")]
    InvalidConstraint(String),

    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("failed to read image vector {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse image vector: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub name: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
}

/// A resolved image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: String,
    pub repository: String,
    pub tag: Option<String>,
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => f.write_str(&self.repository),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageVector {
    #[serde(default)]
    pub images: Vec<ImageSource>,
}

impl ImageVector {
    pub fn new(images: Vec<ImageSource>) -> Self {
        Self { images }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ImageVectorError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn read_from_file(path: &Path) -> Result<Self, ImageVectorError> {
        let content = std::fs::read_to_string(path).map_err(|source| ImageVectorError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// First image named `name` whose version constraints admit both versions
    ///
    /// Images without a tag are tagged with the target version.
    pub fn find_image(&self, name: &str, runtime_version: &str, target_version: &str) -> Result<Image, ImageVectorError> {
        let runtime = Version::parse(runtime_version)?;
        let target = Version::parse(target_version)?;
        for source in self.images.iter().filter(|s| s.name == name) {
            if !matches_constraint(source.runtime_version.as_deref(), &runtime)? {
                continue;
            }
            if !matches_constraint(source.target_version.as_deref(), &target)? {
                continue;
            }
            let tag = source.tag.clone().or_else(|| Some(tag_for_version(target_version)));
            return Ok(Image {
                name: source.name.clone(),
                repository: source.repository.clone(),
                tag,
            });
        }
        Err(ImageVectorError::NotFound {
            name: name.to_string(),
            runtime: runtime_version.to_string(),
            target: target_version.to_string(),
        })
    }
}

fn tag_for_version(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Set `values.images.<name>` for every requested image
pub fn inject_images(
    values: Map<String, Value>,
    vector: &ImageVector,
    names: &[&str],
    runtime_version: &str,
    target_version: &str,
) -> Result<Map<String, Value>, ImageVectorError> {
    let mut values = values;
    let mut images = match values.remove("images") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    for name in names {
        let image = vector.find_image(name, runtime_version, target_version)?;
        images.insert((*name).to_string(), Value::String(image.to_string()));
    }
    values.insert("images".to_string(), Value::Object(images));
    Ok(values)
}

/// `major.minor.patch`; missing components are zero, pre-release suffixes are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version(u64, u64, u64);

impl Version {
    fn parse(text: &str) -> Result<Self, ImageVectorError> {
        let trimmed = text.trim().trim_start_matches('v');
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        let mut parts = [0u64; 3];
        let mut count = 0;
        for (i, part) in core.split('.').enumerate() {
            if i >= 3 {
                return Err(ImageVectorError::InvalidVersion(text.to_string()));
            }
            parts[i] = part
                .parse()
                .map_err(|_| ImageVectorError::InvalidVersion(text.to_string()))?;
            count += 1;
        }
        if count == 0 {
            return Err(ImageVectorError::InvalidVersion(text.to_string()));
        }
        Ok(Version(parts[0], parts[1], parts[2]))
    }
}

/// Comma-separated comparisons such as `>= 1.28, < 1.31`; no constraint matches everything
fn matches_constraint(constraint: Option<&str>, version: &Version) -> Result<bool, ImageVectorError> {
    let Some(constraint) = constraint.filter(|c| !c.trim().is_empty()) else {
        return Ok(true);
    };
    for clause in constraint.split(',').map(str::trim) {
        let (op, rest) = [">=", "<=", "!=", ">", "<", "="]
            .iter()
            .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))
            .unwrap_or(("=", clause));
        let bound = Version::parse(rest)
            .map_err(|_| ImageVectorError::InvalidConstraint(constraint.to_string()))?;
        let ordering = version.cmp(&bound);
        let ok = match op {
            ">=" => ordering != Ordering::Less,
            "<=" => ordering != Ordering::Greater,
            "!=" => ordering != Ordering::Equal,
            ">" => ordering == Ordering::Greater,
            "<" => ordering == Ordering::Less,
            _ => ordering == Ordering::Equal,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}
