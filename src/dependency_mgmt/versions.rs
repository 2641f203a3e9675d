//! Dependency coordinates from the rendered hierarchy
//!
//! Components and packages are declared in `parameters.components` and
//! `parameters.packages`. Each entry needs a `url` and a `version`; a
//! `version` without a `url` is almost always a typo in an override and is
//! rejected explicitly.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::reclass::Value;

/// Dependency kinds read from the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepType {
    Component,
    Package,
}

impl DepType {
    pub fn key(self) -> &'static str {
        match self {
            DepType::Component => "components",
            DepType::Package => "packages",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            DepType::Component => "component",
            DepType::Package => "package",
        }
    }
}

/// Repository coordinates for one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub url: String,
    pub version: String,
    pub path: String,
}

impl DependencySpec {
    fn from_value(dep_type: DepType, name: &str, entry: &Value) -> Result<Self> {
        let map = entry.as_mapping().ok_or_else(|| {
            Error::config(format!(
                "entry for {} '{}' is not a mapping",
                dep_type.kind(),
                name
            ))
        })?;
        let url = match map.get("url").and_then(|v| v.as_str()) {
            Some(url) => url.to_string(),
            None => {
                return Err(Error::AmbiguousVersionOverride {
                    kind: dep_type.kind().to_string(),
                    name: name.to_string(),
                })
            }
        };
        let version = map
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::config(format!(
                    "{} '{}' doesn't have a version specified.",
                    dep_type.kind(),
                    name
                ))
            })?;
        let path = map
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_default();
        Ok(DependencySpec { url, version, path })
    }
}

/// Read the specs for `names` of `dep_type` from the cluster parameters.
pub fn read_versions(
    cluster_parameters: &Value,
    dep_type: DepType,
    names: &[String],
) -> Result<BTreeMap<String, DependencySpec>> {
    let deps = cluster_parameters.get_path(&[dep_type.key()]);
    let mut specs = BTreeMap::new();
    for name in names {
        let entry = deps
            .and_then(|d| d.as_mapping())
            .and_then(|m| m.get(name.as_str()))
            .ok_or_else(|| Error::UnknownDependency {
                kind: dep_type.kind().to_string(),
                name: name.clone(),
                key: dep_type.key().to_string(),
            })?;
        specs.insert(
            name.clone(),
            DependencySpec::from_value(dep_type, name, entry)?,
        );
    }
    Ok(specs)
}

/// Reject any dependency entry carrying a version override without a URL.
///
/// Instance entries (names in `known_instances`) may pin a version without
/// repeating the base component's URL; for every other name a URL-less
/// entry is a typo'd override that would otherwise be silently ignored.
pub fn verify_version_overrides(
    cluster_parameters: &Value,
    known_instances: &std::collections::BTreeSet<String>,
) -> Result<()> {
    for dep_type in [DepType::Component, DepType::Package] {
        let Some(deps) = cluster_parameters
            .get_path(&[dep_type.key()])
            .and_then(|d| d.as_mapping())
        else {
            continue;
        };
        for (name, entry) in deps {
            if dep_type == DepType::Component && known_instances.contains(name) {
                continue;
            }
            let has_url = entry
                .as_mapping()
                .map(|m| m.contains_key("url"))
                .unwrap_or(false);
            if !has_url {
                return Err(Error::AmbiguousVersionOverride {
                    kind: dep_type.kind().to_string(),
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}
