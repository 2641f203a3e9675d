//! Component template library namespacing
//!
//! Libraries shipped by a component must be namespaced by the component's
//! name so two components can never fight over a file in the shared
//! `dependencies/lib/` search directory. Additional names are possible via
//! `_metadata.library_aliases`, subject to prefix ownership rules; a
//! component replacing another may reuse the predecessor's prefix when the
//! predecessor is deprecated and has nominated it as replacement.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::component::{component_parameters_key, Component};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::relsymlink;
use crate::reclass::Value;

/// Validate that a shipped library file is namespaced by its component.
///
/// Valid names are `<component>.libsonnet` (any extension) or anything
/// starting with `<component>-`.
pub fn validate_component_library_name(cname: &str, lib: &Path) -> Result<PathBuf> {
    let stem = lib
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = lib
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem == cname || name.starts_with(&format!("{}-", cname)) {
        return Ok(lib.to_path_buf());
    }
    Err(Error::LibraryPrefixConflict {
        component: cname.to_string(),
        alias: name,
        message: "Consider using a library alias.".to_string(),
    })
}

/// Extract the additional allowed prefix from `_metadata.replaces`.
///
/// When the replaced component is also deployed on the cluster, the prefix
/// is only granted if that component is deprecated and has nominated `cn`
/// as its replacement.
fn read_additional_prefix(
    cfg: &Config,
    cn: &str,
    meta_replaces: Option<&str>,
    cluster_parameters: &Value,
) -> String {
    let Some(additional) = meta_replaces else {
        return String::new();
    };
    if !cfg.get_components().contains_key(additional) {
        return additional.to_string();
    }
    let other_meta = cfg.component_metadata(cluster_parameters, additional);
    if !other_meta.deprecated {
        warn!(
            "Ignoring additional library prefix '{}' requested by '{}'. Component '{}' is also deployed on the cluster and isn't deprecated.",
            additional, cn, additional
        );
        return String::new();
    }
    if other_meta.replaced_by.as_deref() != Some(cn) {
        warn!(
            "Ignoring additional library prefix '{}' requested by '{}'. Component '{}' is also deployed on the cluster and hasn't nominated '{}' as its replacement.",
            additional, cn, additional, cn
        );
        return String::new();
    }
    debug!(
        "allowing additional library prefix '{}' for component '{}'",
        additional, cn
    );
    additional.to_string()
}

fn check_library_alias_prefixes(
    libalias: &str,
    cn: &str,
    component_prefixes: &BTreeSet<String>,
    additional_prefix: &str,
) -> Result<()> {
    for prefix in component_prefixes {
        if prefix == cn || prefix == additional_prefix {
            continue;
        }
        if libalias.starts_with(prefix.as_str()) {
            return Err(Error::LibraryPrefixConflict {
                component: cn.to_string(),
                alias: libalias.to_string(),
                message: format!("'{}' is owned by another component", prefix),
            });
        }
    }
    Ok(())
}

fn check_library_alias_collisions(cfg: &Config, cluster_parameters: &Value) -> Result<()> {
    let mut collisions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    let component_prefixes: BTreeSet<String> = cluster_parameters
        .get_path(&["components"])
        .and_then(|v| v.as_mapping())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();

    for (cn, _component) in cfg.get_components() {
        let meta = cfg.component_metadata(cluster_parameters, cn);
        let additional_prefix =
            read_additional_prefix(cfg, cn, meta.replaces.as_deref(), cluster_parameters);
        for libalias in meta.library_aliases.keys() {
            check_library_alias_prefixes(libalias, cn, &component_prefixes, &additional_prefix)?;
            collisions
                .entry(libalias.clone())
                .or_default()
                .insert(cn.clone());
        }
    }

    for (libalias, cnames) in collisions {
        if cnames.len() > 1 {
            return Err(Error::LibraryPrefixConflict {
                component: cnames.iter().next_back().cloned().unwrap_or_default(),
                alias: libalias.clone(),
                message: format!(
                    "components {} all define component library alias '{}'",
                    cnames.into_iter().collect::<Vec<_>>().join(", "),
                    libalias
                ),
            });
        }
    }
    Ok(())
}

/// Validate and install component library aliases into `dependencies/lib/`.
pub fn create_component_library_aliases(cfg: &Config, cluster_parameters: &Value) -> Result<()> {
    check_library_alias_collisions(cfg, cluster_parameters)?;

    for (cn, component) in cfg.get_components() {
        let meta = cfg.component_metadata(cluster_parameters, cn);
        for (libalias, libname) in &meta.library_aliases {
            install_library_alias(cfg, component, libalias, libname)?;
        }
    }
    Ok(())
}

fn install_library_alias(
    cfg: &Config,
    component: &Component,
    libalias: &str,
    libname: &str,
) -> Result<()> {
    debug!("aliasing template library {} to {}", libname, libalias);
    match component.get_library(libname) {
        Some(libf) => relsymlink(&libf, &cfg.inventory().lib_dir(), Some(libalias)),
        None => {
            warn!(
                "'{}' template library alias '{}' refers to nonexistent template library '{}'",
                component.name(),
                libalias,
                libname
            );
            Ok(())
        }
    }
}

/// Keys under `parameters` which hold component configuration, for use by
/// other subsystems that need to separate component keys from cluster keys.
pub fn component_parameter_keys(aliases: &BTreeMap<String, String>) -> BTreeSet<String> {
    aliases
        .values()
        .map(|cn| component_parameters_key(cn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_component_library_name() {
        assert!(validate_component_library_name("nfs", Path::new("lib/nfs.libsonnet")).is_ok());
        assert!(
            validate_component_library_name("nfs", Path::new("lib/nfs-utils.libsonnet")).is_ok()
        );
        let err =
            validate_component_library_name("nfs", Path::new("lib/storage.libsonnet")).unwrap_err();
        assert!(matches!(err, Error::LibraryPrefixConflict { .. }));
    }

    #[test]
    fn test_prefix_check_rejects_foreign_prefix() {
        let mut prefixes = BTreeSet::new();
        prefixes.insert("nfs".to_string());
        prefixes.insert("rook".to_string());
        let err =
            check_library_alias_prefixes("rook-shim.libsonnet", "nfs", &prefixes, "").unwrap_err();
        assert!(matches!(err, Error::LibraryPrefixConflict { .. }));
    }

    #[test]
    fn test_prefix_check_allows_own_and_additional_prefix() {
        let mut prefixes = BTreeSet::new();
        prefixes.insert("nfs".to_string());
        prefixes.insert("legacy".to_string());
        assert!(check_library_alias_prefixes("nfs-x.libsonnet", "nfs", &prefixes, "").is_ok());
        assert!(
            check_library_alias_prefixes("legacy-x.libsonnet", "nfs", &prefixes, "legacy").is_ok()
        );
    }

    #[test]
    fn test_component_parameter_keys() {
        let mut aliases = BTreeMap::new();
        aliases.insert("nfs-a".to_string(), "nfs-client".to_string());
        aliases.insert("nfs-client".to_string(), "nfs-client".to_string());
        let keys = component_parameter_keys(&aliases);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("nfs_client"));
    }
}
