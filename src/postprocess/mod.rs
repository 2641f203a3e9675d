//! Post-processing filter engine
//!
//! After the templating engine has written its output, each instance's
//! declared filters are applied in order. Filters are declared in the
//! instance's rendered parameters under
//! `commodore.postprocess.filters`; each filter reads and rewrites files
//! under `compiled/<instance>/<path>`. Builtin filters run natively;
//! `jsonnet` filters are evaluated through the external jsonnet
//! evaluator. Filters with invalid definitions are skipped with a
//! warning; a failing filter aborts the compile.

pub mod builtin;
pub mod jsonnet;

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::component::Component;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reclass::{Node, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Builtin,
    Jsonnet,
}

/// One validated filter definition.
#[derive(Debug, Clone)]
pub struct Filter {
    pub filter_type: FilterType,
    /// Builtin filter name, or the jsonnet file relative to the component
    /// checkout.
    pub filter: String,
    /// Subpath under `compiled/<instance>` the filter operates on.
    pub path: String,
    pub enabled: bool,
    pub filterargs: BTreeMap<String, Value>,
}

impl Filter {
    /// Validate a filter definition from the inventory.
    pub fn from_value(
        cfg: &Config,
        component: &Component,
        instance: &str,
        fd: &Value,
    ) -> Result<Filter> {
        let map = fd
            .as_mapping()
            .ok_or_else(|| Error::config("filter definition is not a mapping"))?;

        for key in ["type", "path", "filter"] {
            if !map.contains_key(key) {
                return Err(Error::config(format!(
                    "Filter is missing required key '{}'",
                    key
                )));
            }
        }
        if let Some(enabled) = map.get("enabled") {
            if enabled.as_bool().is_none() {
                return Err(Error::config("Filter key 'enabled' is not a boolean"));
            }
        }

        let filter_type = match map.get("type").and_then(|v| v.as_str()) {
            Some("builtin") => FilterType::Builtin,
            Some("jsonnet") => FilterType::Jsonnet,
            other => {
                return Err(Error::config(format!(
                    "Filter has unknown type {}",
                    other.unwrap_or("<unset>")
                )))
            }
        };
        let filter = map
            .get("filter")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::config("Filter key 'filter' is not a string"))?
            .to_string();
        let path = map
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::config("Filter key 'path' is not a string"))?
            .trim_matches('/')
            .to_string();
        let filterargs = map
            .get("filterargs")
            .and_then(|v| v.as_mapping())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let f = Filter {
            filter_type,
            filter,
            path,
            enabled: map.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
            filterargs,
        };

        match f.filter_type {
            FilterType::Builtin => {
                builtin::validate(&f, cfg, instance)?;
            }
            FilterType::Jsonnet => {
                let filter_file = component.target_directory().join(&f.filter);
                if !filter_file.is_file() {
                    return Err(Error::config(format!(
                        "Jsonnet filter '{}' doesn't exist in component '{}'",
                        f.filter,
                        component.name()
                    )));
                }
            }
        }
        Ok(f)
    }

    /// Directory the filter operates on.
    pub fn output_dir(&self, cfg: &Config, instance: &str) -> PathBuf {
        cfg.inventory().output_dir().join(instance).join(&self.path)
    }

    fn run(
        &self,
        cfg: &Config,
        node: &Node,
        component: &Component,
        instance: &str,
    ) -> Result<()> {
        if !self.enabled {
            info!(
                "Skipping disabled filter {} on path {}",
                self.filter, self.path
            );
            return Ok(());
        }
        match self.filter_type {
            FilterType::Builtin => builtin::run(self, cfg, instance),
            FilterType::Jsonnet => jsonnet::run(self, cfg, node, component, instance),
        }
        .map_err(|e| Error::Filter {
            filter: self.filter.clone(),
            instance: instance.to_string(),
            message: e.to_string(),
        })
    }
}

/// Filters declared in an instance's rendered parameters.
fn inventory_filters(node: &Node) -> Vec<Value> {
    node.parameters
        .get_path(&["commodore", "postprocess", "filters"])
        .and_then(|v| v.as_list())
        .map(|list| list.to_vec())
        .unwrap_or_default()
}

/// Run all declared filters, instance by instance.
///
/// Within one instance filters run in declared order; different
/// instances' pipelines are independent of each other.
pub fn postprocess_components(
    cfg: &Config,
    inventory: &BTreeMap<String, Node>,
) -> Result<()> {
    info!("Postprocessing...");

    for (alias, cn) in cfg.get_component_aliases() {
        cfg.cancel_token().check()?;
        let component = cfg
            .get_components()
            .get(cn)
            .ok_or_else(|| Error::config(format!("component {} not registered", cn)))?;
        let Some(node) = inventory.get(alias) else {
            info!("No target exists for component {}, skipping...", cn);
            continue;
        };

        let mut filters = Vec::new();
        for fd in inventory_filters(node) {
            match Filter::from_value(cfg, component, alias, &fd) {
                Ok(f) => filters.push(f),
                Err(e) => {
                    let name = fd
                        .get_path(&["filter"])
                        .and_then(|v| v.as_str())
                        .unwrap_or("<unknown>");
                    warn!("Skipping filter '{}' with invalid definition: {}", name, e);
                }
            }
        }

        for f in filters {
            debug!("executing filter '{:?}:{}' for {}", f.filter_type, f.filter, alias);
            f.run(cfg, node, component, alias)?;
        }
    }
    Ok(())
}
