//! Rendering target generation
//!
//! One target file is written per component instance (plus the reserved
//! bootstrap target carrying the cluster parameters). Target classes pull
//! in, in order: the cluster parameters, every component's defaults, all
//! package classes, the global defaults entry point, the tenant's cluster
//! class, and finally the instance's component class.

use std::path::PathBuf;

use log::{info, warn};

use crate::component::component_parameters_key;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reclass::Node;
use crate::yaml;

/// Relative path of the bundled kustomize wrapper script.
pub const KUSTOMIZE_WRAPPER: &str = "bin/run-kustomize";

/// One renderer invocation transcribed from `parameters.kapitan.compile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSpecEntry {
    pub input_type: String,
    pub input_paths: Vec<String>,
    /// Output path, namespaced under `compiled/<instance>/`.
    pub output_path: String,
}

/// Compute the class list and parameters for `target`.
///
/// `component` names the component backing the target; it differs from
/// `target` for aliased instances. For the bootstrap target no component
/// is given.
pub fn render_target(
    cfg: &Config,
    target: &str,
    component: Option<&str>,
) -> Result<serde_yaml::Value> {
    let inv = cfg.inventory();
    let bootstrap = target == inv.bootstrap_target();
    let component = component.unwrap_or(target);
    if !bootstrap && !cfg.get_components().contains_key(component) {
        return Err(Error::config(format!("Target {} is not a component", target)));
    }

    let mut classes = vec![format!("params.{}", inv.bootstrap_target())];

    for cn in cfg.get_components().keys() {
        // For an aliased instance, the instance's own defaults link
        // replaces the base component's.
        let defaults_name = if cn == component && target != component {
            target
        } else {
            cn.as_str()
        };
        if inv.defaults_file(defaults_name).is_file() {
            classes.push(format!("defaults.{}", defaults_name));
        } else {
            warn!("Default file for class {} missing", cn);
        }
    }

    for pkg in cfg.get_packages().values() {
        for class in pkg.class_names()? {
            classes.push(class);
        }
    }

    classes.push("global.commodore".to_string());
    // The tenant's cluster class; resolved against the already-included
    // cluster parameters.
    classes.push("${cluster:tenant}.${cluster:name}".to_string());

    if !bootstrap {
        if !inv.component_file(target).is_file() {
            return Err(Error::config(format!(
                "Target rendering failed for {}: component class is missing",
                target
            )));
        }
        classes.push(format!("components.{}", target));
    }

    let mut parameters = serde_yaml::Mapping::new();
    parameters.insert("_instance".into(), target.into());

    if !bootstrap {
        let base_dir = cfg
            .get_components()
            .get(component)
            .expect("component is registered")
            .target_directory();
        parameters.insert(
            "_base_directory".into(),
            base_dir.to_string_lossy().to_string().into(),
        );
        parameters.insert(
            "_kustomize_wrapper".into(),
            cfg.work_dir()
                .join(KUSTOMIZE_WRAPPER)
                .to_string_lossy()
                .to_string()
                .into(),
        );
        let mut vars = serde_yaml::Mapping::new();
        vars.insert("target".into(), target.into());
        let mut kapitan = serde_yaml::Mapping::new();
        kapitan.insert("vars".into(), serde_yaml::Value::Mapping(vars));
        parameters.insert("kapitan".into(), serde_yaml::Value::Mapping(kapitan));
    }

    // Aliased instances route the component's parameters key through the
    // instance key, so instance-specific overrides land in the component's
    // configuration.
    if component != target {
        let ckey = component_parameters_key(component);
        let tkey = component_parameters_key(target);
        parameters.insert(
            tkey.clone().into(),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        );
        parameters.insert(ckey.into(), format!("${{{}}}", tkey).into());
    }

    let mut root = serde_yaml::Mapping::new();
    root.insert(
        "classes".into(),
        serde_yaml::Value::Sequence(classes.into_iter().map(Into::into).collect()),
    );
    root.insert("parameters".into(), serde_yaml::Value::Mapping(parameters));
    Ok(serde_yaml::Value::Mapping(root))
}

/// Write the target file for `target`.
pub fn update_target(cfg: &Config, target: &str, component: Option<&str>) -> Result<()> {
    info!("Updating target for {}...", target);
    let data = render_target(cfg, target, component)?;
    yaml::dump(&data, &cfg.inventory().target_file(target))
}

/// Extract the render spec from a rendered instance node.
///
/// Output paths are namespaced by the instance name; the engine writes
/// under `compiled/<instance>/<output_path>`.
pub fn render_spec(node: &Node) -> Vec<RenderSpecEntry> {
    let mut entries = Vec::new();
    let Some(compile) = node
        .parameters
        .get_path(&["kapitan", "compile"])
        .and_then(|v| v.as_list())
    else {
        return entries;
    };
    for entry in compile {
        let Some(map) = entry.as_mapping() else {
            continue;
        };
        let input_type = map
            .get("input_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let input_paths = map
            .get("input_paths")
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let raw_output = map
            .get("output_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        entries.push(RenderSpecEntry {
            input_type,
            input_paths,
            output_path: PathBuf::from(&node.name)
                .join(raw_output)
                .to_string_lossy()
                .to_string(),
        });
    }
    entries
}

/// Instance uniqueness across all targets: no two targets may share an
/// `_instance` value. Target files are keyed by instance name, so this
/// reduces to checking the alias map for duplicate keys, which the alias
/// discovery already guarantees; this helper double-checks rendered nodes.
pub fn verify_instance_uniqueness(nodes: &[&Node]) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for node in nodes {
        let instance = node
            .parameters
            .get_path(&["_instance"])
            .and_then(|v| v.as_str())
            .unwrap_or(&node.name)
            .to_string();
        if !seen.insert(instance.clone()) {
            return Err(Error::DuplicateInstance {
                alias: instance,
                components: "targets".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclass::value::Value as V;

    fn node(name: &str, yaml: &str) -> Node {
        Node {
            name: name.to_string(),
            classes: Vec::new(),
            applications: Vec::new(),
            parameters: V::from_yaml(&serde_yaml::from_str(yaml).unwrap()).unwrap(),
        }
    }

    #[test]
    fn test_render_spec_namespaces_output_path() {
        let n = node(
            "nfs-b",
            r#"
kapitan:
  compile:
    - input_type: jsonnet
      input_paths:
        - ${_base_directory}/component/main.jsonnet
      output_path: nfs
"#,
        );
        let spec = render_spec(&n);
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0].input_type, "jsonnet");
        assert_eq!(spec[0].output_path, "nfs-b/nfs");
    }

    #[test]
    fn test_render_spec_empty_without_compile() {
        let n = node("c1", "{}");
        assert!(render_spec(&n).is_empty());
    }

    #[test]
    fn test_verify_instance_uniqueness() {
        let a = node("a", "_instance: a\n");
        let b = node("b", "_instance: b\n");
        assert!(verify_instance_uniqueness(&[&a, &b]).is_ok());

        let b_dup = node("b", "_instance: a\n");
        assert!(verify_instance_uniqueness(&[&a, &b_dup]).is_err());
    }
}
