//! Builtin postprocessing filters
//!
//! Builtin filters are implemented natively; they patch the engine's YAML
//! output in place. Currently the only builtin is `helm_namespace`, which
//! sets `metadata.namespace` on every object under the filter path,
//! optionally creating the Namespace object itself.

use std::path::Path;

use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::yaml;

use super::Filter;

/// Validate a builtin filter definition.
pub fn validate(f: &Filter, cfg: &Config, instance: &str) -> Result<()> {
    if f.filter != "helm_namespace" {
        return Err(Error::config(format!(
            "Unknown builtin filter: {}",
            f.filter
        )));
    }
    if f.filterargs.is_empty() {
        return Err(Error::config(
            "Builtin filter is missing required key 'filterargs'",
        ));
    }
    if !f.output_dir(cfg, instance).is_dir() {
        return Err(Error::config(
            "Builtin filter called on path which doesn't exist",
        ));
    }
    Ok(())
}

/// Run a builtin filter.
pub fn run(f: &Filter, cfg: &Config, instance: &str) -> Result<()> {
    match f.filter.as_str() {
        "helm_namespace" => helm_namespace(f, cfg, instance),
        other => Err(Error::config(format!("Unknown builtin filter: {}", other))),
    }
}

/// `(kind, name)` tuples excluded from namespace patching.
fn exclude_objects(f: &Filter) -> Vec<(String, String)> {
    f.filterargs
        .get("exclude_objects")
        .and_then(|v| v.as_list())
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    let map = entry.as_mapping()?;
                    Some((
                        map.get("kind")?.as_str()?.to_string(),
                        map.get("name")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn helm_namespace(f: &Filter, cfg: &Config, instance: &str) -> Result<()> {
    let namespace = f
        .filterargs
        .get("namespace")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::config(
                "Builtin filter 'helm_namespace': filter argument 'namespace' is required",
            )
        })?
        .to_string();
    let create_namespace = f
        .filterargs
        .get("create_namespace")
        .map(|v| v.as_bool().unwrap_or(v.as_str() == Some("true")))
        .unwrap_or(false);
    let excluded = exclude_objects(f);
    let dir = f.output_dir(cfg, instance);

    let mut files: Vec<_> = WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    for file in files {
        patch_file(&file, &namespace, &excluded)?;
    }

    if create_namespace {
        write_namespace_object(&dir, &namespace)?;
    }
    Ok(())
}

fn patch_file(file: &Path, namespace: &str, excluded: &[(String, String)]) -> Result<()> {
    let docs = yaml::load_all(file)?;
    let patched: Vec<serde_yaml::Value> = docs
        .into_iter()
        .map(|doc| patch_object(doc, namespace, excluded))
        .collect();
    yaml::dump_all(&patched, file)
}

fn patch_object(
    mut doc: serde_yaml::Value,
    namespace: &str,
    excluded: &[(String, String)],
) -> serde_yaml::Value {
    let Some(map) = doc.as_mapping_mut() else {
        return doc;
    };
    let kind = map
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let name = map
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if excluded.iter().any(|(k, n)| *k == kind && *n == name) {
        return doc;
    }
    if !map.contains_key("metadata") {
        map.insert(
            "metadata".into(),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        );
    }
    if let Some(meta) = map.get_mut("metadata").and_then(|m| m.as_mapping_mut()) {
        meta.insert("namespace".into(), namespace.into());
    }
    doc
}

fn write_namespace_object(dir: &Path, namespace: &str) -> Result<()> {
    let mut metadata = serde_yaml::Mapping::new();
    metadata.insert("name".into(), namespace.into());
    let mut obj = serde_yaml::Mapping::new();
    obj.insert("apiVersion".into(), "v1".into());
    obj.insert("kind".into(), "Namespace".into());
    obj.insert("metadata".into(), serde_yaml::Value::Mapping(metadata));
    yaml::dump(
        &serde_yaml::Value::Mapping(obj),
        &dir.join("00_namespace.yaml"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::FilterType;
    use crate::reclass::value::Value as V;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn filter(args_yaml: &str) -> Filter {
        let args = V::from_yaml(&serde_yaml::from_str(args_yaml).unwrap()).unwrap();
        let filterargs: BTreeMap<String, V> = args
            .as_mapping()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Filter {
            filter_type: FilterType::Builtin,
            filter: "helm_namespace".to_string(),
            path: "c1".to_string(),
            enabled: true,
            filterargs,
        }
    }

    #[test]
    fn test_helm_namespace_patches_objects() {
        let tmp = tempdir().unwrap();
        let cfg = Config::new(tmp.path());
        let dir = tmp.path().join("compiled/c1/c1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n",
        )
        .unwrap();

        let f = filter("namespace: syn-c1\n");
        run(&f, &cfg, "c1").unwrap();

        let doc = crate::yaml::load(&dir.join("deployment.yaml")).unwrap();
        assert_eq!(doc["metadata"]["namespace"], "syn-c1");
    }

    #[test]
    fn test_helm_namespace_skips_excluded() {
        let tmp = tempdir().unwrap();
        let cfg = Config::new(tmp.path());
        let dir = tmp.path().join("compiled/c1/c1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("objects.yaml"),
            "kind: ClusterRole\nmetadata:\n  name: admin\n---\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )
        .unwrap();

        let f = filter(
            "namespace: syn-c1\nexclude_objects:\n  - kind: ClusterRole\n    name: admin\n",
        );
        run(&f, &cfg, "c1").unwrap();

        let docs = crate::yaml::load_all(&dir.join("objects.yaml")).unwrap();
        assert!(docs[0]["metadata"].get("namespace").is_none());
        assert_eq!(docs[1]["metadata"]["namespace"], "syn-c1");
    }

    #[test]
    fn test_helm_namespace_creates_namespace_object() {
        let tmp = tempdir().unwrap();
        let cfg = Config::new(tmp.path());
        let dir = tmp.path().join("compiled/c1/c1");
        fs::create_dir_all(&dir).unwrap();

        let f = filter("namespace: syn-c1\ncreate_namespace: true\n");
        run(&f, &cfg, "c1").unwrap();

        let ns = crate::yaml::load(&dir.join("00_namespace.yaml")).unwrap();
        assert_eq!(ns["kind"], "Namespace");
        assert_eq!(ns["metadata"]["name"], "syn-c1");
    }

    #[test]
    fn test_helm_namespace_accepts_string_create_namespace() {
        let tmp = tempdir().unwrap();
        let cfg = Config::new(tmp.path());
        let dir = tmp.path().join("compiled/c1/c1");
        fs::create_dir_all(&dir).unwrap();

        let f = filter("namespace: syn-c1\ncreate_namespace: 'true'\n");
        run(&f, &cfg, "c1").unwrap();
        assert!(dir.join("00_namespace.yaml").is_file());
    }

    #[test]
    fn test_namespace_required() {
        let tmp = tempdir().unwrap();
        let cfg = Config::new(tmp.path());
        fs::create_dir_all(tmp.path().join("compiled/c1/c1")).unwrap();
        let f = filter("create_namespace: true\n");
        let err = run(&f, &cfg, "c1").unwrap_err();
        assert!(err.to_string().contains("'namespace' is required"));
    }
}
