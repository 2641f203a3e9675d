//! User-supplied jsonnet postprocessing filters
//!
//! Jsonnet filters ship with the component and are evaluated through the
//! external jsonnet evaluator. The filter receives ext-vars `target`,
//! `component`, and `output_path`, plus its `filterargs` as string
//! ext-vars; the rendered inventory parameters and the parsed contents of
//! the files under the filter path are bound as ext-code variables
//! `inventory` and `input_files`. The filter's JSON output is a map of
//! file name to content, written back as YAML under the filter path.

use std::fs;
use std::path::PathBuf;

use crate::component::Component;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::jsonnet::JsonnetEvaluator;
use crate::reclass::Node;
use crate::yaml;

use super::Filter;

/// Scratch directory for per-instance filter inputs.
fn scratch_dir(cfg: &Config, instance: &str) -> PathBuf {
    cfg.work_dir().join(".postprocess").join(instance)
}

/// Run a jsonnet filter for one instance.
pub fn run(
    f: &Filter,
    cfg: &Config,
    node: &Node,
    component: &Component,
    instance: &str,
) -> Result<()> {
    let filter_file = component.target_directory().join(&f.filter);
    let output_dir = f.output_dir(cfg, instance);
    let rel_output = PathBuf::from("compiled").join(instance).join(&f.path);

    let scratch = scratch_dir(cfg, instance);
    fs::create_dir_all(&scratch)?;

    let inventory_json = scratch.join("inventory.json");
    let params: serde_json::Value = serde_json::to_value(node.parameters.to_yaml())?;
    fs::write(&inventory_json, serde_json::to_string(&params)?)?;

    let input_files_json = scratch.join("input_files.json");
    fs::write(
        &input_files_json,
        serde_json::to_string(&collect_input_files(f, cfg, instance)?)?,
    )?;

    let mut evaluator = JsonnetEvaluator::new(&cfg.jsonnet_command)
        .search_path(cfg.work_dir())
        .search_path(&cfg.inventory().lib_dir())
        .search_path(&component.target_directory())
        .ext_str("target", instance)
        .ext_str("component", component.name())
        .ext_str("output_path", &rel_output.to_string_lossy())
        .ext_code_file("inventory", &inventory_json)
        .ext_code_file("input_files", &input_files_json);
    for (k, v) in &f.filterargs {
        evaluator = evaluator.ext_str(k, &v.to_scalar_string()?);
    }

    let output = evaluator.eval_file(&filter_file)?;
    let out_objs: serde_json::Value = serde_json::from_str(&output)?;
    let map = out_objs
        .as_object()
        .ok_or_else(|| Error::config("jsonnet filter did not return an object"))?;

    for (outobj, outcontents) in map {
        let outpath = output_dir.join(format!("{}.yaml", outobj));
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        match outcontents {
            serde_json::Value::Array(items) => {
                let docs: Vec<serde_yaml::Value> = items
                    .iter()
                    .map(|item| serde_yaml::to_value(item).map_err(Error::from))
                    .collect::<Result<_>>()?;
                yaml::dump_all(&docs, &outpath)?;
            }
            other => {
                yaml::dump(&serde_yaml::to_value(other)?, &outpath)?;
            }
        }
    }
    Ok(())
}

/// Parse every YAML file under the filter path into JSON documents.
fn collect_input_files(f: &Filter, cfg: &Config, instance: &str) -> Result<serde_json::Value> {
    let dir = f.output_dir(cfg, instance);
    let mut files = serde_json::Map::new();
    if !dir.is_dir() {
        return Ok(serde_json::Value::Object(files));
    }
    let mut entries: Vec<_> = walkdir::WalkDir::new(&dir)
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
    entries.sort();
    for path in entries {
        let rel = path
            .strip_prefix(&dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        let docs = yaml::load_all(&path)?;
        let json_docs: Vec<serde_json::Value> = docs
            .iter()
            .map(|d| serde_json::to_value(d).map_err(Error::from))
            .collect::<Result<_>>()?;
        files.insert(rel, serde_json::Value::Array(json_docs));
    }
    Ok(serde_json::Value::Object(files))
}
