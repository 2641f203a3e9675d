//! Jsonnet dependency fetching via jsonnet-bundler
//!
//! Each component is wired into `vendor/` as a local jsonnet-bundler
//! dependency, components' own `jsonnetfile.json` manifests pull in their
//! third-party libraries, and `jb install` materializes the lot. The
//! `kube.libsonnet` baseline shipped through kube-libsonnet is linked to a
//! fixed location afterwards so it always wins over any copy a component
//! fetched itself.

use std::fs;
use std::path::Path;
use std::process::Command;

use log::{debug, warn};
use serde_json::json;

use crate::component::Component;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::relsymlink;
use crate::jsonnet::JsonnetEvaluator;
use crate::reclass::Value;

const KUBE_LIBSONNET_REMOTE: &str = "https://github.com/bitnami-labs/kube-libsonnet";
const KUBE_LIBSONNET_VERSION: &str = "v1.19.0";

/// Local-directory dependencies for all fetched components plus the shared
/// `lib/` directory.
pub fn jsonnet_dependencies(cfg: &Config) -> Vec<serde_json::Value> {
    let mut dependencies = Vec::new();
    for component in cfg.get_components().values() {
        dependencies.push(local_dependency(cfg, &component.target_directory()));
    }
    // Declaring `lib` as a local dependency is just a cheap way to get a
    // symlink to the directory into vendor/.
    dependencies.push(local_dependency(cfg, &cfg.inventory().lib_dir()));
    dependencies
}

fn local_dependency(cfg: &Config, dir: &Path) -> serde_json::Value {
    let rel = dir
        .strip_prefix(cfg.work_dir())
        .unwrap_or(dir)
        .to_string_lossy()
        .to_string();
    json!({"source": {"local": {"directory": rel}}})
}

/// Write `jsonnetfile.json` with the provided dependency list.
pub fn write_jsonnetfile(file: &Path, deps: &[serde_json::Value]) -> Result<()> {
    let data = json!({
        "version": 1,
        "dependencies": deps,
        "legacyImports": true,
    });
    let mut text = serde_json::to_string_pretty(&data)?;
    text.push('\n');
    fs::write(file, text)?;
    Ok(())
}

/// Ensure the kube-libsonnet baseline is in the dependency list.
fn inject_essential_libraries(file: &Path) -> Result<()> {
    let mut data: serde_json::Value = serde_json::from_str(&fs::read_to_string(file)?)?;
    let deps = data
        .get_mut("dependencies")
        .and_then(|d| d.as_array_mut())
        .ok_or_else(|| Error::config("jsonnetfile.json has no dependencies list"))?;
    let has_kube = deps.iter().any(|dep| {
        dep.pointer("/source/git/remote")
            .and_then(|r| r.as_str())
            .map(|r| r.contains("kube-libsonnet"))
            .unwrap_or(false)
    });
    if !has_kube {
        deps.push(json!({
            "source": {"git": {"remote": KUBE_LIBSONNET_REMOTE}},
            "version": KUBE_LIBSONNET_VERSION,
        }));
    }
    let mut text = serde_json::to_string_pretty(&data)?;
    text.push('\n');
    fs::write(file, text)?;
    Ok(())
}

/// Fetch all Jsonnet dependencies with `jb install`.
pub fn fetch_jsonnet_libraries(cfg: &Config) -> Result<()> {
    let jsonnetfile = cfg.jsonnet_file();
    write_jsonnetfile(&jsonnetfile, &jsonnet_dependencies(cfg))?;
    inject_essential_libraries(&jsonnetfile)?;

    // Stale lock files would pin dependencies to outdated revisions.
    let lock_file = cfg.work_dir().join("jsonnetfile.lock.json");
    if lock_file.exists() {
        fs::remove_file(&lock_file)?;
    }

    cfg.cancel_token().check()?;
    debug!("running {} install", cfg.jb_command);
    let output = Command::new(&cfg.jb_command)
        .arg("install")
        .current_dir(cfg.work_dir())
        .output()
        .map_err(|e| {
            Error::config(format!(
                "the jsonnet-bundler executable `{}` could not be found: {}",
                cfg.jb_command, e
            ))
        })?;
    if !output.status.success() {
        return Err(Error::config(format!(
            "jsonnet-bundler exited with error:\n{}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    link_kube_libsonnet(cfg)
}

/// Link the fetched kube-libsonnet baseline to `vendor/lib/kube.libsonnet`.
///
/// The link target is fixed so imports of `lib/kube.libsonnet` always
/// resolve to this copy, independent of what else jb fetched into vendor/.
fn link_kube_libsonnet(cfg: &Config) -> Result<()> {
    let kube = cfg.vendor_dir().join("kube-libsonnet").join("kube.libsonnet");
    if !kube.is_file() {
        warn!(
            "kube.libsonnet not found at {}, skipping baseline link",
            kube.display()
        );
        return Ok(());
    }
    let lib_dir = cfg.vendor_dir().join("lib");
    fs::create_dir_all(&lib_dir)?;
    relsymlink(&kube, &lib_dir, Some("kube.libsonnet"))
}

/// Render a component's `jsonnetfile.jsonnet` to `jsonnetfile.json`.
///
/// Component parameters under `jsonnetfile_parameters` are bound as
/// jsonnet ext-vars.
pub fn render_jsonnetfile_json(
    cfg: &Config,
    component: &Component,
    component_params: &Value,
) -> Result<()> {
    let dir = component.target_directory();
    let jsonnetfile_jsonnet = dir.join("jsonnetfile.jsonnet");
    if !jsonnetfile_jsonnet.is_file() {
        return Ok(());
    }
    if dir.join("jsonnetfile.json").is_file() {
        warn!(
            "Component {} repo contains both jsonnetfile.json and jsonnetfile.jsonnet, continuing with jsonnetfile.jsonnet",
            component.name()
        );
    }

    let mut evaluator = JsonnetEvaluator::new(&cfg.jsonnet_command);
    if let Some(params) = component_params
        .get_path(&["jsonnetfile_parameters"])
        .and_then(|v| v.as_mapping())
    {
        for (k, v) in params {
            evaluator = evaluator.ext_str(k, &v.to_scalar_string()?);
        }
    }
    let output = evaluator.eval_file(&jsonnetfile_jsonnet)?;
    let mut text = output;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    fs::write(dir.join("jsonnetfile.json"), text)?;
    Ok(())
}
