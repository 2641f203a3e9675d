//! Catalog compilation orchestration
//!
//! One compile runs through the full pipeline: fetch cluster metadata,
//! seed the inventory, resolve and fetch dependencies to a fixed point,
//! build targets, generate secret references, invoke the templating
//! engine, apply postprocessing filters, and update the catalog
//! repository.

use std::fs;

use log::info;

use crate::api::Lieutenant;
use crate::catalog::{self, CatalogUpdate};
use crate::cluster::{self, load_cluster_from_api, Cluster};
use crate::config::Config;
use crate::dependency_mgmt::{
    self, jsonnet_bundler, known_instance_names, libraries, versions,
};
use crate::engine;
use crate::error::{Error, Result};
use crate::gitrepo::GitRepo;
use crate::meta::{report_compile_metadata, CompileMeta};
use crate::postprocess;
use crate::reclass::{Reclass, Value};
use crate::refs;
use crate::target::{self, KUSTOMIZE_WRAPPER};

/// Wrapper script injected as `parameters._kustomize_wrapper`.
///
/// Components invoke it from their templates to run kustomize with the
/// output directory as first argument.
const KUSTOMIZE_WRAPPER_SCRIPT: &str = "\
#!/bin/sh
set -eu
output=\"$1\"
shift
exec kustomize build \"$@\" -o \"${output}\"
";

/// Compile the catalog for `cluster_id`.
pub fn compile(cfg: &mut Config, cluster_id: &str) -> Result<()> {
    // Refuse to push a catalog compiled from unofficial sources before
    // fetching anything.
    if cfg.push
        && (cfg.global_repo_revision_override.is_some()
            || cfg.tenant_repo_revision_override.is_some())
    {
        return Err(Error::config(
            "Cannot push a catalog compiled with repo revision overrides",
        ));
    }

    let api_url = cfg.api_url.clone().ok_or_else(|| {
        Error::config("API URL is not set, use --api-url or COMMODORE_API_URL")
    })?;
    let api = Lieutenant::new(&api_url, cfg.api_token.clone(), cfg.request_timeout)?;
    let cluster = load_cluster_from_api(&api, cluster_id, cfg.dynamic_facts.clone())?;

    clean_working_tree(cfg)?;
    cfg.inventory().ensure_dirs()?;
    write_kustomize_wrapper(cfg)?;

    info!("Updating cluster parameters...");
    cluster::update_params(cfg.inventory(), &cluster)?;

    let global_rev = fetch_global_config(cfg, &cluster)?;
    let tenant_rev = fetch_tenant_config(cfg, &cluster)?;

    target::update_target(cfg, cfg.inventory().bootstrap_target(), None)?;

    // Packages first: packages can enable components, never the other way
    // around.
    dependency_mgmt::fetch_packages(cfg)?;
    dependency_mgmt::fetch_components(cfg)?;
    target::update_target(cfg, cfg.inventory().bootstrap_target(), None)?;

    let cluster_params = dependency_mgmt::render_bootstrap(cfg, false)?.parameters;
    check_parameters_component_versions(&cluster_params)?;
    cfg.verify_component_aliases(&cluster_params)?;
    cfg.register_component_deprecations(&cluster_params);
    dependency_mgmt::register_component_instances(cfg, &cluster_params)?;
    versions::verify_version_overrides(&cluster_params, &known_instance_names(cfg))?;
    libraries::create_component_library_aliases(cfg, &cluster_params)?;

    for (alias, cn) in cfg.get_component_aliases().clone() {
        target::update_target(cfg, &alias, Some(cn.as_str()))?;
    }
    target::update_target(cfg, cfg.inventory().bootstrap_target(), None)?;

    let null = Value::Null;
    for component in cfg.get_components().values() {
        let ckey = component.parameters_key();
        let params = cluster_params.get_path(&[&ckey]).unwrap_or(&null);
        jsonnet_bundler::render_jsonnetfile_json(cfg, component, params)?;
    }
    jsonnet_bundler::fetch_jsonnet_libraries(cfg)?;

    let inv = cfg.inventory();
    let inventory = Reclass::new(&inv.classes_dir(), &inv.targets_dir()).inventory()?;
    let nodes: Vec<&crate::reclass::Node> = inventory.values().collect();
    target::verify_instance_uniqueness(&nodes)?;

    refs::update_refs(cfg, cfg.get_component_aliases(), &inventory)?;

    let catalog_repo = catalog::fetch_catalog(cfg, &cluster)?;
    catalog::clean_catalog(&catalog_repo)?;

    let targets: Vec<String> = cfg.get_component_aliases().keys().cloned().collect();
    engine::compile(cfg, &targets, &[cfg.vendor_dir()])?;

    postprocess::postprocess_components(cfg, &inventory)?;

    let meta = CompileMeta::new(cfg, global_rev.as_deref(), tenant_rev.as_deref())?;
    let outcome = catalog::update_catalog(cfg, &meta, &targets, &catalog_repo)?;

    info!("Catalog compiled!");

    if outcome == CatalogUpdate::Pushed {
        report_compile_metadata(cfg, &meta, cluster_id);
    }
    cfg.print_deprecation_notices();
    Ok(())
}

fn fetch_global_config(cfg: &mut Config, cluster: &Cluster) -> Result<Option<String>> {
    info!("Updating global config...");
    let repo = GitRepo::clone(
        cluster.global_git_repo_url()?,
        &cfg.inventory().global_config_dir(),
        cfg.author(),
    )?;
    let rev = cfg
        .global_repo_revision_override
        .clone()
        .or_else(|| cluster.global_git_repo_revision().map(str::to_string));
    if let Some(rev) = &rev {
        repo.checkout(rev)?;
    }
    cfg.register_config("global", repo);
    Ok(rev)
}

fn fetch_tenant_config(cfg: &mut Config, cluster: &Cluster) -> Result<Option<String>> {
    info!("Updating tenant config...");
    let repo = GitRepo::clone(
        cluster.config_repo_url()?,
        &cfg.inventory().tenant_config_dir(cluster.tenant_id()),
        cfg.author(),
    )?;
    let rev = cfg
        .tenant_repo_revision_override
        .clone()
        .or_else(|| cluster.config_git_repo_revision().map(str::to_string));
    if let Some(rev) = &rev {
        repo.checkout(rev)?;
    }
    cfg.register_config("tenant", repo);
    Ok(rev)
}

/// Reject the long-removed `parameters.component_versions` mechanism.
fn check_parameters_component_versions(cluster_parameters: &Value) -> Result<()> {
    let has_entries = cluster_parameters
        .get_path(&["component_versions"])
        .and_then(|v| v.as_mapping())
        .map(|m| !m.is_empty())
        .unwrap_or(false);
    if has_entries {
        return Err(Error::config(
            "Specifying component versions in parameter `component_versions` is no longer supported. Please migrate your configuration to parameter `components`.",
        ));
    }
    Ok(())
}

fn write_kustomize_wrapper(cfg: &Config) -> Result<()> {
    let path = cfg.work_dir().join(KUSTOMIZE_WRAPPER);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, KUSTOMIZE_WRAPPER_SCRIPT)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Remove per-compile state, keeping the dependency store.
///
/// Worktrees and bare clones under `dependencies/` survive so repeated
/// compiles reuse the fetched objects.
pub fn clean_working_tree(cfg: &Config) -> Result<()> {
    info!("Cleaning working tree...");
    for dir in [
        cfg.inventory().inventory_dir(),
        cfg.inventory().lib_dir(),
        cfg.inventory().output_dir(),
        cfg.catalog_dir(),
        cfg.work_dir().join(".postprocess"),
    ] {
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
    }
    Ok(())
}

/// Remove everything a compile ever created, including the dependency
/// store with its bare clones and worktrees.
///
/// Worktrees with local modifications abort the clean unless `--force` is
/// given.
pub fn clean_catalog_workspace(cfg: &Config) -> Result<()> {
    let deps_dir = cfg.inventory().dependencies_dir();
    if deps_dir.is_dir() && !cfg.force {
        for entry in fs::read_dir(&deps_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".repos" || name == "lib" || !path.is_dir() {
                continue;
            }
            if worktree_is_dirty(&path) {
                return Err(Error::DirtyWorktree { worktree: path });
            }
        }
    }

    info!("Cleaning workspace...");
    for dir in [
        cfg.inventory().inventory_dir(),
        deps_dir,
        cfg.inventory().output_dir(),
        cfg.catalog_dir(),
        cfg.vendor_dir(),
        cfg.work_dir().join(".postprocess"),
        cfg.work_dir().join("bin"),
    ] {
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
    }
    for file in [
        cfg.jsonnet_file(),
        cfg.work_dir().join("jsonnetfile.lock.json"),
    ] {
        if file.exists() {
            fs::remove_file(&file)?;
        }
    }
    Ok(())
}

fn worktree_is_dirty(path: &std::path::Path) -> bool {
    std::process::Command::new("git")
        .current_dir(path)
        .args(["status", "--porcelain"])
        .output()
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
