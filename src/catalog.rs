//! Catalog commit pipeline
//!
//! The compiled manifests are copied into the per-cluster catalog
//! repository, diffed against its current revision with optional
//! migration-aware noise suppression, committed with generated metadata,
//! and pushed. The catalog working copy is always preserved; a failed
//! push leaves everything on disk for inspection.

use std::fs;
use std::path::Path;

use log::{debug, info};
use walkdir::WalkDir;

use crate::cluster::Cluster;
use crate::config::Config;
use crate::diff::{colorize_diff_line, diff_file};
use crate::error::{Error, Result};
use crate::gitrepo::{GitRepo, StagedChange};
use crate::inventory::rm_tree_contents;
use crate::meta::CompileMeta;

/// Clone the cluster catalog repository into `catalog/`.
pub fn fetch_catalog(cfg: &Config, cluster: &Cluster) -> Result<GitRepo> {
    info!("Updating cluster catalog...");
    let repo_url = cluster.catalog_repo_url()?;
    debug!("cloning cluster catalog {}", repo_url);
    GitRepo::clone(repo_url, &cfg.catalog_dir(), cfg.author())
}

/// Remove the current contents of the catalog's `manifests/` directory.
pub fn clean_catalog(repo: &GitRepo) -> Result<()> {
    info!("Cleaning catalog repository...");
    let catalogdir = repo.working_tree_dir().join("manifests");
    if catalogdir.is_dir() {
        rm_tree_contents(&catalogdir)
    } else {
        debug!("converting old-style catalog");
        rm_tree_contents(repo.working_tree_dir())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::config("copy source escaped its root"))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Result of updating the catalog worktree.
#[derive(Debug, PartialEq, Eq)]
pub enum CatalogUpdate {
    /// Nothing material changed; no commit was made.
    Unchanged,
    /// Changes were committed and pushed.
    Pushed,
    /// Changes exist but were not pushed (missing `--push` or declined).
    NotPushed,
}

/// Copy compiled output into the catalog, diff, and commit/push.
pub fn update_catalog(
    cfg: &Config,
    meta: &CompileMeta,
    targets: &[String],
    repo: &GitRepo,
) -> Result<CatalogUpdate> {
    info!("Updating catalog repository...");
    cfg.cancel_token().check()?;

    let catalogdir = repo.working_tree_dir().join("manifests");
    for target in targets {
        let src = cfg.inventory().output_dir().join(target);
        if src.is_dir() {
            copy_tree(&src, &catalogdir.join(target))?;
        }
    }

    let changes = repo.stage_all()?;
    let mut material = false;
    let mut difftext: Vec<String> = Vec::new();

    for change in &changes {
        match change {
            StagedChange::Added { path } => {
                material = true;
                difftext.push(console::style(format!("Added file {}", path)).green().to_string());
            }
            StagedChange::Deleted { path } => {
                material = true;
                difftext.push(console::style(format!("Deleted file {}", path)).red().to_string());
            }
            StagedChange::Renamed { from, to } => {
                material = true;
                difftext.push(
                    console::style(format!("Renamed file {} => {}", from, to))
                        .yellow()
                        .to_string(),
                );
            }
            StagedChange::Modified { path } => {
                let before = repo.show_head(path).unwrap_or_default();
                let after = repo.read_worktree(path)?;
                let d = diff_file(&before, &after, path, path, cfg.migration)?;
                if !d.suppressed {
                    material = true;
                    difftext.extend(d.text.lines().map(colorize_diff_line));
                }
            }
        }
    }

    if material {
        println!(" > Changes:");
        for line in &difftext {
            println!("     {}", line);
        }
    } else {
        println!(" > No changes.");
    }

    let commit_message = meta.render_catalog_commit_message();
    debug!("commit message will be:\n{}", commit_message);

    if !material {
        info!("Skipping commit+push to catalog...");
        return Ok(CatalogUpdate::Unchanged);
    }
    push_catalog(cfg, repo, &commit_message)
}

/// Commit and push the catalog if the conditions to push are met.
///
/// With `--interactive`, the user confirms the push after seeing the
/// diff; without `--push` the commit is skipped entirely.
fn push_catalog(cfg: &Config, repo: &GitRepo, commit_message: &str) -> Result<CatalogUpdate> {
    let mut push = cfg.push;
    if cfg.interactive && cfg.push {
        push = dialoguer::Confirm::new()
            .with_prompt(" > Should the push be done?")
            .default(false)
            .interact()
            .unwrap_or(false);
    }

    if !push {
        info!("Skipping commit+push to catalog...");
        info!("Use flag --push to commit and push the catalog repo");
        info!("Add flag --interactive to show the diff and decide on the push");
        return Ok(CatalogUpdate::NotPushed);
    }

    info!("Commiting changes...");
    repo.commit(commit_message)?;
    info!("Pushing catalog to remote...");
    repo.push().map_err(|e| match e {
        Error::CatalogPush { message } => Error::CatalogPush { message },
        other => Error::CatalogPush {
            message: other.to_string(),
        },
    })?;
    Ok(CatalogUpdate::Pushed)
}
