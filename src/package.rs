//! Configuration package model
//!
//! A package is a versioned Git repository bundling inventory classes and
//! no templates. Package classes are exposed in the hierarchy as
//! `<pkg-name>.<relative-class-path>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::dependency::MultiDependency;
use crate::error::{Error, Result};

/// A package checkout.
pub struct Package {
    name: String,
    dependency: Arc<MultiDependency>,
    version: String,
    sub_path: String,
}

impl Package {
    pub fn new(
        name: &str,
        dependency: Arc<MultiDependency>,
        work_dir: &Path,
        version: &str,
        sub_path: &str,
    ) -> Result<Self> {
        let target_dir = package_dependency_dir(work_dir, name);
        dependency.register_package(name, &target_dir)?;
        Ok(Package {
            name: name.to_string(),
            dependency,
            version: version.to_string(),
            sub_path: sub_path.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repo_url(&self) -> &str {
        self.dependency.url()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sub_path(&self) -> &str {
        &self.sub_path
    }

    pub fn dependency(&self) -> &Arc<MultiDependency> {
        &self.dependency
    }

    /// The directory holding the package's class files.
    pub fn target_dir(&self) -> Result<PathBuf> {
        let base = self.dependency.package_dir(&self.name).ok_or_else(|| {
            Error::config(format!("package {} has no registered checkout", self.name))
        })?;
        if self.sub_path.is_empty() {
            Ok(base)
        } else {
            Ok(base.join(&self.sub_path))
        }
    }

    /// Check out the package worktree at its pinned version.
    pub fn checkout(&self, force: bool) -> Result<PathBuf> {
        self.dependency
            .checkout_package(&self.name, &self.version, force)
    }

    /// Class names provided by this package, relative to the package root.
    ///
    /// A file `<root>/monitoring/alerts.yml` of package `p` is exposed as
    /// class `p.monitoring.alerts`.
    pub fn class_names(&self) -> Result<Vec<String>> {
        let root = self.target_dir()?;
        let mut classes = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            let rel = path.strip_prefix(&root).unwrap_or(path);
            if rel.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.')) {
                continue;
            }
            let mut parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            if let Some(last) = parts.last_mut() {
                *last = last.trim_end_matches(".yml").to_string();
            }
            classes.push(format!("{}.{}", self.name, parts.join(".")));
        }
        classes.sort();
        Ok(classes)
    }
}

/// Packages are checked out under `dependencies/pkg.<name>` so they can
/// never collide with component checkouts.
pub fn package_dependency_dir(work_dir: &Path, pname: &str) -> PathBuf {
    work_dir.join("dependencies").join(format!("pkg.{}", pname))
}

/// Strip the `pkg.` prefix from an applications entry naming a package.
pub fn package_name(application: &str) -> Option<&str> {
    application.strip_prefix("pkg.")
}
