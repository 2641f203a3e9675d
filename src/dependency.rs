//! Shared dependency repositories
//!
//! Components, component instances, and packages that point at the same
//! remote share a single bare clone in the dependency store. Each bare
//! clone is wrapped in a [`MultiDependency`] which tracks the worktrees
//! registered against it and serializes Git operations on the clone.
//!
//! A process-wide [`DependencyRegistry`] keyed by canonical remote URL
//! hands out `Arc<MultiDependency>` handles so concurrent fetches of
//! different dependencies never race on the same object store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::gitrepo::{dependency_key, BareRepo};

#[derive(Debug)]
struct DepState {
    repo: Option<BareRepo>,
    components: HashMap<String, PathBuf>,
    packages: HashMap<String, PathBuf>,
}

/// A bare clone shared by any number of component/package worktrees.
#[derive(Debug)]
pub struct MultiDependency {
    url: String,
    bare_dir: PathBuf,
    state: Mutex<DepState>,
}

impl MultiDependency {
    fn new(url: String, bare_dir: PathBuf) -> Self {
        MultiDependency {
            url,
            bare_dir,
            state: Mutex::new(DepState {
                repo: None,
                components: HashMap::new(),
                packages: HashMap::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bare_dir(&self) -> &Path {
        &self.bare_dir
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DepState>> {
        self.state
            .lock()
            .map_err(|_| Error::config("dependency lock poisoned"))
    }

    /// Register the worktree directory for component `name`.
    pub fn register_component(&self, name: &str, target_dir: &Path) -> Result<()> {
        let mut state = self.lock()?;
        if state.components.contains_key(name) {
            return Err(Error::config(format!(
                "component {} already registered on dependency {}",
                name, self.url
            )));
        }
        state.components.insert(name.to_string(), target_dir.to_path_buf());
        Ok(())
    }

    pub fn deregister_component(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .components
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::config(format!("can't deregister unknown component {}", name)))
    }

    pub fn component_dir(&self, name: &str) -> Option<PathBuf> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.components.get(name).cloned())
    }

    /// Register the worktree directory for package `name`.
    pub fn register_package(&self, name: &str, target_dir: &Path) -> Result<()> {
        let mut state = self.lock()?;
        if state.packages.contains_key(name) {
            return Err(Error::config(format!(
                "package {} already registered on dependency {}",
                name, self.url
            )));
        }
        state.packages.insert(name.to_string(), target_dir.to_path_buf());
        Ok(())
    }

    pub fn package_dir(&self, name: &str) -> Option<PathBuf> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.packages.get(name).cloned())
    }

    /// Create or advance the worktree for component `name` at `revision`.
    ///
    /// The first checkout against this dependency clones or refreshes the
    /// bare repository; later checkouts reuse the fetched state so the
    /// remote is contacted at most once per compile.
    pub fn checkout_component(&self, name: &str, revision: &str, force: bool) -> Result<PathBuf> {
        let mut state = self.lock()?;
        let target = state.components.get(name).cloned().ok_or_else(|| {
            Error::config(format!("can't checkout unknown component {}", name))
        })?;
        if state.repo.is_none() {
            state.repo = Some(BareRepo::ensure(&self.url, &self.bare_dir)?);
        }
        let repo = state.repo.as_ref().unwrap();
        repo.ensure_worktree(&target, revision, force)
    }

    /// Create or advance the worktree for package `name` at `revision`.
    pub fn checkout_package(&self, name: &str, revision: &str, force: bool) -> Result<PathBuf> {
        let mut state = self.lock()?;
        let target = state.packages.get(name).cloned().ok_or_else(|| {
            Error::config(format!("can't checkout unknown package {}", name))
        })?;
        if state.repo.is_none() {
            state.repo = Some(BareRepo::ensure(&self.url, &self.bare_dir)?);
        }
        let repo = state.repo.as_ref().unwrap();
        repo.ensure_worktree(&target, revision, force)
    }

    /// True if any worktree has been registered against this dependency.
    pub fn has_checkouts(&self) -> bool {
        self.state
            .lock()
            .map(|s| !s.components.is_empty() || !s.packages.is_empty())
            .unwrap_or(false)
    }
}

/// Process-wide map of canonical remote URL to shared bare clone.
#[derive(Clone)]
pub struct DependencyRegistry {
    dependencies_dir: PathBuf,
    repos: Arc<Mutex<HashMap<String, Arc<MultiDependency>>>>,
}

impl DependencyRegistry {
    pub fn new(dependencies_dir: PathBuf) -> Self {
        DependencyRegistry {
            dependencies_dir,
            repos: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up or create the shared dependency for `repo_url`.
    ///
    /// The registry lock only guards the map itself; Git operations run
    /// under the per-dependency lock so two different remotes can be
    /// materialized concurrently.
    pub fn register(&self, repo_url: &str) -> Result<Arc<MultiDependency>> {
        let key = dependency_key(repo_url)?;
        let mut repos = self
            .repos
            .lock()
            .map_err(|_| Error::config("dependency registry lock poisoned"))?;
        let dep = repos.entry(key.clone()).or_insert_with(|| {
            Arc::new(MultiDependency::new(
                repo_url.to_string(),
                self.dependencies_dir.join(".repos").join(&key),
            ))
        });
        Ok(Arc::clone(dep))
    }

    /// All dependencies registered so far, keyed by canonical URL key.
    pub fn registered(&self) -> Vec<Arc<MultiDependency>> {
        self.repos
            .lock()
            .map(|repos| repos.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_deduplicates_by_canonical_url() {
        let registry = DependencyRegistry::new(PathBuf::from("/work/dependencies"));
        let a = registry.register("https://github.com/org/repo.git").unwrap();
        let b = registry.register("https://GitHub.com/org/repo.git").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.registered().len(), 1);
    }

    #[test]
    fn test_registry_separates_distinct_remotes() {
        let registry = DependencyRegistry::new(PathBuf::from("/work/dependencies"));
        let a = registry.register("https://github.com/org/one.git").unwrap();
        let b = registry.register("https://github.com/org/two.git").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_bare_dir_layout() {
        let registry = DependencyRegistry::new(PathBuf::from("/work/dependencies"));
        let dep = registry.register("https://github.com/org/repo.git").unwrap();
        assert_eq!(
            dep.bare_dir(),
            Path::new("/work/dependencies/.repos/github.com/org/repo.git")
        );
    }

    #[test]
    fn test_component_registration() {
        let dep = MultiDependency::new(
            "https://example.com/c.git".to_string(),
            PathBuf::from("/work/dependencies/.repos/example.com/c.git"),
        );
        assert!(!dep.has_checkouts());
        dep.register_component("c", Path::new("/work/dependencies/c"))
            .unwrap();
        assert!(dep.has_checkouts());
        assert!(dep.register_component("c", Path::new("/elsewhere")).is_err());
        assert_eq!(
            dep.component_dir("c"),
            Some(PathBuf::from("/work/dependencies/c"))
        );
        dep.deregister_component("c").unwrap();
        assert!(dep.deregister_component("c").is_err());
    }
}
