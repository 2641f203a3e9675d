//! Component model
//!
//! A component is a versioned Git repository bundling templates, a
//! component class (`class/<name>.yml`), default parameters
//! (`class/defaults.yml`), optional template libraries (`lib/`), and
//! optional Jsonnet dependencies. Components are checked out as worktrees
//! of a shared bare clone; aliased instances may check out their own
//! worktree at a different revision (multi-version).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::dependency::MultiDependency;
use crate::error::{Error, Result};

/// Component metadata advertised under `parameters.<component>._metadata`.
///
/// The key is rendered as a constant so the hierarchy cannot override what
/// a component ships.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComponentMetadata {
    pub multi_instance: bool,
    pub multi_version: bool,
    pub library_aliases: std::collections::BTreeMap<String, String>,
    pub deprecated: bool,
    pub replaced_by: Option<String>,
    pub replaces: Option<String>,
    pub deprecation_notice: Option<String>,
}

#[derive(Debug, Clone)]
struct AliasInfo {
    version: String,
    sub_path: String,
    dependency: Arc<MultiDependency>,
}

/// A component checkout plus its registered instances.
pub struct Component {
    name: String,
    dependency: Arc<MultiDependency>,
    version: String,
    sub_path: String,
    directory: PathBuf,
    work_dir: PathBuf,
    aliases: std::collections::BTreeMap<String, AliasInfo>,
}

impl Component {
    pub fn new(
        name: &str,
        dependency: Arc<MultiDependency>,
        work_dir: &Path,
        version: &str,
        sub_path: &str,
    ) -> Result<Self> {
        let directory = component_dir(work_dir, name);
        dependency.register_component(name, &directory)?;
        let mut aliases = std::collections::BTreeMap::new();
        // The identity instance `c as c` always exists.
        aliases.insert(
            name.to_string(),
            AliasInfo {
                version: version.to_string(),
                sub_path: sub_path.to_string(),
                dependency: Arc::clone(&dependency),
            },
        );
        Ok(Component {
            name: name.to_string(),
            dependency,
            version: version.to_string(),
            sub_path: sub_path.to_string(),
            directory,
            work_dir: work_dir.to_path_buf(),
            aliases,
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

    /// The base checkout directory (including `sub_path` if set).
    pub fn target_directory(&self) -> PathBuf {
        self.alias_directory(&self.name)
            .expect("identity alias is always registered")
    }

    /// Checkout directory backing instance `alias`.
    pub fn alias_directory(&self, alias: &str) -> Result<PathBuf> {
        let info = self.aliases.get(alias).ok_or_else(|| {
            Error::config(format!(
                "alias {} for component {} has not been registered",
                alias, self.name
            ))
        })?;
        let base = info.dependency.component_dir(alias).ok_or_else(|| {
            Error::config(format!(
                "alias {} for component {} has no registered checkout",
                alias, self.name
            ))
        })?;
        if info.sub_path.is_empty() {
            Ok(base)
        } else {
            Ok(base.join(&info.sub_path))
        }
    }

    pub fn class_file(&self) -> PathBuf {
        self.target_directory().join("class").join(format!("{}.yml", self.name))
    }

    pub fn defaults_file(&self) -> PathBuf {
        self.target_directory().join("class").join("defaults.yml")
    }

    pub fn has_defaults(&self) -> bool {
        self.defaults_file().is_file()
    }

    /// Library files shipped in the component's `lib/` directory.
    ///
    /// Hidden files are skipped; order is deterministic.
    pub fn lib_files(&self) -> Result<Vec<PathBuf>> {
        let lib_dir = self.target_directory().join("lib");
        let mut files = Vec::new();
        if lib_dir.is_dir() {
            for entry in fs::read_dir(&lib_dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                if entry.path().is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Look up a shipped library by file name.
    pub fn get_library(&self, libname: &str) -> Option<PathBuf> {
        let lib = self.target_directory().join("lib").join(libname);
        if lib.is_file() {
            Some(lib)
        } else {
            None
        }
    }

    /// Path to the component's Jsonnet dependency manifest, if any.
    pub fn jsonnetfile(&self) -> Option<PathBuf> {
        let dir = self.target_directory();
        let jsonnet = dir.join("jsonnetfile.jsonnet");
        if jsonnet.is_file() {
            return Some(jsonnet);
        }
        let json = dir.join("jsonnetfile.json");
        if json.is_file() {
            return Some(json);
        }
        None
    }

    /// Key under `parameters` holding this component's configuration.
    pub fn parameters_key(&self) -> String {
        component_parameters_key(&self.name)
    }

    /// Check out the base worktree at the component's pinned version.
    pub fn checkout(&self, force: bool) -> Result<PathBuf> {
        self.dependency.checkout_component(&self.name, &self.version, force)
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Version pinned for instance `alias`.
    pub fn alias_version(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(|i| i.version.as_str())
    }

    /// Repository URL backing instance `alias`.
    pub fn alias_url(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(|i| i.dependency.url())
    }

    /// Register instance `alias` with its own version/repo override.
    pub fn register_alias(
        &mut self,
        alias: &str,
        version: &str,
        sub_path: &str,
        dependency: Arc<MultiDependency>,
    ) -> Result<()> {
        if self.aliases.contains_key(alias) {
            return Err(Error::config(format!(
                "alias {} already registered on component {}",
                alias, self.name
            )));
        }
        let target_dir = component_dir(&self.work_dir, alias);
        dependency.register_component(alias, &target_dir)?;
        self.aliases.insert(
            alias.to_string(),
            AliasInfo {
                version: version.to_string(),
                sub_path: sub_path.to_string(),
                dependency,
            },
        );
        Ok(())
    }

    /// Check out the worktree backing instance `alias`.
    pub fn checkout_alias(&self, alias: &str, force: bool) -> Result<PathBuf> {
        let info = self.aliases.get(alias).ok_or_else(|| {
            Error::config(format!(
                "alias {} is not registered on component {}",
                alias, self.name
            ))
        })?;
        info.dependency.checkout_component(alias, &info.version, force)
    }
}

pub fn component_dir(work_dir: &Path, name: &str) -> PathBuf {
    work_dir.join("dependencies").join(name)
}

/// Dashes in component names become underscores in parameter keys.
pub fn component_parameters_key(name: &str) -> String {
    name.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyRegistry;

    fn component_fixture(work_dir: &Path) -> Component {
        let registry = DependencyRegistry::new(work_dir.join("dependencies"));
        let dep = registry
            .register("https://github.com/projectsyn/component-nfs.git")
            .unwrap();
        Component::new("nfs", dep, work_dir, "v1.0.0", "").unwrap()
    }

    #[test]
    fn test_parameters_key() {
        assert_eq!(component_parameters_key("nfs-client"), "nfs_client");
        assert_eq!(component_parameters_key("nfs"), "nfs");
    }

    #[test]
    fn test_identity_alias_registered() {
        let c = component_fixture(Path::new("/work"));
        assert!(c.has_alias("nfs"));
        assert_eq!(c.alias_version("nfs"), Some("v1.0.0"));
        assert_eq!(c.target_directory(), PathBuf::from("/work/dependencies/nfs"));
    }

    #[test]
    fn test_register_alias() {
        let mut c = component_fixture(Path::new("/work"));
        let registry = DependencyRegistry::new(PathBuf::from("/work/dependencies"));
        let dep = registry
            .register("https://github.com/projectsyn/component-nfs.git")
            .unwrap();
        c.register_alias("nfs-b", "v1.1.0", "", dep).unwrap();
        assert!(c.has_alias("nfs-b"));
        assert_eq!(c.alias_version("nfs-b"), Some("v1.1.0"));
        assert_eq!(
            c.alias_directory("nfs-b").unwrap(),
            PathBuf::from("/work/dependencies/nfs-b")
        );
        // Base directory is unaffected by instance overrides.
        assert_eq!(c.target_directory(), PathBuf::from("/work/dependencies/nfs"));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut c = component_fixture(Path::new("/work"));
        let registry = DependencyRegistry::new(PathBuf::from("/work/dependencies"));
        let dep = registry
            .register("https://github.com/projectsyn/component-nfs.git")
            .unwrap();
        assert!(c.register_alias("nfs", "v1.0.0", "", dep).is_err());
    }

    #[test]
    fn test_metadata_defaults() {
        let meta: ComponentMetadata = serde_yaml::from_str("{}").unwrap();
        assert!(!meta.multi_instance);
        assert!(!meta.multi_version);
        assert!(meta.library_aliases.is_empty());
        assert!(!meta.deprecated);
    }

    #[test]
    fn test_metadata_parsing() {
        let meta: ComponentMetadata = serde_yaml::from_str(
            r#"
multi_instance: true
library_aliases:
  shared.libsonnet: nfs-shared.libsonnet
deprecated: true
replaced_by: nfs-ng
deprecation_notice: use nfs-ng instead
"#,
        )
        .unwrap();
        assert!(meta.multi_instance);
        assert_eq!(
            meta.library_aliases.get("shared.libsonnet"),
            Some(&"nfs-shared.libsonnet".to_string())
        );
        assert!(meta.deprecated);
        assert_eq!(meta.replaced_by.as_deref(), Some("nfs-ng"));
    }
}
