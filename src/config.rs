//! Compile configuration and per-compile state
//!
//! `Config` carries the command-line configuration for one catalog compile
//! plus the registries that are filled while the compile progresses:
//! fetched components and packages, component instance aliases, the
//! global/tenant config repos, and collected deprecation notices.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::component::{component_parameters_key, Component, ComponentMetadata};
use crate::dependency::{DependencyRegistry, MultiDependency};
use crate::error::{Error, Result};
use crate::gitrepo::{Author, GitRepo};
use crate::inventory::Inventory;
use crate::package::Package;
use crate::reclass::Value;

/// Migration-aware diff modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Hide non-semantic changes caused by the Kapitan 0.29 -> 0.30 upgrade.
    Kapitan029To030,
    /// Hide pure YAML formatting changes.
    IgnoreYamlFormatting,
}

impl FromStr for Migration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kapitan-0.29-to-0.30" => Ok(Migration::Kapitan029To030),
            "ignore-yaml-formatting" => Ok(Migration::IgnoreYamlFormatting),
            other => Err(Error::config(format!("unknown migration '{}'", other))),
        }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Migration::Kapitan029To030 => write!(f, "kapitan-0.29-to-0.30"),
            Migration::IgnoreYamlFormatting => write!(f, "ignore-yaml-formatting"),
        }
    }
}

/// Cooperative cancellation signal, checked at I/O boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::config("compile cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Configuration and accumulated state for one catalog compile.
pub struct Config {
    work_dir: PathBuf,
    inventory: Inventory,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub usermail: Option<String>,
    pub push: bool,
    pub interactive: bool,
    pub force: bool,
    pub parallelism: usize,
    pub request_timeout: Duration,
    pub migration: Option<Migration>,
    pub global_repo_revision_override: Option<String>,
    pub tenant_repo_revision_override: Option<String>,
    pub dynamic_facts: serde_json::Value,
    /// External templating engine binary.
    pub engine_command: String,
    /// External jsonnet evaluator binary (used by postprocessing filters).
    pub jsonnet_command: String,
    /// External jsonnet-bundler binary.
    pub jb_command: String,

    registry: DependencyRegistry,
    components: BTreeMap<String, Component>,
    packages: BTreeMap<String, Package>,
    component_aliases: BTreeMap<String, String>,
    config_repos: BTreeMap<String, GitRepo>,
    deprecation_notices: Vec<String>,
    cancel: CancelToken,
}

impl Config {
    pub fn new(work_dir: &Path) -> Self {
        let work_dir = work_dir.to_path_buf();
        let inventory = Inventory::new(work_dir.clone());
        let registry = DependencyRegistry::new(inventory.dependencies_dir());
        Config {
            work_dir,
            inventory,
            api_url: None,
            api_token: None,
            username: None,
            usermail: None,
            push: false,
            interactive: false,
            force: false,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            request_timeout: Duration::from_secs(5),
            migration: None,
            global_repo_revision_override: None,
            tenant_repo_revision_override: None,
            dynamic_facts: serde_json::json!({}),
            engine_command: "kapitan".to_string(),
            jsonnet_command: "jsonnet".to_string(),
            jb_command: "jb".to_string(),
            registry,
            components: BTreeMap::new(),
            packages: BTreeMap::new(),
            component_aliases: BTreeMap::new(),
            config_repos: BTreeMap::new(),
            deprecation_notices: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn vendor_dir(&self) -> PathBuf {
        self.work_dir.join("vendor")
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.work_dir.join("catalog")
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.catalog_dir().join("refs")
    }

    pub fn jsonnet_file(&self) -> PathBuf {
        self.work_dir.join("jsonnetfile.json")
    }

    pub fn author(&self) -> Author {
        Author::from_config(self.username.as_deref(), self.usermail.as_deref())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Register the shared dependency repository for `repo_url`.
    pub fn register_dependency_repo(&self, repo_url: &str) -> Result<Arc<MultiDependency>> {
        self.registry.register(repo_url)
    }

    pub fn dependency_registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn get_components(&self) -> &BTreeMap<String, Component> {
        &self.components
    }

    pub fn get_component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.get_mut(name)
    }

    pub fn register_component(&mut self, component: Component) {
        self.components.insert(component.name().to_string(), component);
    }

    pub fn get_packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    pub fn register_package(&mut self, package: Package) {
        self.packages.insert(package.name().to_string(), package);
    }

    /// Instance aliases, mapping alias to component name.
    pub fn get_component_aliases(&self) -> &BTreeMap<String, String> {
        &self.component_aliases
    }

    pub fn register_component_aliases(&mut self, aliases: BTreeMap<String, String>) {
        self.component_aliases = aliases;
    }

    pub fn get_configs(&self) -> &BTreeMap<String, GitRepo> {
        &self.config_repos
    }

    /// Register the global or tenant config repo under `level`.
    pub fn register_config(&mut self, level: &str, repo: GitRepo) {
        self.config_repos.insert(level.to_string(), repo);
    }

    /// Component metadata as rendered in the cluster parameters.
    pub fn component_metadata(
        &self,
        cluster_parameters: &Value,
        component: &str,
    ) -> ComponentMetadata {
        let ckey = component_parameters_key(component);
        cluster_parameters
            .get_path(&[&ckey, "_metadata"])
            .map(|meta| {
                serde_yaml::from_value(meta.to_yaml()).unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Verify that every alias distinct from its component name points at a
    /// component which supports instantiation.
    pub fn verify_component_aliases(&self, cluster_parameters: &Value) -> Result<()> {
        for (alias, cn) in &self.component_aliases {
            if alias != cn {
                let meta = self.component_metadata(cluster_parameters, cn);
                if !meta.multi_instance {
                    return Err(Error::InstancingNotSupported {
                        component: cn.clone(),
                        alias: alias.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Collect deprecation notices for deployed components.
    pub fn register_component_deprecations(&mut self, cluster_parameters: &Value) {
        let components: Vec<String> = self.component_aliases.values().cloned().collect();
        for cname in components {
            let meta = self.component_metadata(cluster_parameters, &cname);
            if meta.deprecated {
                let mut msg = format!("Component {} is deprecated.", cname);
                if let Some(successor) = &meta.replaced_by {
                    msg.push_str(&format!(" Use component {} instead.", successor));
                }
                if let Some(notice) = &meta.deprecation_notice {
                    msg.push_str(&format!(" {}", notice));
                }
                self.register_deprecation_notice(msg);
            }
        }
    }

    pub fn register_deprecation_notice(&mut self, notice: String) {
        self.deprecation_notices.push(notice);
    }

    pub fn deprecation_notices(&self) -> &[String] {
        &self.deprecation_notices
    }

    /// Print collected deprecation notices. Non-fatal by design; emitted
    /// after the catalog update.
    pub fn print_deprecation_notices(&self) {
        if self.deprecation_notices.is_empty() {
            return;
        }
        println!("\n{}", console::style("Commodore notices:").bold());
        for notice in &self.deprecation_notices {
            println!(" > {}", notice);
        }
    }
}
