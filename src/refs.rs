//! Secret reference management
//!
//! Rendered parameter values may contain secret reference tokens of the
//! form `?{<backend>:<keypath>}`. References are never resolved at compile
//! time; instead, one reference file per unique `(backend, keypath)` is
//! materialized under `catalog/refs/` for the deploy-time tooling. File
//! contents are deterministic (sorted keys, trailing newline) so unchanged
//! references produce identical files across runs, and stale files are
//! pruned so the refs tree always mirrors the rendered inventory exactly.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info};
use regex::Regex;
use walkdir::WalkDir;

use crate::component::component_parameters_key;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reclass::{Node, Value};
use crate::yaml;

/// A parsed secret reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretRef {
    pub backend: String,
    /// Key path, including the field segment if it was spelled with `/`.
    pub keypath: String,
    /// Explicit field (the optional third `:`-separated element).
    pub field: Option<String>,
}

impl SecretRef {
    /// Parse the inside of a `?{...}` token.
    pub fn parse(token: &str) -> Option<SecretRef> {
        let mut parts = token.splitn(3, ':');
        let backend = parts.next()?.to_string();
        let keypath = parts.next()?.to_string();
        if backend.is_empty() || keypath.is_empty() {
            return None;
        }
        let field = parts.next().map(str::to_string);
        Some(SecretRef {
            backend,
            keypath,
            field,
        })
    }

    /// The `path` component of the vault lookup; without an explicit field
    /// the last `/`-separated segment of the key path is the field.
    pub fn vault_path_and_field(&self) -> (String, String) {
        match &self.field {
            Some(field) => (self.keypath.clone(), field.clone()),
            None => match self.keypath.rsplit_once('/') {
                Some((path, field)) => (path.to_string(), field.to_string()),
                None => (self.keypath.clone(), self.keypath.clone()),
            },
        }
    }

    /// Relative file path of this reference below `refs/`.
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(&self.keypath)
    }

    /// Render the reference file for the deploy-time tooling.
    ///
    /// Only the `vaultkv` backend is supported; the `data` field carries
    /// the base64-encoded `path:field` lookup key.
    pub fn render(&self, backend_params: &Value) -> Result<serde_yaml::Value> {
        if self.backend != "vaultkv" {
            return Err(Error::config(format!(
                "unsupported secret reference backend '{}'",
                self.backend
            )));
        }
        let (path, field) = self.vault_path_and_field();
        let mut doc = serde_yaml::Mapping::new();
        doc.insert(
            "data".into(),
            BASE64.encode(format!("{}:{}", path, field)).into(),
        );
        doc.insert("encoding".into(), "original".into());
        doc.insert("type".into(), self.backend.clone().into());
        doc.insert("vault_params".into(), backend_params.to_yaml());
        Ok(serde_yaml::Value::Mapping(doc))
    }
}

/// Recursive visitor collecting secret reference tokens from a value tree.
struct RefScanner {
    pattern: Regex,
    refs: BTreeSet<SecretRef>,
}

impl RefScanner {
    fn new() -> Result<Self> {
        Ok(RefScanner {
            pattern: Regex::new(r"\?\{([^}]+)\}")?,
            refs: BTreeSet::new(),
        })
    }

    fn scan(&mut self, value: &Value) {
        match value.unwrap_const() {
            Value::String(s) | Value::Ref(s) => {
                for cap in self.pattern.captures_iter(s) {
                    if let Some(r) = SecretRef::parse(&cap[1]) {
                        debug!("found secret ref {}:{}", r.backend, r.keypath);
                        self.refs.insert(r);
                    }
                }
            }
            Value::List(list) => {
                for item in list {
                    self.scan(item);
                }
            }
            Value::Mapping(map) => {
                for v in map.values() {
                    self.scan(v);
                }
            }
            _ => {}
        }
    }
}

/// Collect all secret references for a compile.
///
/// Cluster-scoped keys are scanned on the bootstrap target; component
/// parameters are scanned per instance so instance-specific overrides are
/// seen.
pub fn collect_refs(
    bootstrap: &Node,
    aliases: &BTreeMap<String, String>,
    inventory: &BTreeMap<String, Node>,
) -> Result<BTreeSet<SecretRef>> {
    let mut scanner = RefScanner::new()?;

    let component_keys: BTreeSet<String> = aliases
        .values()
        .map(|cn| component_parameters_key(cn))
        .collect();
    if let Some(params) = bootstrap.parameters.as_mapping() {
        for (key, value) in params {
            if !component_keys.contains(key) {
                scanner.scan(value);
            }
        }
    }

    for (alias, cn) in aliases {
        let Some(node) = inventory.get(alias) else {
            continue;
        };
        let ckey = component_parameters_key(cn);
        if let Some(value) = node.parameters.get_path(&[&ckey]) {
            scanner.scan(value);
        }
    }

    Ok(scanner.refs)
}

/// Backend parameters for a reference: global defaults from
/// `parameters.secret_management.<backend>`, deep-merged with a
/// per-reference override under
/// `parameters.secret_management.overrides.<keypath>` when present.
fn backend_params(bootstrap: &Node, r: &SecretRef) -> Value {
    let base = bootstrap
        .parameters
        .get_path(&["secret_management", &r.backend])
        .cloned()
        .unwrap_or(Value::Mapping(Default::default()));
    let Some(override_params) = bootstrap
        .parameters
        .get_path(&["secret_management", "overrides", &r.keypath])
        .cloned()
    else {
        return base;
    };
    let mut merged = base;
    let _ = crate::reclass::merge::merge_value(&mut merged, override_params, "");
    merged
}

/// Materialize the reference files for this compile.
///
/// Unchanged files are left untouched; files for references which no
/// longer exist are removed, empty directories included.
pub fn update_refs(
    cfg: &Config,
    aliases: &BTreeMap<String, String>,
    inventory: &BTreeMap<String, Node>,
) -> Result<()> {
    info!("Updating secret references...");
    let refs_dir = cfg.refs_dir();
    fs::create_dir_all(&refs_dir)?;

    let bootstrap = inventory
        .get(cfg.inventory().bootstrap_target())
        .ok_or_else(|| Error::render("bootstrap target missing from rendered inventory"))?;
    let refs = collect_refs(bootstrap, aliases, inventory)?;

    let mut expected = BTreeSet::new();
    for r in &refs {
        let file = refs_dir.join(r.file_path());
        let content = yaml::to_string(&r.render(&backend_params(bootstrap, r))?)?;
        expected.insert(file.clone());
        let unchanged = fs::read_to_string(&file)
            .map(|existing| existing == content)
            .unwrap_or(false);
        if !unchanged {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&file, content)?;
        }
    }

    prune_stale_refs(&refs_dir, &expected)?;
    Ok(())
}

fn prune_stale_refs(refs_dir: &Path, expected: &BTreeSet<PathBuf>) -> Result<()> {
    let mut stale_files = Vec::new();
    for entry in WalkDir::new(refs_dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && !expected.contains(entry.path()) {
            stale_files.push(entry.path().to_path_buf());
        }
    }
    for file in stale_files {
        debug!("removing stale secret reference {}", file.display());
        fs::remove_file(&file)?;
    }

    // Remove directories emptied by the pruning, deepest first.
    let mut dirs: Vec<PathBuf> = WalkDir::new(refs_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path() != refs_dir)
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}
