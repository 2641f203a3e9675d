//! Cluster descriptor and the synthesized `params.cluster` class
//!
//! The descriptor combines the Lieutenant API responses for a cluster and
//! its tenant. It is consumed exactly once per compile: rendered into the
//! reserved `params/cluster.yml` inventory class, which sits at the lowest
//! precedence of the hierarchy.

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;

use crate::api::Lieutenant;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::yaml;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitRepoSpec {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterResponse {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub facts: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "dynamicFacts", default)]
    pub dynamic_facts: Option<serde_json::Value>,
    #[serde(rename = "gitRepo", default)]
    pub git_repo: Option<GitRepoSpec>,
    #[serde(rename = "globalGitRepoRevision", default)]
    pub global_git_repo_revision: Option<String>,
    #[serde(rename = "tenantGitRepoRevision", default)]
    pub tenant_git_repo_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantResponse {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "gitRepo", default)]
    pub git_repo: Option<GitRepoSpec>,
    #[serde(rename = "globalGitRepoURL", default)]
    pub global_git_repo_url: Option<String>,
    #[serde(rename = "globalGitRepoRevision", default)]
    pub global_git_repo_revision: Option<String>,
    #[serde(rename = "tenantGitRepoRevision", default)]
    pub tenant_git_repo_revision: Option<String>,
}

/// Cluster identity and repository coordinates for one compile.
#[derive(Debug, Clone)]
pub struct Cluster {
    cluster: ClusterResponse,
    tenant: TenantResponse,
    fallback_dynamic_facts: serde_json::Value,
}

impl Cluster {
    pub fn new(
        cluster: ClusterResponse,
        tenant: TenantResponse,
        fallback_dynamic_facts: serde_json::Value,
    ) -> Result<Self> {
        match &cluster.tenant {
            Some(t) if *t == tenant.id => {}
            _ => return Err(Error::config("Tenant ID mismatch")),
        }
        Ok(Cluster {
            cluster,
            tenant,
            fallback_dynamic_facts,
        })
    }

    pub fn id(&self) -> &str {
        &self.cluster.id
    }

    pub fn display_name(&self) -> &str {
        self.cluster.display_name.as_deref().unwrap_or(&self.cluster.id)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    pub fn tenant_display_name(&self) -> &str {
        self.tenant.display_name.as_deref().unwrap_or(&self.tenant.id)
    }

    pub fn global_git_repo_url(&self) -> Result<&str> {
        self.tenant.global_git_repo_url.as_deref().ok_or_else(|| {
            Error::config(format!(
                "URL of the global git repository is missing on tenant '{}'",
                self.tenant.id
            ))
        })
    }

    /// Global repo revision; the cluster response wins over the tenant's.
    pub fn global_git_repo_revision(&self) -> Option<&str> {
        self.cluster
            .global_git_repo_revision
            .as_deref()
            .or(self.tenant.global_git_repo_revision.as_deref())
    }

    pub fn config_repo_url(&self) -> Result<&str> {
        self.tenant
            .git_repo
            .as_ref()
            .and_then(|r| r.url.as_deref())
            .ok_or_else(|| {
                Error::config(format!(
                    "API did not return a repository URL for tenant '{}'",
                    self.tenant.id
                ))
            })
    }

    pub fn config_git_repo_revision(&self) -> Option<&str> {
        self.cluster
            .tenant_git_repo_revision
            .as_deref()
            .or(self.tenant.tenant_git_repo_revision.as_deref())
    }

    pub fn catalog_repo_url(&self) -> Result<&str> {
        self.cluster
            .git_repo
            .as_ref()
            .and_then(|r| r.url.as_deref())
            .ok_or_else(|| {
                Error::config(format!(
                    "API did not return a repository URL for cluster '{}'",
                    self.cluster.id
                ))
            })
    }

    pub fn facts(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.cluster.facts
    }

    /// Dynamic facts from the API, falling back to facts provided on the
    /// command line when the API reports none.
    pub fn dynamic_facts(&self) -> serde_json::Value {
        match &self.cluster.dynamic_facts {
            Some(facts) => {
                if !self.fallback_dynamic_facts.is_null()
                    && self.fallback_dynamic_facts != serde_json::json!({})
                {
                    warn!(
                        "Cluster API response contains dynamic facts, ignoring dynamic facts provided on the command line"
                    );
                }
                facts.clone()
            }
            None => {
                if self.fallback_dynamic_facts.is_null() {
                    serde_json::json!({})
                } else {
                    self.fallback_dynamic_facts.clone()
                }
            }
        }
    }
}

/// Fetch the cluster and tenant metadata for `cluster_id`.
pub fn load_cluster_from_api(
    api: &Lieutenant,
    cluster_id: &str,
    fallback_dynamic_facts: serde_json::Value,
) -> Result<Cluster> {
    let cluster: ClusterResponse = api.query(&format!("clusters/{}", cluster_id))?;
    let tenant_id = cluster
        .tenant
        .clone()
        .ok_or_else(|| Error::config("cluster does not have a tenant reference"))?;
    let tenant: TenantResponse = api.query(&format!("tenants/{}", tenant_id))?;
    Cluster::new(cluster, tenant, fallback_dynamic_facts)
}

/// Render the reserved `params.cluster` class from the descriptor.
pub fn render_params(inv: &Inventory, cluster: &Cluster) -> Result<serde_yaml::Value> {
    for fact in ["distribution", "cloud"] {
        let set = cluster
            .facts()
            .get(fact)
            .map(|v| !v.is_null() && v.as_str() != Some(""))
            .unwrap_or(false);
        if !set {
            return Err(Error::config(format!("Required fact '{}' not set", fact)));
        }
    }

    let mut target = serde_yaml::Mapping::new();
    target.insert("name".into(), cluster.id().into());
    target.insert("display_name".into(), cluster.display_name().into());
    target.insert("catalog_url".into(), cluster.catalog_repo_url()?.into());
    target.insert("tenant".into(), cluster.tenant_id().into());
    target.insert(
        "tenant_display_name".into(),
        cluster.tenant_display_name().into(),
    );

    let mut parameters = serde_yaml::Mapping::new();
    parameters.insert(
        inv.bootstrap_target().into(),
        serde_yaml::Value::Mapping(target),
    );
    parameters.insert(
        "facts".into(),
        serde_yaml::to_value(cluster.facts()).map_err(Error::from)?,
    );
    parameters.insert(
        "dynamic_facts".into(),
        serde_yaml::to_value(cluster.dynamic_facts()).map_err(Error::from)?,
    );

    let mut root = serde_yaml::Mapping::new();
    root.insert("parameters".into(), serde_yaml::Value::Mapping(parameters));
    Ok(serde_yaml::Value::Mapping(root))
}

/// Write the `params/cluster.yml` class file.
pub fn update_params(inv: &Inventory, cluster: &Cluster) -> Result<()> {
    let file = inv.params_file();
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    yaml::dump(&render_params(inv, cluster)?, &file)
}

/// Set the value for a nested dynamic fact at `raw_key` (`path.to.key`).
pub fn set_fact_value(facts: &mut serde_json::Value, raw_key: &str, value: serde_json::Value) {
    let key_parts: Vec<&str> = raw_key.split('.').collect();
    if key_parts.iter().any(|kp| kp.is_empty()) {
        warn!("Malformed nested key '{}', skipping...", raw_key);
        return;
    }

    let mut target = &mut *facts;
    for k in &key_parts[..key_parts.len() - 1] {
        let map = match target.as_object_mut() {
            Some(m) => m,
            None => return,
        };
        let entry = map
            .entry(k.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if !entry.is_object() {
            warn!(
                "Trying to insert subkey into non-dictionary dynamic fact '{}', skipping...",
                k
            );
            return;
        }
        target = entry;
    }

    let key = key_parts[key_parts.len() - 1];
    if let Some(map) = target.as_object_mut() {
        if let Some(old) = map.get(key) {
            warn!(
                "Overwriting dynamic fact '{}={}' with '{}'",
                raw_key, old, value
            );
        }
        map.insert(key.to_string(), value);
    }
}

/// Parse a raw dynamic fact value, treating a `json:` prefix as JSON.
pub fn parse_dynamic_fact_value(raw_value: &str) -> Option<serde_json::Value> {
    if let Some(json_val) = raw_value.strip_prefix("json:") {
        match serde_json::from_str(json_val) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(
                    "Expected value '{}' to be parsable JSON, but parsing failed with '{}', skipping",
                    json_val, e
                );
                None
            }
        }
    } else {
        Some(serde_json::Value::String(raw_value.to_string()))
    }
}

/// Parse `key=value` dynamic facts provided on the command line.
///
/// Keys may be dotted to create nested maps; later entries overwrite
/// earlier ones; malformed entries are skipped with a warning.
pub fn parse_dynamic_facts_from_cli(raw_facts: &[String]) -> serde_json::Value {
    let mut facts = serde_json::json!({});
    for f in raw_facts {
        let Some((raw_key, raw_value)) = f.split_once('=') else {
            warn!("Ignoring dynamic fact {} which is not in format key=value", f);
            continue;
        };
        if raw_key.is_empty() {
            warn!("Ignoring malformed dynamic fact '{}' with no key.", f);
            continue;
        }
        if raw_value.is_empty() {
            warn!(
                "Ignoring malformed dynamic fact '{}' with no value. Please specify empty string value as 'json:\"\"'",
                f
            );
            continue;
        }
        let Some(value) = parse_dynamic_fact_value(raw_value) else {
            continue;
        };
        set_fact_value(&mut facts, raw_key, value);
    }
    facts
}
