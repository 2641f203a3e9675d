//! Compilation metadata
//!
//! After a compile, the exact dependency coordinates that produced the
//! catalog are collected: per-instance and per-package URL, version,
//! subpath, and checked-out commit, plus the global and tenant config
//! repo revisions. The same structure renders the human-readable catalog
//! commit message and the JSON payload reported to Lieutenant on a
//! successful push.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use log::warn;
use serde_json::json;

use crate::api::Lieutenant;
use crate::config::Config;
use crate::error::Result;
use crate::gitrepo::GitRepo;

/// Coordinates of one checked-out dependency (component instance or
/// package).
#[derive(Debug, Clone)]
pub struct DependencyVersionInfo {
    pub url: String,
    pub version: String,
    pub path: String,
    pub git_sha: Option<String>,
    pub short_sha: Option<String>,
}

impl DependencyVersionInfo {
    fn as_json(&self) -> serde_json::Value {
        json!({
            "url": self.url,
            "version": self.version,
            "path": self.path,
            "gitSha": self.git_sha,
        })
    }

    fn pretty_print(&self, name: &str) -> String {
        match &self.short_sha {
            Some(sha) => format!(" * {}: {} ({})", name, self.version, sha),
            None => format!(" * {}: {}", name, self.version),
        }
    }
}

/// Coordinates of the global or tenant config repo.
#[derive(Debug, Clone)]
pub struct RepoVersionInfo {
    pub url: String,
    pub revision: Option<String>,
    pub git_sha: Option<String>,
    pub short_sha: Option<String>,
}

impl RepoVersionInfo {
    fn as_json(&self) -> serde_json::Value {
        json!({
            "url": self.url,
            "revision": self.revision,
            "gitSha": self.git_sha,
        })
    }

    fn pretty_print(&self, name: &str) -> String {
        match &self.short_sha {
            Some(sha) => format!(" * {}: {}", name, sha),
            None => format!(" * {}: <unknown>", name),
        }
    }

    fn from_repo(repo: &GitRepo, revision: Option<&str>) -> Self {
        RepoVersionInfo {
            url: repo.remote_url().to_string(),
            revision: revision.map(str::to_string),
            git_sha: repo.head_sha(),
            short_sha: repo.head_short_sha(),
        }
    }
}

/// Everything worth recording about one compile.
#[derive(Debug, Clone)]
pub struct CompileMeta {
    pub version: String,
    pub instances: BTreeMap<String, (String, DependencyVersionInfo)>,
    pub packages: BTreeMap<String, DependencyVersionInfo>,
    pub global_repo: Option<RepoVersionInfo>,
    pub tenant_repo: Option<RepoVersionInfo>,
    pub timestamp: chrono::DateTime<Utc>,
}

impl CompileMeta {
    /// Collect metadata from the compile state.
    ///
    /// `global_revision`/`tenant_revision` are the requested revisions
    /// (after any override), recorded alongside the resolved commits.
    pub fn new(
        cfg: &Config,
        global_revision: Option<&str>,
        tenant_revision: Option<&str>,
    ) -> Result<CompileMeta> {
        let mut instances = BTreeMap::new();
        for (alias, cn) in cfg.get_component_aliases() {
            let Some(component) = cfg.get_components().get(cn) else {
                continue;
            };
            let dir = if component.has_alias(alias) {
                component.alias_directory(alias)?
            } else {
                component.target_directory()
            };
            let repo = GitRepo::open(&dir, cfg.author())?;
            instances.insert(
                alias.clone(),
                (
                    cn.clone(),
                    DependencyVersionInfo {
                        url: component
                            .alias_url(alias)
                            .unwrap_or(component.repo_url())
                            .to_string(),
                        version: component
                            .alias_version(alias)
                            .unwrap_or(component.version())
                            .to_string(),
                        path: component.sub_path().to_string(),
                        git_sha: repo.head_sha(),
                        short_sha: repo.head_short_sha(),
                    },
                ),
            );
        }

        let mut packages = BTreeMap::new();
        for (name, pkg) in cfg.get_packages() {
            let repo = GitRepo::open(&pkg.target_dir()?, cfg.author())?;
            packages.insert(
                name.clone(),
                DependencyVersionInfo {
                    url: pkg.repo_url().to_string(),
                    version: pkg.version().to_string(),
                    path: pkg.sub_path().to_string(),
                    git_sha: repo.head_sha(),
                    short_sha: repo.head_short_sha(),
                },
            );
        }

        let global_repo = cfg
            .get_configs()
            .get("global")
            .map(|r| RepoVersionInfo::from_repo(r, global_revision));
        let tenant_repo = cfg
            .get_configs()
            .get("tenant")
            .map(|r| RepoVersionInfo::from_repo(r, tenant_revision));

        Ok(CompileMeta {
            version: env!("CARGO_PKG_VERSION").to_string(),
            instances,
            packages,
            global_repo,
            tenant_repo,
            timestamp: Utc::now(),
        })
    }

    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "commodoreBuildInfo": {"version": self.version},
            "global": self.global_repo.as_ref().map(|r| r.as_json()),
            "instances": self
                .instances
                .iter()
                .map(|(alias, (cn, info))| {
                    let mut v = info.as_json();
                    v["component"] = json!(cn);
                    (alias.clone(), v)
                })
                .collect::<serde_json::Map<String, serde_json::Value>>(),
            "lastCompile": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "packages": self
                .packages
                .iter()
                .map(|(name, info)| (name.clone(), info.as_json()))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
            "tenant": self.tenant_repo.as_ref().map(|r| r.as_json()),
        })
    }

    /// Render the catalog commit message.
    pub fn render_catalog_commit_message(&self) -> String {
        let component_commits: Vec<String> = self
            .instances
            .iter()
            .map(|(alias, (_, info))| info.pretty_print(alias))
            .collect();
        let package_commits: Vec<String> = self
            .packages
            .iter()
            .map(|(name, info)| info.pretty_print(name))
            .collect();
        let mut config_commits = Vec::new();
        if let Some(global) = &self.global_repo {
            config_commits.push(global.pretty_print("global"));
        }
        if let Some(tenant) = &self.tenant_repo {
            config_commits.push(tenant.pretty_print("tenant"));
        }

        format!(
            "Automated catalog update from Commodore\n\n\
             Component instance commits:\n{}\n\n\
             Package commits:\n{}\n\n\
             Configuration commits:\n{}\n\n\
             Compilation timestamp: {}\n",
            component_commits.join("\n"),
            package_commits.join("\n"),
            config_commits.join("\n"),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Report compile metadata to Lieutenant. Best effort: failures are
/// logged, never fatal, since the catalog push already succeeded.
pub fn report_compile_metadata(cfg: &Config, meta: &CompileMeta, cluster_id: &str) {
    let Some(api_url) = &cfg.api_url else {
        return;
    };
    let result = Lieutenant::new(api_url, cfg.api_token.clone(), cfg.request_timeout)
        .and_then(|api| api.post(&format!("clusters/{}/compileMeta", cluster_id), &meta.as_json()));
    if let Err(e) = result {
        warn!("failed to report compile metadata: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_fixture() -> CompileMeta {
        let mut instances = BTreeMap::new();
        instances.insert(
            "nfs".to_string(),
            (
                "nfs".to_string(),
                DependencyVersionInfo {
                    url: "https://example.com/component-nfs.git".to_string(),
                    version: "v1.0.0".to_string(),
                    path: String::new(),
                    git_sha: Some("0123456789abcdef".to_string()),
                    short_sha: Some("012345".to_string()),
                },
            ),
        );
        let mut packages = BTreeMap::new();
        packages.insert(
            "p1".to_string(),
            DependencyVersionInfo {
                url: "https://example.com/package-p1.git".to_string(),
                version: "main".to_string(),
                path: String::new(),
                git_sha: None,
                short_sha: None,
            },
        );
        CompileMeta {
            version: "0.1.0".to_string(),
            instances,
            packages,
            global_repo: Some(RepoVersionInfo {
                url: "https://example.com/global.git".to_string(),
                revision: Some("main".to_string()),
                git_sha: Some("deadbeef".to_string()),
                short_sha: Some("deadbe".to_string()),
            }),
            tenant_repo: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_commit_message_structure() {
        let msg = meta_fixture().render_catalog_commit_message();
        assert!(msg.starts_with("Automated catalog update from Commodore"));
        assert!(msg.contains(" * nfs: v1.0.0 (012345)"));
        assert!(msg.contains(" * p1: main"));
        assert!(msg.contains(" * global: deadbe"));
        assert!(msg.contains("Compilation timestamp: "));
    }

    #[test]
    fn test_as_json() {
        let j = meta_fixture().as_json();
        assert_eq!(j["commodoreBuildInfo"]["version"], "0.1.0");
        assert_eq!(j["instances"]["nfs"]["component"], "nfs");
        assert_eq!(j["instances"]["nfs"]["version"], "v1.0.0");
        assert_eq!(j["packages"]["p1"]["url"], "https://example.com/package-p1.git");
        assert!(j["tenant"].is_null());
    }
}
