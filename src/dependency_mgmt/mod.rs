//! Dependency resolution and fetching
//!
//! Packages and components are discovered from the rendered hierarchy and
//! materialized as Git worktrees. Package discovery iterates to a fixed
//! point, since packages can enable further packages; components are only
//! discovered once all packages are in place. Fetching is parallelized
//! over dependencies, bounded by the configured parallelism; per-remote
//! serialization happens inside the shared dependency repositories.

pub mod discovery;
pub mod jsonnet_bundler;
pub mod libraries;
pub mod versions;

use std::collections::BTreeSet;

use crossbeam_channel::unbounded;
use log::{debug, info, warn};

use crate::component::Component;
use crate::config::{CancelToken, Config};
use crate::error::{Error, Result};
use crate::inventory::relsymlink;
use crate::package::Package;
use crate::reclass::{Node, Reclass, Value};
use libraries::validate_component_library_name;
use versions::{read_versions, DepType};

/// Backstop for the package fixed point; the loop otherwise terminates as
/// soon as one round discovers nothing new.
const MAX_DISCOVERY_ROUNDS: usize = 100;

/// Render the bootstrap target of the inventory.
pub fn render_bootstrap(cfg: &Config, ignore_class_notfound: bool) -> Result<Node> {
    let inv = cfg.inventory();
    Reclass::new(&inv.classes_dir(), &inv.targets_dir())
        .ignore_class_notfound(ignore_class_notfound)
        .render_node(inv.bootstrap_target())
}

type Job<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// Run jobs on up to `parallelism` worker threads, returning the first
/// error encountered after all workers have drained the queue.
fn run_parallel(parallelism: usize, cancel: &CancelToken, jobs: Vec<Job<'_>>) -> Result<()> {
    if jobs.len() <= 1 || parallelism <= 1 {
        for job in jobs {
            cancel.check()?;
            job()?;
        }
        return Ok(());
    }

    let workers = parallelism.min(jobs.len());
    let (job_tx, job_rx) = unbounded::<Job<'_>>();
    let (res_tx, res_rx) = unbounded::<Result<()>>();
    for job in jobs {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let cancel = cancel.clone();
            scope.spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let result = if cancel.is_cancelled() {
                        cancel.check()
                    } else {
                        job()
                    };
                    let _ = res_tx.send(result);
                }
            });
        }
    });
    drop(res_tx);

    let mut first_error = None;
    for result in res_rx.iter() {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Fetch all config packages enabled in the hierarchy.
///
/// Runs the discovery loop to a fixed point: rendering the hierarchy,
/// fetching any newly referenced `pkg.*` applications, registering their
/// classes, and re-rendering until the set of packages stops growing.
pub fn fetch_packages(cfg: &mut Config) -> Result<()> {
    info!("Discovering config packages...");
    cfg.inventory().ensure_dirs()?;

    let mut rounds = 0;
    loop {
        cfg.cancel_token().check()?;
        rounds += 1;
        if rounds > MAX_DISCOVERY_ROUNDS {
            return Err(Error::render(
                "package discovery did not reach a fixed point",
            ));
        }

        // Classes of not-yet-fetched packages may already be referenced.
        let node = render_bootstrap(cfg, true)?;
        let new_pkgs: Vec<String> = discovery::discover_packages(&node.applications)
            .into_iter()
            .filter(|p| !cfg.get_packages().contains_key(p))
            .collect();
        if new_pkgs.is_empty() {
            break;
        }
        debug!("discovered new packages: {}", new_pkgs.join(", "));

        let specs = read_versions(&node.parameters, DepType::Package, &new_pkgs)?;
        let mut packages = Vec::new();
        for (name, spec) in specs {
            let dep = cfg.register_dependency_repo(&spec.url)?;
            packages.push(Package::new(
                &name,
                dep,
                cfg.work_dir(),
                &spec.version,
                &spec.path,
            )?);
        }

        info!("Fetching config packages...");
        let force = cfg.force;
        let jobs: Vec<Job<'_>> = packages
            .iter()
            .map(|pkg| {
                let job: Job<'_> = Box::new(move || pkg.checkout(force).map(|_| ()));
                job
            })
            .collect();
        run_parallel(cfg.parallelism, &cfg.cancel_token(), jobs)?;

        for pkg in packages {
            relsymlink(
                &pkg.target_dir()?,
                &cfg.inventory().classes_dir(),
                Some(pkg.name()),
            )?;
            cfg.register_package(pkg);
        }

        // The bootstrap target lists package classes, so the next render
        // sees applications enabled by the packages fetched this round.
        crate::target::update_target(cfg, cfg.inventory().bootstrap_target(), None)?;
    }
    Ok(())
}

/// Fetch all components required by the cluster.
///
/// Components are discovered by parsing the `applications` list in the
/// hierarchy; packages must already be fetched and registered.
pub fn fetch_components(cfg: &mut Config) -> Result<()> {
    info!("Discovering components...");
    cfg.inventory().ensure_dirs()?;

    let node = render_bootstrap(cfg, false)?;
    let discovered = discovery::discover_components(&node.applications)?;
    info!("Registering component aliases...");
    cfg.register_component_aliases(discovered.aliases);

    let specs = read_versions(&node.parameters, DepType::Component, &discovered.components)?;

    let mut components = Vec::new();
    for (name, spec) in specs {
        let dep = cfg.register_dependency_repo(&spec.url)?;
        components.push(Component::new(
            &name,
            dep,
            cfg.work_dir(),
            &spec.version,
            &spec.path,
        )?);
    }

    info!("Fetching components...");
    let force = cfg.force;
    let jobs: Vec<Job<'_>> = components
        .iter()
        .map(|c| {
            let job: Job<'_> = Box::new(move || c.checkout(force).map(|_| ()));
            job
        })
        .collect();
    run_parallel(cfg.parallelism, &cfg.cancel_token(), jobs)?;

    for component in components {
        create_component_symlinks(cfg, &component)?;
        cfg.register_component(component);
    }
    Ok(())
}

/// Create symlinks in the inventory subdirectory.
///
/// The actual code for components lives in the `dependencies/`
/// subdirectory, but some of their files are accessed through the
/// inventory.
fn create_component_symlinks(cfg: &Config, component: &Component) -> Result<()> {
    let inv = cfg.inventory();
    relsymlink(&component.class_file(), &inv.components_dir(), None)?;
    if component.has_defaults() {
        relsymlink(
            &component.defaults_file(),
            &inv.defaults_dir(),
            Some(&format!("{}.yml", component.name())),
        )?;
    } else {
        warn!("Default file for component {} missing", component.name());
    }

    for file in component.lib_files()? {
        debug!("installing template library {}", file.display());
        relsymlink(
            &validate_component_library_name(component.name(), &file)?,
            &inv.lib_dir(),
            None,
        )?;
    }
    Ok(())
}

/// Register and materialize aliased component instances.
///
/// For aliases with a version or URL override in
/// `parameters.components.<alias>`, the component must advertise
/// `multi_version` support; the instance is then checked out as its own
/// worktree under `dependencies/<alias>`. All non-identity aliases get
/// instance-named symlinks for their defaults and component classes.
pub fn register_component_instances(cfg: &mut Config, cluster_parameters: &Value) -> Result<()> {
    let aliases = cfg.get_component_aliases().clone();
    let registry = cfg.dependency_registry().clone();
    let force = cfg.force;

    for (alias, cn) in aliases.iter() {
        if alias == cn {
            continue;
        }
        cfg.cancel_token().check()?;
        let meta = cfg.component_metadata(cluster_parameters, cn);

        let entry = cluster_parameters.get_path(&["components", alias.as_str()]);
        let url_override = entry
            .and_then(|e| e.get_path(&["url"]))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let version_override = entry
            .and_then(|e| e.get_path(&["version"]))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let path_override = entry
            .and_then(|e| e.get_path(&["path"]))
            .and_then(|v| v.as_str())
            .map(|p| p.trim_matches('/').to_string());

        if url_override.is_some() || version_override.is_some() {
            if !meta.multi_version {
                return Err(Error::MultiVersionNotSupported {
                    component: cn.clone(),
                    alias: alias.clone(),
                });
            }
            let component = cfg.get_component_mut(cn).ok_or_else(|| {
                Error::config(format!("component {} not registered", cn))
            })?;
            let url = url_override.unwrap_or_else(|| component.repo_url().to_string());
            let version =
                version_override.unwrap_or_else(|| component.version().to_string());
            let sub_path = path_override.unwrap_or_else(|| component.sub_path().to_string());
            let dep = registry.register(&url)?;
            component.register_alias(alias, &version, &sub_path, dep)?;
            info!("Fetching instance {} of component {}...", alias, cn);
            component.checkout_alias(alias, force)?;
        }

        create_instance_symlinks(cfg, alias, cn)?;
    }
    Ok(())
}

/// Symlink the defaults and component class of instance `alias`.
///
/// Multi-version instances link the class files of their own checkout;
/// plain aliases link the base component's files under the instance name.
fn create_instance_symlinks(cfg: &Config, alias: &str, cn: &str) -> Result<()> {
    let inv = cfg.inventory();
    let component = cfg
        .get_components()
        .get(cn)
        .ok_or_else(|| Error::config(format!("component {} not registered", cn)))?;
    let class_dir = if component.has_alias(alias) {
        component.alias_directory(alias)?.join("class")
    } else {
        component.target_directory().join("class")
    };
    relsymlink(
        &class_dir.join(format!("{}.yml", cn)),
        &inv.components_dir(),
        Some(&format!("{}.yml", alias)),
    )?;
    let defaults = class_dir.join("defaults.yml");
    if defaults.is_file() {
        relsymlink(
            &defaults,
            &inv.defaults_dir(),
            Some(&format!("{}.yml", alias)),
        )?;
    }
    Ok(())
}

/// Names which may legitimately appear in `parameters.components` without
/// their own URL: registered instance aliases.
pub fn known_instance_names(cfg: &Config) -> BTreeSet<String> {
    cfg.get_component_aliases()
        .iter()
        .filter(|(alias, cn)| alias != cn)
        .map(|(alias, _)| alias.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_parallel_runs_all_jobs() {
        let counter = AtomicUsize::new(0);
        let jobs: Vec<Job<'_>> = (0..16)
            .map(|_| {
                let job: Job<'_> = Box::new(|| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                job
            })
            .collect();
        run_parallel(4, &CancelToken::new(), jobs).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_run_parallel_propagates_error() {
        let jobs: Vec<Job<'_>> = vec![
            Box::new(|| Ok(())),
            Box::new(|| Err(Error::config("boom"))),
            Box::new(|| Ok(())),
        ];
        let err = run_parallel(2, &CancelToken::new(), jobs).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_run_parallel_respects_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let jobs: Vec<Job<'_>> = vec![Box::new(|| Ok(())), Box::new(|| Ok(()))];
        assert!(run_parallel(2, &cancel, jobs).is_err());
    }
}
