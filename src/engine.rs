//! Driver for the external templating engine
//!
//! The engine (a Kapitan-compatible binary) is invoked once per compile
//! with all targets. It reads the target files under `inventory/targets/`,
//! renders each instance, and writes output under `compiled/<instance>/`.
//! The engine is an oracle: its output tree is read from disk, its stdout
//! and stderr are never parsed, and on failure its stderr is surfaced
//! verbatim.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// Invoke the templating engine on `targets`.
pub fn compile(cfg: &Config, targets: &[String], search_paths: &[PathBuf]) -> Result<()> {
    cfg.cancel_token().check()?;
    info!("Compiling catalog...");

    let inv = cfg.inventory();
    let mut cmd = Command::new(&cfg.engine_command);
    cmd.current_dir(cfg.work_dir())
        .arg("compile")
        .arg("--output-path")
        .arg(cfg.work_dir())
        .arg("--inventory-path")
        .arg(inv.inventory_dir());

    let mut paths: Vec<PathBuf> = vec![cfg.work_dir().to_path_buf(), inv.lib_dir()];
    paths.extend(search_paths.iter().cloned());
    for pkg in cfg.get_packages().values() {
        paths.push(pkg.target_dir()?);
    }
    cmd.arg("--search-paths");
    for path in &paths {
        cmd.arg(path);
    }

    if cfg.parallelism > 1 {
        cmd.arg("--parallelism").arg(cfg.parallelism.to_string());
    }

    cmd.arg("--targets");
    for target in targets {
        cmd.arg(target);
    }

    debug!(
        "invoking templating engine: {} for targets {}",
        cfg.engine_command,
        targets.join(", ")
    );
    let output = cmd.output().map_err(|e| Error::Engine {
        targets: targets.join(", "),
        stderr: format!("failed to run `{}`: {}", cfg.engine_command, e),
    })?;
    if !output.status.success() {
        return Err(Error::Engine {
            targets: targets.join(", "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_engine_binary_is_engine_error() {
        let tmp = tempdir().unwrap();
        let mut cfg = Config::new(tmp.path());
        cfg.engine_command = "definitely-not-a-kapitan-binary".to_string();
        let err = compile(&cfg, &["cluster".to_string()], &[]).unwrap_err();
        match err {
            Error::Engine { targets, stderr } => {
                assert_eq!(targets, "cluster");
                assert!(stderr.contains("definitely-not-a-kapitan-binary"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
