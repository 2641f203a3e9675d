//! # Catalog Clean Command
//!
//! Implements `commodore catalog clean`: removes the inventory, the
//! dependency store (bare clones and worktrees), compiled output, the
//! catalog checkout, and vendored jsonnet libraries from the working
//! directory. Dirty dependency worktrees abort the clean unless `--force`
//! is given.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use commodore::compile::clean_catalog_workspace;
use commodore::config::Config;

/// Remove all compile state from the working directory
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// The working directory to clean.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub working_dir: PathBuf,

    /// Discard local modifications in dependency worktrees.
    #[arg(long)]
    pub force: bool,
}

/// Execute the `catalog clean` command.
pub fn execute(args: CleanArgs) -> Result<()> {
    let mut cfg = Config::new(&args.working_dir);
    cfg.force = args.force;
    clean_catalog_workspace(&cfg)?;
    Ok(())
}
