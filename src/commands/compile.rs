//! # Catalog Compile Command
//!
//! Implements `commodore catalog compile`, the main entry point of the
//! tool: it configures a [`Config`] from the command line and environment
//! and runs the full compile pipeline.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use commodore::cluster::parse_dynamic_facts_from_cli;
use commodore::compile;
use commodore::config::{Config, Migration};

/// Compile the catalog for a cluster
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// The cluster ID to compile, as registered on the Lieutenant API.
    pub cluster: String,

    /// The working directory for the compilation.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub working_dir: PathBuf,

    /// Base URL of the Lieutenant API.
    #[arg(long, value_name = "URL", env = "COMMODORE_API_URL")]
    pub api_url: Option<String>,

    /// Lieutenant API token.
    #[arg(long, value_name = "TOKEN", env = "COMMODORE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Commit author name for catalog commits.
    #[arg(long, value_name = "USERNAME", env = "COMMODORE_USERNAME")]
    pub username: Option<String>,

    /// Commit author email for catalog commits.
    #[arg(long, value_name = "USERMAIL", env = "COMMODORE_USERMAIL")]
    pub usermail: Option<String>,

    /// Push the catalog to the remote after compilation.
    #[arg(long)]
    pub push: bool,

    /// Show the diff and ask for confirmation before pushing.
    #[arg(long)]
    pub interactive: bool,

    /// Discard local modifications in dependency worktrees.
    #[arg(long)]
    pub force: bool,

    /// Number of parallel dependency fetches (defaults to the CPU count).
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Diff migration mode (kapitan-0.29-to-0.30, ignore-yaml-formatting).
    #[arg(long, value_name = "MIGRATION")]
    pub migration: Option<String>,

    /// Compile from this global config repo revision instead of the
    /// revision reported by the API. Cannot be combined with --push.
    #[arg(long, value_name = "REV")]
    pub global_repo_revision_override: Option<String>,

    /// Compile from this tenant config repo revision instead of the
    /// revision reported by the API. Cannot be combined with --push.
    #[arg(long, value_name = "REV")]
    pub tenant_repo_revision_override: Option<String>,

    /// Fallback dynamic facts (key=value; values prefixed with `json:`
    /// are parsed as JSON). Used when the API reports no dynamic facts.
    #[arg(long = "dynamic-fact", short = 'd', value_name = "KEY=VALUE")]
    pub dynamic_facts: Vec<String>,

    /// Lieutenant API request timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    pub request_timeout: u64,

    /// Templating engine binary.
    #[arg(long, value_name = "BIN", default_value = "kapitan")]
    pub engine: String,

    /// Jsonnet evaluator binary used for postprocessing filters.
    #[arg(long, value_name = "BIN", default_value = "jsonnet")]
    pub jsonnet_binary: String,

    /// Jsonnet-bundler binary.
    #[arg(long, value_name = "BIN", default_value = "jb")]
    pub jb_binary: String,
}

/// Execute the `catalog compile` command.
pub fn execute(args: CompileArgs) -> Result<()> {
    let mut cfg = Config::new(&args.working_dir);
    cfg.api_url = args.api_url;
    cfg.api_token = args.api_token;
    cfg.username = args.username;
    cfg.usermail = args.usermail;
    cfg.push = args.push;
    cfg.interactive = args.interactive;
    cfg.force = args.force;
    if let Some(parallel) = args.parallel {
        cfg.parallelism = parallel.max(1);
    }
    cfg.migration = args
        .migration
        .as_deref()
        .map(str::parse::<Migration>)
        .transpose()?;
    cfg.global_repo_revision_override = args.global_repo_revision_override;
    cfg.tenant_repo_revision_override = args.tenant_repo_revision_override;
    cfg.dynamic_facts = parse_dynamic_facts_from_cli(&args.dynamic_facts);
    cfg.request_timeout = Duration::from_secs(args.request_timeout);
    cfg.engine_command = args.engine;
    cfg.jsonnet_command = args.jsonnet_binary;
    cfg.jb_command = args.jb_binary;

    compile::compile(&mut cfg, &args.cluster)?;
    Ok(())
}
