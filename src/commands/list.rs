//! # Catalog List Command
//!
//! Implements `commodore catalog list`: queries the Lieutenant API for
//! all registered clusters and prints their IDs.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use commodore::api::Lieutenant;

/// List all clusters registered on the Lieutenant API
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Base URL of the Lieutenant API.
    #[arg(long, value_name = "URL", env = "COMMODORE_API_URL")]
    pub api_url: String,

    /// Lieutenant API token.
    #[arg(long, value_name = "TOKEN", env = "COMMODORE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Lieutenant API request timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    pub request_timeout: u64,

    /// Also print cluster display names.
    #[arg(long)]
    pub verbose: bool,
}

/// Execute the `catalog list` command.
pub fn execute(args: ListArgs) -> Result<()> {
    let api = Lieutenant::new(
        &args.api_url,
        args.api_token,
        Duration::from_secs(args.request_timeout),
    )?;
    let clusters: Vec<serde_json::Value> = api
        .query("clusters")
        .context("While listing clusters on Lieutenant")?;
    for cluster in clusters {
        let id = cluster["id"].as_str().unwrap_or_default();
        if args.verbose {
            let display_name = cluster["displayName"].as_str().unwrap_or_default();
            println!("{} - {}", id, display_name);
        } else {
            println!("{}", id);
        }
    }
    Ok(())
}
