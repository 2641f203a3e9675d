//! # Commodore Library
//!
//! This library provides the core functionality for compiling per-cluster
//! catalogs in GitOps-managed Kubernetes fleets. It is designed to be used
//! by the `commodore` command-line tool but can also be integrated into
//! other applications that need tenant-aware catalog compilation.
//!
//! ## Core Concepts
//!
//! - **Cluster (`cluster`, `api`)**: Cluster and tenant metadata fetched
//!   from the Lieutenant API, injected into the hierarchy as the
//!   lowest-precedence class.
//! - **Repositories (`gitrepo`, `dependency`)**: Bare clones in a
//!   content-addressed store, with one worktree per dependency checkout.
//! - **Inventory (`inventory`, `reclass`)**: A reclass-style class
//!   hierarchy with deep merging, constant keys, and reference
//!   interpolation.
//! - **Dependencies (`dependency_mgmt`)**: Fixed-point discovery of
//!   config packages and components, instance aliasing, and multi-version
//!   instances.
//! - **Targets (`target`, `engine`)**: One rendering target per component
//!   instance, compiled by an external Kapitan-compatible templating
//!   engine.
//! - **Postprocessing (`postprocess`)**: Builtin and jsonnet filters
//!   applied to the engine output per instance.
//! - **Secrets (`refs`)**: Secret reference tokens scanned from the
//!   rendered parameters and materialized as deterministic reference
//!   files.
//! - **Catalog (`catalog`, `diff`, `meta`)**: Diffing with
//!   migration-aware noise suppression, commit message generation, and
//!   the push to the per-cluster catalog repository.
//!
//! ## Execution Flow
//!
//! The main entry point is [`compile::compile`], which executes the
//! following high-level steps:
//!
//! 1. Fetch cluster and tenant metadata and seed the inventory.
//! 2. Clone the global and tenant config repositories.
//! 3. Fetch config packages to a fixed point, then components.
//! 4. Register component instances and validate aliases and libraries.
//! 5. Build one rendering target per instance.
//! 6. Generate secret reference files.
//! 7. Invoke the templating engine and apply postprocessing filters.
//! 8. Diff, commit, and push the catalog repository.

pub mod api;
pub mod catalog;
pub mod cluster;
pub mod compile;
pub mod component;
pub mod config;
pub mod dependency;
pub mod dependency_mgmt;
pub mod diff;
pub mod engine;
pub mod error;
pub mod gitrepo;
pub mod inventory;
pub mod jsonnet;
pub mod k8sobject;
pub mod meta;
pub mod package;
pub mod postprocess;
pub mod reclass;
pub mod refs;
pub mod target;
pub mod yaml;
