//! Integration tests for the Git dependency store: bare clones, shared
//! worktrees, revision resolution, and dirty-worktree handling.

mod common;

use std::fs;

use commodore::dependency::DependencyRegistry;
use commodore::error::Error;
use commodore::gitrepo::{Author, BareRepo, GitRepo};
use common::{git_output, make_catalog_origin, make_component_origin};
use tempfile::tempdir;

#[test]
fn test_worktree_checkout_at_tag() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let wt = tmp.path().join("dependencies/nfs");
    repo.ensure_worktree(&wt, "v1.0.0", false).unwrap();

    let defaults = fs::read_to_string(wt.join("class/defaults.yml")).unwrap();
    assert!(defaults.contains("server: x"));
}

#[test]
fn test_worktree_advance_between_revisions() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let wt = tmp.path().join("dependencies/nfs");
    repo.ensure_worktree(&wt, "v1.0.0", false).unwrap();
    repo.ensure_worktree(&wt, "v1.1.0", false).unwrap();

    let defaults = fs::read_to_string(wt.join("class/defaults.yml")).unwrap();
    assert!(defaults.contains("server: z"));
}

#[test]
fn test_worktree_checkout_is_idempotent() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let wt = tmp.path().join("dependencies/nfs");
    repo.ensure_worktree(&wt, "v1.0.0", false).unwrap();
    let head_before = git_output(&wt, &["rev-parse", "HEAD"]);
    repo.ensure_worktree(&wt, "v1.0.0", false).unwrap();
    assert_eq!(git_output(&wt, &["rev-parse", "HEAD"]), head_before);
}

#[test]
fn test_multi_version_instances_share_one_bare_clone() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let registry = DependencyRegistry::new(tmp.path().join("dependencies"));

    let dep = registry.register(origin.to_str().unwrap()).unwrap();
    dep.register_component("nfs", &tmp.path().join("dependencies/nfs"))
        .unwrap();
    dep.register_component("nfs-b", &tmp.path().join("dependencies/nfs-b"))
        .unwrap();

    dep.checkout_component("nfs", "v1.0.0", false).unwrap();
    dep.checkout_component("nfs-b", "v1.1.0", false).unwrap();

    let base = fs::read_to_string(tmp.path().join("dependencies/nfs/class/defaults.yml")).unwrap();
    let instance =
        fs::read_to_string(tmp.path().join("dependencies/nfs-b/class/defaults.yml")).unwrap();
    assert!(base.contains("server: x"));
    assert!(instance.contains("server: z"));

    // Both worktrees share one bare clone in the store.
    assert!(dep.bare_dir().join("HEAD").is_file());
}

#[test]
fn test_dirty_worktree_rejected_without_force() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let wt = tmp.path().join("dependencies/nfs");
    repo.ensure_worktree(&wt, "v1.0.0", false).unwrap();
    fs::write(wt.join("class/defaults.yml"), "local change\n").unwrap();

    let err = repo.ensure_worktree(&wt, "v1.1.0", false).unwrap_err();
    assert!(matches!(err, Error::DirtyWorktree { .. }));

    // With --force the local change is discarded.
    repo.ensure_worktree(&wt, "v1.1.0", true).unwrap();
    let defaults = fs::read_to_string(wt.join("class/defaults.yml")).unwrap();
    assert!(defaults.contains("server: z"));
}

#[test]
fn test_unresolved_revision() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let err = repo.resolve_revision("v9.9.9").unwrap_err();
    assert!(matches!(err, Error::UnresolvedRevision { .. }));
}

#[test]
fn test_relative_revision_resolves() {
    let tmp = tempdir().unwrap();
    let origin = make_component_origin(tmp.path(), "nfs");
    let bare_dir = tmp.path().join("store/nfs.git");

    let repo = BareRepo::ensure(origin.to_str().unwrap(), &bare_dir).unwrap();
    let head = repo.resolve_revision("master").unwrap();
    let parent = repo.resolve_revision("master~1").unwrap();
    assert_ne!(head, parent);
    assert_eq!(parent, repo.resolve_revision("v1.0.0").unwrap());
}

#[test]
fn test_catalog_clone_commit_push_roundtrip() {
    let tmp = tempdir().unwrap();
    let origin = make_catalog_origin(tmp.path());

    let checkout = tmp.path().join("catalog");
    let author = Author::from_config(Some("Commodore"), Some("commodore@syn.tools"));
    let repo = GitRepo::clone(origin.to_str().unwrap(), &checkout, author).unwrap();

    fs::create_dir_all(checkout.join("manifests/c1")).unwrap();
    fs::write(checkout.join("manifests/c1/deploy.yaml"), "a: 1\n").unwrap();

    let changes = repo.stage_all().unwrap();
    assert!(!changes.is_empty());
    repo.commit("Automated catalog update from Commodore").unwrap();
    repo.push().unwrap();

    let log = git_output(&origin, &["log", "-1", "--format=%s %an"]);
    assert_eq!(log, "Automated catalog update from Commodore Commodore");
}

#[test]
fn test_stage_all_reports_change_kinds() {
    let tmp = tempdir().unwrap();
    let origin = make_catalog_origin(tmp.path());
    let checkout = tmp.path().join("catalog");
    let repo = GitRepo::clone(
        origin.to_str().unwrap(),
        &checkout,
        Author::from_config(None, None),
    )
    .unwrap();

    fs::write(checkout.join("manifests/new.yaml"), "x: 1\n").unwrap();
    fs::remove_file(checkout.join("manifests/.gitkeep")).unwrap();

    let changes = repo.stage_all().unwrap();
    let added = changes.iter().any(|c| {
        matches!(c, commodore::gitrepo::StagedChange::Added { path } if path == "manifests/new.yaml")
    });
    let deleted = changes.iter().any(|c| {
        matches!(c, commodore::gitrepo::StagedChange::Deleted { path } if path == "manifests/.gitkeep")
    });
    assert!(added);
    assert!(deleted);
}
