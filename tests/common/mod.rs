//! Shared test utilities for integration and E2E tests.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Run a git command in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test Author")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test Author")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .args(args)
        .status()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Capture a git command's stdout in `dir`.
pub fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an "upstream" component-style repository with two tagged
/// versions.
///
/// `v1.0.0` ships `server: x`, `v1.1.0` ships `server: z`. Returns the
/// repository path (usable as a file:// remote).
#[allow(dead_code)]
pub fn make_component_origin(base: &Path, name: &str) -> PathBuf {
    let repo = base.join(format!("origin-{}", name));
    std::fs::create_dir_all(repo.join("class")).unwrap();
    git(&repo, &["init", "-q", "-b", "master"]);

    std::fs::write(
        repo.join("class").join(format!("{}.yml", name)),
        format!("parameters:\n  kapitan:\n    compile: []\n  {}_class: included\n", name),
    )
    .unwrap();
    std::fs::write(
        repo.join("class/defaults.yml"),
        format!("parameters:\n  {}:\n    server: x\n", name),
    )
    .unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "initial version"]);
    git(&repo, &["tag", "v1.0.0"]);

    std::fs::write(
        repo.join("class/defaults.yml"),
        format!("parameters:\n  {}:\n    server: z\n", name),
    )
    .unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "bump defaults"]);
    git(&repo, &["tag", "v1.1.0"]);

    repo
}

/// Create a bare repository seeded with an empty `manifests/` marker, for
/// use as a catalog remote.
#[allow(dead_code)]
pub fn make_catalog_origin(base: &Path) -> PathBuf {
    let seed = base.join("catalog-seed");
    std::fs::create_dir_all(seed.join("manifests")).unwrap();
    std::fs::write(seed.join("manifests/.gitkeep"), "").unwrap();
    git(&seed, &["init", "-q", "-b", "master"]);
    git(&seed, &["add", "-A"]);
    git(&seed, &["commit", "-q", "-m", "Initial commit"]);

    let origin = base.join("catalog-origin.git");
    git(
        base,
        &[
            "clone",
            "-q",
            "--bare",
            seed.to_str().unwrap(),
            origin.to_str().unwrap(),
        ],
    );
    origin
}
