//! Working directory layout and inventory class placement
//!
//! The inventory is a directory tree of reclass-style class files. Classes
//! from dependencies are not copied but symlinked into place, so the
//! checked-out worktrees under `dependencies/` remain the single source of
//! truth:
//!
//! ```text
//! <wd>/inventory/classes/
//!   params/cluster.yml      synthesized cluster parameters
//!   global/                 global defaults repo checkout
//!   <tenant>/               tenant config repo checkout
//!   defaults/<name>.yml     symlink to component class/defaults.yml
//!   components/<name>.yml   symlink to component class/<component>.yml
//!   <pkg-name>/             symlink to package checkout
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Path layout of a compile working directory.
#[derive(Debug, Clone)]
pub struct Inventory {
    work_dir: PathBuf,
}

impl Inventory {
    pub fn new(work_dir: PathBuf) -> Self {
        Inventory { work_dir }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn inventory_dir(&self) -> PathBuf {
        self.work_dir.join("inventory")
    }

    pub fn dependencies_dir(&self) -> PathBuf {
        self.work_dir.join("dependencies")
    }

    pub fn classes_dir(&self) -> PathBuf {
        self.inventory_dir().join("classes")
    }

    pub fn components_dir(&self) -> PathBuf {
        self.classes_dir().join("components")
    }

    pub fn defaults_dir(&self) -> PathBuf {
        self.classes_dir().join("defaults")
    }

    pub fn targets_dir(&self) -> PathBuf {
        self.inventory_dir().join("targets")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.dependencies_dir().join("lib")
    }

    pub fn global_config_dir(&self) -> PathBuf {
        self.classes_dir().join("global")
    }

    pub fn params_dir(&self) -> PathBuf {
        self.classes_dir().join("params")
    }

    /// The reserved target name carrying the cluster-level parameters.
    pub fn bootstrap_target(&self) -> &'static str {
        "cluster"
    }

    pub fn params_file(&self) -> PathBuf {
        self.params_dir()
            .join(format!("{}.yml", self.bootstrap_target()))
    }

    /// Engine output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("compiled")
    }

    pub fn tenant_config_dir(&self, tenant: &str) -> PathBuf {
        self.classes_dir().join(tenant)
    }

    pub fn package_dir(&self, pkg_name: &str) -> PathBuf {
        self.classes_dir().join(pkg_name)
    }

    pub fn component_file(&self, name: &str) -> PathBuf {
        self.components_dir().join(format!("{}.yml", name))
    }

    pub fn defaults_file(&self, name: &str) -> PathBuf {
        self.defaults_dir().join(format!("{}.yml", name))
    }

    pub fn target_file(&self, target: &str) -> PathBuf {
        self.targets_dir().join(format!("{}.yml", target))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.components_dir())?;
        fs::create_dir_all(self.defaults_dir())?;
        fs::create_dir_all(self.params_dir())?;
        fs::create_dir_all(self.lib_dir())?;
        fs::create_dir_all(self.targets_dir())?;
        Ok(())
    }
}

/// Create a relative symlink to `src` in `dest_dir`, replacing any existing
/// link or file of the same name.
pub fn relsymlink(src: &Path, dest_dir: &Path, dest_name: Option<&str>) -> Result<()> {
    let name = match dest_name {
        Some(n) => n.to_string(),
        None => src
            .file_name()
            .ok_or_else(|| Error::config(format!("can't link path {}", src.display())))?
            .to_string_lossy()
            .to_string(),
    };
    if !src.exists() {
        return Err(Error::config(format!(
            "Can't link {} to {}. Source does not exist.",
            src.display(),
            dest_dir.join(&name).display()
        )));
    }
    fs::create_dir_all(dest_dir)?;
    let link_dst = dest_dir.join(&name);
    if link_dst.symlink_metadata().is_ok() {
        fs::remove_file(&link_dst)?;
    }
    let link_src = relative_to(src, dest_dir);
    #[cfg(unix)]
    std::os::unix::fs::symlink(&link_src, &link_dst)?;
    #[cfg(not(unix))]
    return Err(Error::config("symlinks are only supported on unix hosts"));
    Ok(())
}

/// Compute a relative path from `dir` to `path`.
fn relative_to(path: &Path, dir: &Path) -> PathBuf {
    let path = absolutize(path);
    let dir = absolutize(dir);
    let path_parts: Vec<_> = path.components().collect();
    let dir_parts: Vec<_> = dir.components().collect();
    let common = path_parts
        .iter()
        .zip(dir_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..dir_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Delete the contents of `basedir` without removing the directory itself.
///
/// Hidden entries (`.git` and friends) are left in place.
pub fn rm_tree_contents(basedir: &Path) -> Result<()> {
    if !basedir.is_dir() {
        return Err(Error::config(format!(
            "Expected directory as argument, got {}",
            basedir.display()
        )));
    }
    for entry in fs::read_dir(basedir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let inv = Inventory::new(PathBuf::from("/work"));
        assert_eq!(inv.classes_dir(), PathBuf::from("/work/inventory/classes"));
        assert_eq!(
            inv.defaults_file("nfs"),
            PathBuf::from("/work/inventory/classes/defaults/nfs.yml")
        );
        assert_eq!(
            inv.component_file("nfs"),
            PathBuf::from("/work/inventory/classes/components/nfs.yml")
        );
        assert_eq!(
            inv.target_file("cluster"),
            PathBuf::from("/work/inventory/targets/cluster.yml")
        );
        assert_eq!(inv.lib_dir(), PathBuf::from("/work/dependencies/lib"));
        assert_eq!(inv.params_file(), PathBuf::from("/work/inventory/classes/params/cluster.yml"));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(
                Path::new("/work/dependencies/nfs/class/nfs.yml"),
                Path::new("/work/inventory/classes/components")
            ),
            PathBuf::from("../../../dependencies/nfs/class/nfs.yml")
        );
    }

    #[test]
    fn test_relsymlink_replaces_existing() {
        let tmp = tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("a.yml"), "a: 1\n").unwrap();
        fs::write(src_dir.join("b.yml"), "b: 2\n").unwrap();
        let dst_dir = tmp.path().join("dst");

        relsymlink(&src_dir.join("a.yml"), &dst_dir, Some("link.yml")).unwrap();
        assert_eq!(fs::read_to_string(dst_dir.join("link.yml")).unwrap(), "a: 1\n");

        relsymlink(&src_dir.join("b.yml"), &dst_dir, Some("link.yml")).unwrap();
        assert_eq!(fs::read_to_string(dst_dir.join("link.yml")).unwrap(), "b: 2\n");
    }

    #[test]
    fn test_relsymlink_missing_source() {
        let tmp = tempdir().unwrap();
        let err = relsymlink(&tmp.path().join("missing.yml"), tmp.path(), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_rm_tree_contents_keeps_hidden() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::create_dir_all(tmp.path().join("manifests/sub")).unwrap();
        fs::write(tmp.path().join("file.yaml"), "x").unwrap();
        rm_tree_contents(tmp.path()).unwrap();
        assert!(tmp.path().join(".git").is_dir());
        assert!(!tmp.path().join("manifests").exists());
        assert!(!tmp.path().join("file.yaml").exists());
    }
}
