//! Reclass-compatible inventory renderer
//!
//! Renders a target (one node of the inventory) by walking its class
//! includes depth-first, left-to-right, deep-merging parameters along the
//! way, and resolving `${...}` references at the end. Semantics follow
//! reclass: repeated includes deduplicate to the first occurrence, include
//! cycles are errors, `=`-prefixed keys are constant, and the
//! `applications` list supports `~`-prefixed removal entries.

pub mod merge;
pub mod refs;
pub mod value;

#[cfg(test)]
mod applications_proptest;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Error, Result};
use crate::yaml;
pub use value::{Mapping, Value};

/// A fully rendered inventory node.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    /// Classes in include order (a class's includes precede it).
    pub classes: Vec<String>,
    /// Applications after `~`-removal resolution.
    pub applications: Vec<String>,
    /// Resolved parameter tree.
    pub parameters: Value,
}

/// One parsed class document.
#[derive(Debug)]
struct ClassDoc {
    classes: Vec<String>,
    applications: Vec<String>,
    parameters: Value,
}

impl Default for ClassDoc {
    fn default() -> Self {
        ClassDoc {
            classes: Vec::new(),
            applications: Vec::new(),
            parameters: Value::Mapping(Mapping::new()),
        }
    }
}

#[derive(Debug)]
struct RenderState {
    parameters: Value,
    applications: Vec<String>,
    included: Vec<String>,
    visiting: Vec<String>,
}

/// Renderer over a classes directory and a targets directory.
#[derive(Debug, Clone)]
pub struct Reclass {
    classes_dir: PathBuf,
    targets_dir: PathBuf,
    ignore_class_notfound: bool,
}

impl Reclass {
    pub fn new(classes_dir: &Path, targets_dir: &Path) -> Self {
        Reclass {
            classes_dir: classes_dir.to_path_buf(),
            targets_dir: targets_dir.to_path_buf(),
            ignore_class_notfound: false,
        }
    }

    /// Tolerate missing classes. Used during dependency discovery, where
    /// classes of not-yet-fetched packages may already be referenced.
    pub fn ignore_class_notfound(mut self, ignore: bool) -> Self {
        self.ignore_class_notfound = ignore;
        self
    }

    /// Render the target `name` from `targets/<name>.yml`.
    pub fn render_node(&self, name: &str) -> Result<Node> {
        let target_file = self.targets_dir.join(format!("{}.yml", name));
        if !target_file.is_file() {
            return Err(Error::render(format!(
                "target '{}' not found at {}",
                name,
                target_file.display()
            )));
        }
        let doc = load_class_doc(&target_file)?;

        let mut state = RenderState {
            parameters: Value::Mapping(Mapping::new()),
            applications: Vec::new(),
            included: Vec::new(),
            visiting: Vec::new(),
        };

        for class in &doc.classes {
            self.include_class(class, &mut state)?;
        }

        // The target's own parameters have the highest precedence.
        merge::merge_value(&mut state.parameters, doc.parameters, "")?;
        state.applications.extend(doc.applications);

        let parameters = refs::resolve(&state.parameters)?;
        let applications = render_array(&state.applications);

        Ok(Node {
            name: name.to_string(),
            classes: state.included,
            applications,
            parameters,
        })
    }

    /// Render every target in the targets directory.
    pub fn inventory(&self) -> Result<BTreeMap<String, Node>> {
        let mut nodes = BTreeMap::new();
        let mut entries: Vec<_> = std::fs::read_dir(&self.targets_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yml"))
            .collect();
        entries.sort();
        for path in entries {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let node = self.render_node(&name)?;
            nodes.insert(name, node);
        }
        Ok(nodes)
    }

    fn include_class(&self, raw_name: &str, state: &mut RenderState) -> Result<()> {
        // Class names may contain references to already-merged parameters,
        // e.g. `${cluster:tenant}.${cluster:name}`.
        let name = if raw_name.contains("${") {
            refs::resolve_str(raw_name, &state.parameters)?.to_scalar_string()?
        } else {
            raw_name.to_string()
        };

        if state.included.iter().any(|c| c == &name) {
            return Ok(());
        }
        if state.visiting.iter().any(|c| c == &name) {
            return Err(Error::render(format!(
                "include cycle detected: {} -> {}",
                state.visiting.join(" -> "),
                name
            )));
        }

        let path = self.class_path(&name);
        if !path.is_file() {
            if self.ignore_class_notfound {
                warn!("class '{}' not found, ignoring", name);
                return Ok(());
            }
            return Err(Error::render(format!(
                "class '{}' not found at {}",
                name,
                path.display()
            )));
        }

        let doc = load_class_doc(&path)?;
        state.visiting.push(name.clone());
        for sub in &doc.classes {
            self.include_class(sub, state)?;
        }
        merge::merge_value(&mut state.parameters, doc.parameters, "")
            .map_err(|e| Error::render(format!("in class '{}': {}", name, e)))?;
        state.applications.extend(doc.applications);
        state.visiting.pop();
        state.included.push(name);
        Ok(())
    }

    fn class_path(&self, name: &str) -> PathBuf {
        let rel: PathBuf = name.split('.').collect();
        self.classes_dir.join(rel).with_extension("yml")
    }
}

/// Apply `~`-removal semantics to an accumulated applications list.
///
/// A `~`-prefixed entry removes every prior occurrence of its name, so an
/// entry survives exactly when its last occurrence in the accumulated
/// list is not `~`-prefixed. The result is deduplicated to first
/// occurrences.
pub fn render_array(entries: &[String]) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for entry in entries {
        if let Some(name) = entry.strip_prefix('~') {
            result.retain(|x| x != name);
        } else {
            result.push(entry.clone());
        }
    }
    let mut seen = std::collections::BTreeSet::new();
    result.retain(|e| seen.insert(e.clone()));
    result
}

fn load_class_doc(path: &Path) -> Result<ClassDoc> {
    let raw = yaml::load(path)
        .map_err(|e| Error::render(format!("while loading {}: {}", path.display(), e)))?;
    let mut doc = ClassDoc::default();
    let map = match raw {
        serde_yaml::Value::Null => return Ok(doc),
        serde_yaml::Value::Mapping(map) => map,
        _ => {
            return Err(Error::render(format!(
                "class file {} is not a mapping",
                path.display()
            )))
        }
    };
    for (k, v) in &map {
        match k.as_str() {
            Some("classes") => doc.classes = string_list(v, path, "classes")?,
            Some("applications") => doc.applications = string_list(v, path, "applications")?,
            Some("parameters") => {
                let mut params = Value::from_yaml(v)?;
                // `applications` may also be declared under parameters;
                // it feeds the applications accumulator rather than the
                // generic merge so `~`-removals keep working.
                if let Some(map) = params.as_mapping_mut() {
                    if let Some(apps) = map.remove("applications") {
                        if let Some(list) = apps.as_list() {
                            for item in list {
                                if let Some(s) = item.as_str() {
                                    doc.applications.push(s.to_string());
                                }
                            }
                        }
                    }
                }
                doc.parameters = params;
            }
            _ => {}
        }
    }
    Ok(doc)
}

fn string_list(v: &serde_yaml::Value, path: &Path, key: &str) -> Result<Vec<String>> {
    match v {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        return Err(Error::render(format!(
                            "entry in '{}' of {} is not a string",
                            key,
                            path.display()
                        )))
                    }
                }
            }
            Ok(out)
        }
        _ => Err(Error::render(format!(
            "'{}' in {} is not a list",
            key,
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_class(dir: &Path, name: &str, content: &str) {
        let rel: PathBuf = name.split('.').collect();
        let path = dir.join(rel).with_extension("yml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        classes: PathBuf,
        targets: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().unwrap();
        let classes = tmp.path().join("classes");
        let targets = tmp.path().join("targets");
        fs::create_dir_all(&classes).unwrap();
        fs::create_dir_all(&targets).unwrap();
        Fixture {
            _tmp: tmp,
            classes,
            targets,
        }
    }

    #[test]
    fn test_render_array_removal() {
        let entries: Vec<String> = ["a", "b", "~a", "a"].iter().map(|s| s.to_string()).collect();
        let rendered = render_array(&entries);
        let set: std::collections::BTreeSet<_> = rendered.iter().cloned().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(set.contains("b"));
    }

    #[test]
    fn test_render_array_removal_empties_list() {
        let entries: Vec<String> = ["c1", "~c1"].iter().map(|s| s.to_string()).collect();
        assert!(render_array(&entries).is_empty());
    }

    #[test]
    fn test_render_array_last_occurrence_decides() {
        let entries: Vec<String> = ["a", "a", "~a"].iter().map(|s| s.to_string()).collect();
        assert!(render_array(&entries).is_empty());
    }

    #[test]
    fn test_render_array_dedup() {
        let entries: Vec<String> = ["a", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(render_array(&entries), vec!["a", "b"]);
    }

    #[test]
    fn test_include_order_and_merge() {
        let f = fixture();
        write_class(&f.classes, "defaults.c1", "parameters:\n  c1:\n    answer: 1\n");
        write_class(
            &f.classes,
            "global.commodore",
            "classes:\n  - global.common\nparameters:\n  c1:\n    answer: 3\n",
        );
        write_class(&f.classes, "global.common", "parameters:\n  c1:\n    answer: 2\n    extra: x\n");
        write_class(
            &f.targets,
            "cluster",
            "classes:\n  - defaults.c1\n  - global.commodore\nparameters: {}\n",
        );

        let node = Reclass::new(&f.classes, &f.targets)
            .render_node("cluster")
            .unwrap();
        // global.commodore's own parameters override its include.
        assert_eq!(node.parameters.get_path(&["c1", "answer"]), Some(&Value::Int(3)));
        assert_eq!(
            node.parameters.get_path(&["c1", "extra"]),
            Some(&Value::String("x".into()))
        );
        assert_eq!(
            node.classes,
            vec!["defaults.c1", "global.common", "global.commodore"]
        );
    }

    #[test]
    fn test_duplicate_include_first_occurrence_wins() {
        let f = fixture();
        write_class(&f.classes, "a", "classes: [shared]\nparameters:\n  from_a: 1\n");
        write_class(&f.classes, "b", "classes: [shared]\nparameters:\n  from_b: 1\n");
        write_class(&f.classes, "shared", "parameters:\n  shared: 1\n");
        write_class(&f.targets, "t", "classes: [a, b]\n");

        let node = Reclass::new(&f.classes, &f.targets).render_node("t").unwrap();
        assert_eq!(node.classes, vec!["shared", "a", "b"]);
    }

    #[test]
    fn test_include_cycle_detected() {
        let f = fixture();
        write_class(&f.classes, "a", "classes: [b]\n");
        write_class(&f.classes, "b", "classes: [a]\n");
        write_class(&f.targets, "t", "classes: [a]\n");

        let err = Reclass::new(&f.classes, &f.targets).render_node("t").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_class_is_error() {
        let f = fixture();
        write_class(&f.targets, "t", "classes: [nope]\n");
        let err = Reclass::new(&f.classes, &f.targets).render_node("t").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_missing_class_ignored_when_requested() {
        let f = fixture();
        write_class(&f.targets, "t", "classes: [nope]\nparameters:\n  a: 1\n");
        let node = Reclass::new(&f.classes, &f.targets)
            .ignore_class_notfound(true)
            .render_node("t")
            .unwrap();
        assert_eq!(node.parameters.get_path(&["a"]), Some(&Value::Int(1)));
    }

    #[test]
    fn test_applications_accumulate_across_classes() {
        let f = fixture();
        write_class(&f.classes, "global.commodore", "applications:\n  - c1\n  - c2\n");
        write_class(
            &f.classes,
            "t-tenant.c-cluster",
            "parameters:\n  applications:\n    - ~c1\n",
        );
        write_class(
            &f.targets,
            "cluster",
            "classes:\n  - global.commodore\n  - t-tenant.c-cluster\n",
        );

        let node = Reclass::new(&f.classes, &f.targets)
            .render_node("cluster")
            .unwrap();
        assert_eq!(node.applications, vec!["c2"]);
    }

    #[test]
    fn test_reference_in_class_name() {
        let f = fixture();
        write_class(
            &f.classes,
            "params.cluster",
            "parameters:\n  cluster:\n    tenant: t-a\n    name: c-1\n",
        );
        write_class(&f.classes, "t-a.c-1", "parameters:\n  tenant_set: true\n");
        write_class(
            &f.classes,
            "global.commodore",
            "classes:\n  - ${cluster:tenant}.${cluster:name}\n",
        );
        write_class(
            &f.targets,
            "cluster",
            "classes:\n  - params.cluster\n  - global.commodore\n",
        );

        let node = Reclass::new(&f.classes, &f.targets)
            .render_node("cluster")
            .unwrap();
        assert_eq!(
            node.parameters.get_path(&["tenant_set"]),
            Some(&Value::Bool(true))
        );
        assert!(node.classes.contains(&"t-a.c-1".to_string()));
    }

    #[test]
    fn test_constant_override_across_classes_fails() {
        let f = fixture();
        write_class(&f.classes, "one", "parameters:\n  c1:\n    =_metadata:\n      multi_instance: true\n");
        write_class(&f.classes, "two", "parameters:\n  c1:\n    _metadata:\n      multi_instance: false\n");
        write_class(&f.targets, "t", "classes: [one, two]\n");

        let err = Reclass::new(&f.classes, &f.targets).render_node("t").unwrap_err();
        assert!(err.to_string().contains("constant"));
    }

    #[test]
    fn test_target_parameters_have_highest_precedence() {
        let f = fixture();
        write_class(&f.classes, "base", "parameters:\n  key: from-class\n");
        write_class(
            &f.targets,
            "t",
            "classes: [base]\nparameters:\n  key: from-target\n",
        );
        let node = Reclass::new(&f.classes, &f.targets).render_node("t").unwrap();
        assert_eq!(
            node.parameters.get_path(&["key"]),
            Some(&Value::String("from-target".into()))
        );
    }

    #[test]
    fn test_inventory_renders_all_targets() {
        let f = fixture();
        write_class(&f.classes, "base", "parameters:\n  x: 1\n");
        write_class(&f.targets, "a", "classes: [base]\n");
        write_class(&f.targets, "b", "classes: [base]\n");
        let inv = Reclass::new(&f.classes, &f.targets).inventory().unwrap();
        assert_eq!(inv.len(), 2);
        assert!(inv.contains_key("a"));
        assert!(inv.contains_key("b"));
    }
}
