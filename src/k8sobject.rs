//! Stable ordering for Kubernetes objects
//!
//! Used by the migration-aware diff to sort multi-object YAML streams
//! before comparing them, so pure re-ordering never shows up as a change.

use std::cmp::Ordering;

/// Ordering key of one Kubernetes object: kind, namespace, name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sObject {
    kind: String,
    namespace: String,
    name: String,
}

impl K8sObject {
    pub fn new(obj: &serde_yaml::Value) -> Self {
        let get = |path: &[&str]| -> String {
            let mut current = obj;
            for key in path {
                match current.get(*key) {
                    Some(v) => current = v,
                    None => return String::new(),
                }
            }
            current.as_str().unwrap_or_default().to_string()
        };
        K8sObject {
            kind: get(&["kind"]),
            namespace: get(&["metadata", "namespace"]),
            name: get(&["metadata", "name"]),
        }
    }
}

impl Ord for K8sObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for K8sObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort a multi-object document stream by object identity.
pub fn sort_objects(docs: &mut [serde_yaml::Value]) {
    docs.sort_by_key(|d| K8sObject::new(d));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(kind: &str, namespace: &str, name: &str) -> serde_yaml::Value {
        serde_yaml::from_str(&format!(
            "kind: {}\nmetadata:\n  namespace: {}\n  name: {}\n",
            kind, namespace, name
        ))
        .unwrap()
    }

    #[test]
    fn test_ordering() {
        let mut docs = vec![
            obj("Service", "syn", "b"),
            obj("Deployment", "syn", "a"),
            obj("Service", "syn", "a"),
            obj("Service", "argocd", "a"),
        ];
        sort_objects(&mut docs);
        let kinds: Vec<_> = docs
            .iter()
            .map(|d| {
                (
                    d["kind"].as_str().unwrap().to_string(),
                    d["metadata"]["namespace"].as_str().unwrap().to_string(),
                    d["metadata"]["name"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("Deployment".into(), "syn".into(), "a".into()),
                ("Service".into(), "argocd".into(), "a".into()),
                ("Service".into(), "syn".into(), "a".into()),
                ("Service".into(), "syn".into(), "b".into()),
            ]
        );
    }

    #[test]
    fn test_objects_without_metadata_sort_first() {
        let mut docs = vec![obj("Service", "syn", "a"), serde_yaml::Value::Null];
        sort_objects(&mut docs);
        assert!(docs[0].is_null());
    }
}
