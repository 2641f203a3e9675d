//! Small YAML I/O helpers shared across the crate

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Load a single-document YAML file.
pub fn load(file: &Path) -> Result<serde_yaml::Value> {
    let text = fs::read_to_string(file)?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Load a multi-document YAML file.
pub fn load_all(file: &Path) -> Result<Vec<serde_yaml::Value>> {
    let text = fs::read_to_string(file)?;
    load_all_str(&text)
}

/// Parse all documents out of a YAML string.
pub fn load_all_str(text: &str) -> Result<Vec<serde_yaml::Value>> {
    use serde::Deserialize;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        docs.push(serde_yaml::Value::deserialize(doc)?);
    }
    Ok(docs)
}

/// Serialize a value as a single YAML document.
pub fn to_string(value: &serde_yaml::Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

/// Serialize documents as multi-document YAML.
pub fn to_string_all(values: &[serde_yaml::Value]) -> Result<String> {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(value)?);
    }
    Ok(out)
}

/// Dump a value as a single-document YAML file.
pub fn dump(value: &serde_yaml::Value, file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, to_string(value)?)?;
    Ok(())
}

/// Dump documents as a multi-document YAML file.
pub fn dump_all(values: &[serde_yaml::Value], file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, to_string_all(values)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_all_str() {
        let docs = load_all_str("a: 1\n---\nb: 2\n").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["a"], 1);
        assert_eq!(docs[1]["b"], 2);
    }

    #[test]
    fn test_roundtrip_multi_doc() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("multi.yaml");
        let docs = load_all_str("a: 1\n---\nb: 2\n").unwrap();
        dump_all(&docs, &file).unwrap();
        let reloaded = load_all(&file).unwrap();
        assert_eq!(docs, reloaded);
    }
}
