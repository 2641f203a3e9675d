//! Reference interpolation
//!
//! After all classes are merged, strings of the form `${a:b:c}` are
//! resolved against the parameter tree. A string consisting of exactly one
//! reference adopts the referenced value (including mappings and lists);
//! references embedded in longer strings are interpolated as scalars.
//! Nested references (`${a:${b}}`) are supported; cycles and lookups of
//! missing keys fail rendering. `\${` escapes a literal `${`.

use super::value::{Mapping, Value};
use crate::error::{Error, Result};

/// Hard bound on reference chains; anything deeper is assumed cyclic.
const MAX_RESOLVE_DEPTH: usize = 64;

#[derive(Debug, PartialEq)]
enum Token {
    Literal(String),
    Reference(String),
}

/// Split a string into literal and reference tokens.
fn tokenize(s: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && s[i..].starts_with("\\${") {
            literal.push_str("${");
            i += 3;
            continue;
        }
        if s[i..].starts_with("${") {
            let mut depth = 0usize;
            let mut end = None;
            let mut j = i;
            while j < bytes.len() {
                if s[j..].starts_with("${") {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if bytes[j] == b'}' {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                j += 1;
            }
            let end = end.ok_or_else(|| {
                Error::render(format!("unterminated reference in '{}'", s))
            })?;
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Reference(s[i + 2..end].to_string()));
            i = end + 1;
            continue;
        }
        let ch = s[i..].chars().next().expect("in-bounds index");
        literal.push(ch);
        i += ch.len_utf8();
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Resolve every reference in the tree, returning the fully resolved copy.
pub fn resolve(root: &Value) -> Result<Value> {
    let mut stack = Vec::new();
    resolve_value(root, root, &mut stack)
}

/// Resolve a single string against `root`, e.g. a class name containing
/// references.
pub fn resolve_str(s: &str, root: &Value) -> Result<Value> {
    let mut stack = Vec::new();
    resolve_string(s, root, &mut stack)
}

fn resolve_value(value: &Value, root: &Value, stack: &mut Vec<String>) -> Result<Value> {
    Ok(match value {
        Value::Ref(s) => resolve_string(s, root, stack)?,
        Value::List(list) => {
            let mut out = Vec::with_capacity(list.len());
            for item in list {
                out.push(resolve_value(item, root, stack)?);
            }
            Value::List(out)
        }
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, root, stack)?);
            }
            Value::Mapping(out)
        }
        Value::RefOverlay(base, s) => {
            let mut resolved_base = resolve_value(base, root, stack)?;
            let overlay = resolve_string(s, root, stack)?;
            if resolved_base.is_mapping() && overlay.is_mapping() {
                super::merge::merge_value(&mut resolved_base, overlay, "")?;
                resolved_base
            } else {
                overlay
            }
        }
        Value::Constant(inner) => {
            Value::Constant(Box::new(resolve_value(inner, root, stack)?))
        }
        scalar => scalar.clone(),
    })
}

fn resolve_string(s: &str, root: &Value, stack: &mut Vec<String>) -> Result<Value> {
    let tokens = tokenize(s)?;

    // A string that is exactly one reference adopts the referenced value.
    if tokens.len() == 1 {
        if let Token::Reference(path) = &tokens[0] {
            return resolve_reference(path, root, stack);
        }
    }

    let mut out = String::new();
    for token in &tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Reference(path) => {
                let resolved = resolve_reference(path, root, stack)?;
                out.push_str(&resolved.to_scalar_string()?);
            }
        }
    }
    Ok(Value::String(out))
}

fn resolve_reference(raw_path: &str, root: &Value, stack: &mut Vec<String>) -> Result<Value> {
    // The path itself may contain nested references.
    let path = match resolve_string(raw_path, root, stack)? {
        Value::String(p) => p,
        other => other.to_scalar_string()?,
    };

    if stack.iter().any(|p| p == &path) {
        return Err(Error::render(format!(
            "reference cycle detected: {} -> {}",
            stack.join(" -> "),
            path
        )));
    }
    if stack.len() >= MAX_RESOLVE_DEPTH {
        return Err(Error::render(format!(
            "reference chain exceeds {} levels while resolving '${{{}}}'",
            MAX_RESOLVE_DEPTH, path
        )));
    }

    let segments: Vec<&str> = path.split(':').collect();
    let target = lookup(root, root, &segments, stack)
        .map_err(|_| Error::render(format!("undefined reference '${{{}}}'", path)))?;

    stack.push(path);
    let resolved = resolve_value(&target, root, stack);
    stack.pop();
    resolved
}

/// Walk `segments` below `value`, resolving intermediate references so a
/// lookup can pass through not-yet-resolved nodes.
fn lookup(
    root: &Value,
    value: &Value,
    segments: &[&str],
    stack: &mut Vec<String>,
) -> Result<Value> {
    if segments.is_empty() {
        return Ok(value.clone());
    }
    match value.unwrap_const() {
        Value::Mapping(map) => {
            let child = map
                .get(segments[0])
                .ok_or_else(|| Error::render(format!("no key '{}'", segments[0])))?;
            lookup(root, child, &segments[1..], stack)
        }
        Value::Ref(_) | Value::RefOverlay(..) => {
            let resolved = resolve_value(value, root, stack)?;
            lookup(root, &resolved, segments, stack)
        }
        other => Err(Error::render(format!(
            "can't descend into {} value",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Value {
        Value::from_yaml(&serde_yaml::from_str(s).unwrap()).unwrap()
    }

    fn resolved(s: &str) -> Value {
        resolve(&parse(s)).unwrap()
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("a-${b:c}-d").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Literal("a-".into()),
                Token::Reference("b:c".into()),
                Token::Literal("-d".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_nested() {
        let tokens = tokenize("${a:${b}}").unwrap();
        assert_eq!(tokens, vec![Token::Reference("a:${b}".into())]);
    }

    #[test]
    fn test_tokenize_escape() {
        let tokens = tokenize("\\${not-a-ref}").unwrap();
        assert_eq!(tokens, vec![Token::Literal("${not-a-ref}".into())]);
    }

    #[test]
    fn test_simple_reference() {
        let v = resolved("cluster:\n  name: c-1\nwho: ${cluster:name}\n");
        assert_eq!(v.get_path(&["who"]), Some(&Value::String("c-1".into())));
    }

    #[test]
    fn test_embedded_reference() {
        let v = resolved("name: c-1\ngreeting: hello ${name}!\n");
        assert_eq!(
            v.get_path(&["greeting"]),
            Some(&Value::String("hello c-1!".into()))
        );
    }

    #[test]
    fn test_whole_string_ref_adopts_mapping() {
        let v = resolved("nfs_b:\n  server: y\nnfs: ${nfs_b}\n");
        assert_eq!(
            v.get_path(&["nfs", "server"]),
            Some(&Value::String("y".into()))
        );
    }

    #[test]
    fn test_nested_reference() {
        let v = resolved("facts:\n  distribution: k3s\ndists:\n  k3s: lightweight\nd: ${dists:${facts:distribution}}\n");
        assert_eq!(
            v.get_path(&["d"]),
            Some(&Value::String("lightweight".into()))
        );
    }

    #[test]
    fn test_chained_references() {
        let v = resolved("a: ${b}\nb: ${c}\nc: done\n");
        assert_eq!(v.get_path(&["a"]), Some(&Value::String("done".into())));
    }

    #[test]
    fn test_cycle_detected() {
        let err = resolve(&parse("a: ${b}\nb: ${a}\n")).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_cycle_detected() {
        assert!(resolve(&parse("a: ${a}\n")).is_err());
    }

    #[test]
    fn test_undefined_reference() {
        let err = resolve(&parse("a: ${missing:key}\n")).unwrap_err();
        assert!(err.to_string().contains("undefined reference"));
    }

    #[test]
    fn test_reference_inside_list() {
        let v = resolved("name: c1\nlist:\n  - ${name}\n  - plain\n");
        let list = v.get_path(&["list"]).unwrap().as_list().unwrap();
        assert_eq!(list[0], Value::String("c1".into()));
    }

    #[test]
    fn test_interpolating_mapping_into_string_fails() {
        let err = resolve(&parse("m:\n  a: 1\ns: embed ${m} here\n")).unwrap_err();
        assert!(err.to_string().contains("can't interpolate"));
    }

    #[test]
    fn test_ref_overlay_deep_merges_over_base() {
        let mut tree = parse("nfs:\n  server: x\n  port: 2049\nnfs_b:\n  server: y\n");
        super::super::merge::merge_value(&mut tree, parse("nfs: ${nfs_b}\n"), "").unwrap();
        let resolved = resolve(&tree).unwrap();
        assert_eq!(
            resolved.get_path(&["nfs", "server"]),
            Some(&Value::String("y".into()))
        );
        assert_eq!(resolved.get_path(&["nfs", "port"]), Some(&Value::Int(2049)));
    }

    #[test]
    fn test_reference_through_overlay() {
        let mut tree = parse(
            "nfs:\n  namespace: syn-nfs\nnfs_b:\n  namespace: syn-nfs-b\nother: ${nfs:namespace}\n",
        );
        super::super::merge::merge_value(&mut tree, parse("nfs: ${nfs_b}\n"), "").unwrap();
        let resolved = resolve(&tree).unwrap();
        assert_eq!(
            resolved.get_path(&["other"]),
            Some(&Value::String("syn-nfs-b".into()))
        );
    }

    #[test]
    fn test_ref_overlay_with_empty_instance_keeps_defaults() {
        let mut tree = parse("nfs:\n  server: x\nnfs_a: {}\n");
        super::super::merge::merge_value(&mut tree, parse("nfs: ${nfs_a}\n"), "").unwrap();
        let resolved = resolve(&tree).unwrap();
        assert_eq!(
            resolved.get_path(&["nfs", "server"]),
            Some(&Value::String("x".into()))
        );
    }
}
