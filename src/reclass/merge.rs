//! Deep merging of parameter trees
//!
//! Classes are merged in include order. Mappings merge recursively; lists
//! and scalars replace unless the overriding key carries a `+` suffix
//! (lists append, maps deep-merge). Keys prefixed with `=` become
//! constant: a later class assigning to a constant key fails rendering.

use super::value::{Mapping, Value};
use crate::error::{Error, Result};

/// Interpretation of a raw mapping key.
#[derive(Debug, PartialEq, Eq)]
struct KeyMarkers<'a> {
    key: &'a str,
    constant: bool,
    append: bool,
}

fn parse_key(raw: &str) -> KeyMarkers<'_> {
    let (constant, rest) = match raw.strip_prefix('=') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (append, key) = match rest.strip_suffix('+') {
        Some(key) => (true, key),
        None => (false, rest),
    };
    KeyMarkers { key, constant, append }
}

/// Merge `overlay` into `base` at `path` (used for error reporting).
pub fn merge_value(base: &mut Value, overlay: Value, path: &str) -> Result<()> {
    if let Value::Constant(_) = base {
        return Err(Error::render(format!(
            "attempt to override constant parameter '{}'",
            path
        )));
    }
    match overlay {
        Value::Mapping(overlay_map) => {
            // A later class merging into a reference-overlaid mapping
            // merges into the base; the overlay still applies last.
            if let Value::RefOverlay(inner, _) = base {
                return merge_value(inner, Value::Mapping(overlay_map), path);
            }
            if !matches!(base, Value::Mapping(_)) {
                *base = Value::Mapping(Mapping::new());
            }
            let base_map = base.as_mapping_mut().expect("base is a mapping");
            merge_mapping(base_map, overlay_map, path)
        }
        Value::Ref(s) => {
            // A reference assigned over a mapping overlays it during
            // resolution instead of replacing it.
            match std::mem::replace(base, Value::Null) {
                old @ Value::Mapping(_) => *base = Value::RefOverlay(Box::new(old), s),
                Value::RefOverlay(inner, _) => *base = Value::RefOverlay(inner, s),
                _ => *base = Value::Ref(s),
            }
            Ok(())
        }
        Value::Constant(inner) => {
            merge_value(base, *inner, path)?;
            let replaced = std::mem::replace(base, Value::Null);
            *base = Value::Constant(Box::new(replaced));
            Ok(())
        }
        other => {
            *base = other;
            Ok(())
        }
    }
}

fn merge_mapping(base: &mut Mapping, overlay: Mapping, path: &str) -> Result<()> {
    for (raw_key, raw_value) in overlay {
        let markers = parse_key(&raw_key);
        let child_path = if path.is_empty() {
            markers.key.to_string()
        } else {
            format!("{}:{}", path, markers.key)
        };

        let value = if markers.constant {
            Value::Constant(Box::new(raw_value))
        } else {
            raw_value
        };

        if base.contains_key(markers.key) {
            let existing = base.get_mut(markers.key).expect("key exists");
            if let Value::Constant(_) = existing {
                return Err(Error::render(format!(
                    "attempt to override constant parameter '{}'",
                    child_path
                )));
            }
            if markers.append {
                merge_append(existing, value, &child_path)?;
            } else {
                merge_value(existing, value, &child_path)?;
            }
        } else {
            // First assignment; `+` on a missing key degenerates to a
            // plain assignment. Nested keys may still carry markers.
            let mut slot = Value::Null;
            merge_value(&mut slot, value, &child_path)?;
            base.insert(markers.key.to_string(), slot);
        }
    }
    Ok(())
}

/// `key+` semantics: lists append, mappings deep-merge, anything else is a
/// rendering error.
fn merge_append(base: &mut Value, overlay: Value, path: &str) -> Result<()> {
    match (base, overlay) {
        (Value::List(base_list), Value::List(overlay_list)) => {
            base_list.extend(overlay_list);
            Ok(())
        }
        (base @ Value::Mapping(_), overlay @ Value::Mapping(_)) => {
            merge_value(base, overlay, path)
        }
        (base, overlay) => Err(Error::render(format!(
            "can't append {} to {} for parameter '{}'",
            overlay.type_name(),
            base.type_name(),
            path
        ))),
    }
}
