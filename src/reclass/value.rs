//! Parameter tree values
//!
//! The rendered inventory is a heterogeneous tree: scalars, lists, maps,
//! unresolved references, and constant-marked subtrees. YAML documents are
//! converted into this representation at class-load time; references are
//! resolved in a second phase after all classes are merged.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Ordered mapping with deterministic (sorted) iteration.
pub type Mapping = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A string containing at least one `${...}` reference token.
    Ref(String),
    List(Vec<Value>),
    Mapping(Mapping),
    /// A mapping overlaid by a reference assignment. Produced when a
    /// reference string is assigned over an existing mapping; during
    /// resolution the referenced value deep-merges over the base, so
    /// instance parameter keys overlay component defaults instead of
    /// clobbering them.
    RefOverlay(Box<Value>, String),
    /// A subtree whose key was marked constant (`=key`); later assignments
    /// to the key fail rendering.
    Constant(Box<Value>),
}

impl Value {
    /// Convert a freshly parsed YAML value into a parameter tree value.
    ///
    /// Strings containing reference tokens become [`Value::Ref`]; key
    /// markers (`=`, `+`) are preserved verbatim and interpreted during
    /// merging.
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Result<Value> {
        Ok(match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_yaml::Value::String(s) => {
                if s.contains("${") {
                    Value::Ref(s.clone())
                } else {
                    Value::String(s.clone())
                }
            }
            serde_yaml::Value::Sequence(seq) => {
                let mut list = Vec::with_capacity(seq.len());
                for item in seq {
                    list.push(Value::from_yaml(item)?);
                }
                Value::List(list)
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = Mapping::new();
                for (k, v) in map {
                    let key = yaml_key(k)?;
                    out.insert(key, Value::from_yaml(v)?);
                }
                Value::Mapping(out)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value)?,
        })
    }

    /// Convert back to YAML. Constant wrappers are transparent; unresolved
    /// references are emitted as their raw string form.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(b) => serde_yaml::Value::Bool(*b),
            Value::Int(i) => serde_yaml::Value::Number((*i).into()),
            Value::Float(f) => serde_yaml::Value::Number(serde_yaml::Number::from(*f)),
            Value::String(s) | Value::Ref(s) => serde_yaml::Value::String(s.clone()),
            Value::List(list) => {
                serde_yaml::Value::Sequence(list.iter().map(Value::to_yaml).collect())
            }
            Value::Mapping(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in map {
                    out.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
                }
                serde_yaml::Value::Mapping(out)
            }
            Value::RefOverlay(_, s) => serde_yaml::Value::String(s.clone()),
            Value::Constant(inner) => inner.to_yaml(),
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.unwrap_const(), Value::Mapping(_))
    }

    /// Strip constant markers for read access.
    pub fn unwrap_const(&self) -> &Value {
        match self {
            Value::Constant(inner) => inner.unwrap_const(),
            other => other,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self.unwrap_const() {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(map) => Some(map),
            Value::Constant(inner) => inner.as_mapping_mut(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self.unwrap_const() {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_const() {
            Value::String(s) | Value::Ref(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrap_const() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a nested value by key path.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self.unwrap_const();
        for key in path {
            current = current.as_mapping()?.get(*key)?.unwrap_const();
        }
        Some(current)
    }

    /// Render a scalar for embedding into a composite string.
    pub fn to_scalar_string(&self) -> Result<String> {
        match self.unwrap_const() {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::String(s) | Value::Ref(s) => Ok(s.clone()),
            other => Err(Error::render(format!(
                "can't interpolate complex value {} into a string",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Ref(_) => "reference",
            Value::List(_) => "list",
            Value::Mapping(_) => "mapping",
            Value::RefOverlay(..) => "reference overlay",
            Value::Constant(_) => "constant",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_scalar_string() {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

/// Mapping keys must be strings; scalar keys are coerced.
fn yaml_key(key: &serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::render(format!(
            "unsupported mapping key of type {:?}",
            other
        ))),
    }
}
