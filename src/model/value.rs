//! Property values and typed output references.
//!
//! References are explicit tokens (`{ ref: vpc, output: id }`) rather than
//! interpolated strings, so the graph builder can turn them into edges
//! without guessing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property map of a declared resource, ordered by property name.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Property map after references have been resolved, as sent to a provider.
pub type ResolvedProperties = BTreeMap<String, serde_json::Value>;

/// Output name that always resolves to the provider-assigned identifier.
pub const ID_OUTPUT: &str = "id";

/// A reference to an output of another declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputRef {
    /// Identifier of the referenced resource.
    #[serde(rename = "ref")]
    pub resource: String,
    /// Name of the referenced output.
    #[serde(default = "default_output")]
    pub output: String,
}

/// A declared property value.
///
/// Variant order matters for untagged deserialization: a map shaped like a
/// reference is read as [`PropertyValue::Ref`] before falling back to a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Reference to another resource's output.
    Ref(OutputRef),
    /// Explicit null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// List of values.
    List(Vec<PropertyValue>),
    /// Nested map of values.
    Map(BTreeMap<String, PropertyValue>),
}

fn default_output() -> String {
    String::from(ID_OUTPUT)
}

impl OutputRef {
    /// Creates a reference to `output` of `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref({}.{})", self.resource, self.output)
    }
}

impl PropertyValue {
    /// Shorthand for a reference value.
    #[must_use]
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Ref(OutputRef::new(resource, output))
    }

    /// Shorthand for a string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Collects every reference embedded in this value, depth first.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_refs(out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::String(_) => {}
        }
    }

    /// Returns every reference embedded in this value.
    #[must_use]
    pub fn refs(&self) -> Vec<&OutputRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    /// Returns true if the value references `resource` anywhere.
    #[must_use]
    pub fn references(&self, resource: &str) -> bool {
        self.refs().iter().any(|r| r.resource == resource)
    }

    /// Resolves references with `lookup`, producing a plain JSON value.
    ///
    /// # Errors
    ///
    /// Returns whatever `lookup` returns for a reference it cannot satisfy.
    pub fn resolve<E, F>(&self, lookup: &F) -> Result<serde_json::Value, E>
    where
        F: Fn(&OutputRef) -> Result<serde_json::Value, E>,
    {
        Ok(match self {
            Self::Ref(r) => lookup(r)?,
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(x) => serde_json::Value::from(*x),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
            Self::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.resolve(lookup)?);
                }
                serde_json::Value::Object(object)
            }
        })
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ref(r) => write!(f, "{r}"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<OutputRef> for PropertyValue {
    fn from(value: OutputRef) -> Self {
        Self::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_deserializes_as_token() {
        let value: PropertyValue = serde_yaml::from_str("{ ref: vpc, output: id }").unwrap();
        assert_eq!(value, PropertyValue::reference("vpc", "id"));
    }

    #[test]
    fn test_ref_output_defaults_to_id() {
        let value: PropertyValue = serde_yaml::from_str("ref: vpc").unwrap();
        assert_eq!(value, PropertyValue::reference("vpc", "id"));
    }

    #[test]
    fn test_map_with_extra_keys_is_not_a_ref() {
        let value: PropertyValue =
            serde_yaml::from_str("{ ref: vpc, output: id, note: x }").unwrap();
        assert!(matches!(value, PropertyValue::Map(_)));
        assert!(value.refs().is_empty());
    }

    #[test]
    fn test_nested_refs_are_collected() {
        let yaml = r"
subnets:
  - ref: subnet-a
  - ref: subnet-b
    output: arn
tags:
  owner: ops
";
        let value: PropertyValue = serde_yaml::from_str(yaml).unwrap();
        let refs: Vec<String> = value.refs().iter().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["ref(subnet-a.id)", "ref(subnet-b.arn)"]);
        assert!(value.references("subnet-b"));
        assert!(!value.references("vpc"));
    }

    #[test]
    fn test_resolve_replaces_refs() {
        let value = PropertyValue::List(vec![
            PropertyValue::reference("vpc", "id"),
            PropertyValue::from(80),
        ]);
        let resolved = value
            .resolve(&|r: &OutputRef| -> Result<serde_json::Value, String> {
                Ok(serde_json::Value::String(format!("{}-123", r.resource)))
            })
            .unwrap();
        assert_eq!(resolved, serde_json::json!(["vpc-123", 80]));
    }

    #[test]
    fn test_json_roundtrip_keeps_refs() {
        let value = PropertyValue::reference("alb", "dns_name");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"ref":"alb","output":"dns_name"}"#);
        let back: PropertyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
