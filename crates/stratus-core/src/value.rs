//! Property values.
//!
//! [`Value`] is the tagged union stored at every property slot. Values nest
//! through `List` and `Map`; cross-resource pointers are always represented
//! as [`ResourceId`] or [`PropertyRef`] values, never as owning references
//! (the graph is the arena; see the module docs on [`crate::graph`]).
//!
//! Canonical forms: ids serialize as their string form, property references
//! as `"id#path"`. Deserialization of bare scalars is intentionally literal
//! (a string stays a string); typed parsing happens template-side where the
//! declared property type is known.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PropertyError;
use crate::id::ResourceId;
use crate::path::PropertyPath;

/// A late-bound reference to another resource's property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub resource: ResourceId,
    pub path: PropertyPath,
}

impl PropertyRef {
    pub fn new(resource: ResourceId, path: PropertyPath) -> Self {
        PropertyRef { resource, path }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.path)
    }
}

impl FromStr for PropertyRef {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, path) = s.split_once('#').ok_or_else(|| PropertyError::InvalidId {
            value: s.to_string(),
        })?;
        Ok(PropertyRef {
            resource: id.parse()?,
            path: path.parse()?,
        })
    }
}

/// A provider-specific derived value (e.g. an ARN), resolved by the
/// downstream renderer rather than by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IaCValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceId>,
    pub property: String,
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Id(ResourceId),
    Ref(PropertyRef),
    Iac(IaCValue),
}

impl Value {
    /// Human-readable kind name, used in type-mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Id(_) => "resource",
            Value::Ref(_) => "property_ref",
            Value::Iac(_) => "iac_value",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&ResourceId> {
        match self {
            Value::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// All resource ids referenced by this value, recursively. Covers `Id`,
    /// `Ref`, and `Iac` variants nested anywhere in lists and maps.
    pub fn referenced_ids(&self) -> Vec<&ResourceId> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a ResourceId>) {
        match self {
            Value::Id(id) => out.push(id),
            Value::Ref(r) => out.push(&r.resource),
            Value::Iac(iac) => {
                if let Some(id) = &iac.resource {
                    out.push(id);
                }
            }
            Value::List(items) => {
                for item in items {
                    item.collect_ids(out);
                }
            }
            Value::Map(entries) => {
                for value in entries.values() {
                    value.collect_ids(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrites every embedded reference to `old` so it points at `new`.
    /// Returns `true` if anything changed.
    pub fn rewrite_id(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        match self {
            Value::Id(id) if id == old => {
                *id = new.clone();
                true
            }
            Value::Ref(r) if &r.resource == old => {
                r.resource = new.clone();
                true
            }
            Value::Iac(iac) if iac.resource.as_ref() == Some(old) => {
                iac.resource = Some(new.clone());
                true
            }
            Value::List(items) => {
                let mut changed = false;
                for item in items {
                    changed |= item.rewrite_id(old, new);
                }
                changed
            }
            Value::Map(entries) => {
                let mut changed = false;
                for value in entries.values_mut() {
                    changed |= value.rewrite_id(old, new);
                }
                changed
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ResourceId> for Value {
    fn from(id: ResourceId) -> Self {
        Value::Id(id)
    }
}

impl From<PropertyRef> for Value {
    fn from(r: PropertyRef) -> Self {
        Value::Ref(r)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Id(id) => serializer.serialize_str(&id.to_string()),
            Value::Ref(r) => serializer.serialize_str(&r.to_string()),
            Value::Iac(iac) => {
                let mut st = serializer.serialize_struct("IaCValue", 2)?;
                st.serialize_field("resource", &iac.resource)?;
                st.serialize_field("property", &iac.property)?;
                st.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::try_from(raw).map_err(D::Error::custom)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = PropertyError;

    fn try_from(raw: serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<_, PropertyError>>()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_ref_string_form() {
        let r = PropertyRef::new(
            "aws:rds_instance::db".parse().unwrap(),
            "Endpoint".parse().unwrap(),
        );
        assert_eq!(r.to_string(), "aws:rds_instance::db#Endpoint");
        let back: PropertyRef = "aws:rds_instance::db#Endpoint".parse().unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn id_serializes_as_string() {
        let v = Value::Id("aws:vpc::vpc".parse().unwrap());
        assert_eq!(serde_yaml::to_string(&v).unwrap().trim(), "aws:vpc::vpc");
    }

    #[test]
    fn referenced_ids_recurses() {
        let id: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        let v = Value::List(vec![
            Value::Id(id.clone()),
            Value::Map(IndexMap::from([(
                "ref".to_string(),
                Value::Ref(PropertyRef::new(id.clone(), "Type".parse().unwrap())),
            )])),
        ]);
        assert_eq!(v.referenced_ids().len(), 2);
    }

    #[test]
    fn rewrite_id_reaches_nested_values() {
        let old: ResourceId = "aws:vpc::old".parse().unwrap();
        let new: ResourceId = "aws:vpc::new".parse().unwrap();
        let mut v = Value::Map(IndexMap::from([(
            "vpcs".to_string(),
            Value::List(vec![Value::Id(old.clone())]),
        )]));
        assert!(v.rewrite_id(&old, &new));
        assert_eq!(v.referenced_ids(), vec![&new]);
    }
}
