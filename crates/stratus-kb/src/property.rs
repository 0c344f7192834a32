//! Property schema.
//!
//! Resource templates declare their fields as [`Property`] entries with a
//! [`PropertyType`] drawn from a closed set. The type string grammar used in
//! template YAML is small and recursive:
//!
//! ```text
//! bool | int | float | string | any | property_ref
//! resource | resource(aws:subnet)
//! list(T) | set(T) | map(K,V)
//! ```
//!
//! Struct-shaped properties are declared by nesting `properties:` under a
//! property instead of a type parameter.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{PropertyError, PropertyRef, Resource, ResourceId, Value};

use crate::error::KbError;
use crate::rules::PropertyRule;

/// The closed set of property kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    String,
    /// A reference to another resource, optionally restricted to a
    /// `provider:type` selector.
    Resource(Option<ResourceId>),
    /// A late-bound `id#path` reference.
    PropertyRef,
    /// Anything; stored verbatim.
    Any,
    List(Box<PropertyType>),
    /// A list with uniqueness semantics on append.
    Set(Box<PropertyType>),
    Map(Box<PropertyType>, Box<PropertyType>),
    /// Nested fields, declared via `properties:` on the parent.
    Struct,
}

impl PropertyType {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::Bool => "bool",
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::String => "string",
            PropertyType::Resource(_) => "resource",
            PropertyType::PropertyRef => "property_ref",
            PropertyType::Any => "any",
            PropertyType::List(_) => "list",
            PropertyType::Set(_) => "set",
            PropertyType::Map(_, _) => "map",
            PropertyType::Struct => "struct",
        }
    }

    /// Checks a value against this type. `Null` conforms to every type;
    /// it means "unset".
    pub fn validates(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (PropertyType::Bool, Value::Bool(_)) => true,
            (PropertyType::Int, Value::Int(_)) => true,
            (PropertyType::Float, Value::Float(_) | Value::Int(_)) => true,
            (PropertyType::String, Value::String(_)) => true,
            (PropertyType::Resource(selector), Value::Id(id)) => selector
                .as_ref()
                .map(|sel| sel.matches(id))
                .unwrap_or(true),
            // A reference is as good as the id it resolves to.
            (PropertyType::Resource(_), Value::Ref(_) | Value::Iac(_)) => true,
            (PropertyType::PropertyRef, Value::Ref(_)) => true,
            (PropertyType::Any, _) => true,
            (PropertyType::List(item) | PropertyType::Set(item), Value::List(items)) => {
                items.iter().all(|v| item.validates(v))
            }
            (PropertyType::Map(_, value_type), Value::Map(entries)) => {
                entries.values().all(|v| value_type.validates(v))
            }
            (PropertyType::Struct, Value::Map(_)) => true,
            _ => false,
        }
    }

    /// Parses a loosely-typed value (e.g. from YAML or a rendered template)
    /// into this type's canonical representation: strings become ids for
    /// `resource`, `id#path` strings become refs for `property_ref`, and
    /// containers recurse.
    pub fn parse_value(&self, value: Value) -> Result<Value, PropertyError> {
        let mismatch = |actual: &Value| PropertyError::TypeMismatch {
            resource: ResourceId::default(),
            path: String::new(),
            expected: self.name().to_string(),
            actual: actual.type_name().to_string(),
        };
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (PropertyType::Resource(_), Value::String(s)) => {
                let id: ResourceId = s.parse()?;
                if self.validates(&Value::Id(id.clone())) {
                    Ok(Value::Id(id))
                } else {
                    Err(mismatch(&Value::Id(id)))
                }
            }
            (PropertyType::PropertyRef, Value::String(s)) => {
                let r: PropertyRef = s.parse()?;
                Ok(Value::Ref(r))
            }
            (PropertyType::Int, Value::String(s)) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch(&Value::String(s.clone()))),
            (PropertyType::Bool, Value::String(s)) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&Value::String(s.clone()))),
            },
            (PropertyType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (PropertyType::List(item) | PropertyType::Set(item), Value::List(items)) => {
                Ok(Value::List(
                    items
                        .into_iter()
                        .map(|v| item.parse_value(v))
                        .collect::<Result<_, _>>()?,
                ))
            }
            (PropertyType::Map(_, value_type), Value::Map(entries)) => Ok(Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, value_type.parse_value(v)?)))
                    .collect::<Result<IndexMap<String, Value>, PropertyError>>()?,
            )),
            (_, value) => {
                if self.validates(&value) {
                    Ok(value)
                } else {
                    Err(mismatch(&value))
                }
            }
        }
    }
}

impl FromStr for PropertyType {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || KbError::InvalidType { spec: s.to_string() };
        if let Some(inner) = strip_wrapper(s, "list") {
            return Ok(PropertyType::List(Box::new(inner.parse()?)));
        }
        if let Some(inner) = strip_wrapper(s, "set") {
            return Ok(PropertyType::Set(Box::new(inner.parse()?)));
        }
        if let Some(inner) = strip_wrapper(s, "map") {
            let (key, value) = inner.split_once(',').ok_or_else(invalid)?;
            return Ok(PropertyType::Map(
                Box::new(key.parse()?),
                Box::new(value.parse()?),
            ));
        }
        if let Some(inner) = strip_wrapper(s, "resource") {
            let selector: ResourceId = inner
                .parse()
                .map_err(|_| invalid())?;
            return Ok(PropertyType::Resource(Some(selector)));
        }
        match s {
            "bool" => Ok(PropertyType::Bool),
            "int" => Ok(PropertyType::Int),
            "float" => Ok(PropertyType::Float),
            "string" => Ok(PropertyType::String),
            "resource" => Ok(PropertyType::Resource(None)),
            "property_ref" => Ok(PropertyType::PropertyRef),
            "any" => Ok(PropertyType::Any),
            "struct" => Ok(PropertyType::Struct),
            _ => Err(invalid()),
        }
    }
}

fn strip_wrapper<'a>(s: &'a str, wrapper: &str) -> Option<&'a str> {
    s.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// One declared field of a resource template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    /// Field name; set from the template map key during load.
    #[serde(default, skip_serializing)]
    pub name: String,
    /// Type expression; see the module docs for the grammar.
    #[serde(rename = "type", default)]
    pub type_spec: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// The referenced resource becomes the owner namespace of the referrer.
    #[serde(default)]
    pub namespace: bool,
    /// Value only known at deploy time; the engine never requires it.
    #[serde(default)]
    pub deploy_time: bool,
    /// Excluded from constraint-driven configuration.
    #[serde(default)]
    pub configuration_disabled: bool,
    /// Literal or templated default, applied when nothing else set the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational_rule: Option<PropertyRule>,
    /// Nested fields for struct-shaped properties.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Property>,
}

impl Property {
    /// The parsed property type. Struct when only nested `properties` are
    /// declared; `any` when neither a type nor fields are given.
    pub fn property_type(&self) -> Result<PropertyType, KbError> {
        match &self.type_spec {
            Some(spec) => spec.parse(),
            None if !self.properties.is_empty() => Ok(PropertyType::Struct),
            None => Ok(PropertyType::Any),
        }
    }

    /// Resolves the `resource(...)` selector restriction, when present.
    pub fn resource_selector(&self) -> Option<ResourceId> {
        match self.property_type() {
            Ok(PropertyType::Resource(sel)) => sel,
            Ok(PropertyType::List(inner) | PropertyType::Set(inner)) => match *inner {
                PropertyType::Resource(sel) => sel,
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the property's type is list- or set-shaped, meaning
    /// operational rules append rather than overwrite.
    pub fn is_collection(&self) -> bool {
        matches!(
            self.property_type(),
            Ok(PropertyType::List(_) | PropertyType::Set(_))
        )
    }

    /// Reads the current value of this property off a resource.
    pub fn value_on<'a>(&self, resource: &'a Resource) -> Option<&'a Value> {
        resource.properties.get(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_type_expressions() {
        assert_eq!(
            "list(resource(aws:subnet))".parse::<PropertyType>().unwrap(),
            PropertyType::List(Box::new(PropertyType::Resource(Some(
                "aws:subnet".parse().unwrap()
            ))))
        );
        assert_eq!(
            "map(string,any)".parse::<PropertyType>().unwrap(),
            PropertyType::Map(Box::new(PropertyType::String), Box::new(PropertyType::Any))
        );
    }

    #[test]
    fn rejects_unknown_types() {
        assert!("tuple(int)".parse::<PropertyType>().is_err());
        assert!("list(".parse::<PropertyType>().is_err());
    }

    #[test]
    fn validates_resource_selector() {
        let t: PropertyType = "resource(aws:subnet)".parse().unwrap();
        assert!(t.validates(&Value::Id("aws:subnet:vpc:private0".parse().unwrap())));
        assert!(!t.validates(&Value::Id("aws:vpc::vpc".parse().unwrap())));
    }

    #[test]
    fn parse_value_coerces_id_strings() {
        let t: PropertyType = "resource".parse().unwrap();
        let parsed = t
            .parse_value(Value::String("aws:vpc::vpc".to_string()))
            .unwrap();
        assert_eq!(parsed, Value::Id("aws:vpc::vpc".parse().unwrap()));
    }

    #[test]
    fn parse_value_coerces_ref_strings() {
        let t: PropertyType = "property_ref".parse().unwrap();
        let parsed = t
            .parse_value(Value::String("aws:rds_instance::db#Endpoint".to_string()))
            .unwrap();
        assert!(matches!(parsed, Value::Ref(_)));
    }

    #[test]
    fn null_always_validates() {
        for spec in ["bool", "int", "resource", "list(string)"] {
            let t: PropertyType = spec.parse().unwrap();
            assert!(t.validates(&Value::Null), "{spec}");
        }
    }
}
