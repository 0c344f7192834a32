//! Resource identity.
//!
//! Every vertex in a [`crate::graph::ResourceGraph`] is addressed by a
//! [`ResourceId`]: a `(provider, type, namespace, name)` tuple with a total
//! order and a canonical string form `provider:type:namespace:name`.
//!
//! IDs double as selectors: an id with empty fields matches any id whose
//! corresponding fields are filled (see [`ResourceId::matches`]). The
//! reserved provider [`PROVIDER_ABSTRACT`] marks construct nodes, which only
//! exist in the input graph and are erased during expansion.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PropertyError;

/// Provider value reserved for abstract constructs.
pub const PROVIDER_ABSTRACT: &str = "abstract";

/// Identity of a resource: provider, type, namespace, and name.
///
/// Totally ordered by field order so that every listing, path sort, and
/// tie-break in the engine is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub provider: String,
    pub rtype: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        provider: impl Into<String>,
        rtype: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ResourceId {
            provider: provider.into(),
            rtype: rtype.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns `true` if every field is empty.
    pub fn is_zero(&self) -> bool {
        self.provider.is_empty()
            && self.rtype.is_empty()
            && self.namespace.is_empty()
            && self.name.is_empty()
    }

    /// Returns `true` if this id refers to an abstract construct.
    pub fn is_abstract(&self) -> bool {
        self.provider == PROVIDER_ABSTRACT
    }

    /// The `provider:type` prefix shared by all resources of one template.
    pub fn qualified_type(&self) -> String {
        format!("{}:{}", self.provider, self.rtype)
    }

    /// Selector match: empty fields on `self` act as wildcards.
    ///
    /// `aws:subnet` matches `aws:subnet:vpc:private0`, and
    /// `aws:subnet::private0` matches any subnet named `private0` in any
    /// namespace. A filled selector field must match exactly.
    pub fn matches(&self, other: &ResourceId) -> bool {
        (self.provider.is_empty() || self.provider == other.provider)
            && (self.rtype.is_empty() || self.rtype == other.rtype)
            && (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }

    /// Type-only projection, keeping provider, type, and namespace.
    pub fn with_any_name(&self) -> ResourceId {
        ResourceId {
            provider: self.provider.clone(),
            rtype: self.rtype.clone(),
            namespace: self.namespace.clone(),
            name: String::new(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.provider, self.rtype, self.namespace, self.name
        )
    }
}

impl FromStr for ResourceId {
    type Err = PropertyError;

    /// Parses `provider:type[:namespace]:name`.
    ///
    /// Three-part ids elide the namespace (`aws:iam_role:api-exec`), four-part
    /// ids spell it out (`aws:subnet:vpc:private0`, `abstract:execution_unit::api`).
    /// Two-part ids are bare type selectors (`aws:subnet`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.len() {
            2 => Ok(ResourceId::new(parts[0], parts[1], "", "")),
            3 => Ok(ResourceId::new(parts[0], parts[1], "", parts[2])),
            4 => Ok(ResourceId::new(parts[0], parts[1], parts[2], parts[3])),
            _ => Err(PropertyError::InvalidId {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_empty_namespace_slot() {
        let id = ResourceId::new("abstract", "execution_unit", "", "api");
        assert_eq!(id.to_string(), "abstract:execution_unit::api");
    }

    #[test]
    fn parse_three_part_elides_namespace() {
        let id: ResourceId = "aws:iam_role:api-exec".parse().unwrap();
        assert_eq!(id, ResourceId::new("aws", "iam_role", "", "api-exec"));
    }

    #[test]
    fn parse_four_part() {
        let id: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        assert_eq!(id.namespace, "vpc");
        assert_eq!(id.name, "private0");
    }

    #[test]
    fn parse_type_selector() {
        let id: ResourceId = "aws:subnet".parse().unwrap();
        assert!(id.name.is_empty());
        assert!(id.namespace.is_empty());
    }

    #[test]
    fn parse_rejects_extra_fields() {
        assert!("a:b:c:d:e".parse::<ResourceId>().is_err());
    }

    #[test]
    fn selector_matching() {
        let selector: ResourceId = "aws:subnet".parse().unwrap();
        let concrete: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        assert!(selector.matches(&concrete));
        assert!(!concrete.matches(&selector));
    }

    #[test]
    fn ordering_is_field_order() {
        let a: ResourceId = "aws:lambda_function::api".parse().unwrap();
        let b: ResourceId = "aws:subnet::private0".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let id = ResourceId::new("aws", "subnet", "vpc", "private0");
        let yaml = serde_yaml::to_string(&id).unwrap();
        assert_eq!(yaml.trim(), "aws:subnet:vpc:private0");
        let back: ResourceId = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, id);
    }
}
