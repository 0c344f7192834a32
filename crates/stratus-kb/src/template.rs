//! Resource templates.
//!
//! A [`ResourceTemplate`] is the catalogue entry for one `provider:type`:
//! its classification, its declared properties in order, and the path
//! satisfaction classes path selection consults when the resource appears
//! inside an expanded path.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{Resource, ResourceId, Value};

use crate::error::KbError;
use crate::property::Property;

/// What a resource is and what it can give to other functionality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Functionality and traits this type provides (`compute`, `storage`,
    /// `network`, `serverless`, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is: Vec<String>,
    /// Attributes this type can contribute to another functionality when
    /// attached during construct expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gives: Vec<Gives>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gives {
    pub attribute: String,
    pub functionality: String,
}

/// Path-satisfaction classes: which classifications this type needs
/// satisfied when it acts as a path source or target. Path selection uses
/// these to enqueue sub-expansions (§ path materialization).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSatisfaction {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub as_source: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub as_target: Vec<String>,
}

/// Constraints on when a resource of this type may be deleted during
/// graph cleanup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteContext {
    #[serde(default)]
    pub requires_no_upstream: bool,
    #[serde(default)]
    pub requires_no_downstream: bool,
}

/// Catalogue entry for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// `provider:type`.
    pub qualified_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub path_satisfaction: PathSatisfaction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_context: Option<DeleteContext>,
    /// Boolean template expressions evaluated against a candidate's path
    /// context during path selection. A failing check demotes the candidate
    /// rather than excluding it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validity_checks: Vec<String>,
    /// The resource renders to no provider primitive (pure grouping node).
    #[serde(default)]
    pub no_iac: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Property>,
}

impl ResourceTemplate {
    /// Provider half of the qualified type.
    pub fn provider(&self) -> &str {
        self.qualified_type
            .split_once(':')
            .map(|(p, _)| p)
            .unwrap_or(&self.qualified_type)
    }

    /// Type half of the qualified type.
    pub fn type_name(&self) -> &str {
        self.qualified_type
            .split_once(':')
            .map(|(_, t)| t)
            .unwrap_or(&self.qualified_type)
    }

    /// Declared properties in template order.
    pub fn properties_in_order(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// The property flagged `namespace: true`, if any. At most one is
    /// allowed; the loader enforces that.
    pub fn namespace_property(&self) -> Option<&Property> {
        self.properties.values().find(|p| p.namespace)
    }

    pub fn has_classification(&self, class: &str) -> bool {
        self.classification.is.iter().any(|c| c == class)
    }

    /// Whether attaching a resource of this type contributes `attribute`
    /// to a construct of the given functionality.
    pub fn gives_attribute(&self, attribute: &str, functionality: &str) -> bool {
        self.classification
            .gives
            .iter()
            .any(|g| g.attribute == attribute && g.functionality == functionality)
    }

    /// A resource type with no functionality of its own is glue: it exists
    /// only to connect functional resources (roles, images, route tables).
    pub fn is_glue(&self) -> bool {
        self.classification.is.is_empty()
    }

    /// Instantiates a resource of this type with zero-value properties.
    pub fn create_resource(&self, id: ResourceId) -> Result<Resource, KbError> {
        if id.qualified_type() != self.qualified_type {
            return Err(KbError::Inconsistency {
                reason: format!(
                    "cannot create {id} from template {}",
                    self.qualified_type
                ),
            });
        }
        Ok(Resource::new(id))
    }

    /// The declared type at a property path, following map/list/struct
    /// nesting. `None` when the path leaves the declared schema.
    pub fn property_type_at(
        &self,
        path: &stratus_core::PropertyPath,
    ) -> Option<crate::property::PropertyType> {
        use crate::property::PropertyType;
        use stratus_core::PathSegment;

        let mut segments = path.segments().iter();
        let root = match segments.next()? {
            PathSegment::Field(name) | PathSegment::Key(name) => self.property(name)?,
            PathSegment::Index(_) => return None,
        };
        let mut current = root.property_type().ok()?;
        let mut struct_props = Some(&root.properties);
        for segment in segments {
            match (&current, segment) {
                (PropertyType::Map(_, value), PathSegment::Key(_) | PathSegment::Field(_)) => {
                    current = (**value).clone();
                    struct_props = None;
                }
                (PropertyType::List(item) | PropertyType::Set(item), PathSegment::Index(_)) => {
                    current = (**item).clone();
                    struct_props = None;
                }
                (PropertyType::Struct, PathSegment::Field(name) | PathSegment::Key(name)) => {
                    let nested = struct_props?.get(name)?;
                    current = nested.property_type().ok()?;
                    struct_props = Some(&nested.properties);
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Required properties whose current value is null or absent.
    pub fn missing_required<'a>(&'a self, resource: &Resource) -> Vec<&'a Property> {
        self.properties
            .values()
            .filter(|p| p.required && !p.deploy_time)
            .filter(|p| {
                resource
                    .properties
                    .get(&p.name)
                    .map(Value::is_null)
                    .unwrap_or(true)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(yaml: &str) -> ResourceTemplate {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn qualified_type_halves() {
        let t = template("qualified_type: aws:lambda_function\n");
        assert_eq!(t.provider(), "aws");
        assert_eq!(t.type_name(), "lambda_function");
    }

    #[test]
    fn missing_required_ignores_deploy_time() {
        let t = template(
            r#"
qualified_type: aws:rds_instance
properties:
  SubnetGroup:
    type: resource(aws:rds_subnet_group)
    required: true
  Endpoint:
    type: string
    required: true
    deploy_time: true
"#,
        );
        let r = Resource::new("aws:rds_instance::db".parse().unwrap());
        let missing: Vec<&str> = t
            .missing_required(&r)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        // Property names are patched in by the loader; raw deserialization
        // leaves them empty, so compare against the count only.
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn glue_detection() {
        let glue = template("qualified_type: aws:route_table\n");
        assert!(glue.is_glue());
        let functional = template(
            "qualified_type: aws:lambda_function\nclassification:\n  is: [compute]\n",
        );
        assert!(!functional.is_glue());
    }
}
