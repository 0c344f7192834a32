//! Input file formats: the construct file and the constraints file.
//!
//! The construct file accepts two resource spellings -- the authoring form
//! (`provider`/`type`/`name`) and the emitted form (`id` plus
//! `properties`) -- so a previously emitted graph feeds back in unchanged.
//! Properties of concrete resources parse against their template's
//! declared types, which is what makes id and reference strings round-trip
//! into typed values.

use indexmap::IndexMap;
use serde::Deserialize;

use stratus_core::{
    EdgeData, EnvironmentVariable, Resource, ResourceGraph, ResourceId, Value,
};
use stratus_engine::Constraint;
use stratus_kb::{KbError, KnowledgeBase};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceEntry {
    Emitted {
        id: ResourceId,
        #[serde(default)]
        properties: IndexMap<String, Value>,
        #[serde(default)]
        imported: Option<String>,
    },
    Authored {
        provider: String,
        #[serde(rename = "type")]
        rtype: String,
        name: String,
        #[serde(default)]
        namespace: String,
    },
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    id: ResourceId,
    #[serde(default)]
    metadata: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EdgeEntry {
    source: ResourceId,
    destination: ResourceId,
    #[serde(rename = "environmentVariables", default)]
    environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Deserialize)]
struct ConstructFile {
    #[serde(default)]
    resources: Vec<ResourceEntry>,
    #[serde(rename = "resourceMetadata", default)]
    resource_metadata: Vec<MetadataEntry>,
    #[serde(default)]
    edges: Vec<EdgeEntry>,
}

#[derive(Debug, Deserialize)]
struct ConstraintsFile {
    #[serde(default)]
    constraints: Vec<Constraint>,
}

/// Parses the construct file into a graph of constructs and concrete
/// resources.
pub fn load_construct_graph(raw: &str, kb: &KnowledgeBase) -> Result<ResourceGraph, KbError> {
    let file: ConstructFile = serde_yaml::from_str(raw)?;
    let mut graph = ResourceGraph::new();

    for entry in file.resources {
        let resource = match entry {
            ResourceEntry::Emitted {
                id,
                properties,
                imported,
            } => {
                let mut resource = Resource::new(id.clone());
                resource.imported = imported;
                for (name, value) in properties {
                    let parsed = typed_property(kb, &id, &name, value)?;
                    resource.properties.insert(name, parsed);
                }
                resource
            }
            ResourceEntry::Authored {
                provider,
                rtype,
                name,
                namespace,
            } => Resource::new(ResourceId::new(provider, rtype, namespace, name)),
        };
        graph
            .add_resource(resource)
            .map_err(|e| KbError::Inconsistency {
                reason: format!("invalid construct file: {e}"),
            })?;
    }

    for entry in file.resource_metadata {
        let Some(resource) = graph.resource_mut(&entry.id) else {
            return Err(KbError::Inconsistency {
                reason: format!("metadata references unknown resource {}", entry.id),
            });
        };
        for (name, value) in entry.metadata {
            resource.properties.insert(name, value);
        }
    }

    for entry in file.edges {
        let data = EdgeData {
            env_vars: entry.environment_variables,
            source: Some(entry.source.clone()),
            target: Some(entry.destination.clone()),
            ..Default::default()
        };
        graph
            .add_edge(
                &entry.source,
                &entry.destination,
                stratus_core::EdgeProps::with_data(data),
            )
            .map_err(|e| KbError::Inconsistency {
                reason: format!("invalid construct file edge: {e}"),
            })?;
    }
    Ok(graph)
}

/// Parses a property value against the declared template type when the
/// resource is concrete; constructs keep their metadata verbatim.
fn typed_property(
    kb: &KnowledgeBase,
    id: &ResourceId,
    name: &str,
    value: Value,
) -> Result<Value, KbError> {
    if id.is_abstract() {
        return Ok(value);
    }
    let template = kb.resource_template(id)?;
    match template.property(name) {
        Some(property) => Ok(property.property_type()?.parse_value(value)?),
        None => Ok(value),
    }
}

/// Parses the constraints file.
pub fn load_constraints(raw: &str) -> Result<Vec<Constraint>, serde_yaml::Error> {
    let file: ConstraintsFile = serde_yaml::from_str(raw)?;
    Ok(file.constraints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::embedded().unwrap()
    }

    #[test]
    fn loads_authored_constructs_with_metadata_and_edges() {
        let raw = r#"
resources:
  - provider: abstract
    type: execution_unit
    name: api
  - provider: abstract
    type: persist-orm
    name: db
resourceMetadata:
  - id: abstract:execution_unit::api
    metadata:
      dockerfile: ./Dockerfile
edges:
  - source: abstract:execution_unit::api
    destination: abstract:persist-orm::db
"#;
        let graph = load_construct_graph(raw, &kb()).unwrap();
        assert_eq!(graph.len(), 2);
        let api = graph
            .resource(&"abstract:execution_unit::api".parse().unwrap())
            .unwrap();
        assert_eq!(
            api.properties.get("dockerfile"),
            Some(&Value::from("./Dockerfile"))
        );
        assert!(graph
            .edge(
                &"abstract:execution_unit::api".parse().unwrap(),
                &"abstract:persist-orm::db".parse().unwrap()
            )
            .is_some());
    }

    #[test]
    fn emitted_form_parses_typed_properties() {
        let raw = r#"
resources:
  - id: aws:lambda_function::api
    properties:
      ExecutionRole: aws:iam_role::api-exec
      MemorySize: 512
      EnvironmentVariables:
        DB_ENDPOINT: "aws:rds_instance::db#Endpoint"
"#;
        let graph = load_construct_graph(raw, &kb()).unwrap();
        let lambda = graph
            .resource(&"aws:lambda_function::api".parse().unwrap())
            .unwrap();
        assert!(matches!(
            lambda.properties.get("ExecutionRole"),
            Some(Value::Id(_))
        ));
        assert!(matches!(
            lambda
                .get_property(&"EnvironmentVariables[\"DB_ENDPOINT\"]".parse().unwrap()),
            Some(Value::Ref(_))
        ));
    }

    #[test]
    fn environment_variables_ride_the_edge() {
        let raw = r#"
resources:
  - provider: abstract
    type: execution_unit
    name: api
  - provider: abstract
    type: persist-orm
    name: db
edges:
  - source: abstract:execution_unit::api
    destination: abstract:persist-orm::db
    environmentVariables:
      - name: DB_HOST
        property: Endpoint
"#;
        let graph = load_construct_graph(raw, &kb()).unwrap();
        let props = graph
            .edge(
                &"abstract:execution_unit::api".parse().unwrap(),
                &"abstract:persist-orm::db".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(props.data.env_vars.len(), 1);
        assert_eq!(props.data.env_vars[0].name, "DB_HOST");
    }

    #[test]
    fn constraints_file_parses_all_scopes() {
        let raw = r#"
constraints:
  - scope: construct
    operator: equals
    target: abstract:execution_unit::api
    type: lambda_function
  - scope: edge
    operator: must_contain
    target:
      source: abstract:execution_unit::api
      destination: abstract:persist-orm::db
    node: "aws:rds_proxy::"
  - scope: resource
    operator: equals
    target: aws:lambda_function::api
    property: MemorySize
    value: 1024
"#;
        let constraints = load_constraints(raw).unwrap();
        assert_eq!(constraints.len(), 3);
    }
}
