//! Output serialization: the emitted resource graph file.
//!
//! Resources are sorted by id and edges by endpoint pair so that two runs
//! over the same input serialize byte-identically. Property values use
//! their canonical forms (ids as strings, references as `"id#path"`),
//! which the input loader parses back through the templates.

use indexmap::IndexMap;
use serde::Serialize;

use stratus_core::{ResourceGraph, ResourceId, Value};

#[derive(Debug, Serialize)]
struct ResourceEntry {
    id: ResourceId,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    properties: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imported: Option<String>,
}

#[derive(Debug, Serialize)]
struct EdgeEntry {
    source: ResourceId,
    destination: ResourceId,
}

#[derive(Debug, Serialize)]
struct OutputFile {
    resources: Vec<ResourceEntry>,
    edges: Vec<EdgeEntry>,
}

/// Serializes a resource graph to the canonical YAML form.
pub fn serialize_graph(graph: &ResourceGraph) -> Result<String, serde_yaml::Error> {
    let resources = graph
        .resources_sorted()
        .into_iter()
        .map(|resource| ResourceEntry {
            id: resource.id.clone(),
            properties: resource.properties.clone(),
            imported: resource.imported.clone(),
        })
        .collect();
    let edges = graph
        .edges()
        .into_iter()
        .map(|(source, destination, _)| EdgeEntry {
            source,
            destination,
        })
        .collect();
    serde_yaml::to_string(&OutputFile { resources, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::{EdgeProps, Resource};

    #[test]
    fn serialization_is_sorted_and_canonical() {
        let mut graph = ResourceGraph::new();
        let b: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        let a: ResourceId = "aws:lambda_function::api".parse().unwrap();
        // Insert out of order; output must sort.
        graph.add_resource(Resource::new(b.clone())).unwrap();
        let mut lambda = Resource::new(a.clone());
        lambda
            .set_property(&"Subnets".parse().unwrap(), Value::List(vec![Value::Id(b.clone())]))
            .unwrap();
        graph.add_resource(lambda).unwrap();
        graph.add_edge(&a, &b, EdgeProps::default()).unwrap();

        let yaml = serialize_graph(&graph).unwrap();
        let lambda_pos = yaml.find("aws:lambda_function::api").unwrap();
        let subnet_pos = yaml.find("aws:subnet:vpc:private0").unwrap();
        assert!(lambda_pos < subnet_pos);
        // The subnet id appears as a vertex, inside the lambda's Subnets
        // property (a plain id string), and as the edge destination.
        assert_eq!(yaml.matches("aws:subnet:vpc:private0").count(), 3);
    }
}
