//! The knowledge base: a read-only catalogue of resource templates, edge
//! templates, and construct functionality mappings.
//!
//! Built once at process start -- either from the embedded catalogue
//! compiled into the binary or from a directory named by the `KB_DIR`
//! environment variable -- and shared behind an `Arc` for the lifetime of
//! every run. A catalogue that fails its consistency check is unusable;
//! [`KbError::Inconsistency`] is fatal to the caller.
//!
//! Directory layout (mirrored by the embedded set):
//!
//! ```text
//! resources/<type>.yaml    one ResourceTemplate per file
//! edges.yaml               { edges: [EdgeTemplate, ...] }
//! constructs.yaml          { constructs: { capability: functionality } }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use stratus_core::{Resource, ResourceGraph, ResourceId, Value};

use crate::edge_template::EdgeTemplate;
use crate::error::KbError;
use crate::property::Property;
use crate::template::ResourceTemplate;

/// Environment variable that points at an on-disk catalogue overriding the
/// embedded one.
pub const KB_DIR_ENV: &str = "KB_DIR";

const EMBEDDED_RESOURCES: &[&str] = &[
    include_str!("../templates/resources/availability_zone.yaml"),
    include_str!("../templates/resources/ecr_image.yaml"),
    include_str!("../templates/resources/ecr_repo.yaml"),
    include_str!("../templates/resources/ecs_cluster.yaml"),
    include_str!("../templates/resources/ecs_service.yaml"),
    include_str!("../templates/resources/ecs_task_definition.yaml"),
    include_str!("../templates/resources/iam_role.yaml"),
    include_str!("../templates/resources/internet_gateway.yaml"),
    include_str!("../templates/resources/lambda_function.yaml"),
    include_str!("../templates/resources/log_group.yaml"),
    include_str!("../templates/resources/nat_gateway.yaml"),
    include_str!("../templates/resources/rds_instance.yaml"),
    include_str!("../templates/resources/rds_proxy.yaml"),
    include_str!("../templates/resources/rds_proxy_target_group.yaml"),
    include_str!("../templates/resources/rds_subnet_group.yaml"),
    include_str!("../templates/resources/route_table.yaml"),
    include_str!("../templates/resources/secret.yaml"),
    include_str!("../templates/resources/secret_version.yaml"),
    include_str!("../templates/resources/security_group.yaml"),
    include_str!("../templates/resources/subnet.yaml"),
    include_str!("../templates/resources/vpc.yaml"),
];
const EMBEDDED_EDGES: &str = include_str!("../templates/edges.yaml");
const EMBEDDED_CONSTRUCTS: &str = include_str!("../templates/constructs.yaml");

#[derive(Debug, Deserialize)]
struct EdgeFile {
    edges: Vec<EdgeTemplate>,
}

#[derive(Debug, Default, Deserialize)]
struct ConstructFile {
    constructs: IndexMap<String, String>,
}

/// The catalogue.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    templates: IndexMap<String, ResourceTemplate>,
    edges: Vec<EdgeTemplate>,
    edge_index: HashMap<(String, String), usize>,
    /// Construct capability -> functionality classification.
    constructs: IndexMap<String, String>,
}

impl KnowledgeBase {
    /// An empty catalogue, for tests that build their own.
    pub fn empty() -> Self {
        KnowledgeBase::default()
    }

    /// Loads the catalogue: `KB_DIR` when set, embedded otherwise.
    pub fn load() -> Result<Self, KbError> {
        match std::env::var(KB_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => {
                debug!(dir, "loading knowledge base from directory");
                Self::from_dir(Path::new(&dir))
            }
            _ => Self::embedded(),
        }
    }

    /// The catalogue compiled into the binary.
    pub fn embedded() -> Result<Self, KbError> {
        let mut templates = Vec::with_capacity(EMBEDDED_RESOURCES.len());
        for raw in EMBEDDED_RESOURCES {
            templates.push(serde_yaml::from_str(raw)?);
        }
        let edge_file: EdgeFile = serde_yaml::from_str(EMBEDDED_EDGES)?;
        let construct_file: ConstructFile = serde_yaml::from_str(EMBEDDED_CONSTRUCTS)?;
        Self::from_parts(templates, edge_file.edges, construct_file.constructs)
    }

    /// Loads a catalogue from a directory (see the module docs for layout).
    pub fn from_dir(dir: &Path) -> Result<Self, KbError> {
        let mut templates = Vec::new();
        let resource_dir = dir.join("resources");
        let mut entries: Vec<_> = std::fs::read_dir(&resource_dir)?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                let raw = std::fs::read_to_string(&path)?;
                templates.push(serde_yaml::from_str(&raw)?);
            }
        }
        let edge_file: EdgeFile =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("edges.yaml"))?)?;
        let constructs = match std::fs::read_to_string(dir.join("constructs.yaml")) {
            Ok(raw) => serde_yaml::from_str::<ConstructFile>(&raw)?.constructs,
            Err(_) => IndexMap::new(),
        };
        Self::from_parts(templates, edge_file.edges, constructs)
    }

    /// Assembles and consistency-checks a catalogue.
    pub fn from_parts(
        templates: Vec<ResourceTemplate>,
        edges: Vec<EdgeTemplate>,
        constructs: IndexMap<String, String>,
    ) -> Result<Self, KbError> {
        let mut by_type = IndexMap::new();
        for mut template in templates {
            patch_property_names(&mut template.properties);
            validate_template(&template)?;
            if by_type.contains_key(&template.qualified_type) {
                return Err(KbError::Inconsistency {
                    reason: format!(
                        "duplicate resource template '{}'",
                        template.qualified_type
                    ),
                });
            }
            by_type.insert(template.qualified_type.clone(), template);
        }
        let mut edge_index = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            for endpoint in [&edge.source, &edge.target] {
                if !by_type.contains_key(endpoint) {
                    return Err(KbError::Inconsistency {
                        reason: format!(
                            "edge template {} -> {} references unknown type '{endpoint}'",
                            edge.source, edge.target
                        ),
                    });
                }
            }
            if edge_index.insert(edge.key(), i).is_some() {
                return Err(KbError::Inconsistency {
                    reason: format!(
                        "duplicate edge template {} -> {}",
                        edge.source, edge.target
                    ),
                });
            }
        }
        Ok(KnowledgeBase {
            templates: by_type,
            edges,
            edge_index,
            constructs,
        })
    }

    pub fn templates(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.templates.values()
    }

    pub fn get_template(&self, qualified_type: &str) -> Result<&ResourceTemplate, KbError> {
        self.templates
            .get(qualified_type)
            .ok_or_else(|| KbError::TemplateNotFound {
                qualified_type: qualified_type.to_string(),
            })
    }

    /// Template for a resource id; every resource type has exactly one.
    pub fn resource_template(&self, id: &ResourceId) -> Result<&ResourceTemplate, KbError> {
        self.get_template(&id.qualified_type())
    }

    pub fn edge_template(&self, source_type: &str, target_type: &str) -> Option<&EdgeTemplate> {
        self.edge_index
            .get(&(source_type.to_string(), target_type.to_string()))
            .map(|i| &self.edges[*i])
    }

    pub fn edge_template_for(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Option<&EdgeTemplate> {
        self.edge_template(&source.qualified_type(), &target.qualified_type())
    }

    pub fn edges_with_source(&self, source_type: &str) -> Vec<&EdgeTemplate> {
        self.edges
            .iter()
            .filter(|e| e.source == source_type)
            .collect()
    }

    pub fn edges_with_target(&self, target_type: &str) -> Vec<&EdgeTemplate> {
        self.edges
            .iter()
            .filter(|e| e.target == target_type)
            .collect()
    }

    /// The functionality classification a construct capability expands into.
    pub fn functionality_for_capability(&self, capability: &str) -> Option<&str> {
        self.constructs.get(capability).map(String::as_str)
    }

    /// Templates whose classification provides `functionality`.
    pub fn templates_with_classification(&self, functionality: &str) -> Vec<&ResourceTemplate> {
        self.templates
            .values()
            .filter(|t| t.has_classification(functionality))
            .collect()
    }

    /// Instantiates a zero-valued resource for `id` from its template.
    pub fn create_resource(&self, id: &ResourceId) -> Result<Resource, KbError> {
        self.resource_template(id)?.create_resource(id.clone())
    }

    /// The resource owning `id`'s namespace, read through the template's
    /// namespace property.
    pub fn namespace_resource(
        &self,
        graph: &ResourceGraph,
        id: &ResourceId,
    ) -> Option<ResourceId> {
        let template = self.resource_template(id).ok()?;
        let property = template.namespace_property()?;
        let resource = graph.resource(id)?;
        match resource.properties.get(&property.name) {
            Some(Value::Id(owner)) => Some(owner.clone()),
            Some(Value::Ref(r)) => Some(r.resource.clone()),
            _ => None,
        }
    }

    /// All type-level paths from `source_type` to `target_type` over the
    /// edge templates, sorted by length then lexicographic type names. When
    /// `classification` is non-empty every intermediate type must carry it.
    pub fn type_paths(
        &self,
        source_type: &str,
        target_type: &str,
        classification: &str,
    ) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut stack = vec![source_type.to_string()];
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(source_type.to_string());
        self.collect_type_paths(
            source_type,
            target_type,
            classification,
            &mut stack,
            &mut visited,
            &mut paths,
        );
        paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        paths
    }

    fn collect_type_paths(
        &self,
        current: &str,
        target: &str,
        classification: &str,
        stack: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if current == target {
            paths.push(stack.clone());
            return;
        }
        for edge in self.edges_with_source(current) {
            let next = &edge.target;
            if visited.contains(next) {
                continue;
            }
            // Intermediates must satisfy the requested classification;
            // the final target is exempt.
            if next != target && !classification.is_empty() {
                let satisfies = self
                    .get_template(next)
                    .map(|t| t.has_classification(classification))
                    .unwrap_or(false)
                    || edge.classification.iter().any(|c| c == classification);
                if !satisfies {
                    continue;
                }
            }
            visited.insert(next.clone());
            stack.push(next.clone());
            self.collect_type_paths(next, target, classification, stack, visited, paths);
            stack.pop();
            visited.remove(next);
        }
    }
}

fn patch_property_names(properties: &mut IndexMap<String, Property>) {
    for (name, property) in properties.iter_mut() {
        property.name = name.clone();
        patch_property_names(&mut property.properties);
    }
}

fn validate_template(template: &ResourceTemplate) -> Result<(), KbError> {
    if template.qualified_type.split(':').count() != 2 {
        return Err(KbError::Inconsistency {
            reason: format!("malformed qualified type '{}'", template.qualified_type),
        });
    }
    let namespaces = template
        .properties
        .values()
        .filter(|p| p.namespace)
        .count();
    if namespaces > 1 {
        return Err(KbError::Inconsistency {
            reason: format!(
                "template '{}' declares {namespaces} namespace properties",
                template.qualified_type
            ),
        });
    }
    validate_properties(&template.qualified_type, &template.properties)
}

fn validate_properties(
    qualified: &str,
    properties: &IndexMap<String, Property>,
) -> Result<(), KbError> {
    for property in properties.values() {
        property.property_type().map_err(|_| KbError::Inconsistency {
            reason: format!(
                "template '{qualified}' property '{}' has an invalid type",
                property.name
            ),
        })?;
        validate_properties(qualified, &property.properties)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_catalogue_is_consistent() {
        let kb = KnowledgeBase::embedded().unwrap();
        assert!(kb.get_template("aws:lambda_function").is_ok());
        assert!(kb
            .edge_template("aws:lambda_function", "aws:iam_role")
            .is_some());
        assert_eq!(kb.functionality_for_capability("execution_unit"), Some("compute"));
    }

    #[test]
    fn missing_template_reports_not_found() {
        let kb = KnowledgeBase::embedded().unwrap();
        let err = kb.get_template("aws:quantum_database").unwrap_err();
        assert!(matches!(err, KbError::TemplateNotFound { .. }));
    }

    #[test]
    fn duplicate_edge_is_inconsistent() {
        let templates = vec![
            serde_yaml::from_str("qualified_type: aws:a\n").unwrap(),
            serde_yaml::from_str("qualified_type: aws:b\n").unwrap(),
        ];
        let edge: EdgeTemplate =
            serde_yaml::from_str("source: aws:a\ntarget: aws:b\n").unwrap();
        let err = KnowledgeBase::from_parts(
            templates,
            vec![edge.clone(), edge],
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, KbError::Inconsistency { .. }));
    }

    #[test]
    fn dangling_edge_endpoint_is_inconsistent() {
        let templates = vec![serde_yaml::from_str("qualified_type: aws:a\n").unwrap()];
        let edge: EdgeTemplate =
            serde_yaml::from_str("source: aws:a\ntarget: aws:missing\n").unwrap();
        let err =
            KnowledgeBase::from_parts(templates, vec![edge], IndexMap::new()).unwrap_err();
        assert!(matches!(err, KbError::Inconsistency { .. }));
    }

    #[test]
    fn type_paths_sorted_and_classified() {
        let kb = KnowledgeBase::embedded().unwrap();
        let paths = kb.type_paths("aws:lambda_function", "aws:rds_instance", "");
        assert!(!paths.is_empty());
        // The direct dependency is the shortest path.
        assert_eq!(
            paths[0],
            vec!["aws:lambda_function".to_string(), "aws:rds_instance".to_string()]
        );
        // The proxy route is present as a longer alternative.
        assert!(paths.iter().any(|p| p
            .iter()
            .any(|t| t == "aws:rds_proxy_target_group")));
    }
}
