//! Error types for the graph substrate and the property model.
//!
//! Uses `thiserror` for structured, matchable variants. The two enums mirror
//! the two halves of the crate: [`GraphError`] for vertex/edge operations and
//! [`PropertyError`] for property-path operations on a single resource.

use thiserror::Error;

use crate::id::ResourceId;

/// Errors produced by [`crate::graph::ResourceGraph`] mutations and queries.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Adding the edge would create a cycle in the deployment view.
    #[error("edge {from} -> {target} creates a cycle in the deployment order")]
    CycleIntroduced {
        from: ResourceId,
        target: ResourceId,
    },

    /// A vertex was not found in the graph.
    #[error("resource not found: {id}")]
    VertexMissing { id: ResourceId },

    /// A vertex with the same id already exists.
    #[error("resource already exists: {id}")]
    VertexExists { id: ResourceId },

    /// An edge was not found in the graph.
    #[error("edge not found: {from} -> {target}")]
    EdgeMissing {
        from: ResourceId,
        target: ResourceId,
    },

    /// An edge between the two vertices already exists.
    #[error("edge already exists: {from} -> {target}")]
    EdgeExists {
        from: ResourceId,
        target: ResourceId,
    },

    /// Non-cascading removal of a vertex that still has edges.
    #[error("resource {id} still has edges; remove them first or use cascade")]
    EdgesRemain { id: ResourceId },
}

/// Errors produced by property-path operations on resources.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// The value does not conform to the declared or inferred type at the path.
    #[error("type mismatch at '{path}' on {resource}: expected {expected}, got {actual}")]
    TypeMismatch {
        resource: ResourceId,
        path: String,
        expected: String,
        actual: String,
    },

    /// The property path does not resolve to an existing slot.
    #[error("property path '{path}' not found on {resource}")]
    PathNotFound { resource: ResourceId, path: String },

    /// Appending a duplicate value to a set-semantics property.
    #[error("value already present at '{path}' on {resource}")]
    UniqueViolation { resource: ResourceId, path: String },

    /// A required property is still unset.
    #[error("required property '{path}' is not set on {resource}")]
    RequiredMissing { resource: ResourceId, path: String },

    /// A string could not be parsed as a property path.
    #[error("invalid property path: '{path}'")]
    InvalidPath { path: String },

    /// A string could not be parsed as a resource id.
    #[error("invalid resource id: '{value}'")]
    InvalidId { value: String },
}
