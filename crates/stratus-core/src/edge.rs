//! Edge payloads.
//!
//! Every edge in the dataflow view carries [`EdgeProps`]: a selection
//! weight, free-form attributes (used by path selection to leave
//! back-pointers such as `new_id`), and [`EdgeData`] describing what the
//! dependency needs from expansion and configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// An environment variable request riding on an edge: the source resource
/// wants `name` bound to the target's `property` at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub property: String,
}

/// Expansion and configuration context attached to an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Environment variables to bind on the source once the edge is configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvironmentVariable>,
    /// Resource types that must appear on the expanded path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_exist: Vec<ResourceId>,
    /// Resource types that must not appear on the expanded path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_exist: Vec<ResourceId>,
    /// The original endpoints of the dependency before expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ResourceId>,
}

impl EdgeData {
    pub fn is_empty(&self) -> bool {
        self.env_vars.is_empty()
            && self.must_exist.is_empty()
            && self.must_not_exist.is_empty()
            && self.source.is_none()
            && self.target.is_none()
    }
}

/// Properties carried by every dataflow edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeProps {
    /// Selection weight; higher is preferred. Only meaningful inside
    /// path-selection temp graphs.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub weight: i64,
    /// Free-form attributes (`new_id` back-pointers, markers).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Expansion context.
    #[serde(default, skip_serializing_if = "EdgeData::is_empty")]
    pub data: EdgeData,
    /// When set, the deployment view flips this edge's direction. Mirrors
    /// the owning edge template's `deployment_order_reversed` flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deployment_order_reversed: bool,
}

fn is_zero(w: &i64) -> bool {
    *w == 0
}

impl EdgeProps {
    pub fn with_weight(weight: i64) -> Self {
        EdgeProps {
            weight,
            ..Default::default()
        }
    }

    pub fn with_data(data: EdgeData) -> Self {
        EdgeProps {
            data,
            ..Default::default()
        }
    }
}
