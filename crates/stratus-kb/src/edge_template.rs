//! Edge templates.
//!
//! An [`EdgeTemplate`] declares that a dataflow dependency between two
//! resource types is valid, how it maps onto deployment order, whether it is
//! unique per endpoint, and which rules run when an edge of this type is
//! configured.

use serde::{Deserialize, Serialize};

use stratus_core::ResourceId;

use crate::rules::{ConfigurationRule, OperationalRule};

/// Uniqueness flags for an edge type.
///
/// `source: true` allows each source resource at most one outgoing edge of
/// this template; `target: true` allows each target resource at most one
/// incoming edge of this template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unique {
    #[serde(default)]
    pub source: bool,
    #[serde(default)]
    pub target: bool,
}

impl Unique {
    /// Whether adding `src -> dst` keeps the existing edge set within the
    /// uniqueness flags. `existing` holds concrete edges of this template's
    /// type pair; an already-present identical edge is always allowed.
    pub fn can_add(
        &self,
        existing: &[(ResourceId, ResourceId)],
        src: &ResourceId,
        dst: &ResourceId,
    ) -> bool {
        if existing.iter().any(|(s, t)| s == src && t == dst) {
            return true;
        }
        if self.source && existing.iter().any(|(s, t)| s == src && t != dst) {
            return false;
        }
        if self.target && existing.iter().any(|(s, t)| t == dst && s != src) {
            return false;
        }
        true
    }
}

/// Catalogue entry for one valid `source -> target` dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTemplate {
    /// `provider:type` of the dataflow source.
    pub source: String,
    /// `provider:type` of the dataflow target.
    pub target: String,
    /// Deployment order runs opposite to the dataflow direction.
    #[serde(default)]
    pub deployment_order_reversed: bool,
    #[serde(default, skip_serializing_if = "is_default_unique")]
    pub unique: Unique,
    /// Classifications this edge satisfies when used inside a path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classification: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operational_rules: Vec<OperationalRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration_rules: Vec<ConfigurationRule>,
}

fn is_default_unique(u: &Unique) -> bool {
    *u == Unique::default()
}

impl EdgeTemplate {
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn unique_source_blocks_second_target() {
        let unique = Unique {
            source: true,
            target: false,
        };
        let existing = vec![(id("aws:tg::a"), id("aws:rds_instance::db1"))];
        assert!(!unique.can_add(&existing, &id("aws:tg::a"), &id("aws:rds_instance::db2")));
        assert!(unique.can_add(&existing, &id("aws:tg::b"), &id("aws:rds_instance::db2")));
    }

    #[test]
    fn existing_edge_is_always_allowed() {
        let unique = Unique {
            source: true,
            target: true,
        };
        let existing = vec![(id("aws:tg::a"), id("aws:rds_instance::db1"))];
        assert!(unique.can_add(&existing, &id("aws:tg::a"), &id("aws:rds_instance::db1")));
    }

    #[test]
    fn unique_target_blocks_second_source() {
        let unique = Unique {
            source: false,
            target: true,
        };
        let existing = vec![(id("aws:lambda_function::a"), id("aws:log_group::lg"))];
        assert!(!unique.can_add(
            &existing,
            &id("aws:lambda_function::b"),
            &id("aws:log_group::lg")
        ));
    }
}
