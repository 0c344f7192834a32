//! Operational and configuration rules.
//!
//! Rules are declared on edge templates (`operational_rules`,
//! `configuration_rules`) and on individual properties
//! (`operational_rule`). The engine evaluates them through the
//! [`crate::dynamic::DynamicContext`]; this module is the pure data model.
//!
//! All string fields except `direction` may be minijinja templates; they are
//! rendered against the rule's dynamic data (`self`, `source`, `target`,
//! `index`) before use.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::Value;

/// Which side of the owning resource a step looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Downstream,
    Upstream,
}

/// How a step picks between multiple usable candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionOperator {
    /// Smallest id among the least-connected candidates first.
    #[default]
    Closest,
    /// Spread across candidates by current usage.
    Spread,
}

/// What to do when a step finds fewer matches than `num_needed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfMissing {
    /// Create the shortfall from the selector's template.
    #[default]
    Create,
    /// Report an error.
    Fail,
    /// Leave the property alone.
    Ignore,
}

/// Matches resources a step may select, and seeds the ones it creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSelector {
    /// Id selector, possibly templated and possibly partial
    /// (`aws:subnet`, `aws:iam_role:{{ short_name(self) }}-exec`).
    pub selector: String,
    /// Property values a candidate must carry; also applied to resources
    /// created from this selector.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,
    /// Classifications a candidate's template must carry in `is`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<String>,
}

/// One resource-selection step of an operational rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalStep {
    /// Templated id of the resource the step operates on. Property rules
    /// leave it empty (the owning resource is implied); edge rules set it
    /// to `{{ source.id }}` or `{{ target.id }}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSelector>,
    /// How many resources must be bound; selection stops once reached.
    #[serde(default = "default_num_needed")]
    pub num_needed: usize,
    #[serde(default, skip_serializing_if = "is_default_if_missing")]
    pub if_missing: IfMissing,
    /// Never reuse an existing resource; always create a dedicated one.
    #[serde(default)]
    pub unique: bool,
    /// When set, bind a property reference to this path on the selected
    /// resource instead of its id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_property_ref: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_selection")]
    pub selection_operator: SelectionOperator,
}

fn default_num_needed() -> usize {
    1
}

fn is_default_if_missing(v: &IfMissing) -> bool {
    *v == IfMissing::Create
}

fn is_default_selection(v: &SelectionOperator) -> bool {
    *v == SelectionOperator::Closest
}

/// A field assignment performed by a configuration rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Property path on the selected resource; templated.
    pub field: String,
    /// Value to assign; string leaves are templated, then parsed against
    /// the declared property type.
    pub value: Value,
}

/// Assigns a configuration to a resource named by a templated id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRule {
    /// Templated id of the resource to configure (`{{ source }}`,
    /// `aws:vpc:{{ short_name(target) }}`).
    pub resource: String,
    pub config: Configuration,
}

/// A rule on an edge template: optional condition, selection steps, and
/// follow-up configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalRule {
    /// Templated boolean expression; the rule is skipped when it evaluates
    /// falsy.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<OperationalStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration_rules: Vec<ConfigurationRule>,
}

/// A rule on a single property: one step that resolves the property's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRule {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub step: OperationalStep,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults() {
        let step: OperationalStep = serde_yaml::from_str(
            "direction: downstream\nresources:\n  - selector: aws:iam_role\n",
        )
        .unwrap();
        assert_eq!(step.num_needed, 1);
        assert_eq!(step.if_missing, IfMissing::Create);
        assert!(!step.unique);
        assert_eq!(step.selection_operator, SelectionOperator::Closest);
    }

    #[test]
    fn rule_if_field_round_trips() {
        let rule: OperationalRule = serde_yaml::from_str(
            "if: \"{{ has_downstream(self, 'aws:vpc') }}\"\nsteps: []\n",
        )
        .unwrap();
        assert!(rule.condition.is_some());
    }
}
