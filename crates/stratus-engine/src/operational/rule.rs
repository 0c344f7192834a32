//! Rule-directed resource selection and field binding.
//!
//! [`RuleRunner`] executes the rules declared in the knowledge base:
//! property rules resolve a single property by selecting (or creating) a
//! resource in the step's direction; edge rules run steps and
//! configuration assignments for a configured dependency.
//!
//! Selection order is deterministic: existing direct neighbors first, then
//! (unless the step is `unique`) any usable graph resource sorted by id --
//! or by connection count for `spread` steps -- and creation only for the
//! remaining shortfall.

use indexmap::IndexMap;
use tracing::debug;

use stratus_core::{
    PropertyError, PropertyPath, PropertyRef, Resource, ResourceId, Value,
};
use stratus_kb::{
    ConfigurationRule, Direction, DynamicData, IfMissing, OperationalRule, OperationalStep,
    Property, PropertyType, ResourceSelector, SelectionOperator,
};

use crate::error::EngineError;
use crate::solution::{Decision, SolutionContext};

/// Executes operational and configuration rules against a solution.
pub struct RuleRunner<'a> {
    pub ctx: &'a mut SolutionContext,
}

/// What one property rule did: whether the graph changed, and the owner's
/// id afterwards (renamed when the rule set a namespace property).
pub struct PropertyRuleOutcome {
    pub changed: bool,
    pub owner: ResourceId,
}

struct StepOutcome {
    selected: Vec<ResourceId>,
    owner: ResourceId,
}

impl<'a> RuleRunner<'a> {
    pub fn new(ctx: &'a mut SolutionContext) -> Self {
        RuleRunner { ctx }
    }

    /// Runs an edge-template rule: condition, then steps, then
    /// configuration assignments.
    pub fn handle_rule(
        &mut self,
        rule: &OperationalRule,
        data: &DynamicData,
    ) -> Result<(), EngineError> {
        let dynamic = self.ctx.dynamic();
        if !dynamic.eval_condition(rule.condition.as_deref(), data)? {
            return Ok(());
        }
        for step in &rule.steps {
            let owner = match &step.resource {
                Some(template) => dynamic.render_id(template, data)?,
                None => data
                    .resource
                    .clone()
                    .ok_or_else(|| PropertyError::InvalidId {
                        value: "operational step has no owning resource".to_string(),
                    })
                    .map_err(EngineError::Property)?,
            };
            self.handle_step(&owner, None, step, data)?;
        }
        for configuration in &rule.configuration_rules {
            self.apply_configuration(configuration, data)?;
        }
        Ok(())
    }

    /// Resolves one property through its operational rule.
    pub fn handle_property_rule(
        &mut self,
        owner: &ResourceId,
        property: &Property,
    ) -> Result<PropertyRuleOutcome, EngineError> {
        let unchanged = || PropertyRuleOutcome {
            changed: false,
            owner: owner.clone(),
        };
        let Some(rule) = &property.operational_rule else {
            return Ok(unchanged());
        };
        let already_set = self
            .ctx
            .graph
            .resource(owner)
            .and_then(|r| property.value_on(r))
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if already_set {
            return Ok(unchanged());
        }
        let data = DynamicData::for_resource(owner.clone());
        let dynamic = self.ctx.dynamic();
        if !dynamic.eval_condition(rule.condition.as_deref(), &data)? {
            return Ok(unchanged());
        }
        let outcome = self.handle_step(owner, Some(property), &rule.step, &data)?;
        Ok(PropertyRuleOutcome {
            changed: !outcome.selected.is_empty(),
            owner: outcome.owner,
        })
    }

    /// Executes one step for `owner`: select existing resources, create the
    /// shortfall, wire edges, and bind the property (when one is given).
    fn handle_step(
        &mut self,
        owner: &ResourceId,
        property: Option<&Property>,
        step: &OperationalStep,
        data: &DynamicData,
    ) -> Result<StepOutcome, EngineError> {
        let mut owner = owner.clone();
        let mut selected: Vec<ResourceId> = Vec::new();

        // 1. Existing direct neighbors in the step direction.
        let neighbors: Vec<ResourceId> = match step.direction {
            Direction::Downstream => self
                .ctx
                .graph
                .edges_from(&owner)
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
            Direction::Upstream => self
                .ctx
                .graph
                .edges_to(&owner)
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
        };
        for candidate in neighbors {
            if selected.len() >= step.num_needed {
                break;
            }
            if self.matches_any(&candidate, &step.resources, data)? {
                selected.push(candidate);
            }
        }

        // 2. Any usable graph resource, unless the step demands a dedicated
        //    resource.
        if !step.unique && selected.len() < step.num_needed {
            let mut others: Vec<ResourceId> = self
                .ctx
                .graph
                .sorted_ids()
                .into_iter()
                .filter(|id| id != &owner && !id.is_abstract() && !selected.contains(id))
                .collect();
            if step.selection_operator == SelectionOperator::Spread {
                others.sort_by_key(|id| (self.ctx.graph.edges_to(id).len(), id.clone()));
            }
            for candidate in others {
                if selected.len() >= step.num_needed {
                    break;
                }
                if self.matches_any(&candidate, &step.resources, data)?
                    && self.edge_addable(&owner, &candidate, step.direction)
                {
                    selected.push(candidate);
                }
            }
        }

        // 3. Create the shortfall.
        while selected.len() < step.num_needed {
            match step.if_missing {
                IfMissing::Create => {}
                IfMissing::Ignore => break,
                IfMissing::Fail => {
                    return Err(EngineError::Property(PropertyError::RequiredMissing {
                        resource: owner.clone(),
                        path: property.map(|p| p.name.clone()).unwrap_or_default(),
                    }))
                }
            }
            let Some(selector) = step.resources.first() else {
                break;
            };
            let created = self.create_from_selector(&owner, selector, data, selected.len())?;
            selected.push(created);
        }

        // 4. Wire edges and bind the property.
        for id in selected.clone() {
            match step.direction {
                Direction::Downstream => self.ctx.add_dependency(&owner, &id, Default::default())?,
                Direction::Upstream => self.ctx.add_dependency(&id, &owner, Default::default())?,
            }
            if let Some(property) = property {
                if let Some(renamed) = set_field(self.ctx, &owner, property, &id, step)? {
                    owner = renamed;
                }
            }
        }
        Ok(StepOutcome { selected, owner })
    }

    /// Instantiates a resource from a selector: rendered name (or a
    /// derived default), seeded with the selector's properties.
    fn create_from_selector(
        &mut self,
        owner: &ResourceId,
        selector: &ResourceSelector,
        data: &DynamicData,
        index: usize,
    ) -> Result<ResourceId, EngineError> {
        let dynamic = self.ctx.dynamic();
        let rendered = dynamic.render_id(&selector.selector, &data.clone().with_index(index))?;
        let template = self.ctx.kb.get_template(&rendered.qualified_type())?;
        let base_name = if rendered.name.is_empty() {
            format!("{}-{}", owner.name, template.type_name())
        } else {
            rendered.name.clone()
        };
        let name = self.ctx.unused_name(&rendered, &base_name);
        let id = ResourceId::new(template.provider(), template.type_name(), "", name);
        let mut resource = template.create_resource(id.clone())?;
        seed_selector_properties(&mut resource, template, selector)?;
        debug!(resource = %id, owner = %owner, "created resource for operational step");
        self.ctx.add_resource(resource)?;
        Ok(id)
    }

    /// Applies one configuration assignment.
    pub fn apply_configuration(
        &mut self,
        rule: &ConfigurationRule,
        data: &DynamicData,
    ) -> Result<(), EngineError> {
        let dynamic = self.ctx.dynamic();
        let target = dynamic.render_id(&rule.resource, data)?;
        let path: PropertyPath = dynamic
            .render(&rule.config.field, data)?
            .parse()
            .map_err(EngineError::Property)?;
        let rendered = render_value(&dynamic, &rule.config.value, data)?;
        let template = self.ctx.kb.resource_template(&target)?;
        let value = match template.property_type_at(&path) {
            Some(property_type) => property_type
                .parse_value(rendered)
                .map_err(EngineError::Property)?,
            None => rendered,
        };
        let resource = self
            .ctx
            .graph
            .resource_mut(&target)
            .ok_or(EngineError::Graph(stratus_core::GraphError::VertexMissing {
                id: target.clone(),
            }))?;
        resource.set_property(&path, value).map_err(EngineError::Property)?;
        self.ctx.decisions.push(Decision::PropertySet {
            resource: target,
            path: path.to_string(),
        });
        Ok(())
    }

    fn matches_any(
        &self,
        candidate: &ResourceId,
        selectors: &[ResourceSelector],
        data: &DynamicData,
    ) -> Result<bool, EngineError> {
        for selector in selectors {
            if selector_matches(self.ctx, candidate, selector, data)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a new edge between owner and candidate would honor the edge
    /// template's uniqueness flags. Existing edges always pass.
    fn edge_addable(&self, owner: &ResourceId, candidate: &ResourceId, direction: Direction) -> bool {
        let (src, dst) = match direction {
            Direction::Downstream => (owner, candidate),
            Direction::Upstream => (candidate, owner),
        };
        if self.ctx.graph.edge(src, dst).is_some() {
            return true;
        }
        let Some(template) = self.ctx.kb.edge_template_for(src, dst) else {
            return true;
        };
        let existing = edges_of_type_pair(self.ctx, &template.source, &template.target);
        template.unique.can_add(&existing, src, dst)
    }
}

/// Concrete edges of one template's type pair.
pub(crate) fn edges_of_type_pair(
    ctx: &SolutionContext,
    source_type: &str,
    target_type: &str,
) -> Vec<(ResourceId, ResourceId)> {
    ctx.graph
        .edges()
        .into_iter()
        .filter(|(s, t, _)| {
            s.qualified_type() == source_type && t.qualified_type() == target_type
        })
        .map(|(s, t, _)| (s, t))
        .collect()
}

/// Whether `candidate` is usable for `selector`: id pattern (type-only when
/// the name is templated), property requirements, and classifications.
pub(crate) fn selector_matches(
    ctx: &SolutionContext,
    candidate: &ResourceId,
    selector: &ResourceSelector,
    data: &DynamicData,
) -> Result<bool, EngineError> {
    if candidate.is_abstract() {
        return Ok(false);
    }
    if let Some(prefix) = selector.selector.split("{{").next() {
        if selector.selector.contains("{{") {
            // Templated name: match on the literal provider:type prefix.
            let mut parts = prefix.split(':');
            let provider = parts.next().unwrap_or_default();
            let rtype = parts.next().unwrap_or_default();
            if provider.is_empty() || rtype.is_empty() {
                // The type itself is templated; fall back to rendering.
                let dynamic = ctx.dynamic();
                let rendered = dynamic.render_id(&selector.selector, data)?;
                if !rendered.matches(candidate) {
                    return Ok(false);
                }
            } else if provider != candidate.provider || rtype != candidate.rtype {
                return Ok(false);
            }
        } else {
            let pattern: ResourceId = selector
                .selector
                .parse()
                .map_err(EngineError::Property)?;
            if !pattern.matches(candidate) {
                return Ok(false);
            }
        }
    }

    let template = ctx.kb.resource_template(candidate)?;
    for class in &selector.classifications {
        if !template.has_classification(class) {
            return Ok(false);
        }
    }

    if !selector.properties.is_empty() {
        let Some(resource) = ctx.graph.resource(candidate) else {
            return Ok(false);
        };
        for (name, expected) in &selector.properties {
            let expected = match template
                .property(name)
                .and_then(|p| p.property_type().ok())
            {
                Some(t) => t
                    .parse_value(expected.clone())
                    .map_err(EngineError::Property)?,
                None => expected.clone(),
            };
            let actual = resource
                .properties
                .get(name)
                .filter(|v| !v.is_null())
                .cloned()
                // An unset property counts as its template default.
                .or_else(|| {
                    template
                        .property(name)
                        .and_then(|p| p.default_value.clone())
                });
            if actual.as_ref() != Some(&expected) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Seeds a freshly created resource with the selector's property values.
fn seed_selector_properties(
    resource: &mut Resource,
    template: &stratus_kb::ResourceTemplate,
    selector: &ResourceSelector,
) -> Result<(), EngineError> {
    for (name, value) in &selector.properties {
        let parsed = match template.property(name).and_then(|p| p.property_type().ok()) {
            Some(t) => t.parse_value(value.clone()).map_err(EngineError::Property)?,
            None => value.clone(),
        };
        resource
            .set_property(&name.parse().map_err(EngineError::Property)?, parsed)
            .map_err(EngineError::Property)?;
    }
    Ok(())
}

/// Binds `property` on `owner` to `selected`: an id, or a property
/// reference when the step asks for one. Collections append (idempotently),
/// scalars overwrite. Setting a namespace property renames the owner and
/// returns the new id.
pub(crate) fn set_field(
    ctx: &mut SolutionContext,
    owner: &ResourceId,
    property: &Property,
    selected: &ResourceId,
    step: &OperationalStep,
) -> Result<Option<ResourceId>, EngineError> {
    let value = match &step.use_property_ref {
        Some(ref_path) => Value::Ref(PropertyRef::new(
            selected.clone(),
            ref_path.parse().map_err(EngineError::Property)?,
        )),
        None => Value::Id(selected.clone()),
    };
    let property_type = property.property_type()?;
    let element = match &property_type {
        PropertyType::List(item) | PropertyType::Set(item) => (**item).clone(),
        other => other.clone(),
    };
    if !element.validates(&value) {
        return Err(EngineError::Property(PropertyError::TypeMismatch {
            resource: owner.clone(),
            path: property.name.clone(),
            expected: element.name().to_string(),
            actual: value.type_name().to_string(),
        }));
    }

    let path: PropertyPath = property.name.parse().map_err(EngineError::Property)?;
    let resource = ctx
        .graph
        .resource_mut(owner)
        .ok_or(EngineError::Graph(stratus_core::GraphError::VertexMissing {
            id: owner.clone(),
        }))?;
    if property.is_collection() {
        let present = resource
            .get_property(&path)
            .and_then(Value::as_list)
            .map(|items| items.contains(&value))
            .unwrap_or(false);
        if !present {
            resource.append_property(&path, value).map_err(EngineError::Property)?;
        }
    } else {
        resource.set_property(&path, value).map_err(EngineError::Property)?;
    }
    ctx.decisions.push(Decision::PropertySet {
        resource: owner.clone(),
        path: path.to_string(),
    });

    // Namespace properties fold the referenced resource's name into the
    // owner's id; the rename rewrites every reference atomically.
    if property.namespace && owner.namespace != selected.name {
        let new = ResourceId {
            namespace: selected.name.clone(),
            ..owner.clone()
        };
        ctx.rename_resource(owner, &new)?;
        return Ok(Some(new));
    }
    Ok(None)
}

/// Renders template strings inside a value, leaving other leaves alone.
fn render_value(
    dynamic: &stratus_kb::DynamicContext,
    value: &Value,
    data: &DynamicData,
) -> Result<Value, EngineError> {
    Ok(match value {
        Value::String(s) if s.contains("{{") => Value::String(dynamic.render(s, data)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| render_value(dynamic, v, data))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), render_value(dynamic, v, data)?)))
                .collect::<Result<IndexMap<String, Value>, EngineError>>()?,
        ),
        other => other.clone(),
    })
}
