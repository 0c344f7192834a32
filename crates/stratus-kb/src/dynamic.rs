//! Dynamic rule evaluation.
//!
//! Rule conditions, selector names, default values, and configuration
//! values in templates are minijinja strings evaluated against a
//! [`DynamicContext`]: a snapshot of the resource graph, the knowledge
//! base, and the data bindings of the current rule (`self`, `source`,
//! `target`, `index`, `path`).
//!
//! There is no host-language eval: the template environment exposes a fixed
//! set of graph-aware callables plus minijinja's own expressions.
//!
//! Rendered conditions follow the render-then-decode model: the template is
//! rendered to a string and the result parsed as a boolean, so conditions
//! read the same as every other templated field in the catalogue.

use std::sync::Arc;

use minijinja::value::Value as MjValue;
use minijinja::{Environment, Error as MjError, ErrorKind};
use serde::Serialize;

use stratus_core::{PropertyPath, ResourceGraph, ResourceId};

use crate::error::KbError;
use crate::kb::KnowledgeBase;
use crate::query::{self, Layer};

/// Bindings for one rule evaluation.
#[derive(Debug, Clone, Default)]
pub struct DynamicData {
    /// The resource the rule runs for.
    pub resource: Option<ResourceId>,
    /// Edge endpoints, for edge-template rules.
    pub source: Option<ResourceId>,
    pub target: Option<ResourceId>,
    /// Creation index for multi-resource steps.
    pub index: Option<usize>,
    /// The surrounding path during path materialization.
    pub path: Vec<ResourceId>,
}

impl DynamicData {
    pub fn for_resource(resource: ResourceId) -> Self {
        DynamicData {
            resource: Some(resource),
            ..Default::default()
        }
    }

    pub fn for_edge(source: ResourceId, target: ResourceId) -> Self {
        DynamicData {
            source: Some(source),
            target: Some(target),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// How an id binding appears inside templates: an object with the id's
/// fields, rendering as the full id string.
#[derive(Debug, Serialize)]
struct IdView {
    id: String,
    provider: String,
    #[serde(rename = "type")]
    rtype: String,
    namespace: String,
    name: String,
}

impl IdView {
    fn new(id: &ResourceId) -> Self {
        IdView {
            id: id.to_string(),
            provider: id.provider.clone(),
            rtype: id.rtype.clone(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        }
    }
}

/// A template environment bound to a graph snapshot.
///
/// The snapshot is taken at construction; rules that mutate the graph see
/// their own writes only through a fresh context. The engine constructs one
/// context per evaluation point, which keeps every rule's view consistent.
pub struct DynamicContext {
    env: Environment<'static>,
}

impl DynamicContext {
    pub fn new(graph: &ResourceGraph, kb: &Arc<KnowledgeBase>) -> Self {
        let graph = Arc::new(graph.clone());
        let mut env = Environment::new();

        {
            let graph = graph.clone();
            env.add_function("has", move |id: MjValue, path: String| -> Result<bool, MjError> {
                let id = coerce_id(&id)?;
                let path: PropertyPath = path.parse().map_err(bad_arg)?;
                Ok(graph
                    .resource(&id)
                    .and_then(|r| r.get_property(&path))
                    .map(|v| !v.is_null())
                    .unwrap_or(false))
            });
        }
        {
            let graph = graph.clone();
            env.add_function(
                "field",
                move |id: MjValue, path: String| -> Result<MjValue, MjError> {
                    let id = coerce_id(&id)?;
                    let path: PropertyPath = path.parse().map_err(bad_arg)?;
                    Ok(graph
                        .resource(&id)
                        .and_then(|r| r.get_property(&path))
                        .map(MjValue::from_serialize)
                        .unwrap_or_default())
                },
            );
        }
        {
            let graph = graph.clone();
            let kb = kb.clone();
            env.add_function(
                "downstream",
                move |id: MjValue, selector: String, layer: Option<String>| -> Result<MjValue, MjError> {
                    reachable(&graph, &kb, &id, &selector, layer, false)
                },
            );
        }
        {
            let graph = graph.clone();
            let kb = kb.clone();
            env.add_function(
                "upstream",
                move |id: MjValue, selector: String, layer: Option<String>| -> Result<MjValue, MjError> {
                    reachable(&graph, &kb, &id, &selector, layer, true)
                },
            );
        }
        {
            let graph = graph.clone();
            let kb = kb.clone();
            env.add_function(
                "has_downstream",
                move |id: MjValue, selector: String| -> Result<bool, MjError> {
                    let ids = reachable_ids(&graph, &kb, &id, &selector, None, false)?;
                    Ok(!ids.is_empty())
                },
            );
        }
        {
            let graph = graph.clone();
            let kb = kb.clone();
            env.add_function(
                "has_upstream",
                move |id: MjValue, selector: String| -> Result<bool, MjError> {
                    let ids = reachable_ids(&graph, &kb, &id, &selector, None, true)?;
                    Ok(!ids.is_empty())
                },
            );
        }
        env.add_function("short_name", |id: MjValue| -> Result<String, MjError> {
            Ok(coerce_id(&id)?.name)
        });

        DynamicContext { env }
    }

    /// Renders a template string against the data bindings.
    pub fn render(&self, template: &str, data: &DynamicData) -> Result<String, KbError> {
        self.env
            .render_str(template, self.bindings(data))
            .map_err(|e| KbError::eval(template, e))
    }

    /// Renders and parses a resource id.
    pub fn render_id(&self, template: &str, data: &DynamicData) -> Result<ResourceId, KbError> {
        let rendered = self.render(template, data)?;
        rendered
            .trim()
            .parse()
            .map_err(|e| KbError::eval(template, e))
    }

    /// Renders a boolean condition. Empty conditions are true; anything
    /// other than `true`/`false` after rendering is an evaluation error.
    pub fn eval_condition(
        &self,
        condition: Option<&str>,
        data: &DynamicData,
    ) -> Result<bool, KbError> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        let rendered = self.render(condition, data)?;
        match rendered.trim() {
            "" | "false" | "False" => Ok(false),
            "true" | "True" => Ok(true),
            other => Err(KbError::eval(
                condition,
                format!("expected a boolean, rendered to '{other}'"),
            )),
        }
    }

    fn bindings(&self, data: &DynamicData) -> MjValue {
        let mut ctx = std::collections::BTreeMap::new();
        if let Some(id) = &data.resource {
            ctx.insert("self", MjValue::from_serialize(IdView::new(id)));
        }
        if let Some(id) = &data.source {
            ctx.insert("source", MjValue::from_serialize(IdView::new(id)));
        }
        if let Some(id) = &data.target {
            ctx.insert("target", MjValue::from_serialize(IdView::new(id)));
        }
        if let Some(index) = data.index {
            ctx.insert("index", MjValue::from(index));
        }
        if !data.path.is_empty() {
            let path: Vec<String> = data.path.iter().map(|id| id.to_string()).collect();
            ctx.insert("path", MjValue::from_serialize(path));
        }
        MjValue::from_serialize(ctx)
    }
}

/// Accepts either an id string or an id-view object.
fn coerce_id(value: &MjValue) -> Result<ResourceId, MjError> {
    let raw = if let Some(s) = value.as_str() {
        s.to_string()
    } else if let Ok(inner) = value.get_attr("id") {
        inner
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| bad_arg("id attribute is not a string"))?
    } else {
        return Err(bad_arg("expected a resource id or id object"));
    };
    raw.parse().map_err(bad_arg)
}

fn bad_arg(err: impl std::fmt::Display) -> MjError {
    MjError::new(ErrorKind::InvalidOperation, err.to_string())
}

fn reachable(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &MjValue,
    selector: &str,
    layer: Option<String>,
    reverse: bool,
) -> Result<MjValue, MjError> {
    let matching = reachable_ids(graph, kb, id, selector, layer, reverse)?;
    Ok(MjValue::from_serialize(matching))
}

fn reachable_ids(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &MjValue,
    selector: &str,
    layer: Option<String>,
    reverse: bool,
) -> Result<Vec<String>, MjError> {
    let id = coerce_id(id)?;
    let selector: ResourceId = selector.parse().map_err(bad_arg)?;
    let layer = match layer.as_deref() {
        None => Layer::All,
        Some(raw) => Layer::parse(raw)
            .ok_or_else(|| bad_arg(format!("unknown dependency layer '{raw}'")))?,
    };
    let ids = if reverse {
        query::upstream(graph, kb, &id, layer)
    } else {
        query::downstream(graph, kb, &id, layer)
    };
    Ok(ids
        .into_iter()
        .filter(|candidate| selector.matches(candidate))
        .map(|candidate| candidate.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KnowledgeBase;
    use stratus_core::{EdgeProps, Resource};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn context() -> (ResourceGraph, Arc<KnowledgeBase>) {
        let mut graph = ResourceGraph::new();
        for s in ["aws:lambda_function::api", "aws:subnet::private0", "aws:vpc::vpc"] {
            graph.add_resource(Resource::new(id(s))).unwrap();
        }
        graph
            .add_edge(
                &id("aws:lambda_function::api"),
                &id("aws:subnet::private0"),
                EdgeProps::default(),
            )
            .unwrap();
        graph
            .add_edge(
                &id("aws:subnet::private0"),
                &id("aws:vpc::vpc"),
                EdgeProps::default(),
            )
            .unwrap();
        (graph, Arc::new(KnowledgeBase::empty()))
    }

    #[test]
    fn renders_name_templates() {
        let (graph, kb) = context();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource(id("aws:lambda_function::api"));
        let rendered = ctx
            .render("aws:iam_role:{{ self.name }}-exec", &data)
            .unwrap();
        assert_eq!(rendered, "aws:iam_role:api-exec");
    }

    #[test]
    fn condition_checks_downstream_reachability() {
        let (graph, kb) = context();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource(id("aws:lambda_function::api"));
        assert!(ctx
            .eval_condition(Some("{{ has_downstream(self, 'aws:vpc') }}"), &data)
            .unwrap());
        assert!(!ctx
            .eval_condition(Some("{{ has_downstream(self, 'aws:rds_instance') }}"), &data)
            .unwrap());
    }

    #[test]
    fn missing_condition_is_true() {
        let (graph, kb) = context();
        let ctx = DynamicContext::new(&graph, &kb);
        assert!(ctx.eval_condition(None, &DynamicData::default()).unwrap());
    }

    #[test]
    fn field_reads_property_values() {
        let (mut graph, kb) = context();
        graph
            .resource_mut(&id("aws:subnet::private0"))
            .unwrap()
            .set_property(&"Type".parse().unwrap(), "private".into())
            .unwrap();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::for_resource(id("aws:subnet::private0"));
        assert!(ctx
            .eval_condition(Some("{{ field(self, 'Type') == 'private' }}"), &data)
            .unwrap());
    }

    #[test]
    fn index_binding_renders() {
        let (graph, kb) = context();
        let ctx = DynamicContext::new(&graph, &kb);
        let data = DynamicData::default().with_index(1);
        assert_eq!(ctx.render("private{{ index }}", &data).unwrap(), "private1");
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let (graph, kb) = context();
        let ctx = DynamicContext::new(&graph, &kb);
        let err = ctx
            .eval_condition(Some("{{ 42 }}"), &DynamicData::default())
            .unwrap_err();
        assert!(matches!(err, KbError::Eval { .. }));
    }
}
