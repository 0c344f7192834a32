//! Cross-cutting properties of the solver: determinism, path validity,
//! operational completeness, uniqueness, and reference hygiene.

use std::sync::Arc;

use stratus_core::{EdgeProps, Resource, ResourceGraph, ResourceId, Value};
use stratus_engine::{
    CancellationToken, Constraint, FailureKind, Orchestrator, OrchestratorConfig,
};
use stratus_kb::KnowledgeBase;

fn kb() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::embedded().unwrap())
}

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

fn api_db_graph() -> ResourceGraph {
    let mut graph = ResourceGraph::new();
    graph
        .add_resource(Resource::new(id("abstract:execution_unit::api")))
        .unwrap();
    graph
        .add_resource(Resource::new(id("abstract:persist-orm::db")))
        .unwrap();
    graph
        .add_edge(
            &id("abstract:execution_unit::api"),
            &id("abstract:persist-orm::db"),
            EdgeProps::default(),
        )
        .unwrap();
    graph
}

fn api_db_constraints() -> Vec<Constraint> {
    serde_yaml::from_str(
        r#"
- scope: construct
  operator: equals
  target: abstract:execution_unit::api
  type: lambda_function
- scope: construct
  operator: equals
  target: abstract:persist-orm::db
  type: rds_instance
"#,
    )
    .unwrap()
}

/// Structural fingerprint: every id, property value, and edge in sorted
/// order.
fn fingerprint(graph: &ResourceGraph) -> String {
    let mut out = String::new();
    for resource in graph.resources_sorted() {
        out.push_str(&resource.id.to_string());
        out.push('{');
        out.push_str(&serde_json::to_string(&resource.properties).unwrap());
        out.push('}');
    }
    for (s, t, _) in graph.edges() {
        out.push_str(&format!("{s}->{t};"));
    }
    out
}

#[test]
fn solves_are_deterministic() {
    let graph = api_db_graph();
    let constraints = api_db_constraints();
    let orchestrator = Orchestrator::new(kb(), OrchestratorConfig::default());
    let first = orchestrator.run(&graph, &constraints).unwrap();
    let second = orchestrator.run(&graph, &constraints).unwrap();
    assert_eq!(fingerprint(&first.graph), fingerprint(&second.graph));
}

#[test]
fn every_edge_has_a_template() {
    let kb = kb();
    let orchestrator = Orchestrator::new(kb.clone(), OrchestratorConfig::default());
    let output = orchestrator
        .run(&api_db_graph(), &api_db_constraints())
        .unwrap();
    for (source, target, _) in output.graph.edges() {
        assert!(
            kb.edge_template_for(&source, &target).is_some(),
            "edge {source} -> {target} has no template"
        );
    }
}

#[test]
fn converged_graphs_have_all_required_properties() {
    let kb = kb();
    let orchestrator = Orchestrator::new(kb.clone(), OrchestratorConfig::default());
    let output = orchestrator
        .run(&api_db_graph(), &api_db_constraints())
        .unwrap();
    for resource in output.graph.resources_sorted() {
        let template = kb.resource_template(&resource.id).unwrap();
        let missing = template.missing_required(resource);
        assert!(
            missing.is_empty(),
            "{} is missing {:?}",
            resource.id,
            missing.iter().map(|p| &p.name).collect::<Vec<_>>()
        );
    }
}

#[test]
fn converged_graphs_honor_edge_uniqueness() {
    let kb = kb();
    let orchestrator = Orchestrator::new(kb.clone(), OrchestratorConfig::default());
    let constraints: Vec<Constraint> = serde_yaml::from_str(
        r#"
- scope: construct
  operator: equals
  target: abstract:execution_unit::api
  type: lambda_function
- scope: construct
  operator: equals
  target: abstract:persist-orm::db
  type: rds_instance
- scope: edge
  operator: must_contain
  target:
    source: abstract:execution_unit::api
    destination: abstract:persist-orm::db
  node: "aws:rds_proxy::"
"#,
    )
    .unwrap();
    let output = orchestrator.run(&api_db_graph(), &constraints).unwrap();
    for (source, target, _) in output.graph.edges() {
        let Some(template) = kb.edge_template_for(&source, &target) else {
            continue;
        };
        if template.unique.source {
            let fanout = output
                .graph
                .edges_from(&source)
                .into_iter()
                .filter(|(t, _)| t.qualified_type() == template.target)
                .count();
            assert!(fanout <= 1, "{source} fans out {fanout} times");
        }
        if template.unique.target {
            let fanin = output
                .graph
                .edges_to(&target)
                .into_iter()
                .filter(|(s, _)| s.qualified_type() == template.source)
                .count();
            assert!(fanin <= 1, "{target} fans in {fanin} times");
        }
    }
}

#[test]
fn cascade_removal_leaves_no_dangling_references() {
    let orchestrator = Orchestrator::new(kb(), OrchestratorConfig::default());
    let output = orchestrator
        .run(&api_db_graph(), &api_db_constraints())
        .unwrap();
    let mut graph = output.graph;
    let gone = id("aws:security_group::default");
    graph.remove_resource(&gone, true).unwrap();
    for resource in graph.resources_sorted() {
        for value in resource.properties.values() {
            assert!(
                !value.referenced_ids().iter().any(|r| **r == gone),
                "{} still references {gone}",
                resource.id
            );
        }
    }
}

#[test]
fn remove_constraints_honor_the_delete_context() {
    // A vpc with a subnet still pointing at it refuses removal.
    let mut graph = ResourceGraph::new();
    let kb = kb();
    graph
        .add_resource(kb.create_resource(&id("aws:vpc::vpc")).unwrap())
        .unwrap();
    graph
        .add_resource(kb.create_resource(&id("aws:subnet:vpc:private0")).unwrap())
        .unwrap();
    graph
        .add_edge(
            &id("aws:subnet:vpc:private0"),
            &id("aws:vpc::vpc"),
            EdgeProps::default(),
        )
        .unwrap();
    let constraints: Vec<Constraint> = serde_yaml::from_str(
        r#"
- scope: application
  operator: remove
  node: aws:vpc::vpc
"#,
    )
    .unwrap();
    let orchestrator = Orchestrator::new(kb, OrchestratorConfig::default());
    let failure = orchestrator.run(&graph, &constraints).unwrap_err();
    assert!(failure
        .diagnostics
        .items
        .iter()
        .any(|d| d.code == "graph-error"));
}

#[test]
fn deployment_view_is_acyclic_after_solve() {
    let orchestrator = Orchestrator::new(kb(), OrchestratorConfig::default());
    let output = orchestrator
        .run(&api_db_graph(), &api_db_constraints())
        .unwrap();
    assert!(output.graph.topological_order().is_ok());
}

#[test]
fn canceled_runs_report_cancellation() {
    let orchestrator = Orchestrator::new(kb(), OrchestratorConfig::default());
    let token: CancellationToken = orchestrator.cancellation_token();
    token.cancel();
    let failure = orchestrator
        .run(&api_db_graph(), &api_db_constraints())
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Canceled);
}

#[test]
fn combination_cap_fails_instead_of_truncating() {
    let mut graph = ResourceGraph::new();
    // Two constructs, two compute candidates each: 4 combinations.
    graph
        .add_resource(Resource::new(id("abstract:execution_unit::a")))
        .unwrap();
    graph
        .add_resource(Resource::new(id("abstract:execution_unit::b")))
        .unwrap();
    let config = OrchestratorConfig {
        combination_cap: 3,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(kb(), config);
    let failure = orchestrator.run(&graph, &[]).unwrap_err();
    assert!(failure
        .diagnostics
        .items
        .iter()
        .any(|d| d.code == "too-many-combinations"));
}

#[test]
fn unsatisfied_constraints_return_the_partial_graph() {
    let mut graph = ResourceGraph::new();
    graph
        .add_resource(Resource::new(id("abstract:execution_unit::api")))
        .unwrap();
    // Pin the construct to a type that provides no compute functionality.
    let constraints: Vec<Constraint> = serde_yaml::from_str(
        r#"
- scope: construct
  operator: equals
  target: abstract:execution_unit::api
  type: lambda_function
- scope: resource
  operator: equals
  target: aws:lambda_function::api
  property: MemorySize
  value: 2048
- scope: resource
  operator: equals
  target: aws:lambda_function::missing
  property: MemorySize
  value: 128
"#,
    )
    .unwrap();
    let orchestrator = Orchestrator::new(kb(), OrchestratorConfig::default());
    let failure = orchestrator.run(&graph, &constraints).unwrap_err();
    assert_eq!(failure.kind, FailureKind::ConstraintUnsatisfied);
    let partial = failure.partial.expect("partial graph for inspection");
    // The satisfiable part of the configuration still landed.
    let lambda = partial.resource(&id("aws:lambda_function::api")).unwrap();
    assert_eq!(
        lambda.get_property(&"MemorySize".parse().unwrap()),
        Some(&Value::Int(2048))
    );
}
