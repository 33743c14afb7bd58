//! Resolution of missing steps into an ordered corrective plan.

use super::{DependencyGraph, GraphError, Step};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Maximum number of times a stuck step may pull in its provider's
/// requirements before resolution gives up.
pub const MAX_EXPANSIONS: u32 = 10;

/// One entry of a resolution plan: run `tool` to produce `step`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub tool: String,
    pub step: Step,
}

impl DependencyGraph {
    /// Order the providers of `missing` so each runs after its own requirements.
    ///
    /// Each pass emits every outstanding step whose first-declared provider is
    /// runnable given `completed` plus everything emitted so far. A pass that
    /// emits nothing pulls the stuck providers' unmet requirements into the
    /// outstanding set. Resolution fails when a step has no provider, when a
    /// step stalls more than [`MAX_EXPANSIONS`] times, or when a stalled pass
    /// discovers nothing new.
    pub fn resolution_order(
        &self,
        missing: &[Step],
        completed: &BTreeSet<Step>,
    ) -> Result<Vec<PlannedStep>, GraphError> {
        let mut satisfied = completed.clone();
        let mut outstanding: Vec<Step> = Vec::new();
        for step in missing {
            if !satisfied.contains(step) && !outstanding.contains(step) {
                outstanding.push(step.clone());
            }
        }

        let mut expansions: HashMap<Step, u32> = HashMap::new();
        let mut plan = Vec::new();

        while !outstanding.is_empty() {
            let mut progressed = false;
            let mut stuck: Vec<(Step, Vec<Step>)> = Vec::new();

            for step in std::mem::take(&mut outstanding) {
                if satisfied.contains(&step) {
                    continue;
                }

                let (tool, edge) = self
                    .provider_entry(&step)
                    .ok_or_else(|| GraphError::NoProvider { step: step.clone() })?;

                let unmet: Vec<Step> = edge
                    .required_steps()
                    .iter()
                    .filter(|s| !satisfied.contains(*s))
                    .cloned()
                    .collect();

                if unmet.is_empty() {
                    satisfied.extend(edge.provided_steps().iter().cloned());
                    debug!("Planned '{}' to provide '{}'", tool, step);
                    plan.push(PlannedStep {
                        tool: tool.to_string(),
                        step,
                    });
                    progressed = true;
                } else {
                    stuck.push((step.clone(), unmet));
                    outstanding.push(step);
                }
            }

            if progressed {
                continue;
            }

            let stuck_steps = || stuck.iter().map(|(s, _)| s.clone()).collect::<Vec<_>>();
            for (step, _) in &stuck {
                let count = expansions.entry(step.clone()).or_insert(0);
                *count += 1;
                if *count > MAX_EXPANSIONS {
                    return Err(GraphError::CircularDependency {
                        steps: stuck_steps(),
                    });
                }
            }

            // Pull in the stuck providers' unmet requirements, transitively,
            // so deep chains stall once rather than once per level.
            let mut frontier: Vec<Step> = stuck
                .iter()
                .flat_map(|(_, unmet)| unmet.iter().cloned())
                .collect();
            let mut discovered = false;
            let mut next = 0;
            while next < frontier.len() {
                let dep = frontier[next].clone();
                next += 1;
                if satisfied.contains(&dep) || outstanding.contains(&dep) {
                    continue;
                }
                let (_, edge) = self
                    .provider_entry(&dep)
                    .ok_or_else(|| GraphError::NoProvider { step: dep.clone() })?;
                frontier.extend(
                    edge.required_steps()
                        .iter()
                        .filter(|s| !satisfied.contains(*s))
                        .cloned(),
                );
                outstanding.push(dep);
                discovered = true;
            }

            if !discovered {
                return Err(GraphError::CircularDependency {
                    steps: stuck_steps(),
                });
            }
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ToolEdge;

    fn set(names: &[&str]) -> BTreeSet<Step> {
        names.iter().map(|s| Step::from(*s)).collect()
    }

    fn list(names: &[&str]) -> Vec<Step> {
        names.iter().map(|s| Step::from(*s)).collect()
    }

    fn pipeline() -> DependencyGraph {
        DependencyGraph::builder()
            .tool("analyze", ToolEdge::new().provides(["analyzed"]))
            .tool(
                "generate",
                ToolEdge::new().requires(["analyzed"]).provides(["dockerfile"]),
            )
            .tool(
                "build",
                ToolEdge::new().requires(["dockerfile"]).provides(["built"]),
            )
            .tool("prepare", ToolEdge::new().provides(["cluster"]))
            .tool(
                "manifests",
                ToolEdge::new().requires(["built"]).provides(["manifests"]),
            )
            .tool(
                "deploy",
                ToolEdge::new()
                    .requires(["built", "cluster", "manifests"])
                    .provides(["deployed"]),
            )
            .build()
    }

    /// Every entry must be runnable given `completed` plus earlier entries' effects
    fn assert_sound(graph: &DependencyGraph, plan: &[PlannedStep], completed: &BTreeSet<Step>) {
        let mut satisfied = completed.clone();
        for entry in plan {
            let edge = graph.edge_of(&entry.tool).expect("planned tool has an edge");
            for req in edge.required_steps() {
                assert!(
                    satisfied.contains(req),
                    "'{}' planned before its requirement '{}'",
                    entry.tool,
                    req
                );
            }
            satisfied.extend(edge.provided_steps().iter().cloned());
        }
    }

    #[test]
    fn test_transitive_chain_is_ordered() {
        let graph = pipeline();
        let completed = BTreeSet::new();
        let missing = graph.missing_preconditions("deploy", &completed);

        let plan = graph.resolution_order(&missing, &completed).unwrap();
        let tools: Vec<&str> = plan.iter().map(|p| p.tool.as_str()).collect();

        assert_eq!(tools, vec!["prepare", "analyze", "generate", "build", "manifests"]);
        assert_sound(&graph, &plan, &completed);
    }

    #[test]
    fn test_partially_completed_session() {
        let graph = pipeline();
        let completed = set(&["analyzed", "dockerfile"]);
        let missing = graph.missing_preconditions("deploy", &completed);

        let plan = graph.resolution_order(&missing, &completed).unwrap();
        let tools: Vec<&str> = plan.iter().map(|p| p.tool.as_str()).collect();

        assert_eq!(tools, vec!["build", "prepare", "manifests"]);
        assert_sound(&graph, &plan, &completed);
    }

    #[test]
    fn test_plan_is_sound_for_every_tool() {
        let graph = pipeline();
        for (tool, _) in graph.tools() {
            let completed = BTreeSet::new();
            let missing = graph.missing_preconditions(tool, &completed);
            let plan = graph.resolution_order(&missing, &completed).unwrap();
            assert_sound(&graph, &plan, &completed);
            for step in &missing {
                assert!(plan.iter().any(|p| &p.step == step), "{} not planned", step);
            }
        }
    }

    #[test]
    fn test_nothing_missing_yields_empty_plan() {
        let graph = pipeline();
        let plan = graph.resolution_order(&[], &set(&["built"])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_multi_provide_tool_planned_once() {
        let graph = DependencyGraph::builder()
            .tool("prepare", ToolEdge::new().provides(["namespace", "registry_secret"]))
            .tool(
                "deploy",
                ToolEdge::new()
                    .requires(["namespace", "registry_secret"])
                    .provides(["deployed"]),
            )
            .build();

        let plan = graph
            .resolution_order(&list(&["namespace", "registry_secret"]), &BTreeSet::new())
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tool, "prepare");
    }

    #[test]
    fn test_missing_provider_fails_immediately() {
        let graph = DependencyGraph::builder()
            .tool("deploy", ToolEdge::new().requires(["cluster"]).provides(["deployed"]))
            .build();

        let err = graph
            .resolution_order(&list(&["cluster"]), &BTreeSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::NoProvider {
                step: Step::from("cluster")
            }
        );
    }

    #[test]
    fn test_transitive_missing_provider() {
        let graph = DependencyGraph::builder()
            .tool("build", ToolEdge::new().requires(["dockerfile"]).provides(["built"]))
            .build();

        let err = graph
            .resolution_order(&list(&["built"]), &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::NoProvider { step } if step.as_str() == "dockerfile"));
    }

    #[test]
    fn test_two_tool_cycle_is_detected() {
        let graph = DependencyGraph::builder()
            .tool("a", ToolEdge::new().requires(["y"]).provides(["x"]))
            .tool("b", ToolEdge::new().requires(["x"]).provides(["y"]))
            .tool("c", ToolEdge::new().requires(["x"]).provides(["z"]))
            .build();

        let missing = graph.missing_preconditions("c", &BTreeSet::new());
        let err = graph.resolution_order(&missing, &BTreeSet::new()).unwrap_err();

        match err {
            GraphError::CircularDependency { steps } => {
                assert!(steps.contains(&Step::from("x")));
                assert!(steps.contains(&Step::from("y")));
            }
            other => panic!("expected circular dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_detected() {
        let graph = DependencyGraph::builder()
            .tool("loop", ToolEdge::new().requires(["x"]).provides(["x"]))
            .build();

        let err = graph
            .resolution_order(&list(&["x"]), &BTreeSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::CircularDependency {
                steps: list(&["x"])
            }
        );
    }

    #[test]
    fn test_cycle_broken_by_completed_step() {
        let graph = DependencyGraph::builder()
            .tool("a", ToolEdge::new().requires(["y"]).provides(["x"]))
            .tool("b", ToolEdge::new().requires(["x"]).provides(["y"]))
            .build();

        let plan = graph.resolution_order(&list(&["x"]), &set(&["y"])).unwrap();
        assert_eq!(
            plan,
            vec![PlannedStep {
                tool: "a".to_string(),
                step: Step::from("x"),
            }]
        );
    }

    #[test]
    fn test_long_chain_within_expansion_ceiling() {
        let mut builder = DependencyGraph::builder().tool("t0", ToolEdge::new().provides(["s0"]));
        for i in 1..=30 {
            builder = builder.tool(
                format!("t{}", i),
                ToolEdge::new()
                    .requires([format!("s{}", i - 1)])
                    .provides([format!("s{}", i)]),
            );
        }
        let graph = builder.build();

        let plan = graph
            .resolution_order(&list(&["s30"]), &BTreeSet::new())
            .unwrap();
        assert_eq!(plan.len(), 31);
        assert_eq!(plan[0].tool, "t0");
        assert_eq!(plan[30].tool, "t30");
        assert_sound(&graph, &plan, &BTreeSet::new());
    }
}
