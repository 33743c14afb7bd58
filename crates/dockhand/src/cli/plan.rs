//! Plan command - Show the prerequisite chain for a tool
//!
//! Answers "what would run if I called this tool now?" without running
//! anything.

use anyhow::{bail, Result};
use dockhand_orchestrator::{DependencyGraph, PlannedStep, Step};
use serde::Serialize;
use std::collections::BTreeSet;

/// Arguments for the plan command
#[derive(Debug)]
pub struct PlanArgs {
    pub tool: String,
    pub completed: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub tool: String,
    pub missing: Vec<Step>,
    pub correctives: Vec<PlannedStep>,
}

/// Resolve the corrective chain for `tool` given `completed`
pub fn build_plan(graph: &DependencyGraph, tool: &str, completed: &[String]) -> Result<PlanReport> {
    if graph.edge_of(tool).is_none() {
        bail!(
            "'{}' is not in the dependency graph (known tools: {})",
            tool,
            graph.tools().map(|(name, _)| name).collect::<Vec<_>>().join(", ")
        );
    }

    let completed: BTreeSet<Step> = completed.iter().map(|s| Step::from(s.as_str())).collect();
    let missing = graph.missing_preconditions(tool, &completed);
    let correctives = graph.resolution_order(&missing, &completed)?;

    Ok(PlanReport {
        tool: tool.to_string(),
        missing,
        correctives,
    })
}

/// Execute the plan command
pub fn run(args: PlanArgs, graph: &DependencyGraph) -> Result<()> {
    let report = build_plan(graph, &args.tool, &args.completed)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.correctives.is_empty() {
        println!("{} can run now", report.tool);
        return Ok(());
    }

    println!("{} needs {} prerequisite tool(s):", report.tool, report.correctives.len());
    for (i, planned) in report.correctives.iter().enumerate() {
        println!("  {}. {:<24} -> {}", i + 1, planned.tool, planned.step);
    }
    println!("  {}. {}", report.correctives.len() + 1, report.tool);

    Ok(())
}
