//! Graph command - Describe the dependency graph
//!
//! Prints every declared tool with what it requires, what it provides and
//! which corrective tool each autofix rule targets, followed by any
//! declaration problems.

use dockhand_orchestrator::DependencyGraph;
use serde::Serialize;
use std::collections::BTreeMap;

/// Arguments for the graph command
#[derive(Debug)]
pub struct GraphArgs {
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ToolReport {
    pub name: String,
    pub requires: Vec<String>,
    pub provides: Vec<String>,
    /// Step -> corrective tool
    pub autofix: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct GraphReport {
    pub tools: Vec<ToolReport>,
    /// Steps declared by several tools, with the tool that wins first
    pub ambiguous: BTreeMap<String, Vec<String>>,
    pub unprovided: Vec<String>,
}

impl GraphReport {
    pub fn has_issues(&self) -> bool {
        !self.ambiguous.is_empty() || !self.unprovided.is_empty()
    }
}

pub fn describe(graph: &DependencyGraph) -> GraphReport {
    let tools = graph
        .tools()
        .map(|(name, edge)| ToolReport {
            name: name.to_string(),
            requires: edge.required_steps().iter().map(ToString::to_string).collect(),
            provides: edge.provided_steps().iter().map(ToString::to_string).collect(),
            autofix: edge
                .autofix_rules()
                .iter()
                .map(|(step, rule)| (step.to_string(), rule.tool().to_string()))
                .collect(),
        })
        .collect();

    GraphReport {
        tools,
        ambiguous: graph
            .ambiguous_providers()
            .into_iter()
            .map(|(step, tools)| (step.to_string(), tools))
            .collect(),
        unprovided: graph.unprovided_steps().iter().map(ToString::to_string).collect(),
    }
}

/// Execute the graph command
pub fn run(args: GraphArgs, graph: &DependencyGraph) -> anyhow::Result<()> {
    let report = describe(graph);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for tool in &report.tools {
        println!("{}", tool.name);
        if !tool.requires.is_empty() {
            println!("  requires: {}", tool.requires.join(", "));
        }
        println!("  provides: {}", tool.provides.join(", "));
        for (step, corrective) in &tool.autofix {
            println!("  autofix:  {} via {}", step, corrective);
        }
    }

    if report.has_issues() {
        println!();
        for (step, tools) in &report.ambiguous {
            println!("WARNING: '{}' provided by {} (using {})", step, tools.join(", "), tools[0]);
        }
        for step in &report.unprovided {
            println!("WARNING: '{}' is required but never provided", step);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_orchestrator::pipeline::container_pipeline;
    use dockhand_orchestrator::ToolEdge;

    #[test]
    fn test_describe_pipeline() {
        let report = describe(&container_pipeline());
        assert_eq!(report.tools.len(), 10);
        assert!(!report.has_issues());

        let deploy = report
            .tools
            .iter()
            .find(|t| t.name == "deploy_application")
            .unwrap();
        assert_eq!(
            deploy.requires,
            vec!["built_image", "k8s_prepared", "manifests_generated"]
        );
        assert_eq!(deploy.autofix.get("k8s_prepared").map(String::as_str), Some("prepare_cluster"));
    }

    #[test]
    fn test_describe_reports_issues() {
        let graph = DependencyGraph::builder()
            .tool("a", ToolEdge::new().provides(["x"]))
            .tool("b", ToolEdge::new().provides(["x"]))
            .tool("c", ToolEdge::new().requires(["y"]).provides(["z"]))
            .build();

        let report = describe(&graph);
        assert!(report.has_issues());
        assert_eq!(report.ambiguous.get("x"), Some(&vec!["a".to_string(), "b".to_string()]));
        assert_eq!(report.unprovided, vec!["y"]);
    }
}
