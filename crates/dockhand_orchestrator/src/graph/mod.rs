//! Dependency Graph - Tool Preconditions and Effects
//!
//! Every pipeline tool declares the steps it *requires* and the steps it
//! *provides*. The router consults this graph to find which steps a session
//! is missing and which tools can produce them.
//!
//! # Example
//!
//! ```ignore
//! let graph = DependencyGraph::builder()
//!     .tool("analyze_repository", ToolEdge::new().provides(["analyzed_repo"]))
//!     .tool(
//!         "generate_dockerfile",
//!         ToolEdge::new()
//!             .requires(["analyzed_repo"])
//!             .provides(["dockerfile_generated"]),
//!     )
//!     .build();
//! ```
//!
//! The graph is immutable once built and is shared read-only between
//! concurrent route calls.

mod resolve;

pub use resolve::{PlannedStep, MAX_EXPANSIONS};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// Steps
// =============================================================================

/// Named pipeline milestone (e.g. `analyzed_repo`, `built_image`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step(String);

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Step {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Step {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Step {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Edges
// =============================================================================

type ParamBuilder = dyn Fn(&Value) -> Value + Send + Sync;

/// Maps a missing step to the tool that provides it, plus a function that
/// builds that tool's parameters from the caller's original parameters.
#[derive(Clone)]
pub struct AutofixRule {
    tool: String,
    build_params: Arc<ParamBuilder>,
}

impl AutofixRule {
    pub fn new<F>(tool: impl Into<String>, build_params: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            tool: tool.into(),
            build_params: Arc::new(build_params),
        }
    }

    /// Tool this rule invokes
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Build corrective parameters from the caller's parameters
    pub fn build_params(&self, caller_params: &Value) -> Value {
        (self.build_params)(caller_params)
    }
}

impl fmt::Debug for AutofixRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutofixRule")
            .field("tool", &self.tool)
            .field("build_params", &"<fn>")
            .finish()
    }
}

/// A tool's declared relationship to pipeline steps
#[derive(Debug, Clone, Default)]
pub struct ToolEdge {
    requires: Vec<Step>,
    provides: Vec<Step>,
    autofix: BTreeMap<Step, AutofixRule>,
}

impl ToolEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add required steps (duplicates are ignored)
    pub fn requires<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        for step in steps {
            push_unique(&mut self.requires, step.into());
        }
        self
    }

    /// Add provided steps (duplicates are ignored)
    pub fn provides<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        for step in steps {
            push_unique(&mut self.provides, step.into());
        }
        self
    }

    /// Declare how to synthesize parameters for the tool that provides `step`
    pub fn autofix<F>(mut self, step: impl Into<Step>, tool: impl Into<String>, build_params: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.autofix
            .insert(step.into(), AutofixRule::new(tool, build_params));
        self
    }

    pub fn required_steps(&self) -> &[Step] {
        &self.requires
    }

    pub fn provided_steps(&self) -> &[Step] {
        &self.provides
    }

    pub fn autofix_rules(&self) -> &BTreeMap<Step, AutofixRule> {
        &self.autofix
    }

    pub fn autofix_for(&self, step: &Step) -> Option<&AutofixRule> {
        self.autofix.get(step)
    }

    /// True when every provided step is already in `completed`.
    ///
    /// A tool that provides nothing is never considered satisfied.
    pub fn is_satisfied_by(&self, completed: &BTreeSet<Step>) -> bool {
        !self.provides.is_empty() && self.provides.iter().all(|s| completed.contains(s))
    }
}

fn push_unique(steps: &mut Vec<Step>, step: Step) {
    if !steps.contains(&step) {
        steps.push(step);
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while resolving missing steps
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A required step is not provided by any declared tool
    #[error("No tool provides step '{step}'")]
    NoProvider { step: Step },

    /// Resolution stopped making progress
    #[error("Circular or unsatisfiable dependency involving steps: {}", join_steps(.steps))]
    CircularDependency { steps: Vec<Step> },
}

fn join_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .map(Step::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Graph
// =============================================================================

/// Static dependency graph over pipeline tools.
///
/// Tools keep their declaration order; provider lookup for a step always
/// returns the first declared tool that provides it.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: Vec<(String, ToolEdge)>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::default()
    }

    /// Edge for a tool, `None` for dependency-free tools
    pub fn edge_of(&self, tool: &str) -> Option<&ToolEdge> {
        self.index.get(tool).map(|&i| &self.edges[i].1)
    }

    /// Declared tools in declaration order
    pub fn tools(&self) -> impl Iterator<Item = (&str, &ToolEdge)> {
        self.edges.iter().map(|(name, edge)| (name.as_str(), edge))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// First declared tool whose `provides` contains `step`
    pub fn provider_of(&self, step: &Step) -> Option<&str> {
        self.provider_entry(step).map(|(name, _)| name)
    }

    pub(crate) fn provider_entry(&self, step: &Step) -> Option<(&str, &ToolEdge)> {
        self.edges
            .iter()
            .find(|(_, edge)| edge.provides.contains(step))
            .map(|(name, edge)| (name.as_str(), edge))
    }

    /// Steps `tool` requires that are not in `completed`, in declaration order
    pub fn missing_preconditions(&self, tool: &str, completed: &BTreeSet<Step>) -> Vec<Step> {
        self.edge_of(tool)
            .map(|edge| {
                edge.requires
                    .iter()
                    .filter(|s| !completed.contains(*s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Autofix rule for `step`, preferring the requested tool's own edge.
    ///
    /// Steps discovered transitively fall back to the first declared edge that
    /// carries a rule for them.
    pub fn autofix_for(&self, requested_tool: &str, step: &Step) -> Option<&AutofixRule> {
        self.edge_of(requested_tool)
            .and_then(|edge| edge.autofix_for(step))
            .or_else(|| self.edges.iter().find_map(|(_, edge)| edge.autofix_for(step)))
    }

    /// Steps declared by more than one provider, with providers in declaration order
    pub fn ambiguous_providers(&self) -> BTreeMap<Step, Vec<String>> {
        let mut providers: BTreeMap<Step, Vec<String>> = BTreeMap::new();
        for (name, edge) in &self.edges {
            for step in &edge.provides {
                providers.entry(step.clone()).or_default().push(name.clone());
            }
        }
        providers.retain(|_, tools| tools.len() > 1);
        providers
    }

    /// Required steps that no tool provides
    pub fn unprovided_steps(&self) -> BTreeSet<Step> {
        let provided: BTreeSet<&Step> = self.edges.iter().flat_map(|(_, e)| &e.provides).collect();
        self.edges
            .iter()
            .flat_map(|(_, e)| &e.requires)
            .filter(|s| !provided.contains(s))
            .cloned()
            .collect()
    }
}

/// Builder for [`DependencyGraph`]
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    edges: Vec<(String, ToolEdge)>,
}

impl DependencyGraphBuilder {
    /// Declare a tool. Re-declaring a tool replaces its edge in place.
    pub fn tool(mut self, name: impl Into<String>, edge: ToolEdge) -> Self {
        let name = name.into();
        if let Some(existing) = self.edges.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = edge;
        } else {
            self.edges.push((name, edge));
        }
        self
    }

    pub fn build(self) -> DependencyGraph {
        let index = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        let graph = DependencyGraph {
            edges: self.edges,
            index,
        };

        for (step, tools) in graph.ambiguous_providers() {
            warn!(
                "Step '{}' has multiple providers ({}); using '{}'",
                step,
                tools.join(", "),
                tools[0]
            );
        }
        for step in graph.unprovided_steps() {
            warn!("Step '{}' is required but no tool provides it", step);
        }
        debug!("Built dependency graph with {} tools", graph.len());

        graph
    }
}

// =============================================================================
// Tests
// =============================================================================
