//! Shared fixtures for router integration tests: recording fake tools and a
//! router wired to the container pipeline.

#![allow(dead_code)]

use async_trait::async_trait;
use dockhand_orchestrator::pipeline::{container_pipeline, tools as pipeline_tools};
use dockhand_orchestrator::tools::session as session_tools;
use dockhand_orchestrator::{
    DependencyGraph, InputShape, ManualClock, OrchestratorConfig, ParameterSuggester,
    ResourceKey, SessionStore, SuggestError, Suggestion, SuggestionRequest, Tool, ToolContext,
    ToolOutcome, ToolRegistry, ToolRouter,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of every tool invocation
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CallLog {
    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn params_of(&self, tool: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.params_of(tool).len()
    }

    /// Highest number of tools observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, name: &str, params: &Value) {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), params.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    Panic,
    /// Delete the calling session, then succeed
    DropSession,
}

/// Tool that records its calls and behaves as configured
pub struct FakeTool {
    name: String,
    shape: InputShape,
    behavior: Behavior,
    keyed: bool,
    delay: Option<Duration>,
    lock_timeout: Option<Duration>,
    log: CallLog,
}

impl FakeTool {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            shape: InputShape::any(),
            behavior: Behavior::Succeed,
            keyed: false,
            delay: None,
            lock_timeout: None,
            log: log.clone(),
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        let mut builder = InputShape::builder();
        for field in fields {
            builder = builder.required(field, "string", "");
        }
        self.shape = builder.build();
        self
    }

    pub fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Lock on the `path` parameter
    pub fn keyed(mut self) -> Self {
        self.keyed = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// Lock key a keyed [`FakeTool`] uses for `path`
pub fn fake_key(tool: &str, path: &str) -> ResourceKey {
    ResourceKey::build(&[("tool", tool), ("path", path)])
}

#[async_trait]
impl Tool for FakeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Recording test tool"
    }

    fn input_shape(&self) -> InputShape {
        self.shape.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        self.log.enter(&self.name, &params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.exit();

        match self.behavior {
            Behavior::Succeed => ToolOutcome::success(json!({ "tool": self.name, "params": params })),
            Behavior::Fail(message) => {
                ToolOutcome::failure_with_guidance(message, format!("Check {}", self.name))
            }
            Behavior::Panic => panic!("{} exploded", self.name),
            Behavior::DropSession => {
                ctx.sessions.delete(&ctx.session_id);
                ToolOutcome::success(json!({ "tool": self.name, "params": params }))
            }
        }
    }

    fn resource_key(&self, params: &Value) -> Option<ResourceKey> {
        if !self.keyed {
            return None;
        }
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        Some(fake_key(&self.name, path))
    }

    fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }
}

/// Suggester returning a fixed map and recording requests
#[derive(Clone, Default)]
pub struct FakeSuggester {
    pub suggestions: Map<String, Value>,
    pub available: bool,
    pub fail: bool,
    pub panic: bool,
    pub requests: Arc<Mutex<Vec<SuggestionRequest>>>,
}

impl FakeSuggester {
    pub fn with(suggestions: Value) -> Self {
        Self {
            suggestions: suggestions.as_object().cloned().unwrap_or_default(),
            available: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ParameterSuggester for FakeSuggester {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn suggest(&self, request: SuggestionRequest) -> Result<Suggestion, SuggestError> {
        self.requests.lock().unwrap().push(request);
        if self.panic {
            panic!("suggester exploded");
        }
        if self.fail {
            return Err(SuggestError::Backend("model offline".into()));
        }
        Ok(Suggestion {
            suggestions: self.suggestions.clone(),
            confidence: 0.9,
            reasoning: None,
        })
    }
}

/// Router over the container pipeline with recording tools
pub struct Fixture {
    pub router: ToolRouter,
    pub log: CallLog,
    pub clock: ManualClock,
}

pub struct FixtureBuilder {
    log: CallLog,
    overrides: HashMap<String, FakeTool>,
    extra: Vec<FakeTool>,
    graph: Option<DependencyGraph>,
    suggester: Option<Arc<dyn ParameterSuggester>>,
    config: OrchestratorConfig,
}

impl Fixture {
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder {
            log: CallLog::default(),
            overrides: HashMap::new(),
            extra: Vec::new(),
            graph: None,
            suggester: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn pipeline() -> Self {
        Self::builder().build()
    }
}

impl FixtureBuilder {
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Replace the default fake for a pipeline tool
    pub fn tool(mut self, make: impl FnOnce(&CallLog) -> FakeTool) -> Self {
        let tool = make(&self.log);
        self.overrides.insert(tool.name.clone(), tool);
        self
    }

    /// Register a tool outside the pipeline
    pub fn extra(mut self, make: impl FnOnce(&CallLog) -> FakeTool) -> Self {
        let tool = make(&self.log);
        self.extra.push(tool);
        self
    }

    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn suggester(mut self, suggester: Arc<dyn ParameterSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(mut self) -> Fixture {
        let mut registry = ToolRegistry::new();
        for name in pipeline_tools::ALL {
            let tool = self
                .overrides
                .remove(name)
                .unwrap_or_else(|| FakeTool::new(name, &self.log));
            registry.register(Arc::new(tool));
        }
        for tool in self.overrides.into_values().chain(self.extra) {
            registry.register(Arc::new(tool));
        }
        session_tools::register(&mut registry);

        let clock = ManualClock::default();
        let sessions = SessionStore::with_clock(&self.config.sessions, Arc::new(clock.clone()));

        let mut builder = ToolRouter::builder()
            .graph(self.graph.unwrap_or_else(container_pipeline))
            .registry(registry)
            .sessions(sessions)
            .config(self.config);
        if let Some(suggester) = self.suggester {
            builder = builder.suggester(suggester);
        }

        Fixture {
            router: builder.build(),
            log: self.log,
            clock,
        }
    }
}
