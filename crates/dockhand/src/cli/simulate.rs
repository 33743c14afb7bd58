//! Simulate command - Route a call through dry-run tools
//!
//! Every pipeline tool is replaced by a [`DryRunTool`] that echoes its
//! parameters, so the full routing path (session, prerequisite chain,
//! parameter completion, resource locks) runs without touching a container
//! engine or cluster.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dockhand_orchestrator::pipeline::{container_pipeline, tools};
use dockhand_orchestrator::tools::session as session_tools;
use dockhand_orchestrator::{
    InputShape, OrchestratorConfig, ResourceKey, RouteRequest, RouteResult, Tool, ToolContext,
    ToolOutcome, ToolRegistry, ToolRouter,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Arguments for the simulate command
#[derive(Debug)]
pub struct SimulateArgs {
    pub tool: String,
    pub params: Option<String>,
    pub session: Option<String>,
    pub force: bool,
    /// Tools that should report failure
    pub fail: Vec<String>,
}

/// Pipeline tool that performs no work
pub struct DryRunTool {
    name: &'static str,
    fail: bool,
}

impl DryRunTool {
    pub fn new(name: &'static str) -> Self {
        Self { name, fail: false }
    }

    pub fn failing(name: &'static str) -> Self {
        Self { name, fail: true }
    }
}

fn str_param<'a>(params: &'a Value, field: &str, default: &'a str) -> &'a str {
    params.get(field).and_then(Value::as_str).unwrap_or(default)
}

#[async_trait]
impl Tool for DryRunTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Dry run: records the call and returns its parameters"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::any()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolOutcome {
        if self.fail {
            return ToolOutcome::failure_with_guidance(
                format!("{} failed (simulated)", self.name),
                "Drop --fail to let this step succeed",
            );
        }
        info!("Dry run of {}", self.name);
        ToolOutcome::success(json!({ "tool": self.name, "dry_run": true, "params": params }))
    }

    /// Builds lock on the build context, pushes on the target reference
    fn resource_key(&self, params: &Value) -> Option<ResourceKey> {
        match self.name {
            tools::BUILD_IMAGE => Some(ResourceKey::for_build(
                str_param(params, "path", "."),
                str_param(params, "dockerfile", "Dockerfile"),
                str_param(params, "platform", "linux/amd64"),
            )),
            tools::PUSH_IMAGE => {
                let repository = params
                    .get("repository")
                    .or_else(|| params.get("image_id"))
                    .and_then(Value::as_str)?;
                Some(ResourceKey::for_push(repository, str_param(params, "tag", "latest")))
            }
            _ => None,
        }
    }
}

/// Router over the container pipeline with dry-run tools
pub fn dry_run_router(config: OrchestratorConfig, fail: &[String]) -> Result<ToolRouter> {
    let fail: BTreeSet<&str> = fail.iter().map(String::as_str).collect();
    if let Some(unknown) = fail.iter().find(|name| !tools::ALL.contains(*name)) {
        bail!("--fail {}: not a pipeline tool", unknown);
    }

    let mut registry = ToolRegistry::new();
    for name in tools::ALL {
        let tool = if fail.contains(&name) {
            DryRunTool::failing(name)
        } else {
            DryRunTool::new(name)
        };
        registry.register(Arc::new(tool));
    }
    session_tools::register(&mut registry);

    Ok(ToolRouter::builder()
        .graph(container_pipeline())
        .registry(registry)
        .config(config)
        .build())
}

/// Build the request described by `args`
pub fn request_from(args: &SimulateArgs) -> Result<RouteRequest> {
    let params = match &args.params {
        Some(text) => serde_json::from_str(text).context("--params is not valid JSON")?,
        None => json!({}),
    };
    let mut request = RouteRequest::new(&args.tool, params);
    if let Some(session) = &args.session {
        request = request.session(session.as_str());
    }
    if args.force {
        request = request.force();
    }
    Ok(request)
}

pub async fn simulate(router: &ToolRouter, request: RouteRequest) -> RouteResult {
    router.route(request).await
}

/// Execute the simulate command
pub fn run(args: SimulateArgs, config: OrchestratorConfig) -> Result<()> {
    let router = dry_run_router(config, &args.fail)?;
    let request = request_from(&args)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(simulate(&router, request));

    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    if let Err(e) = result.result {
        bail!("{} did not complete: {}", args.tool, e);
    }
    Ok(())
}
