//! Container Pipeline - Default Dependency Graph
//!
//! Declares the build/deploy pipeline the orchestrator ships with:
//!
//! ```text
//! analyze_repository ─► generate_dockerfile ─► build_image ─┬─► scan_image
//!                                                           ├─► tag_image ─► push_image
//!                                                           └─► generate_k8s_manifests ─┐
//! prepare_cluster ──────────────────────────────────────────────────────────────────────┴─► deploy_application ─► verify_deployment
//! ```
//!
//! Autofix rules carry `path`, `image_id` and `namespace` from the caller's
//! parameters into the corrective tool's parameters.

use crate::graph::{DependencyGraph, ToolEdge};
use serde_json::{Map, Value};

/// Tool names
pub mod tools {
    pub const ANALYZE_REPOSITORY: &str = "analyze_repository";
    pub const GENERATE_DOCKERFILE: &str = "generate_dockerfile";
    pub const BUILD_IMAGE: &str = "build_image";
    pub const SCAN_IMAGE: &str = "scan_image";
    pub const TAG_IMAGE: &str = "tag_image";
    pub const PUSH_IMAGE: &str = "push_image";
    pub const PREPARE_CLUSTER: &str = "prepare_cluster";
    pub const GENERATE_K8S_MANIFESTS: &str = "generate_k8s_manifests";
    pub const DEPLOY_APPLICATION: &str = "deploy_application";
    pub const VERIFY_DEPLOYMENT: &str = "verify_deployment";

    /// Every pipeline tool in declaration order
    pub const ALL: [&str; 10] = [
        ANALYZE_REPOSITORY,
        GENERATE_DOCKERFILE,
        BUILD_IMAGE,
        SCAN_IMAGE,
        TAG_IMAGE,
        PUSH_IMAGE,
        PREPARE_CLUSTER,
        GENERATE_K8S_MANIFESTS,
        DEPLOY_APPLICATION,
        VERIFY_DEPLOYMENT,
    ];
}

/// Step names
pub mod steps {
    pub const ANALYZED_REPO: &str = "analyzed_repo";
    pub const DOCKERFILE_GENERATED: &str = "dockerfile_generated";
    pub const BUILT_IMAGE: &str = "built_image";
    pub const IMAGE_SCANNED: &str = "image_scanned";
    pub const IMAGE_TAGGED: &str = "image_tagged";
    pub const IMAGE_PUSHED: &str = "image_pushed";
    pub const K8S_PREPARED: &str = "k8s_prepared";
    pub const MANIFESTS_GENERATED: &str = "manifests_generated";
    pub const DEPLOYED: &str = "deployed";
    pub const DEPLOYMENT_VERIFIED: &str = "deployment_verified";
}

use steps::*;
use tools::*;

/// Copy the named fields that are present in the caller's parameters
fn carry(fields: &'static [&'static str]) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    move |params: &Value| {
        let mut out = Map::new();
        for field in fields {
            if let Some(value) = params.get(*field).filter(|v| !v.is_null()) {
                out.insert((*field).to_string(), value.clone());
            }
        }
        Value::Object(out)
    }
}

/// The container build/deploy pipeline
pub fn container_pipeline() -> DependencyGraph {
    DependencyGraph::builder()
        .tool(ANALYZE_REPOSITORY, ToolEdge::new().provides([ANALYZED_REPO]))
        .tool(
            GENERATE_DOCKERFILE,
            ToolEdge::new()
                .requires([ANALYZED_REPO])
                .provides([DOCKERFILE_GENERATED])
                .autofix(ANALYZED_REPO, ANALYZE_REPOSITORY, carry(&["path"])),
        )
        .tool(
            BUILD_IMAGE,
            ToolEdge::new()
                .requires([DOCKERFILE_GENERATED])
                .provides([BUILT_IMAGE])
                .autofix(DOCKERFILE_GENERATED, GENERATE_DOCKERFILE, carry(&["path"])),
        )
        .tool(
            SCAN_IMAGE,
            ToolEdge::new()
                .requires([BUILT_IMAGE])
                .provides([IMAGE_SCANNED])
                .autofix(BUILT_IMAGE, BUILD_IMAGE, carry(&["path", "image_id"])),
        )
        .tool(
            TAG_IMAGE,
            ToolEdge::new()
                .requires([BUILT_IMAGE])
                .provides([IMAGE_TAGGED])
                .autofix(BUILT_IMAGE, BUILD_IMAGE, carry(&["path", "image_id"])),
        )
        .tool(
            PUSH_IMAGE,
            ToolEdge::new()
                .requires([IMAGE_TAGGED])
                .provides([IMAGE_PUSHED])
                .autofix(IMAGE_TAGGED, TAG_IMAGE, carry(&["image_id", "tag"])),
        )
        .tool(PREPARE_CLUSTER, ToolEdge::new().provides([K8S_PREPARED]))
        .tool(
            GENERATE_K8S_MANIFESTS,
            ToolEdge::new()
                .requires([BUILT_IMAGE])
                .provides([MANIFESTS_GENERATED])
                .autofix(BUILT_IMAGE, BUILD_IMAGE, carry(&["path", "image_id"])),
        )
        .tool(
            DEPLOY_APPLICATION,
            ToolEdge::new()
                .requires([BUILT_IMAGE, K8S_PREPARED, MANIFESTS_GENERATED])
                .provides([DEPLOYED])
                .autofix(BUILT_IMAGE, BUILD_IMAGE, carry(&["path", "image_id"]))
                .autofix(K8S_PREPARED, PREPARE_CLUSTER, carry(&["namespace"]))
                .autofix(
                    MANIFESTS_GENERATED,
                    GENERATE_K8S_MANIFESTS,
                    carry(&["path", "image_id", "namespace"]),
                ),
        )
        .tool(
            VERIFY_DEPLOYMENT,
            ToolEdge::new()
                .requires([DEPLOYED])
                .provides([DEPLOYMENT_VERIFIED])
                .autofix(DEPLOYED, DEPLOY_APPLICATION, carry(&["image_id", "namespace"])),
        )
        .build()
}
