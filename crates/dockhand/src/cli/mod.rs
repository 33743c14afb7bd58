//! CLI module for Dockhand
//!
//! Offline views of the orchestrator: the dependency graph, the corrective
//! plan for a tool, and a dry-run simulation of a routed call.

pub mod config;
pub mod graph;
pub mod plan;
pub mod simulate;
