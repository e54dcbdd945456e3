mod agent;
mod cluster;
mod context;
mod error;
mod executor;
mod hooks;
mod input;
mod liveness;
mod model;
mod orchestrator;
mod schema;
mod settings;

pub use agent::{AgentHandle, AgentState, AgentWorker, SpawnSpec};
pub use cluster::ClusterHandle;
pub use context::{ContextRequest, MAX_CONTEXT_CHARS, build_context};
pub use error::{Error, Result};
pub use executor::{ExecOptions, ExecutionRecord, run_task};
pub use hooks::{HookContext, HookEffect, execute_hook};
pub use input::{IssueProvider, LocalIssueProvider};
pub use liveness::{LivenessSpec, spawn_monitor};
pub use model::{ResolvedModel, resolve_model};
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome};
pub use schema::validate_output;
pub use settings::{Settings, resolve_workspace_path};
