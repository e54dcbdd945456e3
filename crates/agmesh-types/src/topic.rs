//! Reserved control topics.
//!
//! Topics are uppercase symbolic routing keys. The runtime reserves the
//! set below; everything else is application-defined.

/// Published by the system when the cluster boots with fresh input.
pub const ISSUE_OPENED: &str = "ISSUE_OPENED";
/// Published by the system when an existing cluster is resumed.
pub const CLUSTER_RESUMED: &str = "CLUSTER_RESUMED";
/// Published by any agent to signal the cluster is done.
pub const CLUSTER_COMPLETE: &str = "CLUSTER_COMPLETE";
/// Published by a conductor to submit a dynamic operation list.
pub const CLUSTER_OPERATIONS: &str = "CLUSTER_OPERATIONS";
/// Agent start/stop/stale notices.
pub const AGENT_LIFECYCLE: &str = "AGENT_LIFECYCLE";
/// Published when an agent's execution cycle fails.
pub const AGENT_ERROR: &str = "AGENT_ERROR";
/// Synthesized triggering message for a manual resume of one agent.
pub const AGENT_RESUME: &str = "AGENT_RESUME";
/// Published once when an agent reaches its iteration limit.
pub const AGENT_EXHAUSTED: &str = "AGENT_EXHAUSTED";
/// Validator verdicts.
pub const VALIDATION_RESULT: &str = "VALIDATION_RESULT";
/// Worker signals its implementation is ready for validation.
pub const IMPLEMENTATION_READY: &str = "IMPLEMENTATION_READY";
/// Planner output.
pub const PLAN_READY: &str = "PLAN_READY";
/// Raw provider stream lines republished by the task executor.
pub const TASK_LOG: &str = "TASK_LOG";

/// Topics the system itself may produce (used by flow analysis: consuming
/// one of these never counts as an unreachable topic).
pub const SYSTEM_PRODUCED: &[&str] = &[
    ISSUE_OPENED,
    CLUSTER_RESUMED,
    AGENT_RESUME,
    AGENT_LIFECYCLE,
    AGENT_ERROR,
    AGENT_EXHAUSTED,
    TASK_LOG,
];

/// Topics consumed by the orchestrator (producing one of these never counts
/// as an orphan).
pub const SYSTEM_CONSUMED: &[&str] = &[
    CLUSTER_COMPLETE,
    CLUSTER_OPERATIONS,
    AGENT_LIFECYCLE,
    AGENT_ERROR,
    AGENT_EXHAUSTED,
    TASK_LOG,
];
