use agmesh_types::{Message, now_ms};
use serde::Serialize;

/// Cluster identity visible to scripts as `cluster.id` / `cluster.createdAt`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterEnv {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// One roster entry, visible through `cluster.getAgent` /
/// `cluster.getAgentsByRole`.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: String,
    pub role: String,
}

/// The evaluating agent, visible to scripts as `agent`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEnv {
    pub id: String,
    pub role: String,
    pub iteration: u32,
    pub cluster_id: String,
}

/// Everything a script can see. The ledger portion is a snapshot taken at
/// evaluation start, so every query inside one run observes the same state.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptEnv {
    pub cluster: ClusterEnv,
    pub agents: Vec<RosterEntry>,
    pub agent: AgentEnv,
    /// The triggering message, or `null` for hook evaluation paths that
    /// have none.
    pub message: Option<Message>,
    pub messages: Vec<Message>,
    /// Frozen `Date.now()` value for the run.
    pub now: i64,
}

impl ScriptEnv {
    pub fn new(
        cluster: ClusterEnv,
        agents: Vec<RosterEntry>,
        agent: AgentEnv,
        message: Option<Message>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            cluster,
            agents,
            agent,
            message,
            messages,
            now: now_ms(),
        }
    }
}
