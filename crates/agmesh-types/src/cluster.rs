use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;

/// Reference to a secondary config file merged at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfig {
    pub path: String,
}

/// Docker isolation settings for the whole cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Host paths bind-mounted into the task container. Must be absolute.
    #[serde(default)]
    pub mounts: Vec<String>,
}

/// Declarative cluster definition: the unit the validator analyzes and the
/// orchestrator boots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Template inputs, substituted before validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_config: Option<LoadConfig>,
    /// Executor tuning: `{retries, timeout}`. Kept loose so the analyzer
    /// can report type mistakes instead of failing the whole parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_executor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

impl ClusterConfig {
    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn agents_by_role(&self, role: &str) -> Vec<&AgentConfig> {
        self.agents
            .iter()
            .filter(|a| a.role.as_str() == role)
            .collect()
    }

    /// Depth-first walk over this cluster and every nested sub-cluster.
    pub fn walk_clusters<'a>(&'a self, visit: &mut dyn FnMut(&'a ClusterConfig, usize)) {
        fn go<'a>(
            cluster: &'a ClusterConfig,
            depth: usize,
            visit: &mut dyn FnMut(&'a ClusterConfig, usize),
        ) {
            visit(cluster, depth);
            for agent in &cluster.agents {
                if let Some(sub) = &agent.cluster {
                    go(sub, depth + 1, visit);
                }
            }
        }
        go(self, 0, visit);
    }
}

/// Identity of a booted cluster instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub id: String,
    /// Milliseconds since the unix epoch.
    pub created_at: i64,
}

impl ClusterDescriptor {
    /// Fresh descriptor with a generated id and the current time.
    pub fn generate() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: crate::now_ms(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: crate::now_ms(),
        }
    }
}

/// Normalized issue-intake payload fetched by an issue provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    pub source: String,
    pub reference: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_config_parse_minimal() {
        let cfg: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        assert_eq!(cfg.agents.len(), 1);
        assert!(cfg.agent("a").is_some());
        assert!(cfg.agent("b").is_none());
    }

    #[test]
    fn test_walk_clusters_visits_nested() {
        let cfg: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "conductor", "role": "conductor",
                  "cluster": {
                      "agents": [
                          { "id": "inner", "role": "implementation" }
                      ]
                  } }
            ]
        }))
        .unwrap();

        let mut seen = Vec::new();
        cfg.walk_clusters(&mut |cluster, depth| {
            seen.push((cluster.agents.len(), depth));
        });
        assert_eq!(seen, vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn test_agents_by_role() {
        let cfg: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "v1", "role": "validator" },
                { "id": "v2", "role": "validator" },
                { "id": "w", "role": "implementation" }
            ]
        }))
        .unwrap();
        assert_eq!(cfg.agents_by_role("validator").len(), 2);
        assert_eq!(cfg.agents_by_role("conductor").len(), 0);
    }
}
