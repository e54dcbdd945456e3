use crate::report::{Phase, ValidationReport};
use agmesh_types::{AgentConfig, ClusterConfig, IterationPattern};
use std::collections::HashSet;

const MAX_CLUSTER_DEPTH: usize = 5;

/// Phase 1: required fields, unique ids, iteration-pattern strings,
/// trigger shape, recursive sub-cluster structure, nesting depth.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    config.walk_clusters(&mut |cluster, depth| {
        if depth > MAX_CLUSTER_DEPTH {
            report.error(
                Phase::Structure,
                None,
                format!(
                    "cluster nesting depth {} exceeds the maximum of {}",
                    depth, MAX_CLUSTER_DEPTH
                ),
            );
            return;
        }
        check_cluster(cluster, report);
    });
}

fn check_cluster(cluster: &ClusterConfig, report: &mut ValidationReport) {
    if cluster.agents.is_empty() {
        report.error(Phase::Structure, None, "cluster declares no agents");
    }

    let mut seen = HashSet::new();
    for agent in &cluster.agents {
        if agent.id.trim().is_empty() {
            report.error(Phase::Structure, None, "agent with empty id");
            continue;
        }
        if !seen.insert(agent.id.as_str()) {
            report.error(
                Phase::Structure,
                Some(&agent.id),
                "duplicate agent id within cluster",
            );
        }
        check_agent(agent, report);
    }
}

fn check_agent(agent: &AgentConfig, report: &mut ValidationReport) {
    let id = agent.id.as_str();

    if agent.role.as_str().trim().is_empty() {
        report.error(Phase::Structure, Some(id), "agent role must not be empty");
    }

    for (index, trigger) in agent.triggers.iter().enumerate() {
        if trigger.topic.trim().is_empty() {
            report.error(
                Phase::Structure,
                Some(id),
                format!("trigger #{} has an empty topic", index + 1),
            );
        } else if trigger.topic != trigger.topic.to_uppercase() {
            report.warn(
                Phase::Structure,
                Some(id),
                format!(
                    "trigger topic {:?} is not uppercase; topics are uppercase symbols",
                    trigger.topic
                ),
            );
        }
        if let Some(logic) = &trigger.logic
            && logic.script.trim().is_empty()
        {
            report.error(
                Phase::Structure,
                Some(id),
                format!("trigger #{} has an empty logic script", index + 1),
            );
        }
    }

    for rule in &agent.model_rules {
        check_pattern(&rule.iterations, id, "modelRules", report);
    }
    if let Some(agmesh_types::PromptSpec::Rules(rules)) = &agent.prompt {
        for rule in rules {
            check_pattern(&rule.iterations, id, "prompt rules", report);
        }
    }

    if agent.max_iterations == 0 {
        report.error(Phase::Structure, Some(id), "maxIterations must be at least 1");
    }
}

fn check_pattern(pattern: &str, agent: &str, what: &str, report: &mut ValidationReport) {
    if let Err(err) = pattern.parse::<IterationPattern>() {
        report.error(
            Phase::Structure,
            Some(agent),
            format!("{} entry: {}", what, err),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::sound_cluster;
    use serde_json::json;

    fn run_phase(config: &ClusterConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        run(config, &mut report);
        report
    }

    #[test]
    fn test_sound_cluster_passes() {
        let report = run_phase(&sound_cluster());
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation" },
                { "id": "a", "role": "validator" }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("duplicate"));
    }

    #[test]
    fn test_bad_iteration_pattern_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation",
                  "modelRules": [ { "iterations": "whenever", "modelLevel": "standard" } ] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("iteration pattern"));
    }

    #[test]
    fn test_lowercase_topic_warns() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation",
                  "triggers": [{ "topic": "issue_opened", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_nesting_depth_limit() {
        // Build a 7-deep chain of sub-clusters.
        let mut inner = json!({ "agents": [ { "id": "leaf", "role": "implementation" } ] });
        for level in (0..7).rev() {
            inner = json!({
                "agents": [
                    { "id": format!("level-{}", level), "role": "conductor", "cluster": inner }
                ]
            });
        }
        let config: ClusterConfig = serde_json::from_value(inner).unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("nesting depth"))
        );
    }
}
