use crate::report::{Phase, ValidationReport};
use crate::validate::{produced_topics, topic_flow};
use agmesh_types::{ClusterConfig, TriggerAction, topic};

/// Phase 2: the message-flow graph. Reachability of every consumed topic,
/// a single boot entry point, a single completion path, unguarded loops.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    let flow = topic_flow(config);

    if !flow.consumed.contains_key(topic::ISSUE_OPENED) {
        report.error(
            Phase::Flow,
            None,
            "no agent consumes ISSUE_OPENED; the cluster could never start",
        );
    }

    let stop_carriers: Vec<&str> = config
        .agents
        .iter()
        .filter(|a| {
            a.triggers
                .iter()
                .any(|t| t.action == TriggerAction::StopCluster)
        })
        .map(|a| a.id.as_str())
        .collect();
    match stop_carriers.len() {
        0 => {
            if !config
                .agents
                .iter()
                .any(|a| a.role.is_completion_detector())
            {
                report.error(
                    Phase::Flow,
                    None,
                    "no stop_cluster trigger and no completion-detector agent; the cluster could never finish",
                );
            }
        }
        1 => {}
        _ => {
            report.error(
                Phase::Flow,
                None,
                format!(
                    "stop_cluster triggers on more than one agent: {}",
                    stop_carriers.join(", ")
                ),
            );
        }
    }

    // Orphans: produced, consumed by nobody (and not a control topic the
    // orchestrator itself watches).
    for (topic_name, producers) in &flow.produced {
        if !flow.consumed.contains_key(topic_name)
            && !topic::SYSTEM_CONSUMED.contains(&topic_name.as_str())
        {
            report.warn(
                Phase::Flow,
                Some(&producers[0]),
                format!("topic {} is produced but never consumed", topic_name),
            );
        }
    }

    // Unreachable: consumed, produced by nobody (and not system-produced).
    for (topic_name, consumers) in &flow.consumed {
        if !flow.produced.contains_key(topic_name)
            && !topic::SYSTEM_PRODUCED.contains(&topic_name.as_str())
        {
            report.error(
                Phase::Flow,
                Some(&consumers[0].0),
                format!(
                    "topic {} is consumed but never produced by any agent or the system",
                    topic_name
                ),
            );
        }
    }

    // Self-triggers and two-cycles.
    for agent in &config.agents {
        let mine = produced_topics(agent);
        for trigger in &agent.triggers {
            if mine.contains(&trigger.topic) && trigger.logic.is_none() {
                report.error(
                    Phase::Flow,
                    Some(&agent.id),
                    format!(
                        "trigger on {} matches the agent's own output without guard logic (instant loop)",
                        trigger.topic
                    ),
                );
            }
        }
    }
    check_two_cycles(config, report);

    // Validators feed workers.
    let has_validators = config.agents.iter().any(|a| a.role.is_validator());
    if has_validators {
        for agent in &config.agents {
            if agent.role.is_worker()
                && !agent
                    .triggers
                    .iter()
                    .any(|t| t.topic == topic::VALIDATION_RESULT)
            {
                report.error(
                    Phase::Flow,
                    Some(&agent.id),
                    "cluster has validators but this worker never consumes VALIDATION_RESULT",
                );
            }
        }
    }

    // Context should cover what triggers react to.
    for agent in &config.agents {
        for trigger in &agent.triggers {
            if trigger.action == TriggerAction::ExecuteTask
                && !agent
                    .context
                    .sources
                    .iter()
                    .any(|s| s.topic == trigger.topic)
            {
                report.warn(
                    Phase::Flow,
                    Some(&agent.id),
                    format!(
                        "trigger topic {} is not represented in the context strategy",
                        trigger.topic
                    ),
                );
            }
        }
    }
}

/// A → B → A loops where neither consuming trigger carries guard logic.
fn check_two_cycles(config: &ClusterConfig, report: &mut ValidationReport) {
    let agents = &config.agents;
    for (i, a) in agents.iter().enumerate() {
        let a_topics = produced_topics(a);
        for b in agents.iter().skip(i + 1) {
            let b_topics = produced_topics(b);

            let b_consumes_a = b
                .triggers
                .iter()
                .filter(|t| a_topics.contains(&t.topic))
                .collect::<Vec<_>>();
            let a_consumes_b = a
                .triggers
                .iter()
                .filter(|t| b_topics.contains(&t.topic))
                .collect::<Vec<_>>();

            if !b_consumes_a.is_empty()
                && !a_consumes_b.is_empty()
                && b_consumes_a.iter().all(|t| t.logic.is_none())
                && a_consumes_b.iter().all(|t| t.logic.is_none())
            {
                report.warn(
                    Phase::Flow,
                    Some(&a.id),
                    format!(
                        "message cycle between {} and {} has no guard logic on either side",
                        a.id, b.id
                    ),
                );
            }
        }
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
    fn test_sound_cluster_has_no_flow_errors() {
        let report = run_phase(&sound_cluster());
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_unreachable_topic_is_an_error() {
        // Agent consumes FOO but nothing produces it.
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "starter", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] },
                { "id": "stopper", "role": "completion-detector",
                  "triggers": [{ "topic": "FOO", "action": "stop_cluster" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("FOO") && e.message.contains("never produced"))
        );
    }

    #[test]
    fn test_missing_issue_opened_consumer() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation",
                  "triggers": [{ "topic": "PLAN_READY", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("ISSUE_OPENED"))
        );
    }

    #[test]
    fn test_two_stop_carriers_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "a", "role": "implementation",
                  "triggers": [
                    { "topic": "ISSUE_OPENED", "action": "execute_task" },
                    { "topic": "CLUSTER_COMPLETE", "action": "stop_cluster" } ] },
                { "id": "b", "role": "completion-detector",
                  "triggers": [{ "topic": "VALIDATION_RESULT", "action": "stop_cluster" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("more than one agent"))
        );
    }

    #[test]
    fn test_unguarded_self_trigger_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "looper", "role": "implementation",
                  "triggers": [
                      { "topic": "ISSUE_OPENED", "action": "execute_task" },
                      { "topic": "STEP_DONE", "action": "execute_task" } ],
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "STEP_DONE", "content": { "text": "next" } } } } },
                { "id": "stopper", "role": "completion-detector",
                  "triggers": [{ "topic": "STEP_DONE", "action": "stop_cluster",
                      "logic": { "engine": "javascript", "script": "return false" } }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("instant loop"))
        );
    }

    #[test]
    fn test_guarded_self_trigger_allowed() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "looper", "role": "implementation",
                  "triggers": [
                      { "topic": "ISSUE_OPENED", "action": "execute_task" },
                      { "topic": "STEP_DONE", "action": "execute_task",
                        "logic": { "engine": "javascript",
                                   "script": "ledger.count({topic:'STEP_DONE'}) < 5" } } ],
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "STEP_DONE", "content": { "text": "next" } } } } },
                { "id": "stopper", "role": "completion-detector",
                  "triggers": [{ "topic": "STEP_DONE", "action": "stop_cluster",
                      "logic": { "engine": "javascript", "script": "return false" } }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(!report.errors.iter().any(|e| e.message.contains("instant loop")));
    }

    #[test]
    fn test_worker_must_consume_validation_result() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "worker", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }],
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "IMPLEMENTATION_READY", "content": { "text": "x" } } } } },
                { "id": "validator", "role": "validator",
                  "triggers": [{ "topic": "IMPLEMENTATION_READY", "action": "execute_task" }],
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "VALIDATION_RESULT", "content": { "text": "x" } } } } },
                { "id": "stopper", "role": "completion-detector",
                  "triggers": [{ "topic": "VALIDATION_RESULT", "action": "stop_cluster",
                      "logic": { "engine": "javascript", "script": "return true" } }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("never consumes VALIDATION_RESULT"))
        );
    }
}
