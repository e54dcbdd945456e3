use crate::report::{Phase, ValidationReport};
use crate::validate::all_hooks;
use agmesh_types::{AgentConfig, ClusterConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static RESULT_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{result\.([A-Za-z0-9_]+)\}\}").unwrap());

/// `{{result.output}}` is the raw task output, not a schema field.
const BUILTIN_RESULT_FIELDS: &[&str] = &["output"];

/// Phase 5: every `{{result.*}}` must name a schema property, and
/// explicitly declared properties should be consumed somewhere.
/// Sub-clusters are checked with their own agents' schemas.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    config.walk_clusters(&mut |cluster, _| {
        for agent in &cluster.agents {
            check_agent(agent, report);
        }
    });
}

fn check_agent(agent: &AgentConfig, report: &mut ValidationReport) {
    let used = result_fields_used(agent);
    let schema = agent.effective_schema();
    let declared: BTreeSet<String> = schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();

    for field in &used {
        if BUILTIN_RESULT_FIELDS.contains(&field.as_str()) {
            continue;
        }
        if !declared.contains(field) {
            report.error(
                Phase::Templates,
                Some(&agent.id),
                format!(
                    "template variable {{{{result.{}}}}} does not match any schema property",
                    field
                ),
            );
        }
    }

    // Only meaningful when the author spelled the schema out.
    if agent.json_schema.is_some() && !used.is_empty() {
        for property in &declared {
            if !used.contains(property) {
                report.warn(
                    Phase::Templates,
                    Some(&agent.id),
                    format!(
                        "schema property {:?} is declared but never used in any template",
                        property
                    ),
                );
            }
        }
    }
}

/// All `{{result.<field>}}` occurrences across the agent's hook configs
/// and transform scripts.
fn result_fields_used(agent: &AgentConfig) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    for (_, hook) in all_hooks(agent) {
        if let Some(config) = &hook.config {
            let text = config.to_string();
            for caps in RESULT_VAR.captures_iter(&text) {
                fields.insert(caps[1].to_string());
            }
        }
        if let Some(transform) = &hook.transform {
            for caps in RESULT_VAR.captures_iter(transform) {
                fields.insert(caps[1].to_string());
            }
        }
    }
    fields
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
    fn test_sound_cluster_templates_pass() {
        let report = run_phase(&sound_cluster());
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_unknown_result_field_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }],
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "DONE",
                                  "content": { "text": "{{result.verdict}}" } } } } }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("result.verdict"))
        );
    }

    #[test]
    fn test_result_output_is_always_available() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }],
                  "hooks": { "onFailure": { "action": "publish_message",
                      "config": { "topic": "AGENT_ERROR",
                                  "content": { "text": "{{result.output}}" } } } } }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_unused_declared_property_warns() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }],
                  "jsonSchema": { "type": "object",
                      "properties": { "summary": { "type": "string" },
                                       "confidence": { "type": "number" } } },
                  "hooks": { "onComplete": { "action": "publish_message",
                      "config": { "topic": "DONE",
                                  "content": { "text": "{{result.summary}}" } } } } }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.message.contains("confidence"))
        );
    }

    #[test]
    fn test_transform_and_trigger_hooks_are_scanned() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "triggers": [
                      { "topic": "ISSUE_OPENED", "action": "execute_task",
                        "onComplete": { "action": "publish_message",
                            "transform": "return { topic: 'DONE', content: { text: '{{result.missing_field}}' } }" } }
                  ] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("missing_field"))
        );
    }

    #[test]
    fn test_sub_clusters_are_recursed() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "conductor", "role": "conductor",
                  "cluster": { "agents": [
                      { "id": "inner", "role": "implementation",
                        "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }],
                        "hooks": { "onComplete": { "action": "publish_message",
                            "config": { "topic": "DONE",
                                        "content": { "text": "{{result.ghost}}" } } } } }
                  ] } }
            ]
        }))
        .unwrap();
        let report = run_phase(&config);
        assert!(report.errors.iter().any(|e| e.message.contains("ghost")));
    }
}
