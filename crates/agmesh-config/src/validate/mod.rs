//! Static analysis of a cluster config.
//!
//! Ten independent phases, each appending to one shared report; errors
//! block boot, warnings do not. Phases never short-circuit each other, so
//! a single run surfaces everything at once.

mod agents;
mod coverage;
mod cycles;
mod flow;
mod hooks;
mod provider_features;
mod scripts;
mod semantics;
mod structure;
mod templates;

use crate::ValidationReport;
use agmesh_types::{AgentConfig, ClusterConfig, HookAction, HookConfig, TriggerAction, topic};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Run all phases against a config. `default_provider` is the provider an
/// agent falls back to when it does not declare one.
pub fn validate(config: &ClusterConfig, default_provider: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    structure::run(config, &mut report);
    // A conductor rewires the message graph at runtime, so the static
    // flow phase would only produce noise.
    if !is_conductor_style(config) {
        flow::run(config, &mut report);
    }
    agents::run(config, &mut report);
    scripts::run(config, &mut report);
    templates::run(config, &mut report);
    hooks::run(config, &mut report);
    coverage::run(config, &mut report);
    cycles::run(config, &mut report);
    semantics::run(config, &mut report);
    provider_features::run(config, default_provider, &mut report);

    report
}

/// Conductor-style config: an agent with the conductor role whose
/// completion path publishes `CLUSTER_OPERATIONS`.
pub(crate) fn is_conductor_style(config: &ClusterConfig) -> bool {
    config.agents.iter().any(|agent| {
        agent.role.is_conductor()
            && all_hooks(agent)
                .iter()
                .any(|(_, hook)| hook_topics(hook).contains(&topic::CLUSTER_OPERATIONS.to_string()))
    })
}

/// Agent-level hooks plus per-trigger completion overrides.
pub(crate) fn all_hooks(agent: &AgentConfig) -> Vec<(&'static str, &HookConfig)> {
    let mut hooks: Vec<(&'static str, &HookConfig)> = agent.hooks.iter().collect();
    for trigger in &agent.triggers {
        if let Some(hook) = &trigger.on_complete {
            hooks.push(("onComplete", hook));
        }
    }
    hooks
}

static TRANSFORM_TOPIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']?topic["']?\s*:\s*["']([A-Za-z0-9_.-]+)["']"#).unwrap());

/// Topics a hook can publish: the literal `topic` of its config template,
/// plus every literal topic mentioned by its transform script.
pub(crate) fn hook_topics(hook: &HookConfig) -> Vec<String> {
    let mut topics = Vec::new();
    if hook.action == HookAction::StopCluster {
        topics.push(topic::CLUSTER_COMPLETE.to_string());
        return topics;
    }
    if let Some(config) = &hook.config
        && let Some(t) = config.get("topic").and_then(serde_json::Value::as_str)
        && !t.contains("{{")
    {
        topics.push(t.to_string());
    }
    if let Some(transform) = &hook.transform {
        for caps in TRANSFORM_TOPIC.captures_iter(transform) {
            topics.push(caps[1].to_string());
        }
    }
    topics
}

/// Every topic an agent can put on the ledger.
pub(crate) fn produced_topics(agent: &AgentConfig) -> Vec<String> {
    let mut topics = Vec::new();
    for (_, hook) in all_hooks(agent) {
        topics.extend(hook_topics(hook));
    }
    if agent
        .triggers
        .iter()
        .any(|t| t.action == TriggerAction::StopCluster)
    {
        topics.push(topic::CLUSTER_COMPLETE.to_string());
    }
    topics.sort();
    topics.dedup();
    topics
}

/// Topic flow of one cluster: who produces what, who consumes what.
pub(crate) struct TopicFlow {
    /// topic -> producing agent ids
    pub produced: HashMap<String, Vec<String>>,
    /// topic -> (consuming agent id, trigger has guard logic)
    pub consumed: HashMap<String, Vec<(String, bool)>>,
}

pub(crate) fn topic_flow(config: &ClusterConfig) -> TopicFlow {
    let mut produced: HashMap<String, Vec<String>> = HashMap::new();
    let mut consumed: HashMap<String, Vec<(String, bool)>> = HashMap::new();

    for agent in &config.agents {
        for topic in produced_topics(agent) {
            produced.entry(topic).or_default().push(agent.id.clone());
        }
        for trigger in &agent.triggers {
            consumed
                .entry(trigger.topic.clone())
                .or_default()
                .push((agent.id.clone(), trigger.logic.is_some()));
        }
    }

    TopicFlow { produced, consumed }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use agmesh_types::ClusterConfig;
    use serde_json::json;

    /// A well-formed two-validator cluster used across phase tests.
    pub fn sound_cluster() -> ClusterConfig {
        serde_json::from_value(json!({
            "agents": [
                {
                    "id": "worker",
                    "role": "implementation",
                    "modelLevel": "standard",
                    "prompt": "Implement the issue.",
                    "triggers": [
                        { "topic": "ISSUE_OPENED", "action": "execute_task" },
                        { "topic": "VALIDATION_RESULT", "action": "execute_task",
                          "logic": { "engine": "javascript",
                                     "script": "message.content.data.approved === false" } }
                    ],
                    "context": { "sources": [
                        { "topic": "ISSUE_OPENED", "since": "cluster_start" },
                        { "topic": "VALIDATION_RESULT", "since": "last_task_end" }
                    ] },
                    "jsonSchema": {
                        "type": "object",
                        "required": ["summary", "result"],
                        "properties": {
                            "summary": { "type": "string" },
                            "result": { "type": "string" }
                        }
                    },
                    "hooks": {
                        "onComplete": {
                            "action": "publish_message",
                            "config": {
                                "topic": "IMPLEMENTATION_READY",
                                "content": { "text": "{{result.summary}}" }
                            }
                        }
                    }
                },
                {
                    "id": "validator-1",
                    "role": "validator",
                    "modelLevel": "max",
                    "prompt": "Validate the implementation.",
                    "triggers": [
                        { "topic": "IMPLEMENTATION_READY", "action": "execute_task" }
                    ],
                    "context": { "sources": [
                        { "topic": "ISSUE_OPENED", "since": "cluster_start" },
                        { "topic": "IMPLEMENTATION_READY", "since": "last_agent_start" }
                    ] },
                    "jsonSchema": {
                        "type": "object",
                        "required": ["summary", "result", "approved"],
                        "properties": {
                            "summary": { "type": "string" },
                            "result": { "type": "string" },
                            "approved": { "type": "boolean" }
                        }
                    },
                    "hooks": {
                        "onComplete": {
                            "action": "publish_message",
                            "config": {
                                "topic": "VALIDATION_RESULT",
                                "content": { "data": { "approved": "{{result.approved}}",
                                                        "summary": "{{result.summary}}" } }
                            }
                        }
                    }
                },
                {
                    "id": "detector",
                    "role": "completion-detector",
                    "triggers": [
                        { "topic": "VALIDATION_RESULT", "action": "stop_cluster",
                          "logic": { "engine": "javascript",
                                     "script": "helpers.hasConsensus('VALIDATION_RESULT', cluster.createdAt)" } }
                    ]
                }
            ]
        }))
        .unwrap()
    }
}
