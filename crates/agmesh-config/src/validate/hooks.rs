use crate::report::{Phase, ValidationReport};
use crate::validate::all_hooks;
use agmesh_types::{ClusterConfig, HookAction, HookConfig, topic};
use once_cell::sync::Lazy;
use regex::Regex;

static RETURNS_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"return\s*\{").unwrap());

/// Phase 6: hook shape. A publish needs a payload source; transforms must
/// literally return a message; conductor operations need an operation list.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    for agent in &config.agents {
        for (hook_name, hook) in all_hooks(agent) {
            check_hook(&agent.id, hook_name, hook, report);
        }
    }
}

fn check_hook(agent: &str, hook_name: &str, hook: &HookConfig, report: &mut ValidationReport) {
    match hook.action {
        HookAction::StopCluster => {
            // Nothing further; the runtime publishes CLUSTER_COMPLETE.
        }
        HookAction::PublishMessage => {
            if hook.config.is_none() && hook.transform.is_none() {
                report.error(
                    Phase::Hooks,
                    Some(agent),
                    format!(
                        "{} publishes a message but has neither config nor transform",
                        hook_name
                    ),
                );
            }
        }
    }

    if hook.logic.is_some() && hook.config.is_none() && hook.transform.is_none() {
        report.error(
            Phase::Hooks,
            Some(agent),
            format!("{} has logic but no config or transform to apply it to", hook_name),
        );
    }

    if let Some(transform) = &hook.transform {
        if !RETURNS_OBJECT.is_match(transform)
            || !transform.contains("topic")
            || !transform.contains("content")
        {
            report.error(
                Phase::Hooks,
                Some(agent),
                format!(
                    "{} transform must literally return an object with topic and content",
                    hook_name
                ),
            );
        }
        if transform.contains(topic::CLUSTER_OPERATIONS) && !transform.contains("operations") {
            report.error(
                Phase::Hooks,
                Some(agent),
                format!(
                    "{} transform targets CLUSTER_OPERATIONS without an operations field",
                    hook_name
                ),
            );
        }
    }

    if let Some(config) = &hook.config
        && config.get("topic").and_then(serde_json::Value::as_str)
            == Some(topic::CLUSTER_OPERATIONS)
        && !config.to_string().contains("operations")
    {
        report.error(
            Phase::Hooks,
            Some(agent),
            format!(
                "{} publishes CLUSTER_OPERATIONS without an operations field",
                hook_name
            ),
        );
    }
}
