use crate::report::{Phase, ValidationReport};
use crate::validate::{all_hooks, topic_flow};
use agmesh_types::{ClusterConfig, parse_iso_ms, topic};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const KNOWN_SINCE: &[&str] = &["cluster_start", "last_task_end", "last_agent_start"];

static ROLE_LOOKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"getAgentsByRole\(\s*["']([^"']+)["']\s*\)"#).unwrap());

/// Phase 9: cross-cutting config semantics. Duplicate ids across nested
/// clusters, schema shape, context-source reachability and `since`
/// values, docker mounts, referenced files, executor tuning types, and
/// role references inside scripts.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    check_duplicate_ids(config, report);

    let flow = topic_flow(config);
    let roles: HashSet<&str> = config.agents.iter().map(|a| a.role.as_str()).collect();

    for agent in &config.agents {
        let id = agent.id.as_str();

        if let Some(schema) = &agent.json_schema
            && !schema.is_object()
        {
            report.error(
                Phase::Semantics,
                Some(id),
                "jsonSchema must be a serializable object",
            );
        }

        for source in &agent.context.sources {
            if !flow.produced.contains_key(&source.topic)
                && !topic::SYSTEM_PRODUCED.contains(&source.topic.as_str())
            {
                report.warn(
                    Phase::Semantics,
                    Some(id),
                    format!(
                        "context source topic {} is never produced in this cluster",
                        source.topic
                    ),
                );
            }
            if let Some(since) = &source.since
                && !KNOWN_SINCE.contains(&since.as_str())
                && parse_iso_ms(since).is_none()
            {
                report.error(
                    Phase::Semantics,
                    Some(id),
                    format!(
                        "context source since value {:?} is neither a known strategy nor an ISO timestamp",
                        since
                    ),
                );
            }
        }

        check_role_references(agent, &roles, report);
    }

    if let Some(docker) = &config.docker {
        for mount in &docker.mounts {
            if !Path::new(mount).is_absolute() {
                report.error(
                    Phase::Semantics,
                    None,
                    format!("docker mount {:?} must be an absolute path", mount),
                );
            }
        }
    }

    if let Some(load) = &config.load_config
        && !Path::new(&load.path).exists()
    {
        report.error(
            Phase::Semantics,
            None,
            format!("loadConfig.path {:?} does not exist", load.path),
        );
    }

    if let Some(executor) = &config.task_executor {
        match executor.as_object() {
            Some(fields) => {
                if let Some(retries) = fields.get("retries")
                    && !retries.is_u64()
                {
                    report.error(
                        Phase::Semantics,
                        None,
                        "taskExecutor.retries must be a non-negative integer",
                    );
                }
                if let Some(timeout) = fields.get("timeout")
                    && !timeout.is_u64()
                {
                    report.error(
                        Phase::Semantics,
                        None,
                        "taskExecutor.timeout must be a non-negative integer",
                    );
                }
            }
            None => {
                report.error(Phase::Semantics, None, "taskExecutor must be an object");
            }
        }
    }
}

fn check_duplicate_ids(config: &ClusterConfig, report: &mut ValidationReport) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    config.walk_clusters(&mut |cluster, _| {
        for agent in &cluster.agents {
            *counts.entry(agent.id.clone()).or_default() += 1;
        }
    });
    let mut dups: Vec<_> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id)
        .collect();
    dups.sort();
    for id in dups {
        report.error(
            Phase::Semantics,
            Some(&id),
            "agent id is reused across nested clusters",
        );
    }
}

/// A script counting or polling a role that does not exist will wait
/// forever unless it handles the empty roster explicitly.
fn check_role_references(
    agent: &agmesh_types::AgentConfig,
    roles: &HashSet<&str>,
    report: &mut ValidationReport,
) {
    let mut scripts: Vec<&str> = Vec::new();
    for trigger in &agent.triggers {
        if let Some(logic) = &trigger.logic {
            scripts.push(&logic.script);
        }
    }
    for (_, hook) in all_hooks(agent) {
        if let Some(logic) = &hook.logic {
            scripts.push(&logic.script);
        }
        if let Some(transform) = &hook.transform {
            scripts.push(transform);
        }
    }

    for script in scripts {
        for caps in ROLE_LOOKUP.captures_iter(script) {
            let role = &caps[1];
            let has_fallback =
                script.contains("length === 0") || script.contains("length == 0");
            if !roles.contains(role) && !has_fallback {
                report.error(
                    Phase::Semantics,
                    Some(&agent.id),
                    format!(
                        "script depends on role {:?} which no agent carries, with no empty-roster fallback",
                        role
                    ),
                );
            }
        }
    }
}
