use crate::report::{Phase, ValidationReport};
use crate::validate::produced_topics;
use agmesh_types::ClusterConfig;
use std::collections::HashMap;

/// Phase 8: cycles in the agent-depends-on-agent graph. The first cycle
/// found is reported once: a warning when at least one trigger along it
/// carries guard logic, an error when none do.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    // Edge producer -> consumer, tagged with the consumer trigger's guard.
    let mut edges: HashMap<&str, Vec<(&str, bool)>> = HashMap::new();
    for producer in &config.agents {
        let topics = produced_topics(producer);
        for consumer in &config.agents {
            for trigger in &consumer.triggers {
                if topics.contains(&trigger.topic) {
                    edges
                        .entry(producer.id.as_str())
                        .or_default()
                        .push((consumer.id.as_str(), trigger.logic.is_some()));
                }
            }
        }
    }

    if let Some((path, any_guarded)) = first_cycle(config, &edges) {
        let rendered = path.join(" -> ");
        if any_guarded {
            report.warn(
                Phase::Cycles,
                None,
                format!("agent cycle {} (guarded; will stop when guards decline)", rendered),
            );
        } else {
            report.error(
                Phase::Cycles,
                None,
                format!("agent cycle {} has no guard logic anywhere", rendered),
            );
        }
    }
}

fn first_cycle(
    config: &ClusterConfig,
    edges: &HashMap<&str, Vec<(&str, bool)>>,
) -> Option<(Vec<String>, bool)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    fn dfs<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<(&'a str, bool)>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<(&'a str, bool)>,
    ) -> Option<(Vec<String>, bool)> {
        marks.insert(node, Mark::Gray);
        for (next, guarded) in edges.get(node).into_iter().flatten() {
            match marks.get(next).copied().unwrap_or(Mark::White) {
                Mark::Gray => {
                    // Found a back edge; slice the cycle out of the stack.
                    let start = stack.iter().position(|(n, _)| n == next).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(next.to_string());
                    let any_guarded = stack[start..]
                        .iter()
                        .skip(1)
                        .map(|(_, g)| *g)
                        .chain(std::iter::once(*guarded))
                        .any(|g| g);
                    return Some((path, any_guarded));
                }
                Mark::White => {
                    stack.push((next, *guarded));
                    if let Some(found) = dfs(next, edges, marks, stack) {
                        return Some(found);
                    }
                    stack.pop();
                }
                Mark::Black => {}
            }
        }
        marks.insert(node, Mark::Black);
        None
    }

    let mut marks = HashMap::new();
    for agent in &config.agents {
        let id = agent.id.as_str();
        if marks.get(id).copied().unwrap_or(Mark::White) == Mark::White {
            let mut stack = vec![(id, false)];
            if let Some(found) = dfs(id, edges, &mut marks, &mut stack) {
                return Some(found);
            }
        }
    }
    None
}
