use crate::report::{Phase, ValidationReport};
use agmesh_types::{ClusterConfig, IterationPattern, PromptSpec};

/// Phase 7: rule lists must cover every iteration the agent can reach.
/// Gaps are reported as compact ranges ("1-3, 5, 7-9").
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    for agent in &config.agents {
        if !agent.model_rules.is_empty() {
            let patterns: Vec<&str> = agent
                .model_rules
                .iter()
                .map(|r| r.iterations.as_str())
                .collect();
            if let Some(gaps) = find_gaps(&patterns, agent.max_iterations) {
                report.error(
                    Phase::Coverage,
                    Some(&agent.id),
                    format!(
                        "modelRules leave iterations uncovered: {} (of 1-{})",
                        gaps, agent.max_iterations
                    ),
                );
            }
        }

        if let Some(PromptSpec::Rules(rules)) = &agent.prompt {
            let patterns: Vec<&str> = rules.iter().map(|r| r.iterations.as_str()).collect();
            if let Some(gaps) = find_gaps(&patterns, agent.max_iterations) {
                report.error(
                    Phase::Coverage,
                    Some(&agent.id),
                    format!(
                        "prompt rules leave iterations uncovered: {} (of 1-{})",
                        gaps, agent.max_iterations
                    ),
                );
            }
        }
    }
}

/// Uncovered iterations in `[1, max]`, formatted, or `None` when the
/// patterns cover everything. Unparseable patterns are skipped here;
/// phase 1 already rejected them.
fn find_gaps(patterns: &[&str], max: u32) -> Option<String> {
    let parsed: Vec<IterationPattern> = patterns
        .iter()
        .filter_map(|p| p.parse().ok())
        .collect();

    let missing: Vec<u32> = (1..=max)
        .filter(|i| !parsed.iter().any(|p| p.matches(*i)))
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(format_ranges(&missing))
    }
}

fn format_ranges(values: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let start = values[i];
        let mut end = start;
        while i + 1 < values.len() && values[i + 1] == end + 1 {
            end = values[i + 1];
            i += 1;
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
        i += 1;
    }
    parts.join(", ")
}
