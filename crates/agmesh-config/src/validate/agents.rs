use crate::report::{Phase, ValidationReport};
use agmesh_types::{ClusterConfig, OutputFormat, TriggerAction};

const GIT_COMMANDS: &[&str] = &["git diff", "git status", "git log", "git show"];
const LARGE_ITERATIONS: u32 = 50;

/// Phase 3: per-agent semantics tied to role and output settings.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    for agent in &config.agents {
        let id = agent.id.as_str();
        let executes = agent
            .triggers
            .iter()
            .any(|t| t.action == TriggerAction::ExecuteTask);

        if agent.role.is_orchestrator() && executes {
            report.warn(
                Phase::Agents,
                Some(id),
                "orchestrator agents should not carry execute_task triggers",
            );
        }

        // Git state inside a task sandbox is unreliable; validators must
        // judge the published artifacts, not the repository.
        if agent.role.is_validator()
            && let Some(prompt) = &agent.prompt
        {
            for text in prompt.texts() {
                if let Some(cmd) = GIT_COMMANDS.iter().find(|c| text.contains(*c)) {
                    report.error(
                        Phase::Agents,
                        Some(id),
                        format!("validator prompt embeds {:?}", cmd),
                    );
                }
            }
        }

        if executes
            && agent.output_format == OutputFormat::Json
            && agent.json_schema.is_none()
        {
            report.warn(
                Phase::Agents,
                Some(id),
                "outputFormat is json without a jsonSchema; the default {summary, result} schema applies",
            );
        }

        if agent.max_iterations > LARGE_ITERATIONS {
            report.warn(
                Phase::Agents,
                Some(id),
                format!(
                    "maxIterations {} is unusually large",
                    agent.max_iterations
                ),
            );
        }

        if agent.model.is_some() {
            report.error(
                Phase::Agents,
                Some(id),
                "raw `model` is not accepted; declare a provider-independent `modelLevel`",
            );
        }
    }
}
