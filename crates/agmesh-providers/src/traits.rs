use crate::models::{ModelLevel, ReasoningEffort, SchemaSupport};
use crate::{Claude, Codex, Error, Gemini, Result};
use agmesh_types::IsolationMode;
use std::path::PathBuf;

/// Everything needed to launch one task execution.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub isolation: IsolationMode,
    /// Working directory for the child (already pointing at the worktree
    /// when worktree isolation is in effect).
    pub workdir: PathBuf,
    pub docker_image: Option<String>,
    /// Extra host paths bind-mounted under docker isolation.
    pub docker_mounts: Vec<String>,
}

/// Resolved spawn plan. The prompt always travels over stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// A provider CLI the runtime can drive.
///
/// Responsibilities:
/// - Map capability levels onto the provider's model catalog
/// - Build the spawn argv for one execution
/// - Describe the output dialect (terminal event semantics)
pub trait Provider: Send + Sync {
    /// Unique provider id (e.g., "claude", "codex", "gemini")
    fn id(&self) -> &'static str;

    /// Binary name looked up on PATH
    fn binary(&self) -> &'static str;

    /// Known model names, used to validate raw `model` config values
    fn models(&self) -> &'static [&'static str];

    fn model_for_level(&self, level: ModelLevel) -> &'static str;

    fn supports_reasoning_effort(&self) -> bool {
        false
    }

    fn schema_support(&self) -> SchemaSupport {
        SchemaSupport::Full
    }

    /// Whether the terminal stream event can carry the structured result.
    /// When false, extraction must come from accumulated assistant text.
    fn terminal_carries_result(&self) -> bool;

    /// Provider-specific portion of the argv (model + output flags).
    fn task_args(&self, request: &LaunchRequest) -> Vec<String>;

    /// Full spawn plan, wrapping the argv for docker isolation.
    fn build_launch(&self, request: &LaunchRequest) -> LaunchPlan {
        let args = self.task_args(request);
        match request.isolation {
            IsolationMode::Docker => {
                let image = request
                    .docker_image
                    .clone()
                    .unwrap_or_else(|| "agmesh-task:latest".to_string());
                let mut docker_args = vec![
                    "run".to_string(),
                    "--rm".to_string(),
                    "-i".to_string(),
                    "-v".to_string(),
                    format!("{}:/workspace", request.workdir.display()),
                    "-w".to_string(),
                    "/workspace".to_string(),
                ];
                for mount in &request.docker_mounts {
                    docker_args.push("-v".to_string());
                    docker_args.push(format!("{mount}:{mount}:ro"));
                }
                docker_args.push(image);
                docker_args.push(self.binary().to_string());
                docker_args.extend(args);
                LaunchPlan {
                    program: "docker".to_string(),
                    args: docker_args,
                    workdir: request.workdir.clone(),
                }
            }
            IsolationMode::None | IsolationMode::Worktree => LaunchPlan {
                program: self.binary().to_string(),
                args,
                workdir: request.workdir.clone(),
            },
        }
    }

    /// Whether a model name belongs to this provider's catalog.
    fn knows_model(&self, model: &str) -> bool {
        self.models().contains(&model)
    }
}

static CLAUDE: Claude = Claude;
static CODEX: Codex = Codex;
static GEMINI: Gemini = Gemini;

/// Look up a provider by name.
pub fn provider_for(name: &str) -> Result<&'static dyn Provider> {
    match name {
        "claude" | "claude_code" => Ok(&CLAUDE),
        "codex" => Ok(&CODEX),
        "gemini" => Ok(&GEMINI),
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}

/// All registered provider names.
pub fn provider_names() -> &'static [&'static str] {
    &["claude", "codex", "gemini"]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(isolation: IsolationMode) -> LaunchRequest {
        LaunchRequest {
            model: "sonnet".to_string(),
            reasoning_effort: None,
            isolation,
            workdir: PathBuf::from("/tmp/work"),
            docker_image: None,
            docker_mounts: vec![],
        }
    }

    #[test]
    fn test_registry() {
        assert_eq!(provider_for("claude").unwrap().id(), "claude");
        assert_eq!(provider_for("claude_code").unwrap().id(), "claude");
        assert_eq!(provider_for("codex").unwrap().id(), "codex");
        assert!(provider_for("cursor").is_err());
    }

    #[test]
    fn test_docker_wraps_argv() {
        let provider = provider_for("claude").unwrap();
        let plan = provider.build_launch(&request(IsolationMode::Docker));
        assert_eq!(plan.program, "docker");
        assert_eq!(plan.args[0], "run");
        assert!(plan.args.contains(&"/tmp/work:/workspace".to_string()));
        assert!(plan.args.contains(&provider.binary().to_string()));
    }

    #[test]
    fn test_plain_launch_uses_binary() {
        let provider = provider_for("codex").unwrap();
        let plan = provider.build_launch(&request(IsolationMode::None));
        assert_eq!(plan.program, provider.binary());
        assert_eq!(plan.workdir, PathBuf::from("/tmp/work"));
    }
}
