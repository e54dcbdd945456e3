use crate::models::ModelLevel;
use crate::traits::{LaunchRequest, Provider};

/// Claude Code CLI. Streams newline JSON with a terminating `result`
/// event that carries the structured result payload.
pub struct Claude;

impl Provider for Claude {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn binary(&self) -> &'static str {
        "claude"
    }

    fn models(&self) -> &'static [&'static str] {
        &["haiku", "sonnet", "opus"]
    }

    fn model_for_level(&self, level: ModelLevel) -> &'static str {
        match level {
            ModelLevel::Light => "haiku",
            ModelLevel::Standard => "sonnet",
            ModelLevel::Max => "opus",
        }
    }

    fn terminal_carries_result(&self) -> bool {
        true
    }

    fn task_args(&self, request: &LaunchRequest) -> Vec<String> {
        vec![
            "-p".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--dangerously-skip-permissions".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmesh_types::IsolationMode;
    use std::path::PathBuf;

    #[test]
    fn test_levels_map_to_aliases() {
        assert_eq!(Claude.model_for_level(ModelLevel::Light), "haiku");
        assert_eq!(Claude.model_for_level(ModelLevel::Standard), "sonnet");
        assert_eq!(Claude.model_for_level(ModelLevel::Max), "opus");
    }

    #[test]
    fn test_args_carry_model_and_stream_format() {
        let args = Claude.task_args(&LaunchRequest {
            model: "opus".to_string(),
            reasoning_effort: None,
            isolation: IsolationMode::None,
            workdir: PathBuf::from("."),
            docker_image: None,
            docker_mounts: vec![],
        });
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
    }
}
