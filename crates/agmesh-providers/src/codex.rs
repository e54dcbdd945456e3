use crate::models::ModelLevel;
use crate::traits::{LaunchRequest, Provider};

/// Codex CLI. Terminates with `turn.completed`, which carries usage only;
/// the structured result must be extracted from earlier assistant text.
pub struct Codex;

impl Provider for Codex {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn binary(&self) -> &'static str {
        "codex"
    }

    fn models(&self) -> &'static [&'static str] {
        &["gpt-5-mini", "gpt-5", "gpt-5-codex"]
    }

    fn model_for_level(&self, level: ModelLevel) -> &'static str {
        match level {
            ModelLevel::Light => "gpt-5-mini",
            ModelLevel::Standard => "gpt-5",
            ModelLevel::Max => "gpt-5-codex",
        }
    }

    fn supports_reasoning_effort(&self) -> bool {
        true
    }

    fn terminal_carries_result(&self) -> bool {
        false
    }

    fn task_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
            "--model".to_string(),
            request.model.clone(),
        ];
        if let Some(effort) = request.reasoning_effort {
            args.push("-c".to_string());
            args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
        }
        // Read the prompt from stdin
        args.push("-".to_string());
        args
    }
}
