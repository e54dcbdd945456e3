use crate::models::{ModelLevel, SchemaSupport};
use crate::traits::{LaunchRequest, Provider};

/// Gemini CLI. Emits a terminating `result` event that may lack a result
/// payload, in which case the JSON is taken from preceding message text.
pub struct Gemini;

impl Provider for Gemini {
    fn id(&self) -> &'static str {
        "gemini"
    }

    fn binary(&self) -> &'static str {
        "gemini"
    }

    fn models(&self) -> &'static [&'static str] {
        &["gemini-2.5-flash", "gemini-2.5-pro"]
    }

    fn model_for_level(&self, level: ModelLevel) -> &'static str {
        match level {
            ModelLevel::Light => "gemini-2.5-flash",
            ModelLevel::Standard | ModelLevel::Max => "gemini-2.5-pro",
        }
    }

    fn schema_support(&self) -> SchemaSupport {
        SchemaSupport::Experimental
    }

    fn terminal_carries_result(&self) -> bool {
        true
    }

    fn task_args(&self, request: &LaunchRequest) -> Vec<String> {
        vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--yolo".to_string(),
        ]
    }
}
