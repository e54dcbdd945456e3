use crate::settings::Settings;
use crate::{Error, Result};
use agmesh_providers::{ModelLevel, Provider, ReasoningEffort, legacy_rank};
use agmesh_types::{AgentConfig, IterationPattern};

/// Outcome of model-spec resolution for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Resolve the model for the given iteration:
/// rules first (ordered, first match wins), then a literal `model`, then
/// `modelLevel` through the provider catalog with min/max clamping.
/// The legacy claude aliases additionally honor the settings-level clamp.
pub fn resolve_model(
    agent: &AgentConfig,
    provider: &dyn Provider,
    iteration: u32,
    settings: &Settings,
) -> Result<ResolvedModel> {
    if !agent.model_rules.is_empty() {
        let rule = agent
            .model_rules
            .iter()
            .find(|r| {
                r.iterations
                    .parse::<IterationPattern>()
                    .map(|p| p.matches(iteration))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                Error::Model(format!(
                    "no model rule matches iteration {} for agent {}",
                    iteration, agent.id
                ))
            })?;

        let model = if let Some(model) = &rule.model {
            model.clone()
        } else if let Some(level) = &rule.model_level {
            let level: ModelLevel = level.parse::<ModelLevel>().map_err(|e| Error::Model(e.to_string()))?;
            provider.model_for_level(clamp_level(agent, level)?).to_string()
        } else {
            return Err(Error::Model(format!(
                "model rule for iteration {} names neither model nor modelLevel",
                iteration
            )));
        };

        let effort = rule
            .reasoning_effort
            .as_deref()
            .map(|e| e.parse::<ReasoningEffort>())
            .transpose()
            .map_err(|e| Error::Model(e.to_string()))?;

        return Ok(ResolvedModel {
            model: apply_legacy_clamp(model, settings),
            reasoning_effort: effort,
        });
    }

    if let Some(model) = &agent.model {
        return Ok(ResolvedModel {
            model: apply_legacy_clamp(model.clone(), settings),
            reasoning_effort: None,
        });
    }

    let level = agent
        .model_level
        .as_deref()
        .map(|l| l.parse::<ModelLevel>())
        .transpose()
        .map_err(|e| Error::Model(e.to_string()))?
        .unwrap_or(ModelLevel::Standard);

    let model = provider.model_for_level(clamp_level(agent, level)?).to_string();
    Ok(ResolvedModel {
        model: apply_legacy_clamp(model, settings),
        reasoning_effort: None,
    })
}

fn clamp_level(agent: &AgentConfig, level: ModelLevel) -> Result<ModelLevel> {
    let min = agent
        .min_level
        .as_deref()
        .map(|l| l.parse::<ModelLevel>())
        .transpose()
        .map_err(|e| Error::Model(e.to_string()))?;
    let max = agent
        .max_level
        .as_deref()
        .map(|l| l.parse::<ModelLevel>())
        .transpose()
        .map_err(|e| Error::Model(e.to_string()))?;
    Ok(level.clamp_to(min, max))
}

/// The three claude aliases are ordered; settings may pin a floor and a
/// ceiling. Anything outside the alias set passes through untouched.
fn apply_legacy_clamp(model: String, settings: &Settings) -> String {
    let Some(rank) = legacy_rank(&model) else {
        return model;
    };
    if let Some(min) = settings.min_model.as_deref()
        && let Some(min_rank) = legacy_rank(min)
        && rank < min_rank
    {
        return min.to_string();
    }
    if let Some(max) = settings.max_model.as_deref()
        && let Some(max_rank) = legacy_rank(max)
        && rank > max_rank
    {
        return max.to_string();
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmesh_providers::provider_for;
    use serde_json::json;

    fn agent(value: serde_json::Value) -> AgentConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_rules_first_match_wins() {
        let agent = agent(json!({
            "id": "w", "role": "implementation",
            "modelRules": [
                { "iterations": "1-2", "modelLevel": "light" },
                { "iterations": "all", "modelLevel": "max", "reasoningEffort": "high" }
            ]
        }));
        let provider = provider_for("codex").unwrap();
        let settings = Settings::default();

        let first = resolve_model(&agent, provider, 1, &settings).unwrap();
        assert_eq!(first.model, "gpt-5-mini");
        assert_eq!(first.reasoning_effort, None);

        let later = resolve_model(&agent, provider, 3, &settings).unwrap();
        assert_eq!(later.model, "gpt-5-codex");
        assert_eq!(later.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn test_no_matching_rule_errors() {
        let agent = agent(json!({
            "id": "w", "role": "implementation",
            "modelRules": [ { "iterations": "1-2", "modelLevel": "light" } ]
        }));
        let provider = provider_for("claude").unwrap();
        let err = resolve_model(&agent, provider, 3, &Settings::default());
        assert!(matches!(err, Err(Error::Model(_))));
    }

    #[test]
    fn test_static_model_is_literal() {
        let agent = agent(json!({ "id": "w", "role": "implementation", "model": "sonnet" }));
        let provider = provider_for("claude").unwrap();
        let resolved = resolve_model(&agent, provider, 1, &Settings::default()).unwrap();
        assert_eq!(resolved.model, "sonnet");
    }

    #[test]
    fn test_level_with_min_max_clamp() {
        let agent = agent(json!({
            "id": "w", "role": "implementation",
            "modelLevel": "max", "maxLevel": "standard"
        }));
        let provider = provider_for("claude").unwrap();
        let resolved = resolve_model(&agent, provider, 1, &Settings::default()).unwrap();
        assert_eq!(resolved.model, "sonnet");
    }

    #[test]
    fn test_default_level_is_standard() {
        let agent = agent(json!({ "id": "w", "role": "implementation" }));
        let provider = provider_for("gemini").unwrap();
        let resolved = resolve_model(&agent, provider, 1, &Settings::default()).unwrap();
        assert_eq!(resolved.model, "gemini-2.5-pro");
    }

    #[test]
    fn test_legacy_settings_clamp() {
        let agent = agent(json!({ "id": "w", "role": "implementation", "modelLevel": "max" }));
        let provider = provider_for("claude").unwrap();
        let mut settings = Settings::default();
        settings.max_model = Some("sonnet".to_string());
        let resolved = resolve_model(&agent, provider, 1, &settings).unwrap();
        assert_eq!(resolved.model, "sonnet");

        let mut settings = Settings::default();
        settings.min_model = Some("sonnet".to_string());
        let light = agent_with_level("light");
        let resolved = resolve_model(&light, provider, 1, &settings).unwrap();
        assert_eq!(resolved.model, "sonnet");
    }

    fn agent_with_level(level: &str) -> AgentConfig {
        serde_json::from_value(json!({
            "id": "w", "role": "implementation", "modelLevel": level
        }))
        .unwrap()
    }

    #[test]
    fn test_non_alias_models_skip_legacy_clamp() {
        let agent = agent(json!({ "id": "w", "role": "implementation", "model": "gpt-5-codex" }));
        let provider = provider_for("codex").unwrap();
        let mut settings = Settings::default();
        settings.max_model = Some("haiku".to_string());
        let resolved = resolve_model(&agent, provider, 1, &settings).unwrap();
        assert_eq!(resolved.model, "gpt-5-codex");
    }
}
