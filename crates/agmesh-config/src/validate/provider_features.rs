use crate::report::{Phase, ValidationReport};
use agmesh_providers::{ModelLevel, ReasoningEffort, SchemaSupport, provider_for};
use agmesh_types::ClusterConfig;

/// Phase 10: everything an agent declares must exist on its provider:
/// levels, catalog models, clamp bounds, reasoning effort, schema support.
pub(crate) fn run(config: &ClusterConfig, default_provider: &str, report: &mut ValidationReport) {
    for agent in &config.agents {
        let id = agent.id.as_str();
        let provider_name = agent.provider.as_deref().unwrap_or(default_provider);
        let provider = match provider_for(provider_name) {
            Ok(p) => p,
            Err(err) => {
                report.error(Phase::ProviderFeatures, Some(id), err.to_string());
                continue;
            }
        };

        if let Some(level) = &agent.model_level
            && level.parse::<ModelLevel>().is_err()
        {
            report.error(
                Phase::ProviderFeatures,
                Some(id),
                format!("modelLevel {:?} is not valid for provider {}", level, provider.id()),
            );
        }

        if let Some(model) = &agent.model
            && !provider.knows_model(model)
        {
            report.error(
                Phase::ProviderFeatures,
                Some(id),
                format!(
                    "model {:?} is not in the {} catalog ({})",
                    model,
                    provider.id(),
                    provider.models().join(", ")
                ),
            );
        }

        let min = agent
            .min_level
            .as_deref()
            .and_then(|l| l.parse::<ModelLevel>().ok());
        let max = agent
            .max_level
            .as_deref()
            .and_then(|l| l.parse::<ModelLevel>().ok());
        if let Some(level) = agent.min_level.as_deref()
            && level.parse::<ModelLevel>().is_err()
        {
            report.error(
                Phase::ProviderFeatures,
                Some(id),
                format!("minLevel {:?} is not a valid level", level),
            );
        }
        if let Some(level) = agent.max_level.as_deref()
            && level.parse::<ModelLevel>().is_err()
        {
            report.error(
                Phase::ProviderFeatures,
                Some(id),
                format!("maxLevel {:?} is not a valid level", level),
            );
        }
        if let (Some(min), Some(max)) = (min, max)
            && min > max
        {
            report.error(
                Phase::ProviderFeatures,
                Some(id),
                format!("minLevel {} exceeds maxLevel {}", min, max),
            );
        }

        for rule in &agent.model_rules {
            if let Some(effort) = &rule.reasoning_effort {
                match effort.parse::<ReasoningEffort>() {
                    Ok(_) if !provider.supports_reasoning_effort() => {
                        report.error(
                            Phase::ProviderFeatures,
                            Some(id),
                            format!(
                                "reasoningEffort is not supported by provider {}",
                                provider.id()
                            ),
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        report.error(Phase::ProviderFeatures, Some(id), err.to_string());
                    }
                }
            }
            if let Some(level) = &rule.model_level
                && level.parse::<ModelLevel>().is_err()
            {
                report.error(
                    Phase::ProviderFeatures,
                    Some(id),
                    format!("modelRules entry has unknown level {:?}", level),
                );
            }
            if let Some(model) = &rule.model
                && !provider.knows_model(model)
            {
                report.error(
                    Phase::ProviderFeatures,
                    Some(id),
                    format!(
                        "modelRules entry names model {:?} unknown to {}",
                        model,
                        provider.id()
                    ),
                );
            }
        }

        if agent.json_schema.is_some() && provider.schema_support() == SchemaSupport::Experimental
        {
            report.warn(
                Phase::ProviderFeatures,
                Some(id),
                format!(
                    "jsonSchema support on provider {} is experimental",
                    provider.id()
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::sound_cluster;
    use serde_json::json;

    fn run_phase(config: &ClusterConfig, provider: &str) -> ValidationReport {
        let mut report = ValidationReport::default();
        run(config, provider, &mut report);
        report
    }

    #[test]
    fn test_sound_cluster_provider_features_pass() {
        let report = run_phase(&sound_cluster(), "claude");
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let report = run_phase(&sound_cluster(), "cursor");
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn test_unknown_level_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation", "modelLevel": "turbo",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "claude");
        assert!(report.errors.iter().any(|e| e.message.contains("turbo")));
    }

    #[test]
    fn test_model_must_be_in_catalog() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation", "model": "gpt-5-codex",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "claude");
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("not in the claude catalog"))
        );
        // The same model is fine on codex.
        let report = run_phase(&config, "codex");
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_reasoning_effort_provider_gate() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "modelRules": [
                      { "iterations": "all", "modelLevel": "standard", "reasoningEffort": "high" } ],
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "claude");
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.message.contains("not supported"))
        );
        let report = run_phase(&config, "codex");
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[test]
    fn test_effort_value_restricted() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "modelRules": [
                      { "iterations": "all", "modelLevel": "standard", "reasoningEffort": "maximal" } ],
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "codex");
        assert!(report.errors.iter().any(|e| e.message.contains("maximal")));
    }

    #[test]
    fn test_min_exceeding_max_rejected() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "minLevel": "max", "maxLevel": "light",
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "claude");
        assert!(report.errors.iter().any(|e| e.message.contains("exceeds")));
    }

    #[test]
    fn test_experimental_schema_support_warns() {
        let config: ClusterConfig = serde_json::from_value(json!({
            "agents": [
                { "id": "w", "role": "implementation",
                  "jsonSchema": { "type": "object", "properties": {} },
                  "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
            ]
        }))
        .unwrap();
        let report = run_phase(&config, "gemini");
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.message.contains("experimental"))
        );
    }
}
