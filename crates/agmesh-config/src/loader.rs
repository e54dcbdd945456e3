use crate::{Error, Result};
use agmesh_types::ClusterConfig;
use serde_json::Value;
use std::path::Path;

/// Load a cluster config document from disk, expanding template params.
pub fn load_config(path: &Path) -> Result<ClusterConfig> {
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw)
}

/// Parse a cluster config from its JSON text. When the document carries a
/// `params` object, every `{{params.<key>}}` occurrence in the text is
/// substituted before the typed parse, so templates stay plain JSON.
pub fn parse_config(raw: &str) -> Result<ClusterConfig> {
    let doc: Value = serde_json::from_str(raw)?;

    let expanded = match doc.get("params").and_then(Value::as_object) {
        Some(params) if !params.is_empty() => {
            let mut text = raw.to_string();
            for (key, value) in params {
                let needle = format!("{{{{params.{}}}}}", key);
                let replacement = match value {
                    Value::String(s) => escape_json_fragment(s),
                    other => other.to_string(),
                };
                // A quoted placeholder holding a non-string param becomes
                // the bare JSON value, keeping numbers and booleans typed.
                let quoted = format!("\"{}\"", needle);
                if !value.is_string() && text.contains(&quoted) {
                    text = text.replace(&quoted, &value.to_string());
                }
                text = text.replace(&needle, &replacement);
            }
            text
        }
        _ => raw.to_string(),
    };

    let config: ClusterConfig = serde_json::from_str(&expanded)?;
    if config.agents.is_empty() {
        return Err(Error::Invalid("config declares no agents".to_string()));
    }
    Ok(config)
}

/// JSON-escape a string for splicing into a JSON document body (without
/// the surrounding quotes).
fn escape_json_fragment(s: &str) -> String {
    let quoted = serde_json::to_string(s).unwrap_or_default();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal() {
        let config = parse_config(
            r#"{ "agents": [ { "id": "w", "role": "implementation",
                 "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] } ] }"#,
        )
        .unwrap();
        assert_eq!(config.agents.len(), 1);
    }

    #[test]
    fn test_empty_agents_rejected() {
        assert!(parse_config(r#"{ "agents": [] }"#).is_err());
    }

    #[test]
    fn test_params_expand_strings_and_numbers() {
        let config = parse_config(
            r#"{
                "params": { "issueTopic": "ISSUE_OPENED", "rounds": 7 },
                "agents": [
                    { "id": "w", "role": "implementation",
                      "maxIterations": "{{params.rounds}}",
                      "triggers": [{ "topic": "{{params.issueTopic}}", "action": "execute_task" }] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.agents[0].triggers[0].topic, "ISSUE_OPENED");
        assert_eq!(config.agents[0].max_iterations, 7);
    }

    #[test]
    fn test_params_escape_special_characters() {
        let config = parse_config(
            r#"{
                "params": { "greeting": "say \"hi\"" },
                "agents": [
                    { "id": "w", "role": "implementation", "prompt": "{{params.greeting}}",
                      "triggers": [{ "topic": "ISSUE_OPENED", "action": "execute_task" }] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.agents[0].prompt.as_ref().unwrap().select(1),
            Some("say \"hi\"")
        );
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "agents": [ {{ "id": "w", "role": "implementation",
                "triggers": [{{ "topic": "ISSUE_OPENED", "action": "execute_task" }}] }} ] }}"#
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.agents[0].id, "w");
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        match parse_config("{ not json") {
            Err(Error::Parse(_)) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
