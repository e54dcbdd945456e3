use crate::{Error, Result};
use agmesh_logic::{ScriptEnv, evaluate_hook_logic, evaluate_transform};
use agmesh_types::{
    ClusterDescriptor, HookAction, HookConfig, MessageContent, MessageDraft, to_iso, topic,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Everything a hook can draw on. `result` is the structured task output,
/// parsed once by the caller and reused across every substitution.
pub struct HookContext<'a> {
    pub env: &'a ScriptEnv,
    pub cluster: &'a ClusterDescriptor,
    pub iteration: u32,
    pub error_message: Option<&'a str>,
    pub raw_output: &'a str,
    pub result: Option<&'a Value>,
}

/// What a hook resolved to.
#[derive(Debug, Clone)]
pub enum HookEffect {
    Publish(MessageDraft),
    StopCluster,
}

/// Execute one hook: transform script, or logic-merge plus template
/// substitution over the config.
pub fn execute_hook(hook: &HookConfig, ctx: &HookContext<'_>) -> Result<HookEffect> {
    match hook.action {
        HookAction::StopCluster => Ok(HookEffect::StopCluster),
        HookAction::PublishMessage => {
            if let Some(transform) = &hook.transform {
                let value = evaluate_transform(transform, ctx.env)?;
                validate_operations(&value)?;
                return Ok(HookEffect::Publish(draft_from_value(&value)?));
            }

            let mut config = hook
                .config
                .clone()
                .ok_or_else(|| Error::Hook("publish_message hook has no config".to_string()))?;

            if let Some(logic) = &hook.logic
                && let Some(overrides) = evaluate_hook_logic(&logic.script, ctx.env)?
            {
                deep_merge(&mut config, &overrides);
            }

            let substituted = substitute_template(&config, ctx)?;
            validate_operations(&substituted)?;
            Ok(HookEffect::Publish(draft_from_value(&substituted)?))
        }
    }
}

/// Recursively overlay `overrides` onto `base`. Objects merge key-wise;
/// everything else replaces.
pub(crate) fn deep_merge(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (key, over_value) in over_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, over_value),
                    None => {
                        base_map.insert(key.clone(), over_value.clone());
                    }
                }
            }
        }
        (slot, other) => *slot = other.clone(),
    }
}

const KNOWN_VARS: &str = r"cluster\.id|cluster\.createdAt|iteration|error\.message|result\.[A-Za-z0-9_]+";

static QUOTED_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r#""\{{\{{({KNOWN_VARS})\}}\}}""#)).unwrap());
static BARE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\{{\{{({KNOWN_VARS})\}}\}}")).unwrap());
static UNRESOLVED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(cluster|iteration|error|result)(\.[A-Za-z0-9_.]*)?\}\}").unwrap()
});

/// Template substitution over the hook config.
///
/// Replacements go through placeholder slots: values are spliced in only
/// after the unresolved-variable scan, so content that itself looks like
/// a template variable is never re-flagged. A quoted placeholder holding
/// a boolean/number/null/object becomes the bare JSON value, keeping
/// primitives typed after the final parse.
fn substitute_template(config: &Value, ctx: &HookContext<'_>) -> Result<Value> {
    let text = serde_json::to_string(config)
        .map_err(|e| Error::Template(format!("config not serializable: {}", e)))?;

    let mut slots: Vec<String> = Vec::new();
    fn slot(rendered: String, slots: &mut Vec<String>) -> String {
        slots.push(rendered);
        format!("\u{1}{}\u{1}", slots.len() - 1)
    }

    // Pass 1: placeholders that are an entire JSON string value. The
    // slot content is a complete JSON fragment (quotes included for
    // strings, bare for primitives and structures).
    let text = QUOTED_VAR.replace_all(&text, |caps: &regex::Captures<'_>| {
        let value = lookup_var(&caps[1], ctx);
        slot(value.to_string(), &mut slots)
    });

    // Pass 2: placeholders embedded inside a larger string. The slot
    // content is the JSON-escaped text of the value.
    let text = BARE_VAR.replace_all(&text, |caps: &regex::Captures<'_>| {
        let value = lookup_var(&caps[1], ctx);
        let rendered = match &value {
            Value::String(s) => escape_json_fragment(s),
            Value::Null => "null".to_string(),
            other => escape_json_fragment(&other.to_string()),
        };
        slot(rendered, &mut slots)
    });

    // Anything still carrying a known prefix was not resolvable.
    if let Some(m) = UNRESOLVED.find(&text) {
        return Err(Error::Template(format!(
            "unresolved template variable {}",
            m.as_str()
        )));
    }

    let mut final_text = text.into_owned();
    for (index, content) in slots.iter().enumerate() {
        final_text = final_text.replace(&format!("\u{1}{}\u{1}", index), content);
    }

    serde_json::from_str(&final_text)
        .map_err(|e| Error::Template(format!("substituted config is not valid JSON: {}", e)))
}

fn lookup_var(name: &str, ctx: &HookContext<'_>) -> Value {
    match name {
        "cluster.id" => Value::String(ctx.cluster.id.clone()),
        "cluster.createdAt" => Value::String(to_iso(ctx.cluster.created_at)),
        "iteration" => Value::from(ctx.iteration),
        "error.message" => Value::String(ctx.error_message.unwrap_or_default().to_string()),
        "result.output" => Value::String(ctx.raw_output.to_string()),
        other => {
            let field = other.trim_start_matches("result.");
            match ctx.result.and_then(|r| r.get(field)) {
                Some(value) => value.clone(),
                None => {
                    warn!(field, "template references a missing result field; using null");
                    Value::Null
                }
            }
        }
    }
}

fn escape_json_fragment(s: &str) -> String {
    let quoted = serde_json::to_string(s).unwrap_or_default();
    quoted[1..quoted.len() - 1].to_string()
}

/// `CLUSTER_OPERATIONS` messages must carry a non-empty operation list
/// where every entry names an action.
fn validate_operations(msg: &Value) -> Result<()> {
    if msg.get("topic").and_then(Value::as_str) != Some(topic::CLUSTER_OPERATIONS) {
        return Ok(());
    }
    let operations = msg
        .get("content")
        .and_then(|c| c.get("data"))
        .and_then(|d| d.get("operations"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            Error::Hook("CLUSTER_OPERATIONS message has no operations array".to_string())
        })?;
    if operations.is_empty() {
        return Err(Error::Hook(
            "CLUSTER_OPERATIONS operations array is empty".to_string(),
        ));
    }
    for (index, op) in operations.iter().enumerate() {
        if op.get("action").and_then(Value::as_str).is_none() {
            return Err(Error::Hook(format!(
                "operation #{} is missing an action",
                index + 1
            )));
        }
    }
    Ok(())
}

fn draft_from_value(value: &Value) -> Result<MessageDraft> {
    let topic = value
        .get("topic")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Hook("outgoing message has no topic".to_string()))?;

    let content = match value.get("content") {
        Some(Value::String(text)) => MessageContent::text(text.clone()),
        Some(obj) => MessageContent {
            text: obj
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: obj.get("data").cloned(),
        },
        None => {
            return Err(Error::Hook("outgoing message has no content".to_string()));
        }
    };

    let mut draft = MessageDraft::new(topic, content);
    if let Some(receiver) = value.get("receiver").and_then(Value::as_str) {
        draft = draft.to(receiver);
    }
    Ok(draft)
}
