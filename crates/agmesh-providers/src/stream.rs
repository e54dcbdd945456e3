use agmesh_types::TokenUsage;
use serde_json::Value;

/// Classified newline-delimited JSON event from a provider child process.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub event: StreamEvent,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `system` / `init`: the child announced itself.
    Init,
    /// Assistant-authored text (`assistant`, `message`, `item.created`).
    Assistant { text: String },
    /// Terminating `result` event; `result` is absent when the payload is
    /// empty (some dialects emit a bare terminator).
    Result { result: Option<Value> },
    /// Terminating `turn.completed` event. Carries usage only, never a
    /// result payload.
    TurnCompleted,
    /// Anything else: forwarded as a log event, ignored for extraction.
    Other { kind: String },
}

/// Parse one stdout line. Events may be prefixed with a bracketed integer
/// timestamp (`[1712345678] {...}`) which is treated as decoration.
/// Returns `None` for blank or malformed lines (non-fatal in a stream).
pub fn parse_line(line: &str) -> Option<StreamRecord> {
    let trimmed = strip_bracket_prefix(line.trim());
    if trimmed.is_empty() {
        return None;
    }
    let raw: Value = serde_json::from_str(trimmed).ok()?;
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or("");

    let event = match kind {
        "system" | "init" => StreamEvent::Init,
        "assistant" | "message" | "item.created" => StreamEvent::Assistant {
            text: collect_text(&raw),
        },
        "result" => StreamEvent::Result {
            result: raw.get("result").cloned().filter(|v| !is_empty_result(v)),
        },
        "turn.completed" => StreamEvent::TurnCompleted,
        other => StreamEvent::Other {
            kind: other.to_string(),
        },
    };

    Some(StreamRecord { event, raw })
}

fn strip_bracket_prefix(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix('[')
        && let Some(end) = rest.find(']')
        && rest[..end].bytes().all(|b| b.is_ascii_digit())
        && end > 0
    {
        return rest[end + 1..].trim_start();
    }
    line
}

fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Pull assistant text out of the event, across the shapes the dialects
/// use: a bare `content` string, `content[]` blocks, a nested
/// `message.content`, or an `item.text`.
fn collect_text(raw: &Value) -> String {
    let mut parts = Vec::new();

    if let Some(content) = raw.get("content") {
        push_content(content, &mut parts);
    }
    if let Some(content) = raw.get("message").and_then(|m| m.get("content")) {
        push_content(content, &mut parts);
    }
    if let Some(text) = raw
        .get("item")
        .and_then(|i| i.get("text"))
        .and_then(Value::as_str)
    {
        parts.push(text.to_string());
    }
    if parts.is_empty()
        && let Some(text) = raw.get("text").and_then(Value::as_str)
    {
        parts.push(text.to_string());
    }

    parts.join("")
}

fn push_content(content: &Value, parts: &mut Vec<String>) {
    match content {
        Value::String(s) => parts.push(s.clone()),
        Value::Array(blocks) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(text.to_string());
                } else if let Some(text) = block.as_str() {
                    parts.push(text.to_string());
                }
            }
        }
        _ => {}
    }
}

/// Token usage carried by an event (`usage` object plus an optional
/// top-level `total_cost_usd`), when present.
pub fn usage_of(raw: &Value) -> Option<TokenUsage> {
    let usage = raw.get("usage")?;
    let input = usage
        .get("input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output = usage
        .get("output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let cost = raw
        .get("total_cost_usd")
        .or_else(|| usage.get("total_cost_usd"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    Some(TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_cost_usd: cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tolerates_bracket_prefix() {
        let rec = parse_line(r#"[1712345678] {"type":"system","subtype":"init"}"#).unwrap();
        assert_eq!(rec.event, StreamEvent::Init);

        // Without prefix
        let rec = parse_line(r#"{"type":"init"}"#).unwrap();
        assert_eq!(rec.event, StreamEvent::Init);

        // A bracket that is not a timestamp stays part of the payload
        assert!(parse_line(r#"[not-a-ts] {"type":"init"}"#).is_none());
    }

    #[test]
    fn test_parse_assistant_content_shapes() {
        let rec = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            rec.event,
            StreamEvent::Assistant {
                text: "hello world".to_string()
            }
        );

        let rec = parse_line(r#"{"type":"message","content":"plain"}"#).unwrap();
        assert_eq!(
            rec.event,
            StreamEvent::Assistant {
                text: "plain".to_string()
            }
        );

        let rec =
            parse_line(r#"{"type":"item.created","item":{"type":"agent_message","text":"{\"a\":1}"}}"#)
                .unwrap();
        assert_eq!(
            rec.event,
            StreamEvent::Assistant {
                text: "{\"a\":1}".to_string()
            }
        );
    }

    #[test]
    fn test_parse_result_event() {
        let rec = parse_line(r#"{"type":"result","result":{"summary":"ok"}}"#).unwrap();
        match rec.event {
            StreamEvent::Result { result: Some(v) } => assert_eq!(v["summary"], "ok"),
            other => panic!("unexpected event: {:?}", other),
        }

        // Empty result payloads are normalized to None
        let rec = parse_line(r#"{"type":"result","result":""}"#).unwrap();
        assert_eq!(rec.event, StreamEvent::Result { result: None });
        let rec = parse_line(r#"{"type":"result"}"#).unwrap();
        assert_eq!(rec.event, StreamEvent::Result { result: None });
    }

    #[test]
    fn test_parse_turn_completed_never_carries_result() {
        let rec = parse_line(
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(rec.event, StreamEvent::TurnCompleted);
        let usage = usage_of(&rec.raw).unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 2);
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        let rec = parse_line(r#"{"type":"tool_use","name":"bash"}"#).unwrap();
        assert_eq!(
            rec.event,
            StreamEvent::Other {
                kind: "tool_use".to_string()
            }
        );
        assert!(parse_line("").is_none());
        assert!(parse_line("not json").is_none());
    }

    #[test]
    fn test_usage_with_cost() {
        let raw = json!({
            "type": "result",
            "usage": { "input_tokens": 100, "output_tokens": 20 },
            "total_cost_usd": 0.42
        });
        let usage = usage_of(&raw).unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert!((usage.total_cost_usd - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let line = r#"[99] {"type":"assistant","content":"same"}"#;
        let a = parse_line(line).unwrap();
        let b = parse_line(line).unwrap();
        assert_eq!(a.event, b.event);
        assert_eq!(a.raw, b.raw);
    }
}
