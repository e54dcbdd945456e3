use crate::stream::{StreamEvent, StreamRecord, usage_of};
use crate::{Error, Result};
use agmesh_types::TokenUsage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)```").unwrap());

/// Outputs that mean the task itself died rather than "no JSON produced".
const DEAD_OUTPUTS: &[&str] = &["", "Task not found"];
const DEAD_PREFIXES: &[&str] = &["Process terminated"];

/// Accumulates a child's stream and extracts the structured result at
/// termination.
///
/// The dialect differences are carried by two inputs: whether the
/// provider's terminal event can carry a result payload at all (claude and
/// gemini: yes, codex: no), and the accumulated assistant text used by the
/// fallback steps. The extraction order is fixed: terminal result payload,
/// then a fenced ```json block, then the first balanced top-level object.
#[derive(Debug, Default)]
pub struct OutputCollector {
    terminal_carries_result: bool,
    assistant_text: String,
    terminal_result: Option<Value>,
    terminated: bool,
    usage: TokenUsage,
}

impl OutputCollector {
    pub fn new(terminal_carries_result: bool) -> Self {
        Self {
            terminal_carries_result,
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: &StreamRecord) {
        if let Some(usage) = usage_of(&record.raw) {
            self.usage.input_tokens += usage.input_tokens;
            self.usage.output_tokens += usage.output_tokens;
            self.usage.total_cost_usd += usage.total_cost_usd;
        }

        match &record.event {
            StreamEvent::Assistant { text } => {
                if !text.is_empty() {
                    if !self.assistant_text.is_empty() {
                        self.assistant_text.push('\n');
                    }
                    self.assistant_text.push_str(text);
                }
            }
            StreamEvent::Result { result } => {
                self.terminated = true;
                if self.terminal_carries_result && result.is_some() {
                    self.terminal_result = result.clone();
                }
            }
            StreamEvent::TurnCompleted => {
                // Usage-only terminator; the result stays in assistant text.
                self.terminated = true;
            }
            StreamEvent::Init | StreamEvent::Other { .. } => {}
        }
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// The raw textual output: the terminal result when it is a string,
    /// otherwise the accumulated assistant text.
    pub fn raw_output(&self) -> String {
        match &self.terminal_result {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.assistant_text.clone(),
        }
    }

    /// Extract the structured result.
    pub fn finish(&self) -> Result<Value> {
        let raw = self.raw_output();
        let trimmed = raw.trim();
        if self.terminal_result.is_none()
            && (DEAD_OUTPUTS.contains(&trimmed)
                || DEAD_PREFIXES.iter().any(|p| trimmed.starts_with(p)))
        {
            return Err(Error::ExecutionFailed(if trimmed.is_empty() {
                "empty output".to_string()
            } else {
                trimmed.to_string()
            }));
        }

        // (a) terminal event result: object as-is, string unwrapped
        if let Some(result) = &self.terminal_result {
            match result {
                Value::String(s) => {
                    if let Some(v) = extract_json(s) {
                        return Ok(v);
                    }
                }
                other => return Ok(other.clone()),
            }
        }

        // (b) + (c) over the accumulated assistant text
        if let Some(v) = extract_json(&self.assistant_text) {
            return Ok(v);
        }
        // A string terminal result may itself hold the only JSON
        if let Some(Value::String(s)) = &self.terminal_result
            && let Some(v) = first_balanced_object(s)
        {
            return Ok(v);
        }

        Err(Error::MissingJson)
    }
}

/// Fenced ```json block first, then the first balanced `{...}`, then the
/// whole text as JSON.
fn extract_json(text: &str) -> Option<Value> {
    if let Some(caps) = FENCED_JSON.captures(text)
        && let Ok(v) = serde_json::from_str::<Value>(caps[1].trim())
    {
        return Some(v);
    }
    if let Ok(v) = serde_json::from_str::<Value>(text.trim())
        && v.is_object()
    {
        return Some(v);
    }
    first_balanced_object(text)
}

/// First balanced top-level `{...}` that parses as JSON, string- and
/// escape-aware.
fn first_balanced_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = end {
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(v);
            }
            search_from = start + 1;
        } else {
            return None;
        }
    }
    None
}
