use crate::{Error, Result};
use agmesh_ledger::Ledger;
use agmesh_types::{
    AgentConfig, ClusterDescriptor, IsolationMode, Message, MessageFilter, OutputFormat, to_iso,
    topic,
};
use serde_json::{Value, json};

/// Hard ceiling on assembled context size, in characters.
pub const MAX_CONTEXT_CHARS: usize = 500_000;

const AUTONOMY_INSTRUCTIONS: &str = "\
## Operating mode
You run unattended inside an agent cluster. Never wait for user input and
never ask questions; decide, act, and report. If a step fails, record the
failure in your result and continue with what remains feasible.";

const OUTPUT_INSTRUCTIONS: &str = "\
## Output
Finish with exactly one JSON object as your final output. Keep any
narration out of that object and put nothing after it.";

const GIT_INSTRUCTIONS: &str = "\
## Git operations
You are working directly in the shared checkout. Do not commit, push,
rebase, amend or otherwise rewrite version control state; the orchestrator
owns git.";

/// Inputs to one context assembly. All history comes from the ledger; the
/// function itself holds no state.
pub struct ContextRequest<'a> {
    pub agent: &'a AgentConfig,
    pub iteration: u32,
    pub cluster: &'a ClusterDescriptor,
    pub last_task_end: Option<i64>,
    pub last_agent_start: Option<i64>,
    pub triggering: &'a Message,
    /// Prompt already selected for this iteration.
    pub prompt: &'a str,
    pub isolation: IsolationMode,
}

/// Assemble the prompt for one execution cycle.
pub fn build_context(req: &ContextRequest<'_>, ledger: &Ledger) -> Result<String> {
    let mut header = String::new();

    header.push_str(&format!(
        "# Agent: {}\nRole: {}\nIteration: {}\n",
        req.agent.id, req.agent.role, req.iteration
    ));
    header.push('\n');
    header.push_str(AUTONOMY_INSTRUCTIONS);
    header.push_str("\n\n");
    header.push_str(OUTPUT_INSTRUCTIONS);
    header.push_str("\n\n");
    if !req.isolation.is_isolated() {
        header.push_str(GIT_INSTRUCTIONS);
        header.push_str("\n\n");
    }
    header.push_str("## Instructions\n");
    header.push_str(req.prompt);
    header.push('\n');

    match req.agent.output_format {
        OutputFormat::Json => {
            let schema = req.agent.effective_schema();
            header.push_str("\n## Output schema\nYour final JSON object must satisfy:\n");
            header.push_str(&serde_json::to_string_pretty(&schema).unwrap_or_default());
            header.push_str("\n\nExample shape:\n");
            header.push_str(
                &serde_json::to_string_pretty(&schema_example(&schema)).unwrap_or_default(),
            );
            header.push('\n');
        }
        OutputFormat::Text | OutputFormat::StreamJson => {
            if let Some(schema) = &req.agent.json_schema {
                header.push_str("\n## Output format\nStructure your result as:\n");
                header.push_str(&serde_json::to_string_pretty(schema).unwrap_or_default());
                header.push('\n');
            }
        }
    }

    // History sections in declared order. The ISSUE_OPENED block is kept
    // aside: it survives truncation.
    let mut issue_block = String::new();
    let mut middle: Vec<String> = Vec::new();

    for source in &req.agent.context.sources {
        let mut filter = MessageFilter::cluster(req.cluster.id.clone()).topic(&source.topic);
        if let Some(sender) = &source.sender {
            filter = filter.sender(sender);
        }
        if let Some(since) = resolve_since(source.since.as_deref(), req)? {
            filter = filter.since(since);
        }
        if let Some(limit) = source.limit {
            filter = filter.limit(limit);
        }

        let messages = ledger.query(&filter)?;
        if messages.is_empty() {
            continue;
        }
        let block = format_history(&source.topic, &messages);
        if source.topic == topic::ISSUE_OPENED {
            issue_block.push_str(&block);
        } else {
            middle.push(block);
        }
    }

    if req.agent.role.is_validator() {
        let skip = unverifiable_criteria(ledger, &req.cluster.id)?;
        if !skip.is_empty() {
            let mut block = String::from(
                "## Previously unverifiable criteria\nThese were marked CANNOT_VALIDATE; skip them:\n",
            );
            for id in skip {
                block.push_str(&format!("- {}\n", id));
            }
            middle.push(block);
        }
    }

    let trigger_block = format!(
        "## Triggering message\n{}",
        format_message(req.triggering)
    );

    let mut assembled =
        enforce_budget(&header, &issue_block, &middle, &trigger_block, MAX_CONTEXT_CHARS);
    if assembled.len() > MAX_CONTEXT_CHARS {
        // Pinned sections alone blew the ceiling; the cap still wins.
        assembled = truncate_chars(&assembled, MAX_CONTEXT_CHARS);
    }

    if let Some(max_tokens) = req.agent.context.max_tokens {
        let cap = max_tokens.saturating_mul(4);
        if assembled.len() > cap {
            assembled = enforce_budget(&header, &issue_block, &middle, &trigger_block, cap);
            if assembled.len() > cap {
                assembled = truncate_chars(&assembled, cap);
            }
        }
    }

    Ok(assembled)
}

/// Resolution of a context source's `since` value.
fn resolve_since(value: Option<&str>, req: &ContextRequest<'_>) -> Result<Option<i64>> {
    match value {
        None => Ok(None),
        Some("cluster_start") => Ok(Some(req.cluster.created_at)),
        Some("last_task_end") => Ok(Some(req.last_task_end.unwrap_or(req.cluster.created_at))),
        Some("last_agent_start") => {
            Ok(Some(req.last_agent_start.unwrap_or(req.cluster.created_at)))
        }
        Some(other) => agmesh_types::parse_iso_ms(other)
            .map(Some)
            .ok_or_else(|| Error::Context(format!("unknown context source value: {:?}", other))),
    }
}

fn format_history(topic: &str, messages: &[Message]) -> String {
    let mut block = format!("## History: {}\n", topic);
    for msg in messages {
        block.push_str(&format_message(msg));
    }
    block
}

fn format_message(msg: &Message) -> String {
    let mut out = format!(
        "[{}] {} -> {} on {}",
        to_iso(msg.timestamp),
        msg.sender,
        msg.receiver,
        msg.topic
    );
    if let Some(text) = &msg.content.text {
        out.push_str(": ");
        out.push_str(text);
    }
    out.push('\n');
    if let Some(data) = &msg.content.data {
        out.push_str("  data: ");
        out.push_str(&data.to_string());
        out.push('\n');
    }
    out
}

/// Criterion ids marked permanently unverifiable in prior validation
/// rounds. `CANNOT_VALIDATE_YET` is temporary and deliberately excluded.
fn unverifiable_criteria(ledger: &Ledger, cluster_id: &str) -> Result<Vec<String>> {
    let results = ledger.query(
        &MessageFilter::cluster(cluster_id.to_string()).topic(topic::VALIDATION_RESULT),
    )?;

    let mut ids = Vec::new();
    for msg in results {
        let Some(criteria) = msg
            .content
            .data
            .as_ref()
            .and_then(|d| d.get("criteria"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for criterion in criteria {
            if criterion.get("status").and_then(Value::as_str) == Some("CANNOT_VALIDATE")
                && let Some(id) = criterion.get("id")
            {
                let id = match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    Ok(ids)
}

/// One-value example derived from the schema: first enum value, the
/// description for strings, zero/false/empty otherwise.
fn schema_example(schema: &Value) -> Value {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return json!({});
    };
    let mut example = serde_json::Map::new();
    for (name, prop) in properties {
        example.insert(name.clone(), example_for(prop));
    }
    Value::Object(example)
}

fn example_for(prop: &Value) -> Value {
    if let Some(first) = prop
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|vals| vals.first())
    {
        return first.clone();
    }
    match prop.get("type").and_then(Value::as_str) {
        Some("string") => prop
            .get("description")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
        Some("number") | Some("integer") => json!(0),
        Some("boolean") => json!(false),
        Some("array") => json!([]),
        Some("object") => json!({}),
        _ => Value::Null,
    }
}

/// Fit the assembled context into `cap` characters. The header, the
/// ISSUE_OPENED block and the triggering message always survive; the
/// middle keeps its most recent lines with a marker noting the cut.
fn enforce_budget(
    header: &str,
    issue: &str,
    middle: &[String],
    trigger: &str,
    cap: usize,
) -> String {
    let full = assemble(header, issue, middle, None, trigger);
    if full.len() <= cap {
        return full;
    }

    let middle_text = middle.join("\n");
    let lines: Vec<&str> = middle_text.lines().collect();

    let fixed = header.len() + issue.len() + trigger.len() + 8;
    let marker_overhead = 64;
    let budget = cap.saturating_sub(fixed + marker_overhead);

    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in lines.iter().rev() {
        let cost = line.len() + 1;
        if used + cost > budget {
            break;
        }
        kept.push(line);
        used += cost;
    }
    kept.reverse();

    let omitted = lines.len() - kept.len();
    let marker = format!("[... {} earlier context lines omitted ...]", omitted);
    let reduced = [marker.as_str()]
        .into_iter()
        .chain(kept)
        .collect::<Vec<_>>()
        .join("\n");

    assemble(header, issue, &[], Some(&reduced), trigger)
}

fn assemble(
    header: &str,
    issue: &str,
    middle: &[String],
    reduced_middle: Option<&str>,
    trigger: &str,
) -> String {
    let mut parts: Vec<&str> = vec![header];
    if !issue.is_empty() {
        parts.push(issue);
    }
    for block in middle {
        parts.push(block);
    }
    if let Some(reduced) = reduced_middle {
        parts.push(reduced);
    }
    parts.push(trigger);
    parts.join("\n")
}

fn truncate_chars(text: &str, cap: usize) -> String {
    let mut end = cap.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
