use crate::env::ScriptEnv;
use crate::prelude::PRELUDE;
use crate::{Error, Result};
use rquickjs::{CatchResultExt, Context, Runtime, Value};
use std::time::{Duration, Instant};
use tracing::warn;

/// Deadline for trigger scripts.
pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for hook-logic scripts.
pub const HOOK_LOGIC_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for transform scripts.
pub const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Scripts are function bodies. A script with no `return` statement may
/// also be a bare expression; the caller probes which wrap parses.
fn wrap_statement(script: &str, invoke: bool) -> String {
    let call = if invoke { "()" } else { "" };
    format!("(function() {{\n{}\n}}){}", script, call)
}

fn wrap_expression(script: &str, invoke: bool) -> String {
    let call = if invoke { "()" } else { "" };
    format!("(function() {{ return (\n{}\n); }}){}", script, call)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let at = start + pos;
        let end = at + word.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Run a script against the sandbox env and return its value as JSON.
/// `None` means the script evaluated to `undefined`.
fn eval_to_json(
    script: &str,
    env: &ScriptEnv,
    timeout: Duration,
) -> Result<Option<serde_json::Value>> {
    let env_json = serde_json::to_string(env)?;

    let rt = Runtime::new().map_err(|e| Error::Script(e.to_string()))?;
    rt.set_memory_limit(MEMORY_LIMIT);
    let deadline = Instant::now() + timeout;
    rt.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

    let ctx = Context::full(&rt).map_err(|e| Error::Script(e.to_string()))?;
    let started = Instant::now();

    let outcome = ctx.with(|ctx| -> Result<Option<serde_json::Value>> {
        let env_value = ctx
            .json_parse(env_json)
            .map_err(|e| Error::Script(e.to_string()))?;
        ctx.globals()
            .set("__env", env_value)
            .map_err(|e| Error::Script(e.to_string()))?;
        ctx.eval::<(), _>(PRELUDE)
            .catch(&ctx)
            .map_err(|e| Error::Script(e.to_string()))?;

        // Probe which wrap parses, then evaluate the invoked form.
        let wrapped = if contains_word(script, "return") {
            wrap_statement(script, true)
        } else if ctx.eval::<Value, _>(wrap_expression(script, false)).is_ok() {
            wrap_expression(script, true)
        } else {
            let _ = ctx.catch();
            wrap_statement(script, true)
        };

        let value = ctx
            .eval::<Value, _>(wrapped)
            .catch(&ctx)
            .map_err(|e| Error::Script(e.to_string()))?;

        let json = ctx
            .json_stringify(value)
            .map_err(|e| Error::Script(e.to_string()))?;
        match json {
            Some(s) => {
                let text = s.to_string().map_err(|e| Error::Script(e.to_string()))?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    });

    // The interrupt handler surfaces as a generic script error; reclassify
    // when the deadline had actually passed.
    match outcome {
        Err(Error::Script(_)) if started.elapsed() >= timeout => Err(Error::Timeout),
        other => other,
    }
}

/// Parse-check a script without running it. Used at config load; a failure
/// here is a configuration error.
pub fn check_syntax(script: &str) -> Result<()> {
    let rt = Runtime::new().map_err(|e| Error::Script(e.to_string()))?;
    rt.set_memory_limit(MEMORY_LIMIT);
    let ctx = Context::full(&rt).map_err(|e| Error::Script(e.to_string()))?;
    ctx.with(|ctx| {
        let as_statement = ctx
            .eval::<Value, _>(wrap_statement(script, false))
            .catch(&ctx);
        if as_statement.is_ok() {
            return Ok(());
        }
        if !contains_word(script, "return")
            && ctx
                .eval::<Value, _>(wrap_expression(script, false))
                .catch(&ctx)
                .is_ok()
        {
            return Ok(());
        }
        match as_statement {
            Err(e) => Err(Error::Syntax(e.to_string())),
            Ok(_) => Ok(()),
        }
    })
}

/// Evaluate a trigger script. Fail-safe: any throw, timeout, or
/// non-boolean result means "do not fire".
pub fn evaluate_trigger(script: &str, env: &ScriptEnv) -> bool {
    match eval_to_json(script, env, TRIGGER_TIMEOUT) {
        Ok(Some(serde_json::Value::Bool(fire))) => fire,
        Ok(other) => {
            warn!(agent = %env.agent.id, ?other, "trigger script returned non-boolean");
            false
        }
        Err(err) => {
            warn!(agent = %env.agent.id, %err, "trigger script failed");
            false
        }
    }
}

/// Evaluate a hook-logic script. Returns config overrides to deep-merge,
/// or `None` when the script yields `null`/`undefined`. Errors propagate.
pub fn evaluate_hook_logic(script: &str, env: &ScriptEnv) -> Result<Option<serde_json::Value>> {
    match eval_to_json(script, env, HOOK_LOGIC_TIMEOUT)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value @ serde_json::Value::Object(_)) => Ok(Some(value)),
        Some(other) => Err(Error::Contract(format!(
            "hook logic must return an object or null, got {}",
            kind_of(&other)
        ))),
    }
}

/// Evaluate a transform script. The return value is the outgoing message
/// and must be an object carrying `topic` and `content`.
pub fn evaluate_transform(script: &str, env: &ScriptEnv) -> Result<serde_json::Value> {
    let value = eval_to_json(script, env, TRANSFORM_TIMEOUT)?
        .ok_or_else(|| Error::Contract("transform returned undefined".to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::Contract(format!("transform must return an object, got {}", kind_of(&value))))?;
    if !obj.contains_key("topic") {
        return Err(Error::Contract("transform result is missing 'topic'".to_string()));
    }
    if !obj.contains_key("content") {
        return Err(Error::Contract(
            "transform result is missing 'content'".to_string(),
        ));
    }
    Ok(value)
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
