use crate::liveness::{LivenessSpec, spawn_monitor};
use crate::{Error, Result};
use agmesh_ledger::Publisher;
use agmesh_providers::{LaunchPlan, OutputCollector, parse_line};
use agmesh_types::{MessageContent, MessageDraft, TokenUsage, now_ms, topic};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lines of child output kept for failure diagnostics.
const LOG_TAIL_LINES: usize = 50;

#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Wall-clock limit in milliseconds; 0 disables it.
    pub timeout_ms: u64,
    pub readiness_retries: u32,
    pub readiness_delay: Duration,
    pub terminal_carries_result: bool,
    pub liveness: Option<LivenessSpec>,
}

/// Result of one task execution.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub success: bool,
    pub task_id: String,
    pub iteration: u32,
    /// Raw textual output, for `{{result.output}}` and diagnostics.
    pub output: String,
    /// Structured result, when extraction succeeded.
    pub parsed: Option<Value>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub usage: TokenUsage,
    pub log_tail: Vec<String>,
}

/// Spawn the provider CLI, stream its stdout onto the bus, and parse the
/// structured result at exit.
///
/// `Err` is reserved for spawn/readiness failures (the task never came
/// up); everything after registration is reported through the record.
pub async fn run_task(
    plan: &LaunchPlan,
    prompt: &str,
    iteration: u32,
    publisher: &Publisher,
    options: &ExecOptions,
) -> Result<ExecutionRecord> {
    let task_id = uuid::Uuid::new_v4().to_string();

    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .current_dir(&plan.workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::Spawn(format!("failed to launch {}: {}", plan.program, e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Spawn("child has no stdin".to_string()))?;
    stdin
        .write_all(prompt.as_bytes())
        .await
        .map_err(|e| Error::Spawn(format!("failed to send prompt: {}", e)))?;
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Spawn("child has no stdout".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();

    let pid = child.id().unwrap_or_default();
    let last_output = Arc::new(AtomicI64::new(now_ms()));
    let (kill_tx, mut kill_rx) = watch::channel(false);

    let monitor = options.liveness.clone().map(|spec| {
        spawn_monitor(
            pid,
            spec,
            publisher.clone(),
            task_id.clone(),
            last_output.clone(),
            kill_tx.clone(),
        )
    });

    let deadline =
        (options.timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(options.timeout_ms));
    let mut collector = OutputCollector::new(options.terminal_carries_result);
    let mut tail: VecDeque<String> = VecDeque::new();
    let mut ready = false;
    let mut readiness_attempts = 0u32;
    let mut timed_out = false;
    let mut killed_stale = false;
    let mut io_error: Option<String> = None;

    loop {
        let wait = if !ready {
            options.readiness_delay
        } else {
            match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(3600),
            }
        };

        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    last_output.store(now_ms(), std::sync::atomic::Ordering::Relaxed);
                    if tail.len() == LOG_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());

                    if let Some(record) = parse_line(&line) {
                        ready = true;
                        collector.push(&record);
                        let _ = publisher.publish(MessageDraft::new(
                            topic::TASK_LOG,
                            MessageContent::text(line),
                        ));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    io_error = Some(format!("stream error: {}", e));
                    break;
                }
            },
            _ = kill_rx.changed() => {
                if *kill_rx.borrow() {
                    killed_stale = true;
                    let _ = child.kill().await;
                    break;
                }
            },
            _ = tokio::time::sleep(wait) => {
                if !ready {
                    readiness_attempts += 1;
                    if readiness_attempts >= options.readiness_retries {
                        let _ = child.kill().await;
                        if let Some(monitor) = monitor {
                            monitor.abort();
                        }
                        return Err(Error::Spawn(format!(
                            "task never registered after {} polls",
                            readiness_attempts
                        )));
                    }
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    timed_out = true;
                    let _ = child.kill().await;
                    break;
                }
            },
        }
    }

    let status = child.wait().await.ok();
    if let Some(monitor) = monitor {
        monitor.abort();
    }

    let exit_ok = status.map(|s| s.success()).unwrap_or(false);
    let (parsed, parse_error) = if timed_out || killed_stale {
        (None, None)
    } else {
        match collector.finish() {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        }
    };

    let error = if timed_out {
        Some(format!("task timed out after {} ms", options.timeout_ms))
    } else if killed_stale {
        Some("task killed after stale verdict".to_string())
    } else if let Some(io) = io_error {
        Some(io)
    } else if let Some(parse) = parse_error {
        Some(parse)
    } else if !exit_ok {
        Some(format!(
            "task exited with status {}",
            status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
        ))
    } else {
        None
    };

    let success = error.is_none();
    debug!(task_id = %task_id, success, "task completed");

    // Token accounting rides on the completion event so the ledger can
    // aggregate usage per role.
    let _ = publisher.publish(
        MessageDraft::new(
            topic::AGENT_LIFECYCLE,
            MessageContent::data(json!({
                "event": "task_completed",
                "task_id": task_id,
                "iteration": iteration,
                "success": success,
            })),
        )
        .with_usage(collector.usage()),
    );
    if !success {
        warn!(task_id = %task_id, error = ?error, "task failed");
    }

    Ok(ExecutionRecord {
        success,
        task_id,
        iteration,
        output: collector.raw_output(),
        parsed,
        error,
        timed_out,
        usage: collector.usage(),
        log_tail: tail.into_iter().collect(),
    })
}
