use agmesh_ledger::Publisher;
use agmesh_types::{MessageContent, MessageDraft, now_ms, topic};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Aggregate score at which a task counts as stuck. Four indicators are
/// sampled; every one of them must look inactive to reach the threshold,
/// so a single quiet signal (a long model streaming pause, say) can never
/// trip the watchdog on its own.
pub const STUCK_SCORE: f64 = 3.5;

const CPU_ACTIVE_TICKS: u64 = 5;
const CTX_ACTIVE_SWITCHES: u64 = 50;

#[derive(Debug, Clone)]
pub struct LivenessSpec {
    pub interval: Duration,
    pub stale_after: Duration,
    pub kill_on_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    state: char,
    cpu_ticks: u64,
    ctx_switches: u64,
    net_bytes: u64,
}

/// Watchdog for one child task. Publishes a stale notice when every
/// indicator stays inactive for the configured duration; requests a kill
/// over `kill_tx` only when the spec says so. Exits when the process
/// disappears.
pub fn spawn_monitor(
    pid: u32,
    spec: LivenessSpec,
    publisher: Publisher,
    task_id: String,
    last_output_ms: Arc<AtomicI64>,
    kill_tx: tokio::sync::watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut prev: Option<Sample> = None;
        let mut inactive_for = Duration::ZERO;
        let mut tripped = false;
        let mut ticker = tokio::time::interval(spec.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        loop {
            ticker.tick().await;

            let Some(current) = sample(pid) else {
                // Process gone; the executor handles completion.
                return;
            };

            let score = match prev {
                Some(previous) => indicator_score(&previous, &current),
                None => 0.0,
            };
            prev = Some(current);

            // Fresh output resets the clock regardless of indicators.
            let output_age = now_ms() - last_output_ms.load(Ordering::Relaxed);
            let output_fresh = output_age >= 0 && (output_age as u128) < spec.interval.as_millis();

            if score >= STUCK_SCORE && !output_fresh {
                inactive_for += spec.interval;
            } else {
                inactive_for = Duration::ZERO;
                tripped = false;
            }

            debug!(pid, score, ?inactive_for, "liveness sample");

            if inactive_for >= spec.stale_after && !tripped {
                tripped = true;
                warn!(pid, task_id = %task_id, "task looks stale");
                let _ = publisher.publish(MessageDraft::new(
                    topic::AGENT_LIFECYCLE,
                    MessageContent::data(json!({
                        "event": "task_stale",
                        "task_id": task_id,
                        "pid": pid,
                        "score": score,
                        "inactive_ms": inactive_for.as_millis() as u64,
                    })),
                ));
                if spec.kill_on_stale {
                    let _ = kill_tx.send(true);
                }
            }
        }
    })
}

/// Per-interval inactivity score across the four indicators:
/// process state, cpu time, context switches, network io.
fn indicator_score(prev: &Sample, current: &Sample) -> f64 {
    let mut score = 0.0;

    if current.state != 'R' {
        score += 1.0;
    }

    let cpu_delta = current.cpu_ticks.saturating_sub(prev.cpu_ticks);
    if cpu_delta == 0 {
        score += 1.0;
    } else if cpu_delta < CPU_ACTIVE_TICKS {
        score += 0.5;
    }

    let ctx_delta = current.ctx_switches.saturating_sub(prev.ctx_switches);
    if ctx_delta == 0 {
        score += 1.0;
    } else if ctx_delta < CTX_ACTIVE_SWITCHES {
        score += 0.5;
    }

    if current.net_bytes.saturating_sub(prev.net_bytes) == 0 {
        score += 1.0;
    }

    score
}

#[cfg(target_os = "linux")]
fn sample(pid: u32) -> Option<Sample> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let (state, cpu_ticks) = parse_stat(&stat)?;
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let ctx_switches = parse_status(&status);
    let net = std::fs::read_to_string(format!("/proc/{}/net/dev", pid)).unwrap_or_default();
    let net_bytes = parse_net_dev(&net);
    Some(Sample {
        state,
        cpu_ticks,
        ctx_switches,
        net_bytes,
    })
}

/// Off-linux the indicators are unavailable; report the process as
/// active so the watchdog never produces a false stuck verdict.
#[cfg(not(target_os = "linux"))]
fn sample(pid: u32) -> Option<Sample> {
    let _ = pid;
    None
}

/// `/proc/<pid>/stat`: `pid (comm) S utime...`. The comm field may
/// contain spaces, so fields are counted after the closing paren.
/// Returns the state char and utime+stime in clock ticks.
fn parse_stat(content: &str) -> Option<(char, u64)> {
    let after_comm = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // after_comm fields: [state, ppid, pgrp, ..., utime(idx 11), stime(idx 12)]
    let state = fields.first()?.chars().next()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((state, utime + stime))
}

/// Voluntary plus nonvoluntary context switches from `/proc/<pid>/status`.
fn parse_status(content: &str) -> u64 {
    content
        .lines()
        .filter(|line| line.contains("ctxt_switches"))
        .filter_map(|line| line.split_whitespace().last()?.parse::<u64>().ok())
        .sum()
}

/// Total rx+tx bytes across interfaces from `/proc/<pid>/net/dev`.
fn parse_net_dev(content: &str) -> u64 {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (_, counters) = line.split_once(':')?;
            let fields: Vec<&str> = counters.split_whitespace().collect();
            let rx: u64 = fields.first()?.parse().ok()?;
            let tx: u64 = fields.get(8)?.parse().ok()?;
            Some(rx + tx)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with(state: char, cpu: u64, ctx: u64, net: u64) -> Sample {
        Sample {
            state,
            cpu_ticks: cpu,
            ctx_switches: ctx,
            net_bytes: net,
        }
    }

    #[test]
    fn test_fully_inactive_process_scores_stuck() {
        let prev = sample_with('S', 100, 1000, 5000);
        let current = sample_with('S', 100, 1000, 5000);
        assert!(indicator_score(&prev, &current) >= STUCK_SCORE);
    }

    #[test]
    fn test_single_active_indicator_prevents_stuck() {
        let prev = sample_with('S', 100, 1000, 5000);

        // Only network moved: still below threshold.
        let net_active = sample_with('S', 100, 1000, 9000);
        assert!(indicator_score(&prev, &net_active) < STUCK_SCORE);

        // Only cpu moved.
        let cpu_active = sample_with('S', 200, 1000, 5000);
        assert!(indicator_score(&prev, &cpu_active) < STUCK_SCORE);

        // Only context switches moved.
        let ctx_active = sample_with('S', 100, 2000, 5000);
        assert!(indicator_score(&prev, &ctx_active) < STUCK_SCORE);

        // Running state alone.
        let running = sample_with('R', 100, 1000, 5000);
        assert!(indicator_score(&prev, &running) < STUCK_SCORE);
    }

    #[test]
    fn test_weak_activity_scores_partial() {
        let prev = sample_with('S', 100, 1000, 5000);
        // Barely any cpu and few switches: partial credit, still stuck
        // only in combination with everything else being quiet.
        let weak = sample_with('S', 101, 1010, 5000);
        let score = indicator_score(&prev, &weak);
        assert!(score >= STUCK_SCORE);
        assert!(score < 4.0);
    }

    #[test]
    fn test_parse_stat_handles_spaces_in_comm() {
        let line = "1234 (web content) S 1 1234 1234 0 -1 4194304 500 0 0 0 75 25 0 0 20 0 4 0 100 0 0";
        let (state, cpu) = parse_stat(line).unwrap();
        assert_eq!(state, 'S');
        assert_eq!(cpu, 100); // utime 75 + stime 25
    }

    #[test]
    fn test_parse_status_sums_switches() {
        let content = "Name:\tclaude\nvoluntary_ctxt_switches:\t120\nnonvoluntary_ctxt_switches:\t30\n";
        assert_eq!(parse_status(content), 150);
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0:    5000      50    0    0    0     0          0         0     3000      30    0    0    0     0       0          0
";
        assert_eq!(parse_net_dev(content), 1000 + 1000 + 5000 + 3000);
    }
}
