use crate::report::{Phase, ValidationReport};
use crate::validate::all_hooks;
use agmesh_types::ClusterConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Phase 4: every script must parse; trivially-constant guards and
/// likely-undefined identifiers are worth a warning.
pub(crate) fn run(config: &ClusterConfig, report: &mut ValidationReport) {
    for agent in &config.agents {
        let id = agent.id.as_str();

        for trigger in &agent.triggers {
            if let Some(logic) = &trigger.logic {
                check_script(&logic.script, id, "trigger logic", report);
                check_constant_guard(&logic.script, id, report);
            }
        }
        for (hook_name, hook) in all_hooks(agent) {
            if let Some(logic) = &hook.logic {
                check_script(
                    &logic.script,
                    id,
                    &format!("{} logic", hook_name),
                    report,
                );
            }
            if let Some(transform) = &hook.transform {
                check_script(transform, id, &format!("{} transform", hook_name), report);
            }
        }
    }
}

fn check_script(script: &str, agent: &str, what: &str, report: &mut ValidationReport) {
    if let Err(err) = agmesh_logic::check_syntax(script) {
        report.error(Phase::Scripts, Some(agent), format!("{}: {}", what, err));
        return;
    }
    for ident in suspicious_identifiers(script) {
        report.warn(
            Phase::Scripts,
            Some(agent),
            format!(
                "{} references {:?}, which is not defined in the script sandbox",
                what, ident
            ),
        );
    }
}

fn check_constant_guard(script: &str, agent: &str, report: &mut ValidationReport) {
    let normalized = script.trim().trim_end_matches(';').trim();
    if matches!(normalized, "return true" | "true") {
        report.warn(
            Phase::Scripts,
            Some(agent),
            "trigger logic always returns true; the guard is a no-op",
        );
    } else if matches!(normalized, "return false" | "false") {
        report.warn(
            Phase::Scripts,
            Some(agent),
            "trigger logic always returns false; the trigger can never fire",
        );
    }
}

static SANDBOX_GLOBALS: &[&str] = &[
    "ledger", "cluster", "message", "agent", "helpers", "console", "Math", "JSON", "Date",
    "String", "Number", "Boolean", "Array", "Object", "Set", "Map", "undefined", "NaN",
    "Infinity", "parseInt", "parseFloat", "isNaN", "globalThis",
];

static JS_KEYWORDS: &[&str] = &[
    "return", "const", "let", "var", "function", "if", "else", "for", "while", "do", "of", "in",
    "new", "typeof", "instanceof", "true", "false", "null", "this", "break", "continue",
    "switch", "case", "default", "throw", "try", "catch", "finally", "delete", "void",
];

static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").unwrap());
static DECLARED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:const|let|var|function)\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap()
});

/// Heuristic: identifiers used in call/member-access position that are
/// neither sandbox globals, keywords, nor declared in the script itself.
/// Property names after a dot are excluded.
fn suspicious_identifiers(script: &str) -> Vec<String> {
    let mut declared: HashSet<String> = DECLARED
        .captures_iter(script)
        .map(|c| c[1].to_string())
        .collect();
    // Arrow/function params, crudely: anything between ( ) before =>
    for caps in Regex::new(r"\(([^()]*)\)\s*=>").unwrap().captures_iter(script) {
        for part in caps[1].split(',') {
            declared.insert(part.trim().to_string());
        }
    }
    for caps in Regex::new(r"([A-Za-z_$][A-Za-z0-9_$]*)\s*=>").unwrap().captures_iter(script) {
        declared.insert(caps[1].to_string());
    }

    let bytes = script.as_bytes();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for m in IDENT.find_iter(script) {
        let name = m.as_str();
        // Skip property access (preceded by '.') and object keys
        // (followed by ':').
        if m.start() > 0 && bytes[m.start() - 1] == b'.' {
            continue;
        }
        let after = script[m.end()..].trim_start();
        if after.starts_with(':') {
            continue;
        }
        // Only flag names that look like lookups: called or dereferenced.
        if !(after.starts_with('(') || after.starts_with('.')) {
            continue;
        }
        if SANDBOX_GLOBALS.contains(&name)
            || JS_KEYWORDS.contains(&name)
            || declared.contains(name)
        {
            continue;
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}
