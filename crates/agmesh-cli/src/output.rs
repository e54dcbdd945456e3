use agmesh_config::ValidationReport;
use agmesh_ledger::TokenUsageReport;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

/// Print the analyzer report: errors first, then warnings, then a
/// one-line verdict. Colors only when stdout is a terminal.
pub fn print_report(report: &ValidationReport) {
    let color = std::io::stdout().is_terminal();

    if !report.errors.is_empty() {
        println!("Errors:");
        for finding in &report.errors {
            if color {
                println!("  {} {}", "✗".red(), finding);
            } else {
                println!("  ✗ {}", finding);
            }
        }
    }

    if !report.warnings.is_empty() {
        println!("Warnings:");
        for finding in &report.warnings {
            if color {
                println!("  {} {}", "⚠".yellow(), finding);
            } else {
                println!("  ⚠ {}", finding);
            }
        }
    }

    let verdict = if report.is_valid() {
        format!(
            "Config is valid ({} warning{})",
            report.warnings.len(),
            plural(report.warnings.len())
        )
    } else {
        format!(
            "Config is invalid: {} error{}, {} warning{}",
            report.errors.len(),
            plural(report.errors.len()),
            report.warnings.len(),
            plural(report.warnings.len())
        )
    };
    if color {
        if report.is_valid() {
            println!("{}", verdict.green());
        } else {
            println!("{}", verdict.red());
        }
    } else {
        println!("{}", verdict);
    }
}

/// Per-role token accounting at shutdown.
pub fn print_usage(usage: &TokenUsageReport) {
    if usage.by_role.is_empty() {
        return;
    }
    println!("\nToken usage:");
    println!("  {:<22} {:>10} {:>10} {:>10}", "role", "input", "output", "cost");
    for (role, role_usage) in &usage.by_role {
        println!(
            "  {:<22} {:>10} {:>10} {:>9.4}$",
            role, role_usage.input_tokens, role_usage.output_tokens, role_usage.total_cost_usd
        );
    }
    println!(
        "  {:<22} {:>10} {:>10} {:>9.4}$",
        "_total", usage.total.input_tokens, usage.total.output_tokens, usage.total.total_cost_usd
    );
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
