mod args;
mod commands;
mod output;
mod preflight;

pub use args::{Cli, Commands, LogLevel, OutputFormat, ProviderName};

use anyhow::Result;

pub fn run(cli: Cli) -> Result<()> {
    init_logging(cli.log_level);

    match cli.command {
        Commands::Run {
            issue_ref,
            config,
            provider,
            docker,
            worktree,
            pr,
        } => commands::run_cluster(
            &cli.data_dir,
            &issue_ref,
            &config,
            provider,
            docker,
            worktree,
            pr,
        ),
        Commands::Validate {
            config,
            format,
            provider,
        } => commands::validate_config(&config, format, provider),
        Commands::Resume {
            cluster_id,
            provider,
            docker,
            worktree,
        } => commands::resume_cluster(&cli.data_dir, &cluster_id, provider, docker, worktree),
    }
}

fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("agmesh={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
