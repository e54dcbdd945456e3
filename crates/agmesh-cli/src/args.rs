use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ProviderName {
    Claude,
    Codex,
    Gemini,
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderName::Claude => write!(f, "claude"),
            ProviderName::Codex => write!(f, "codex"),
            ProviderName::Gemini => write!(f, "gemini"),
        }
    }
}

#[derive(Parser)]
#[command(name = "agmesh")]
#[command(about = "Run clusters of LLM-backed agents against an issue", long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Workspace data directory override")]
    pub data_dir: Option<String>,

    #[arg(long, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Validate a config, boot the cluster and drive an issue to completion")]
    Run {
        #[arg(help = "Issue reference: a file path or literal issue text")]
        issue_ref: String,

        #[arg(long, help = "Cluster config document")]
        config: PathBuf,

        #[arg(long, default_value = "claude")]
        provider: ProviderName,

        #[arg(long, conflicts_with = "worktree", help = "Run tasks inside docker")]
        docker: bool,

        #[arg(long, help = "Run each agent's tasks in its own worktree")]
        worktree: bool,

        #[arg(long, help = "Ask the cluster to open a pull request when done")]
        pr: bool,
    },

    #[command(about = "Statically analyze a cluster config")]
    Validate {
        config: PathBuf,

        #[arg(long, default_value = "plain")]
        format: OutputFormat,

        #[arg(long, default_value = "claude")]
        provider: ProviderName,
    },

    #[command(about = "Resume a previously started cluster from its ledger")]
    Resume {
        cluster_id: String,

        #[arg(long, default_value = "claude")]
        provider: ProviderName,

        #[arg(long, conflicts_with = "worktree")]
        docker: bool,

        #[arg(long)]
        worktree: bool,
    },
}
