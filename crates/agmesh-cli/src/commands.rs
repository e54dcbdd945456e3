use crate::args::{OutputFormat, ProviderName};
use crate::{output, preflight};
use agmesh_ledger::{Ledger, MessageBus};
use agmesh_runtime::{
    ClusterHandle, IssueProvider, LocalIssueProvider, Orchestrator, RunOptions, Settings,
    resolve_workspace_path,
};
use agmesh_types::{ClusterConfig, ClusterDescriptor, IsolationMode};
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn validate_config(
    config_path: &Path,
    format: OutputFormat,
    provider: ProviderName,
) -> Result<()> {
    let config = agmesh_config::load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let report = agmesh_config::validate(&config, &provider.to_string());

    match format {
        OutputFormat::Plain => output::print_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.is_valid() {
        bail!("validation failed");
    }
    Ok(())
}

pub fn run_cluster(
    data_dir: &Option<String>,
    issue_ref: &str,
    config_path: &Path,
    provider: ProviderName,
    docker: bool,
    worktree: bool,
    pr: bool,
) -> Result<()> {
    preflight::check_run(config_path, provider)?;

    let config = agmesh_config::load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let report = agmesh_config::validate(&config, &provider.to_string());
    output::print_report(&report);
    if !report.is_valid() {
        bail!("refusing to boot an invalid cluster config");
    }

    let input = LocalIssueProvider.fetch(issue_ref)?;
    let descriptor = match &config.id {
        Some(id) => ClusterDescriptor::with_id(id.clone()),
        None => ClusterDescriptor::generate(),
    };
    info!(cluster = %descriptor.id, "starting cluster");

    let data_dir = resolve_workspace_path(data_dir.as_deref())?;
    let cluster_dir = Settings::cluster_dir(&data_dir, &descriptor.id);
    std::fs::create_dir_all(&cluster_dir)?;
    std::fs::write(
        cluster_dir.join("config.json"),
        serde_json::to_string_pretty(&config)?,
    )?;
    std::fs::write(
        cluster_dir.join("cluster.json"),
        serde_json::to_string_pretty(&descriptor)?,
    )?;

    let settings = Settings::load_from(&data_dir.join("settings.toml"))?;
    let ledger = Ledger::open(&cluster_dir.join("ledger.db"))?;
    let options = RunOptions {
        provider: provider.to_string(),
        isolation: isolation_of(docker, worktree),
        workdir: std::env::current_dir()?,
        open_pr: pr,
    };

    let outcome = boot(config, descriptor, settings, ledger, options, |orch| {
        Box::pin(orch.run(input))
    })?;

    println!(
        "\nCluster {} {}",
        outcome.cluster_id,
        if outcome.completed {
            "completed"
        } else {
            "interrupted"
        }
    );
    output::print_usage(&outcome.usage);
    if !outcome.completed {
        bail!("cluster did not complete");
    }
    Ok(())
}

pub fn resume_cluster(
    data_dir: &Option<String>,
    cluster_id: &str,
    provider: ProviderName,
    docker: bool,
    worktree: bool,
) -> Result<()> {
    let data_dir = resolve_workspace_path(data_dir.as_deref())?;
    let cluster_dir = Settings::cluster_dir(&data_dir, cluster_id);
    if !cluster_dir.exists() {
        bail!(
            "no cluster {:?} under {}\n  1. Check `agmesh run` output for the cluster id\n  2. Pass --data-dir if the workspace lives elsewhere",
            cluster_id,
            data_dir.display()
        );
    }

    let config: ClusterConfig = serde_json::from_str(&std::fs::read_to_string(
        cluster_dir.join("config.json"),
    )?)?;
    let descriptor: ClusterDescriptor = serde_json::from_str(&std::fs::read_to_string(
        cluster_dir.join("cluster.json"),
    )?)?;
    let settings = Settings::load_from(&data_dir.join("settings.toml"))?;
    let ledger = Ledger::open(&cluster_dir.join("ledger.db"))?;
    info!(cluster = cluster_id, "resuming cluster");

    let options = RunOptions {
        provider: provider.to_string(),
        isolation: isolation_of(docker, worktree),
        workdir: std::env::current_dir()?,
        open_pr: false,
    };

    let outcome = boot(config, descriptor, settings, ledger, options, |orch| {
        Box::pin(orch.resume())
    })?;

    println!(
        "\nCluster {} {}",
        outcome.cluster_id,
        if outcome.completed {
            "completed"
        } else {
            "interrupted"
        }
    );
    output::print_usage(&outcome.usage);
    if !outcome.completed {
        bail!("cluster did not complete");
    }
    Ok(())
}

fn isolation_of(docker: bool, worktree: bool) -> IsolationMode {
    if docker {
        IsolationMode::Docker
    } else if worktree {
        IsolationMode::Worktree
    } else {
        IsolationMode::None
    }
}

fn boot(
    config: ClusterConfig,
    descriptor: ClusterDescriptor,
    settings: Settings,
    ledger: Ledger,
    options: RunOptions,
    drive: impl FnOnce(
        Orchestrator,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = agmesh_runtime::Result<agmesh_runtime::RunOutcome>>,
        >,
    >,
) -> Result<agmesh_runtime::RunOutcome> {
    let bus = Arc::new(MessageBus::new(Arc::new(ledger)));
    let cluster = Arc::new(ClusterHandle::new(descriptor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install the interrupt handler")?;

    let orchestrator = Orchestrator::new(
        config,
        bus,
        cluster,
        Arc::new(settings),
        options,
        shutdown_rx,
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(drive(orchestrator))?;
    Ok(outcome)
}
