use crate::agent::{AgentHandle, AgentWorker, SpawnSpec};
use crate::cluster::ClusterHandle;
use crate::settings::Settings;
use crate::{Error, Result};
use agmesh_ledger::{MessageBus, Publisher, Subscription, SubscriptionFilter};
use agmesh_providers::provider_for;
use agmesh_types::{
    AgentConfig, ClusterConfig, InputData, IsolationMode, Message, MessageContent, MessageDraft,
    MessageFilter, SenderIdentity, topic,
};
use agmesh_ledger::TokenUsageReport;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Run-level choices made on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub provider: String,
    pub isolation: IsolationMode,
    pub workdir: PathBuf,
    pub open_pr: bool,
}

/// What a finished (or interrupted) cluster run looked like.
#[derive(Debug)]
pub struct RunOutcome {
    pub cluster_id: String,
    pub completed: bool,
    pub usage: TokenUsageReport,
}

/// Boots every agent, seeds the ledger, and consumes control topics
/// until the cluster completes or the operator interrupts it.
pub struct Orchestrator {
    config: ClusterConfig,
    bus: Arc<MessageBus>,
    cluster: Arc<ClusterHandle>,
    settings: Arc<Settings>,
    options: RunOptions,
    agents: HashMap<String, AgentHandle>,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        config: ClusterConfig,
        bus: Arc<MessageBus>,
        cluster: Arc<ClusterHandle>,
        settings: Arc<Settings>,
        options: RunOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            bus,
            cluster,
            settings,
            options,
            agents: HashMap::new(),
            shutdown,
        }
    }

    fn system_publisher(&self) -> Publisher {
        Publisher::new(
            self.bus.clone(),
            self.cluster.id(),
            SenderIdentity::system(),
        )
    }

    /// Fresh run: boot agents, publish the issue, loop until done.
    pub async fn run(mut self, input: InputData) -> Result<RunOutcome> {
        let subscription = self
            .bus
            .subscribe(SubscriptionFilter::cluster(self.cluster.id()));

        self.boot_agents(false)?;

        let text = format!("{}\n\n{}", input.title, input.body);
        let data = json!({
            "issue": input,
            "open_pr": self.options.open_pr,
        });
        self.system_publisher().publish(MessageDraft::new(
            topic::ISSUE_OPENED,
            MessageContent::text_and_data(text, data),
        ))?;

        self.control_loop(subscription).await
    }

    /// Resume an existing cluster: rebuild iteration counters from the
    /// ledger, then announce the resumption.
    pub async fn resume(mut self) -> Result<RunOutcome> {
        let subscription = self
            .bus
            .subscribe(SubscriptionFilter::cluster(self.cluster.id()));

        self.boot_agents(true)?;
        self.system_publisher().publish(MessageDraft::new(
            topic::CLUSTER_RESUMED,
            MessageContent::text("cluster resumed"),
        ))?;

        self.control_loop(subscription).await
    }

    fn boot_agents(&mut self, restore_iterations: bool) -> Result<()> {
        for agent in self.config.agents.clone() {
            let initial = if restore_iterations {
                self.iterations_from_history(&agent.id)?
            } else {
                0
            };
            self.spawn_agent(agent, initial)?;
        }
        Ok(())
    }

    fn spawn_agent(&mut self, config: AgentConfig, initial_iteration: u32) -> Result<()> {
        let provider_name = config
            .provider
            .clone()
            .unwrap_or_else(|| self.options.provider.clone());
        let provider = provider_for(&provider_name)?;

        self.cluster.add_agent(&config.id, config.role.as_str());
        let id = config.id.clone();
        info!(agent = %id, provider = provider_name, "booting agent");

        let handle = AgentWorker::spawn(SpawnSpec {
            config,
            provider,
            bus: self.bus.clone(),
            cluster: self.cluster.clone(),
            settings: self.settings.clone(),
            workdir: self.options.workdir.clone(),
            isolation: self.options.isolation,
            docker_mounts: self
                .config
                .docker
                .as_ref()
                .map(|d| d.mounts.clone())
                .unwrap_or_default(),
            initial_iteration,
            launch_override: None,
        });
        self.agents.insert(id, handle);
        Ok(())
    }

    /// Completed execution cycles recorded for an agent in this cluster.
    fn iterations_from_history(&self, agent_id: &str) -> Result<u32> {
        let lifecycle = self.bus.ledger().query(
            &MessageFilter::cluster(self.cluster.id())
                .topic(topic::AGENT_LIFECYCLE)
                .sender(agent_id),
        )?;
        let count = lifecycle
            .iter()
            .filter(|m| {
                m.content
                    .data
                    .as_ref()
                    .and_then(|d| d.get("event"))
                    .and_then(Value::as_str)
                    == Some("task_started")
            })
            .count();
        Ok(count as u32)
    }

    async fn control_loop(mut self, mut subscription: Subscription) -> Result<RunOutcome> {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                message = subscription.recv() => match message {
                    Some(message) => match message.topic.as_str() {
                        topic::CLUSTER_COMPLETE => {
                            info!(cluster = %self.cluster.id(), "cluster complete");
                            return self.finish(true).await;
                        }
                        topic::CLUSTER_OPERATIONS => self.apply_operations(&message),
                        topic::AGENT_ERROR => {
                            warn!(
                                sender = %message.sender,
                                error = ?message.content.data.as_ref().and_then(|d| d.get("error")),
                                "agent reported an error"
                            );
                        }
                        _ => {}
                    },
                    None => {
                        return Err(Error::InvalidOperation(
                            "bus closed while the cluster was running".to_string(),
                        ));
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested");
                        return self.finish(false).await;
                    }
                },
            }
        }
    }

    /// Dynamic roster changes submitted by a conductor.
    fn apply_operations(&mut self, message: &Message) {
        let Some(operations) = message
            .content
            .data
            .as_ref()
            .and_then(|d| d.get("operations"))
            .and_then(Value::as_array)
        else {
            warn!("CLUSTER_OPERATIONS message without operations array");
            return;
        };

        for operation in operations {
            match operation.get("action").and_then(Value::as_str) {
                Some("spawn_agent") => {
                    match operation
                        .get("agent")
                        .cloned()
                        .ok_or("missing agent")
                        .and_then(|v| {
                            serde_json::from_value::<AgentConfig>(v).map_err(|_| "bad agent config")
                        }) {
                        Ok(config) => {
                            if self.agents.contains_key(&config.id) {
                                warn!(agent = %config.id, "spawn_agent: id already active");
                            } else if let Err(err) = self.spawn_agent(config, 0) {
                                warn!(%err, "spawn_agent failed");
                            }
                        }
                        Err(err) => warn!(err, "spawn_agent operation rejected"),
                    }
                }
                Some("stop_agent") => {
                    if let Some(id) = operation.get("id").and_then(Value::as_str) {
                        if let Some(handle) = self.agents.remove(id) {
                            handle.stop();
                            self.cluster.remove_agent(id);
                            info!(agent = id, "agent stopped by operation");
                        } else {
                            warn!(agent = id, "stop_agent: no such agent");
                        }
                    }
                }
                Some("resume_agent") => {
                    if let Some(id) = operation.get("id").and_then(Value::as_str) {
                        let note = operation
                            .get("context")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        match self.agents.get(id) {
                            Some(handle) => handle.resume(note),
                            None => warn!(agent = id, "resume_agent: no such agent"),
                        }
                    }
                }
                other => warn!(?other, "unknown cluster operation"),
            }
        }
    }

    async fn finish(mut self, completed: bool) -> Result<RunOutcome> {
        for handle in self.agents.values() {
            handle.stop();
        }
        for (_, handle) in self.agents.drain() {
            handle.join().await;
        }
        let usage = self.bus.ledger().token_usage(self.cluster.id())?;
        Ok(RunOutcome {
            cluster_id: self.cluster.id().to_string(),
            completed,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmesh_ledger::Ledger;
    use agmesh_types::ClusterDescriptor;
    use std::time::Duration;

    fn setup(config: Value) -> (Orchestrator, watch::Sender<bool>, Arc<MessageBus>) {
        let config: ClusterConfig = serde_json::from_value(config).unwrap();
        let bus = Arc::new(MessageBus::new(Arc::new(Ledger::open_in_memory().unwrap())));
        let cluster = Arc::new(ClusterHandle::new(ClusterDescriptor::with_id("c1")));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            config,
            bus.clone(),
            cluster,
            Arc::new(Settings::default()),
            RunOptions {
                provider: "claude".to_string(),
                isolation: IsolationMode::None,
                workdir: std::env::temp_dir(),
                open_pr: false,
            },
            shutdown_rx,
        );
        (orchestrator, shutdown_tx, bus)
    }

    fn input() -> InputData {
        InputData {
            source: "inline".to_string(),
            reference: "ref".to_string(),
            title: "do the thing".to_string(),
            body: "in detail".to_string(),
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn test_run_completes_when_detector_fires() {
        let (orchestrator, _shutdown, _bus) = setup(json!({
            "agents": [
                { "id": "detector", "role": "completion-detector",
                  "triggers": [ { "topic": "ISSUE_OPENED", "action": "stop_cluster",
                      "logic": { "engine": "javascript", "script": "return true" } } ] }
            ]
        }));

        let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(input()))
            .await
            .expect("run timed out")
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.cluster_id, "c1");
    }

    #[tokio::test]
    async fn test_shutdown_signal_interrupts_run() {
        let (orchestrator, shutdown, _bus) = setup(json!({
            "agents": [
                { "id": "detector", "role": "completion-detector",
                  "triggers": [ { "topic": "NEVER_SENT", "action": "stop_cluster" } ] }
            ]
        }));

        let run = tokio::spawn(orchestrator.run(input()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("run timed out")
            .unwrap()
            .unwrap();
        assert!(!outcome.completed);
    }

    #[tokio::test]
    async fn test_dynamic_spawn_via_operations() {
        let (orchestrator, _shutdown, bus) = setup(json!({
            "agents": [
                { "id": "placeholder", "role": "implementation",
                  "triggers": [ { "topic": "NEVER_SENT", "action": "execute_task" } ] }
            ]
        }));

        let run = tokio::spawn(orchestrator.run(input()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A conductor-style operation list spawns a stopper agent.
        let conductor = SenderIdentity::agent("conductor", "conductor", "opus", "claude");
        bus.publish(
            "c1",
            &conductor,
            MessageDraft::new(
                topic::CLUSTER_OPERATIONS,
                MessageContent::data(json!({ "operations": [
                    { "action": "spawn_agent", "agent": {
                        "id": "stopper", "role": "completion-detector",
                        "triggers": [ { "topic": "PING", "action": "stop_cluster" } ]
                    } }
                ] })),
            ),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        bus.publish(
            "c1",
            &SenderIdentity::system(),
            MessageDraft::new("PING", MessageContent::text("go")),
        )
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("run timed out")
            .unwrap()
            .unwrap();
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn test_resume_restores_iteration_counts() {
        let (orchestrator, shutdown, bus) = setup(json!({
            "agents": [
                { "id": "worker", "role": "implementation", "maxIterations": 3,
                  "prompt": "work",
                  "triggers": [ { "topic": "NEVER_SENT", "action": "execute_task" } ] }
            ]
        }));

        // Pretend two cycles already ran in a previous process.
        let worker = SenderIdentity::agent("worker", "implementation", "sonnet", "claude");
        for iteration in 1..=2 {
            bus.publish(
                "c1",
                &worker,
                MessageDraft::new(
                    topic::AGENT_LIFECYCLE,
                    MessageContent::data(json!({ "event": "task_started", "iteration": iteration })),
                ),
            )
            .unwrap();
        }

        let run = tokio::spawn(orchestrator.resume());
        tokio::time::sleep(Duration::from_millis(300)).await;

        let resumed = bus
            .ledger()
            .count(&MessageFilter::cluster("c1").topic(topic::CLUSTER_RESUMED))
            .unwrap();
        assert_eq!(resumed, 1);

        shutdown.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("run timed out")
            .unwrap()
            .unwrap();
        assert!(!outcome.completed);
    }
}
