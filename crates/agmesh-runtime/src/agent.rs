use crate::cluster::ClusterHandle;
use crate::context::{ContextRequest, build_context};
use crate::executor::{ExecOptions, ExecutionRecord, run_task};
use crate::hooks::{HookContext, HookEffect, execute_hook};
use crate::liveness::LivenessSpec;
use crate::model::resolve_model;
use crate::schema::validate_output;
use crate::settings::Settings;
use crate::{Error, Result};
use agmesh_ledger::{MessageBus, Publisher, Subscription, SubscriptionFilter};
use agmesh_logic::{AgentEnv, ClusterEnv, ScriptEnv, evaluate_trigger};
use agmesh_providers::{LaunchPlan, LaunchRequest, ModelLevel, Provider};
use agmesh_types::{
    AgentConfig, HookConfig, IsolationMode, Message, MessageContent, MessageDraft, MessageFilter,
    OutputFormat, SenderIdentity, TriggerAction, TriggerConfig, now_ms, topic,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Evaluating,
    BuildingContext,
    Executing,
    Stopped,
    Error,
}

/// Everything needed to boot one agent into the cluster.
pub struct SpawnSpec {
    pub config: AgentConfig,
    pub provider: &'static dyn Provider,
    pub bus: Arc<MessageBus>,
    pub cluster: Arc<ClusterHandle>,
    pub settings: Arc<Settings>,
    pub workdir: PathBuf,
    /// Run-level isolation; an agent-level `isolation` wins over it.
    pub isolation: IsolationMode,
    pub docker_mounts: Vec<String>,
    pub initial_iteration: u32,
    /// Replaces the provider launch plan. Dry runs and tests point this
    /// at a stub command; the context still arrives on stdin.
    pub launch_override: Option<LaunchPlan>,
}

enum AgentCommand {
    Stop,
    Resume { note: Option<String> },
}

struct AgentShared {
    state: Mutex<AgentState>,
    iteration: AtomicU32,
}

/// Handle held by the orchestrator.
pub struct AgentHandle {
    pub id: String,
    control: mpsc::UnboundedSender<AgentCommand>,
    shared: Arc<AgentShared>,
    join: JoinHandle<()>,
}

impl AgentHandle {
    pub fn state(&self) -> AgentState {
        *self.shared.state.lock().unwrap()
    }

    pub fn iteration(&self) -> u32 {
        self.shared.iteration.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        let _ = self.control.send(AgentCommand::Stop);
    }

    /// Trigger one manual cycle; only honored while the agent is idle.
    pub fn resume(&self, note: Option<String>) {
        let _ = self.control.send(AgentCommand::Resume { note });
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

enum Flow {
    Continue,
    Shutdown,
}

/// One agent's event loop: a single task owning all of the agent's
/// mutable state, fed by its bus subscription and a control channel.
pub struct AgentWorker {
    config: AgentConfig,
    provider: &'static dyn Provider,
    bus: Arc<MessageBus>,
    cluster: Arc<ClusterHandle>,
    settings: Arc<Settings>,
    workdir: PathBuf,
    isolation: IsolationMode,
    docker_mounts: Vec<String>,
    launch_override: Option<LaunchPlan>,
    publisher: Publisher,
    shared: Arc<AgentShared>,
    iteration: u32,
    last_task_end: Option<i64>,
    last_agent_start: Option<i64>,
    exhausted_notified: bool,
}

impl AgentWorker {
    /// Subscribe, transition to idle, and start the event loop.
    pub fn spawn(spec: SpawnSpec) -> AgentHandle {
        let subscription = spec
            .bus
            .subscribe(SubscriptionFilter::cluster(spec.cluster.id()));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let isolation = spec.config.isolation.unwrap_or(spec.isolation);
        let initial_model = spec.provider.model_for_level(ModelLevel::Standard);
        let publisher = Publisher::new(
            spec.bus.clone(),
            spec.cluster.id(),
            SenderIdentity::agent(
                spec.config.id.clone(),
                spec.config.role.as_str(),
                initial_model,
                spec.provider.id(),
            ),
        );

        let shared = Arc::new(AgentShared {
            state: Mutex::new(AgentState::Idle),
            iteration: AtomicU32::new(spec.initial_iteration),
        });

        let worker = AgentWorker {
            publisher,
            shared: shared.clone(),
            iteration: spec.initial_iteration,
            last_task_end: None,
            last_agent_start: None,
            exhausted_notified: false,
            config: spec.config,
            provider: spec.provider,
            bus: spec.bus,
            cluster: spec.cluster,
            settings: spec.settings,
            workdir: spec.workdir,
            isolation,
            docker_mounts: spec.docker_mounts,
            launch_override: spec.launch_override,
        };

        let id = worker.config.id.clone();
        let join = tokio::spawn(worker.run(subscription, control_rx));

        AgentHandle {
            id,
            control: control_tx,
            shared,
            join,
        }
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut control: mpsc::UnboundedReceiver<AgentCommand>,
    ) {
        info!(agent = %self.config.id, "agent started");
        loop {
            tokio::select! {
                command = control.recv() => match command {
                    None | Some(AgentCommand::Stop) => break,
                    Some(AgentCommand::Resume { note }) => {
                        if self.state() != AgentState::Idle {
                            warn!(agent = %self.config.id, "resume ignored: agent is not idle");
                            continue;
                        }
                        match self.synthesize_resume(note) {
                            Ok(message) => {
                                if let Flow::Shutdown = self.execute_cycle(None, message).await {
                                    break;
                                }
                            }
                            Err(err) => warn!(agent = %self.config.id, %err, "resume failed"),
                        }
                    }
                },
                message = subscription.recv() => match message {
                    Some(message) => {
                        let flow = self.handle_message(message).await;
                        // Anything delivered while we were busy is dropped;
                        // it stays on the ledger for context assembly.
                        while subscription.try_recv().is_some() {}
                        if let Flow::Shutdown = flow {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        self.set_state(AgentState::Stopped);
        info!(agent = %self.config.id, "agent stopped");
    }

    async fn handle_message(&mut self, message: Message) -> Flow {
        if !message.addressed_to(&self.config.id) {
            return Flow::Continue;
        }

        self.set_state(AgentState::Evaluating);

        let Some(trigger) = self
            .config
            .find_trigger(&message.topic, &message.sender)
            .cloned()
        else {
            self.set_state(AgentState::Idle);
            return Flow::Continue;
        };

        if let Some(logic) = &trigger.logic {
            let env = self.script_env(Some(message.clone()));
            let script = logic.script.clone();
            let fired = tokio::task::spawn_blocking(move || evaluate_trigger(&script, &env))
                .await
                .unwrap_or(false);
            if !fired {
                debug!(agent = %self.config.id, topic = %message.topic, "trigger declined");
                self.set_state(AgentState::Idle);
                return Flow::Continue;
            }
        }

        match trigger.action {
            TriggerAction::StopCluster => {
                info!(agent = %self.config.id, "stop_cluster trigger fired");
                let _ = self.publisher.publish(MessageDraft::new(
                    topic::CLUSTER_COMPLETE,
                    MessageContent::text(format!("cluster completed by {}", self.config.id)),
                ));
                Flow::Shutdown
            }
            TriggerAction::ExecuteTask => self.execute_cycle(Some(&trigger), message).await,
        }
    }

    /// One execution cycle: context, child task, hooks.
    async fn execute_cycle(&mut self, trigger: Option<&TriggerConfig>, message: Message) -> Flow {
        if self.iteration >= self.config.max_iterations {
            if !self.exhausted_notified {
                self.exhausted_notified = true;
                warn!(agent = %self.config.id, "iteration limit reached");
                let _ = self.publisher.publish(MessageDraft::new(
                    topic::AGENT_EXHAUSTED,
                    MessageContent::data(json!({
                        "agent": self.config.id,
                        "max_iterations": self.config.max_iterations,
                    })),
                ));
            }
            self.set_state(AgentState::Idle);
            return Flow::Continue;
        }

        self.set_state(AgentState::BuildingContext);
        self.last_agent_start = Some(now_ms());
        let cycle = self.iteration + 1;

        let prepared = self.prepare_cycle(cycle, &message);
        let (context, plan, exec_options) = match prepared {
            Ok(parts) => parts,
            Err(err) => {
                let hook = self.config.hooks.on_failure.clone();
                let flow = self.fail_cycle(hook, err.to_string(), &message, None).await;
                if let Flow::Continue = flow {
                    self.set_state(AgentState::Idle);
                }
                return flow;
            }
        };

        // The iteration counter moves only on entry to executing.
        self.set_state(AgentState::Executing);
        self.iteration = cycle;
        self.shared.iteration.store(cycle, Ordering::Relaxed);
        let _ = self.publisher.publish(MessageDraft::new(
            topic::AGENT_LIFECYCLE,
            MessageContent::data(json!({
                "event": "task_started",
                "agent": self.config.id,
                "iteration": cycle,
            })),
        ));

        let outcome = run_task(&plan, &context, cycle, &self.publisher, &exec_options).await;
        self.last_task_end = Some(now_ms());

        let flow = match outcome {
            Err(err) => {
                let hook = self.config.hooks.on_failure.clone();
                self.fail_cycle(hook, err.to_string(), &message, None).await
            }
            Ok(record) => self.finish_cycle(trigger, record, &message).await,
        };

        if let Flow::Continue = flow {
            self.set_state(AgentState::Idle);
        }
        flow
    }

    /// Resolve prompt, model, context and launch plan for a cycle.
    fn prepare_cycle(
        &mut self,
        cycle: u32,
        message: &Message,
    ) -> Result<(String, LaunchPlan, ExecOptions)> {
        let prompt = self
            .config
            .prompt
            .as_ref()
            .ok_or_else(|| Error::Context("agent has no prompt configured".to_string()))?
            .select(cycle)
            .ok_or_else(|| {
                Error::Context(format!("no prompt rule matches iteration {}", cycle))
            })?
            .to_string();

        let resolved = resolve_model(&self.config, self.provider, cycle, &self.settings)?;
        self.publisher
            .set_model(resolved.model.clone(), self.provider.id());

        let request = ContextRequest {
            agent: &self.config,
            iteration: cycle,
            cluster: self.cluster.descriptor(),
            last_task_end: self.last_task_end,
            last_agent_start: self.last_agent_start,
            triggering: message,
            prompt: &prompt,
            isolation: self.isolation,
        };
        let context = build_context(&request, self.bus.ledger())?;

        let workdir = self.effective_workdir()?;
        let plan = match &self.launch_override {
            Some(plan) => {
                let mut plan = plan.clone();
                plan.workdir = workdir;
                plan
            }
            None => self.provider.build_launch(&LaunchRequest {
                model: resolved.model,
                reasoning_effort: resolved.reasoning_effort,
                isolation: self.isolation,
                workdir,
                docker_image: self.settings.docker_image.clone(),
                docker_mounts: self.docker_mounts.clone(),
            }),
        };

        let exec_options = ExecOptions {
            timeout_ms: self.config.timeout,
            readiness_retries: self.settings.readiness_retries,
            readiness_delay: Duration::from_millis(self.settings.readiness_delay_ms),
            terminal_carries_result: self.provider.terminal_carries_result(),
            liveness: self.config.enable_liveness_check.then(|| LivenessSpec {
                interval: Duration::from_millis(self.settings.liveness_interval_ms),
                stale_after: Duration::from_millis(self.config.stale_duration),
                kill_on_stale: self.settings.kill_on_stale,
            }),
        };

        Ok((context, plan, exec_options))
    }

    fn effective_workdir(&self) -> Result<PathBuf> {
        match self.isolation {
            IsolationMode::Worktree => {
                let dir = self
                    .workdir
                    .join(".agmesh")
                    .join("worktrees")
                    .join(&self.config.id);
                std::fs::create_dir_all(&dir)?;
                Ok(dir)
            }
            IsolationMode::None | IsolationMode::Docker => Ok(self.workdir.clone()),
        }
    }

    /// Wrap up a finished execution: schema enforcement, then the
    /// matching lifecycle hook.
    async fn finish_cycle(
        &mut self,
        trigger: Option<&TriggerConfig>,
        mut record: ExecutionRecord,
        message: &Message,
    ) -> Flow {
        if record.success
            && self.config.output_format == OutputFormat::Json
            && let Some(parsed) = &record.parsed
            && let Err(err) = validate_output(&self.config.effective_schema(), parsed)
        {
            if self.config.role.is_validator() {
                // A validator's verdict is only as good as its shape.
                record.success = false;
                record.error = Some(err.to_string());
            } else {
                warn!(agent = %self.config.id, %err, "output violates schema; continuing");
                let _ = self.publisher.publish(MessageDraft::new(
                    topic::AGENT_LIFECYCLE,
                    MessageContent::data(json!({
                        "event": "schema_warning",
                        "agent": self.config.id,
                        "iteration": record.iteration,
                        "error": err.to_string(),
                    })),
                ));
            }
        }

        if record.timed_out {
            let hook = self
                .config
                .hooks
                .on_timeout
                .clone()
                .or_else(|| self.config.hooks.on_failure.clone());
            let error = record.error.clone();
            return self
                .fail_cycle(hook, error.unwrap_or_default(), message, Some(&record))
                .await;
        }

        if !record.success {
            let hook = self.config.hooks.on_failure.clone();
            let error = record.error.clone().unwrap_or_default();
            return self.fail_cycle(hook, error, message, Some(&record)).await;
        }

        let hook = trigger
            .and_then(|t| t.on_complete.clone())
            .or_else(|| self.config.hooks.on_complete.clone());
        if let Some(hook) = hook {
            match self.apply_hook(hook, Some(&record), None, message).await {
                Ok(flow) => return flow,
                Err(err) => {
                    // Hook failure marks the whole cycle failed.
                    let on_failure = self.config.hooks.on_failure.clone();
                    return self
                        .fail_cycle(on_failure, err.to_string(), message, Some(&record))
                        .await;
                }
            }
        }
        Flow::Continue
    }

    /// Publish AGENT_ERROR (with the task-log tail when available) and
    /// run the failure hook.
    async fn fail_cycle(
        &mut self,
        hook: Option<HookConfig>,
        error: String,
        message: &Message,
        record: Option<&ExecutionRecord>,
    ) -> Flow {
        warn!(agent = %self.config.id, %error, "cycle failed");
        let mut data = json!({
            "agent": self.config.id,
            "iteration": self.iteration,
            "error": error,
        });
        if let Some(record) = record {
            data["task_id"] = json!(record.task_id);
            data["log_tail"] = json!(record.log_tail);
        }
        let _ = self.publisher.publish(MessageDraft::new(
            topic::AGENT_ERROR,
            MessageContent::data(data),
        ));

        if let Some(hook) = hook {
            match self
                .apply_hook(hook, record, Some(error), message)
                .await
            {
                Ok(Flow::Shutdown) => return Flow::Shutdown,
                Ok(Flow::Continue) => {}
                Err(err) => {
                    warn!(agent = %self.config.id, %err, "failure hook itself failed");
                }
            }
        }
        Flow::Continue
    }

    async fn apply_hook(
        &mut self,
        hook: HookConfig,
        record: Option<&ExecutionRecord>,
        error_message: Option<String>,
        message: &Message,
    ) -> Result<Flow> {
        let env = self.script_env(Some(message.clone()));
        let cluster = self.cluster.descriptor().clone();
        let iteration = self.iteration;
        let raw_output = record.map(|r| r.output.clone()).unwrap_or_default();
        let parsed = record.and_then(|r| r.parsed.clone());

        let effect = tokio::task::spawn_blocking(move || {
            let ctx = HookContext {
                env: &env,
                cluster: &cluster,
                iteration,
                error_message: error_message.as_deref(),
                raw_output: &raw_output,
                result: parsed.as_ref(),
            };
            execute_hook(&hook, &ctx)
        })
        .await
        .map_err(|e| Error::Hook(format!("hook task failed: {}", e)))??;

        match effect {
            HookEffect::Publish(draft) => {
                self.publisher.publish(draft)?;
                Ok(Flow::Continue)
            }
            HookEffect::StopCluster => {
                let _ = self.publisher.publish(MessageDraft::new(
                    topic::CLUSTER_COMPLETE,
                    MessageContent::text(format!("cluster completed by {}", self.config.id)),
                ));
                Ok(Flow::Shutdown)
            }
        }
    }

    fn synthesize_resume(&self, note: Option<String>) -> Result<Message> {
        let content = match note {
            Some(text) => MessageContent::text(text),
            None => MessageContent::text("manual resume"),
        };
        let message = self
            .publisher
            .publish(MessageDraft::new(topic::AGENT_RESUME, content).to(self.config.id.clone()))?;
        Ok(message)
    }

    fn script_env(&self, message: Option<Message>) -> ScriptEnv {
        let messages = self
            .bus
            .ledger()
            .query(&MessageFilter::cluster(self.cluster.id()))
            .unwrap_or_default();
        ScriptEnv::new(
            ClusterEnv {
                id: self.cluster.id().to_string(),
                created_at: self.cluster.created_at(),
            },
            self.cluster.roster(),
            AgentEnv {
                id: self.config.id.clone(),
                role: self.config.role.as_str().to_string(),
                iteration: self.iteration,
                cluster_id: self.cluster.id().to_string(),
            },
            message,
            messages,
        )
    }

    fn state(&self) -> AgentState {
        *self.shared.state.lock().unwrap()
    }

    fn set_state(&self, state: AgentState) {
        *self.shared.state.lock().unwrap() = state;
    }
}
