use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cluster::ClusterConfig;

/// Agent role. An open string set; a handful of values get dedicated
/// behavior in the runtime and the validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub const IMPLEMENTATION: &'static str = "implementation";
    pub const VALIDATOR: &'static str = "validator";
    pub const CONDUCTOR: &'static str = "conductor";
    pub const COMPLETION_DETECTOR: &'static str = "completion-detector";
    pub const ORCHESTRATOR: &'static str = "orchestrator";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_validator(&self) -> bool {
        self.0 == Self::VALIDATOR
    }

    pub fn is_conductor(&self) -> bool {
        self.0 == Self::CONDUCTOR
    }

    pub fn is_orchestrator(&self) -> bool {
        self.0 == Self::ORCHESTRATOR
    }

    pub fn is_completion_detector(&self) -> bool {
        self.0 == Self::COMPLETION_DETECTOR
    }

    /// Roles that produce work products validators look at.
    pub fn is_worker(&self) -> bool {
        self.0 == Self::IMPLEMENTATION
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Script engine selector. Only JavaScript is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEngine {
    #[default]
    Javascript,
}

/// A sandboxed script attached to a trigger or hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicSpec {
    #[serde(default)]
    pub engine: ScriptEngine,
    pub script: String,
}

/// What a matched trigger does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    ExecuteTask,
    StopCluster,
}

/// Rule deciding whether an incoming message starts an execution cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub action: TriggerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<LogicSpec>,
    /// Per-trigger override of the agent-level completion hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<HookConfig>,
}

/// What a hook does when its lifecycle event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    PublishMessage,
    StopCluster,
}

/// Declarative reaction on `onComplete`/`onFailure`/`onTimeout`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    pub action: HookAction,
    /// Message template with `{{...}}` placeholders (publish_message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Script whose return value is the outgoing message (publish_message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Script producing config overrides, deep-merged into `config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<LogicSpec>,
}

/// Lifecycle hook table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<HookConfig>,
}

impl Hooks {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &HookConfig)> {
        [
            ("onComplete", self.on_complete.as_ref()),
            ("onFailure", self.on_failure.as_ref()),
            ("onTimeout", self.on_timeout.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, hook)| hook.map(|h| (name, h)))
    }
}

/// One entry of the declarative context recipe. `since` is one of
/// `cluster_start`, `last_task_end`, `last_agent_start`, or an ISO
/// timestamp; anything else is rejected when the context is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Ordered context recipe plus the legacy character budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub sources: Vec<ContextSource>,
}

/// Iteration-scoped model selection rule. The `iterations` pattern string
/// is validated by the config analyzer and parsed at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRule {
    pub iterations: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Iteration-scoped prompt rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRule {
    pub iterations: String,
    pub prompt: String,
}

/// Prompt policy: a static string, an initial/subsequent pair, or an
/// ordered rule list (first match wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptSpec {
    Static(String),
    Phased { initial: String, subsequent: String },
    Rules(Vec<PromptRule>),
}

impl PromptSpec {
    /// Select the prompt for an iteration. `None` means no rule matched,
    /// which callers treat as an error.
    pub fn select(&self, iteration: u32) -> Option<&str> {
        match self {
            PromptSpec::Static(s) => Some(s),
            PromptSpec::Phased {
                initial,
                subsequent,
            } => Some(if iteration <= 1 { initial } else { subsequent }),
            PromptSpec::Rules(rules) => rules
                .iter()
                .find(|r| {
                    r.iterations
                        .parse::<crate::IterationPattern>()
                        .map(|p| p.matches(iteration))
                        .unwrap_or(false)
                })
                .map(|r| r.prompt.as_str()),
        }
    }

    /// Every prompt text carried by this spec (for static analysis).
    pub fn texts(&self) -> Vec<&str> {
        match self {
            PromptSpec::Static(s) => vec![s],
            PromptSpec::Phased {
                initial,
                subsequent,
            } => vec![initial, subsequent],
            PromptSpec::Rules(rules) => rules.iter().map(|r| r.prompt.as_str()).collect(),
        }
    }
}

/// Structured-output mode for the child task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    #[default]
    Json,
    StreamJson,
}

/// Where the child task runs relative to the working tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    #[default]
    None,
    Docker,
    Worktree,
}

impl IsolationMode {
    pub fn is_isolated(&self) -> bool {
        !matches!(self, IsolationMode::None)
    }
}

fn default_max_iterations() -> u32 {
    100
}

fn default_stale_duration() -> u64 {
    30 * 60 * 1000
}

fn default_true() -> bool {
    true
}

/// Declarative agent definition, validated at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default, alias = "contextStrategy")]
    pub context: ContextStrategy,
    /// Provider override; the run-level provider applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_rules: Vec<ModelRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptSpec>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock limit per execution in milliseconds; 0 disables it.
    #[serde(default)]
    pub timeout: u64,
    /// How long all liveness indicators must stay inactive before the
    /// task counts as stale, in milliseconds.
    #[serde(default = "default_stale_duration")]
    pub stale_duration: u64,
    #[serde(default = "default_true")]
    pub enable_liveness_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationMode>,
    /// Nested sub-cluster definition (conductor templates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Box<ClusterConfig>>,
}

impl AgentConfig {
    /// The effective output schema: the configured one, or the default
    /// requiring `{summary, result}`.
    pub fn effective_schema(&self) -> Value {
        self.json_schema
            .clone()
            .unwrap_or_else(default_output_schema)
    }

    /// First trigger matching the message's topic and (optional) sender.
    pub fn find_trigger(&self, topic: &str, sender: &str) -> Option<&TriggerConfig> {
        self.triggers.iter().find(|t| {
            t.topic == topic && t.sender.as_deref().is_none_or(|s| s == sender)
        })
    }
}

/// Schema enforced when `outputFormat = json` and no schema is configured.
pub fn default_output_schema() -> Value {
    json!({
        "type": "object",
        "required": ["summary", "result"],
        "properties": {
            "summary": { "type": "string", "description": "One-paragraph summary of what was done" },
            "result": { "type": "string", "description": "Outcome of the task" }
        }
    })
}
