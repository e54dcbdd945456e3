mod util;

pub mod cluster;
pub mod config;
pub mod iteration;
pub mod message;
pub mod topic;

pub use cluster::{ClusterConfig, ClusterDescriptor, DockerConfig, InputData, LoadConfig};
pub use config::{
    AgentConfig, ContextSource, ContextStrategy, HookAction, HookConfig, Hooks, IsolationMode,
    LogicSpec, ModelRule, OutputFormat, PromptRule, PromptSpec, Role, ScriptEngine, TriggerAction,
    TriggerConfig, default_output_schema,
};
pub use iteration::IterationPattern;
pub use message::{
    Message, MessageContent, MessageDraft, MessageFilter, SenderIdentity, TokenUsage,
};
pub use util::{now_ms, parse_iso_ms, to_iso};
