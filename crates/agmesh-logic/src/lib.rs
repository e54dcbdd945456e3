mod env;
mod error;
mod host;
mod prelude;

pub use env::{AgentEnv, ClusterEnv, RosterEntry, ScriptEnv};
pub use error::{Error, Result};
pub use host::{
    HOOK_LOGIC_TIMEOUT, TRANSFORM_TIMEOUT, TRIGGER_TIMEOUT, check_syntax, evaluate_hook_logic,
    evaluate_transform, evaluate_trigger,
};
