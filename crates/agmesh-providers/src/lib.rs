mod claude;
mod codex;
mod error;
mod extract;
mod gemini;
mod models;
mod stream;
mod traits;

pub use claude::Claude;
pub use codex::Codex;
pub use error::{Error, Result};
pub use extract::OutputCollector;
pub use gemini::Gemini;
pub use models::{ModelLevel, ReasoningEffort, SchemaSupport, legacy_rank};
pub use stream::{StreamEvent, StreamRecord, parse_line, usage_of};
pub use traits::{LaunchPlan, LaunchRequest, Provider, provider_for, provider_names};
