mod error;
mod loader;
mod report;
pub mod validate;

pub use error::{Error, Result};
pub use loader::{load_config, parse_config};
pub use report::{Finding, Phase, ValidationReport};
pub use validate::validate;
