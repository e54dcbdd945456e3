use crate::{Error, Result};
use serde_json::Value;

/// Validate a parsed task result against the agent's output schema.
/// Collects every violation into one error message.
pub fn validate_output(schema: &Value, instance: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|err| Error::Schema(format!("invalid schema: {}", err)))?;

    let violations: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Schema(violations.join("; ")))
    }
}
