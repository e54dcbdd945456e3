use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provider-independent capability tier. Each provider maps levels onto
/// its own catalog; levels are ordered so min/max clamps compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelLevel {
    Light,
    Standard,
    Max,
}

impl ModelLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelLevel::Light => "light",
            ModelLevel::Standard => "standard",
            ModelLevel::Max => "max",
        }
    }

    pub fn clamp_to(self, min: Option<ModelLevel>, max: Option<ModelLevel>) -> ModelLevel {
        let mut level = self;
        if let Some(min) = min
            && level < min
        {
            level = min;
        }
        if let Some(max) = max
            && level > max
        {
            level = max;
        }
        level
    }
}

impl FromStr for ModelLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light" => Ok(ModelLevel::Light),
            "standard" => Ok(ModelLevel::Standard),
            "max" => Ok(ModelLevel::Max),
            other => Err(Error::UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for ModelLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasoning effort knob, honored only by providers that accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(Error::InvalidEffort(other.to_string())),
        }
    }
}

/// How well a provider honors a configured output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSupport {
    Full,
    Experimental,
}

/// Rank of the legacy claude aliases, used for the settings-level model
/// clamp. `None` for anything that is not one of the three aliases.
pub fn legacy_rank(model: &str) -> Option<u8> {
    match model {
        "haiku" => Some(0),
        "sonnet" => Some(1),
        "opus" => Some(2),
        _ => None,
    }
}
