use serde::Serialize;
use std::fmt;

/// The analysis phase a finding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Structure,
    Flow,
    Agents,
    Scripts,
    Templates,
    Hooks,
    Coverage,
    Cycles,
    Semantics,
    ProviderFeatures,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Phase::Structure => 1,
            Phase::Flow => 2,
            Phase::Agents => 3,
            Phase::Scripts => 4,
            Phase::Templates => 5,
            Phase::Hooks => 6,
            Phase::Coverage => 7,
            Phase::Cycles => 8,
            Phase::Semantics => 9,
            Phase::ProviderFeatures => 10,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Structure => "structure",
            Phase::Flow => "flow",
            Phase::Agents => "agents",
            Phase::Scripts => "scripts",
            Phase::Templates => "templates",
            Phase::Hooks => "hooks",
            Phase::Coverage => "coverage",
            Phase::Cycles => "cycles",
            Phase::Semantics => "semantics",
            Phase::ProviderFeatures => "provider-features",
        };
        write!(f, "{}", name)
    }
}

/// One error or warning from the analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.agent {
            Some(agent) => write!(f, "[{}] {}: {}", self.phase, agent, self.message),
            None => write!(f, "[{}] {}", self.phase, self.message),
        }
    }
}

/// Accumulated result of all phases. The config is usable iff `errors`
/// is empty; warnings never block a boot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, phase: Phase, agent: Option<&str>, message: impl Into<String>) {
        self.errors.push(Finding {
            phase,
            agent: agent.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, phase: Phase, agent: Option<&str>, message: impl Into<String>) {
        self.warnings.push(Finding {
            phase,
            agent: agent.map(str::to_string),
            message: message.into(),
        });
    }

    /// Errors raised by one phase (mainly for tests).
    pub fn errors_in(&self, phase: Phase) -> Vec<&Finding> {
        self.errors.iter().filter(|f| f.phase == phase).collect()
    }

    pub fn warnings_in(&self, phase: Phase) -> Vec<&Finding> {
        self.warnings.iter().filter(|f| f.phase == phase).collect()
    }
}
