use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolve the workspace data directory path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. AGMESH_PATH environment variable (with tilde expansion)
/// 3. XDG data directory (recommended default)
/// 4. ~/.agmesh (fallback for systems without XDG)
pub fn resolve_workspace_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("AGMESH_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("agmesh"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".agmesh"));
    }

    Err(Error::Config(
        "Could not determine workspace path: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

fn default_liveness_interval() -> u64 {
    30_000
}

fn default_readiness_retries() -> u32 {
    30
}

fn default_readiness_delay() -> u64 {
    1_000
}

/// Runtime settings, persisted as TOML in the workspace directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Legacy model clamp: lowest of the claude aliases an agent may run.
    #[serde(default)]
    pub min_model: Option<String>,
    /// Legacy model clamp: highest of the claude aliases an agent may run.
    #[serde(default)]
    pub max_model: Option<String>,
    /// Image used for docker-isolated tasks.
    #[serde(default)]
    pub docker_image: Option<String>,
    /// Kill a task when the liveness watchdog declares it stale.
    #[serde(default)]
    pub kill_on_stale: bool,
    /// Liveness sampling interval in milliseconds.
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_ms: u64,
    /// How many times to poll for task registration before a spawn counts
    /// as failed.
    #[serde(default = "default_readiness_retries")]
    pub readiness_retries: u32,
    /// Delay between registration polls in milliseconds.
    #[serde(default = "default_readiness_delay")]
    pub readiness_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_model: None,
            max_model: None,
            docker_image: None,
            kill_on_stale: false,
            liveness_interval_ms: default_liveness_interval(),
            readiness_retries: default_readiness_retries(),
            readiness_delay_ms: default_readiness_delay(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("settings.toml"))
    }

    /// Directory holding one cluster's ledger and config snapshot.
    pub fn cluster_dir(data_dir: &PathBuf, cluster_id: &str) -> PathBuf {
        data_dir.join("clusters").join(cluster_id)
    }
}
