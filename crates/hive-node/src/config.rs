//! Node configuration, read from a TOML file.
//!
//! Every section is optional; a missing section or field takes its default.
//!
//! ```toml
//! log_level = "debug"
//!
//! [bus]
//! history_limit = 200
//!
//! [orchestrator]
//! default_timeout_ms = 5000
//!
//! [[workers]]
//! agent_id = "pricer-1"
//! agent_type = "pricing"
//! actions = ["quote"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use hive_bus::BusConfig;
use hive_orchestrator::OrchestratorConfig;
use hive_protocol::{
    AgentId, DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_LIMIT, DEFAULT_STEP_TIMEOUT_MS,
    DEFAULT_TASK_CHANNEL, ORCHESTRATOR_ID,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub bus: BusSection,
    pub orchestrator: OrchestratorSection,
    pub workers: Vec<WorkerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub history_limit: usize,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub task_channel: String,
    /// Applied to steps that do not set their own timeout.
    pub default_timeout_ms: u64,
}

/// An in-process agent answering step requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    pub agent_id: String,
    pub agent_type: String,
    /// Actions the worker accepts; empty accepts all.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bus: BusSection::default(),
            orchestrator: OrchestratorSection::default(),
            workers: Vec::new(),
        }
    }
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            task_channel: DEFAULT_TASK_CHANNEL.to_string(),
            default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
        }
    }
}

impl NodeConfig {
    /// `<config dir>/hive/config.toml`, where the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hive").join("config.toml"))
    }

    /// Load from `path`, or from the default path when none is given.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.bus.history_limit == 0 {
            errors.push("bus.history_limit must be greater than 0".to_string());
        }
        if self.bus.channel_capacity == 0 {
            errors.push("bus.channel_capacity must be greater than 0".to_string());
        }
        if self.orchestrator.task_channel.trim().is_empty() {
            errors.push("orchestrator.task_channel must not be empty".to_string());
        }
        if self.orchestrator.default_timeout_ms == 0 {
            errors.push("orchestrator.default_timeout_ms must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.agent_id.trim().is_empty() || worker.agent_type.trim().is_empty() {
                errors.push("workers need a non-empty agent_id and agent_type".to_string());
            } else if worker.agent_id == ORCHESTRATOR_ID {
                errors.push(format!("worker id {ORCHESTRATOR_ID} is reserved"));
            } else if !seen.insert(worker.agent_id.as_str()) {
                errors.push(format!("duplicate worker id {}", worker.agent_id));
            }
        }

        if !errors.is_empty() {
            bail!("Invalid configuration: {}", errors.join("; "));
        }
        Ok(())
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            history_limit: self.bus.history_limit,
            channel_capacity: self.bus.channel_capacity,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            channel: self.orchestrator.task_channel.clone(),
            sender_id: AgentId::new(ORCHESTRATOR_ID),
        }
    }
}
