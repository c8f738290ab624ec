//! agentigraph.toml: agent settings, tool policy, checkpoint location, skills.

use agentigraph_agent::{AgentConfig, Skill};
use agentigraph_tools::{ConflictStrategy, RegistryOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "agentigraph.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub checkpoint: CheckpointConfig,
    pub skills: Vec<Skill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Source patterns that skip the approval prompt, e.g. `builtin` or `mcp:github`.
    pub auto_approve: Vec<String>,
    pub exclude: Vec<String>,
    pub conflict_strategy: ConflictStrategy,
    /// Root for the builtin tools. Defaults to the workspace.
    pub workspace: Option<PathBuf>,
    pub builtins: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve: Vec::new(),
            exclude: Vec::new(),
            conflict_strategy: ConflictStrategy::default(),
            workspace: None,
            builtins: vec!["glob".to_string(), "read".to_string()],
        }
    }
}

impl ToolsConfig {
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            conflict_strategy: self.conflict_strategy,
            exclude: self.exclude.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Relative paths resolve against the workspace.
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Agent settings with the top-level `[[skills]]` folded in.
    pub fn agent_config(&self) -> AgentConfig {
        let mut agent = self.agent.clone();
        agent.skills.extend(self.skills.iter().cloned());
        agent
    }

    pub fn tools_root(&self, workspace: &Path) -> PathBuf {
        match &self.tools.workspace {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        }
    }

    pub fn checkpoint_dir(&self, workspace: &Path) -> PathBuf {
        match &self.checkpoint.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.join(".agentigraph").join("checkpoints"),
        }
    }
}
