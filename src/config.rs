use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai_sdk::ReasoningEffort;
use crate::bridge::TurnOptions;
use crate::client::{ClientConfig, DEFAULT_BASE_URL, default_data_dir};
use crate::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gpt-5.2";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key; pass --api-key or set OPENAI_API_KEY")]
    MissingApiKey,

    #[error("could not access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid state JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Parser)]
#[command(name = "scribe")]
#[command(about = "Terminal chat for the OpenAI Responses API with vector-store retrieval", long_about = None)]
pub struct Cli {
    /// API key used for every request
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "SCRIBE_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Model id; overrides the saved selection
    #[arg(long, env = "SCRIBE_MODEL", global = true)]
    pub model: Option<String>,

    /// Connection attempts per request before giving up
    #[arg(long, default_value_t = 5, global = true)]
    pub max_attempts: u32,

    /// Wall-clock limit on opening one connection attempt
    #[arg(long, default_value_t = 120, global = true)]
    pub connect_timeout_secs: u64,

    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat (default)
    Chat,
    /// Stream a single answer to stdout
    Ask {
        prompt: String,
        /// Start a fresh conversation instead of continuing the saved one
        #[arg(long)]
        fresh: bool,
    },
    /// Manage vector stores
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum KbCommand {
    List,
    Create { name: String },
    Rename { store_id: String, name: String },
    Delete { store_id: String },
    Files { store_id: String },
    Add { store_id: String, path: PathBuf },
    Remove { store_id: String, file_id: String },
}

impl Cli {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key()?,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            ..RetryPolicy::default()
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| default_data_dir().join("state.json"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| default_data_dir().join("scribe.log"))
    }
}

/// Selections that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub last_response_id: Option<String>,
    pub vector_store_id: Option<String>,
    pub use_file_search: bool,
    pub web_search: bool,
    pub instructions: Option<String>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            reasoning_effort: None,
            last_response_id: None,
            vector_store_id: None,
            use_file_search: false,
            web_search: false,
            instructions: None,
        }
    }
}

impl PersistedState {
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let body = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(io_err)?;
        use std::io::Write;
        file.write_all(&body).map_err(io_err)?;
        Ok(())
    }

    pub fn turn_options(&self) -> TurnOptions {
        TurnOptions {
            instructions: self.instructions.clone(),
            reasoning: self.reasoning_effort,
            use_file_search: self.use_file_search,
            vector_store_id: self.vector_store_id.clone(),
            web_search: self.web_search,
        }
    }

    pub fn apply_turn_options(&mut self, options: &TurnOptions) {
        self.instructions = options.instructions.clone();
        self.reasoning_effort = options.reasoning;
        self.use_file_search = options.use_file_search;
        self.vector_store_id = options.vector_store_id.clone();
        self.web_search = options.web_search;
    }
}
