//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mammo_ai::HttpConfig;
use mammo_chat::{AgentConfig, BreakerConfig, OrchestratorConfig};

/// Used when neither `system_prompt` nor `system_prompt_file` is set
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Mammo, a helpful assistant with access to \
the user's long-term memory.

Tools:
{tools}
Search memory when the user refers to something they told you before. Store a note \
when they share a lasting fact or preference. Keep answers concise.";

/// Configuration for mammo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub chat: ChatConfig,
    pub breaker: BreakerConfig,
    pub http: HttpConfig,
}

/// Language model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Prefer the `DEEPSEEK_API_KEY` environment variable
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "deepseek-chat".to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

/// Memory service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Prefer the `HEYSOL_API_KEY` environment variable
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: mammo_chat::memory::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Turn behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub store_user_messages: bool,
    pub stream_chunk_size: usize,
    /// Use the tool-calling agent when a memory key is configured
    pub agent_enabled: bool,
    pub max_tool_rounds: usize,
    pub turn_timeout_secs: u64,
    pub max_messages: usize,
    pub max_execution_steps: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            store_user_messages: true,
            stream_chunk_size: 50,
            agent_enabled: true,
            max_tool_rounds: 5,
            turn_timeout_secs: 120,
            max_messages: 1000,
            max_execution_steps: 500,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mammo")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for MAMMO_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("MAMMO_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load the config file, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::config_path());
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Load a config file; a missing or broken file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Secrets and endpoints from the environment win over the file
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("DEEPSEEK_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("DEEPSEEK_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = lookup("HEYSOL_API_KEY") {
            self.memory.api_key = Some(key);
        }
        if let Some(url) = lookup("HEYSOL_BASE_URL") {
            self.memory.base_url = url;
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        Config::default().save(&path)?;
        Ok(path)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            store_user_messages: self.chat.store_user_messages,
            stream_chunk_size: self.chat.stream_chunk_size,
        }
    }

    pub fn agent_config(&self, system_prompt: String) -> AgentConfig {
        AgentConfig {
            system_prompt,
            max_tool_rounds: self.chat.max_tool_rounds,
            temperature: Some(self.llm.temperature),
            max_tokens: self.llm.max_tokens,
            timeout_secs: self.chat.turn_timeout_secs,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.chat.turn_timeout_secs)
    }

    /// The agent runs only when enabled and a memory key is present
    pub fn agent_available(&self) -> bool {
        self.chat.agent_enabled && self.memory.api_key.is_some()
    }
}

impl LlmConfig {
    /// Reject an empty credential, model or base URL
    pub fn ensure_valid(&self) -> mammo_chat::Result<()> {
        if self.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(mammo_chat::Error::Configuration(
                "no LLM API key; set DEEPSEEK_API_KEY or llm.api_key".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(mammo_chat::Error::Configuration("llm.model is empty".into()));
        }
        if self.base_url.trim().is_empty() {
            return Err(mammo_chat::Error::Configuration(
                "llm.base_url is empty".into(),
            ));
        }
        Ok(())
    }

    pub fn model(&self) -> mammo_ai::Model {
        mammo_ai::Model::new(self.model.clone(), self.base_url.clone())
    }

    /// Resolve the system prompt: file, then inline text, then the default
    pub fn resolve_system_prompt(&self) -> mammo_chat::Result<String> {
        if let Some(ref file) = self.system_prompt_file {
            let path = expand_home(file);
            return fs::read_to_string(&path).map_err(|e| {
                mammo_chat::Error::Configuration(format!(
                    "cannot read system prompt file {}: {}",
                    path.display(),
                    e
                ))
            });
        }
        Ok(self
            .system_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# mammo configuration file
# Place at ~/.config/mammo/config.toml (Linux) or set MAMMO_CONFIG_PATH

[llm]
# api_key = "sk-..."          # or DEEPSEEK_API_KEY
model = "deepseek-chat"
base_url = "https://api.deepseek.com"   # or DEEPSEEK_BASE_URL
temperature = 0.7
# system_prompt = "You are ... {tools}"
# system_prompt_file = "~/.config/mammo/system.md"

[memory]
# api_key = "..."             # or HEYSOL_API_KEY; required to chat
base_url = "https://core.heysol.ai/api/v1"   # or HEYSOL_BASE_URL

[chat]
store_user_messages = true
stream_chunk_size = 50
agent_enabled = true
max_tool_rounds = 5
turn_timeout_secs = 120

[breaker]
failure_threshold = 3
open_duration_secs = 60

[http]
connect_timeout_secs = 10
read_timeout_secs = 60
request_timeout_secs = 120
"#
}
