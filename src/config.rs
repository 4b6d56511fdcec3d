use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat server
    pub server_url: String,

    /// Delay between two revealed characters
    pub typing_delay_ms: u64,

    /// Ask the server whether it will search references before streaming
    pub check_rag: bool,

    /// Connection setup timeout; a reply may stream for as long as it needs
    pub connect_timeout_secs: u64,

    /// Greeting shown when the transcript opens
    pub welcome_message: String,

    /// Suggestion texts offered before the conversation starts
    pub option_prompts: Vec<String>,

    /// Label of the alternate session switch
    pub session_switch_label: String,

    /// Notice shown while the server searches its reference documents
    pub searching_notice: String,

    /// Server endpoint paths
    pub endpoints: Endpoints,

    /// Math finalizer settings
    pub math: MathConfig,
}

/// Endpoint paths, relative to `server_url`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub chat_stream: String,
    pub check_rag: String,
    pub erase: String,
    pub session_start: String,
    pub session_stream: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MathConfig {
    pub enabled: bool,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat_stream: "/chat_stream".to_string(),
            check_rag: "/check_rag".to_string(),
            erase: "/erase".to_string(),
            session_start: "/session_start".to_string(),
            session_stream: "/session_stream".to_string(),
        }
    }
}

impl Default for MathConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: "http://127.0.0.1:5000".to_string(),
            typing_delay_ms: 12,
            check_rag: true,
            connect_timeout_secs: 10,
            welcome_message: "Hi, I'm an assistant specialised in coffee. How can I help you?"
                .to_string(),
            option_prompts: vec![
                "How is green Arabica coffee classified?".to_string(),
                "How do I measure the moisture content of coffee beans?".to_string(),
                "What is the rate of rise during roasting?".to_string(),
                "How do roasting times change the chemical composition of coffee?".to_string(),
            ],
            session_switch_label: "Start a guided monitoring session".to_string(),
            searching_notice: "Searching the reference documents...".to_string(),
            endpoints: Endpoints::default(),
            math: MathConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration directory (`~/.cafe-chat`)
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".cafe-chat"))
    }

    /// Create `~/.cafe-chat/logs` if needed and return it
    pub fn log_dir() -> Result<PathBuf> {
        Self::ensure_log_dir_in(&Self::home_dir()?)
    }

    fn ensure_log_dir_in(home: &Path) -> Result<PathBuf> {
        let log_dir = home.join("logs");
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        Ok(log_dir)
    }

    /// Load configuration from `~/.cafe-chat/config.toml`, or defaults if absent
    pub fn load() -> Result<Self> {
        let config_path = Self::home_dir()?.join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url must not be empty");
        }
        if self.typing_delay_ms == 0 {
            anyhow::bail!("typing_delay_ms must be at least 1");
        }
        Ok(())
    }

    pub fn typing_delay(&self) -> Duration {
        Duration::from_millis(self.typing_delay_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Join an endpoint path onto the server URL
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
