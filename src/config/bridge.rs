//! Bridge configuration
//!
//! Built-in defaults, optionally overridden by a TOML file, then by the
//! `TELEGRAM_BOT_TOKEN`, `TELEGRAM_ALLOWED_USER_ID` and `AGENT_ZERO_DIR`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder token shipped in the defaults. The bridge refuses to run with it.
pub const DEFAULT_BOT_TOKEN: &str = "YOUR_TELEGRAM_BOT_TOKEN";
/// Placeholder operator id shipped in the defaults. Only warned about.
pub const DEFAULT_ALLOWED_USER_ID: i64 = 123456789;

pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_ALLOWED_USER_ID: &str = "TELEGRAM_ALLOWED_USER_ID";
pub const ENV_AGENT_DIR: &str = "AGENT_ZERO_DIR";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Telegram bot token is not set (export TELEGRAM_BOT_TOKEN or set telegram.bot_token)")]
    MissingToken,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Telegram connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    #[serde(default = "default_bot_token")]
    pub bot_token: String,
    /// The only user allowed to drive the agent
    #[serde(default = "default_allowed_user_id")]
    pub allowed_user_id: i64,
    /// Long-poll timeout for getUpdates, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Limit on one sendMessage request, in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: default_bot_token(),
            allowed_user_id: default_allowed_user_id(),
            poll_timeout_secs: default_poll_timeout(),
            send_timeout_secs: default_send_timeout(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// How the agent process is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name used in status messages
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Working directory of the agent (a leading `~/` is expanded)
    #[serde(default = "default_agent_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Terminal columns
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Terminal rows
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Start the agent as soon as the bridge is up
    #[serde(default)]
    pub autostart: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            dir: default_agent_dir(),
            program: default_program(),
            args: default_args(),
            cols: default_cols(),
            rows: default_rows(),
            autostart: false,
        }
    }
}

/// Size limits on both directions of the bridge
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Longest inbound message forwarded to the agent, in characters
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Longest outbound chunk before truncation, in characters
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Bytes read from the PTY per pump iteration
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            max_output_chars: default_max_output_chars(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Outbound queue and delivery retry settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Extra attempts after a failed send
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    /// Delay before the first retry; doubled on each further attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_retries: default_send_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
}

fn default_bot_token() -> String {
    DEFAULT_BOT_TOKEN.to_string()
}

fn default_allowed_user_id() -> i64 {
    DEFAULT_ALLOWED_USER_ID
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_send_timeout() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_agent_name() -> String {
    "AgentZero".to_string()
}

fn default_agent_dir() -> PathBuf {
    PathBuf::from("~/agent-zero")
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["main.py".to_string()]
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_max_message_length() -> usize {
    4096
}

fn default_max_output_chars() -> usize {
    4000
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_queue_capacity() -> usize {
    256
}

fn default_send_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl BridgeConfig {
    /// Load configuration from an optional TOML file.
    ///
    /// A missing `path` yields the defaults; a path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(ENV_BOT_TOKEN) {
            self.telegram.bot_token = token;
        }

        if let Some(raw) = get(ENV_ALLOWED_USER_ID) {
            self.telegram.allowed_user_id =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        var: ENV_ALLOWED_USER_ID,
                        value: raw.clone(),
                    })?;
        }

        if let Some(dir) = get(ENV_AGENT_DIR) {
            self.agent.dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Check the settings the bridge cannot run without.
    ///
    /// A placeholder operator id is not an error; see [`Self::uses_default_user_id`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() || token == DEFAULT_BOT_TOKEN {
            return Err(ConfigError::MissingToken);
        }
        if self.agent.program.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.program is empty".into()));
        }
        if self.limits.max_output_chars == 0 || self.limits.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_output_chars and limits.read_buffer_size must be positive".into(),
            ));
        }
        if self.telegram.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "telegram.send_timeout_secs must be positive".into(),
            ));
        }
        if self.outbound.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound.queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether the operator id was left at its placeholder value
    pub fn uses_default_user_id(&self) -> bool {
        self.telegram.allowed_user_id == DEFAULT_ALLOWED_USER_ID
    }

    /// The agent directory with a leading `~` resolved against `$HOME`
    pub fn agent_dir(&self) -> PathBuf {
        expand_home(&self.agent.dir, std::env::var_os("HOME").map(PathBuf::from))
    }
}

fn expand_home(path: &Path, home: Option<PathBuf>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.telegram.bot_token, DEFAULT_BOT_TOKEN);
        assert_eq!(config.telegram.allowed_user_id, DEFAULT_ALLOWED_USER_ID);
        assert_eq!(config.agent.program, "python3");
        assert_eq!(config.agent.args, vec!["main.py".to_string()]);
        assert_eq!(config.limits.max_message_length, 4096);
        assert_eq!(config.limits.max_output_chars, 4000);
        assert_eq!(config.limits.read_buffer_size, 4096);
        assert!(!config.agent.autostart);
    }

    #[test]
    fn test_load_without_path_returns_default() {
        let config = BridgeConfig::load(None).unwrap();
        assert_eq!(config.agent.name, "AgentZero");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let result = BridgeConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
[telegram]
allowed_user_id = 42

[agent]
name = "Scout"
program = "node"
args = ["agent.js", "--tty"]
"#,
        )
        .unwrap();

        let config = BridgeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.telegram.allowed_user_id, 42);
        assert_eq!(config.telegram.bot_token, DEFAULT_BOT_TOKEN);
        assert_eq!(config.telegram.poll_timeout_secs, 30);
        assert_eq!(config.telegram.send_timeout_secs, 30);
        assert_eq!(config.agent.name, "Scout");
        assert_eq!(config.agent.program, "node");
        assert_eq!(config.agent.args.len(), 2);
        assert_eq!(config.agent.cols, 80);
        assert_eq!(config.limits.max_output_chars, 4000);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = BridgeConfig::from_toml("[agent\nname = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = BridgeConfig::from_toml("[telegram]\nbot_token = \"from-file\"").unwrap();
        config
            .apply_env(env(&[
                (ENV_BOT_TOKEN, "from-env"),
                (ENV_ALLOWED_USER_ID, " 987654 "),
                (ENV_AGENT_DIR, "/opt/agent"),
            ]))
            .unwrap();

        assert_eq!(config.telegram.bot_token, "from-env");
        assert_eq!(config.telegram.allowed_user_id, 987654);
        assert_eq!(config.agent.dir, PathBuf::from("/opt/agent"));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[(ENV_BOT_TOKEN, ""), (ENV_ALLOWED_USER_ID, "  ")]))
            .unwrap();
        assert_eq!(config.telegram.bot_token, DEFAULT_BOT_TOKEN);
        assert!(config.uses_default_user_id());
    }

    #[test]
    fn test_invalid_user_id_env() {
        let mut config = BridgeConfig::default();
        let result = config.apply_env(env(&[(ENV_ALLOWED_USER_ID, "not-a-number")]));
        match result {
            Err(ConfigError::InvalidEnv { var, value }) => {
                assert_eq!(var, ENV_ALLOWED_USER_ID);
                assert_eq!(value, "not-a-number");
            }
            other => panic!("Expected InvalidEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_placeholder_token() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));

        let mut config = BridgeConfig::default();
        config.telegram.bot_token = "   ".into();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn test_validate_accepts_default_user_id() {
        let mut config = BridgeConfig::default();
        config.telegram.bot_token = "123:abc".into();
        assert!(config.validate().is_ok());
        assert!(config.uses_default_user_id());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = BridgeConfig::default();
        config.telegram.bot_token = "123:abc".into();
        config.limits.read_buffer_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_expand_home() {
        let home = Some(PathBuf::from("/home/pi"));
        assert_eq!(
            expand_home(Path::new("~/agent-zero"), home.clone()),
            PathBuf::from("/home/pi/agent-zero")
        );
        assert_eq!(
            expand_home(Path::new("/srv/agent"), home),
            PathBuf::from("/srv/agent")
        );
        assert_eq!(
            expand_home(Path::new("~/agent-zero"), None),
            PathBuf::from("~/agent-zero")
        );
    }
}
