use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::ReconnectPolicy;
use crate::bot::state::DEFAULT_AUTO_REPLY;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    bot_token: String,
    /// Single character that marks command messages.
    #[serde(default = "default_prefix")]
    command_prefix: String,
    /// Reply sent to plain messages while auto-reply is on.
    #[serde(default = "default_auto_reply")]
    auto_reply_text: String,
    /// Tail of the greeting sent to members joining a group.
    #[serde(default = "default_welcome")]
    welcome_text: String,
    /// Directory for state files (credentials, logs). Defaults to current directory.
    data_dir: Option<String>,
    /// Port for the liveness endpoint (disabled when unset).
    keepalive_port: Option<u16>,
    /// Chat that receives WARN/ERROR alerts (disabled when unset).
    operator_chat_id: Option<i64>,
    #[serde(default)]
    reconnect: ReconnectFile,
}

#[derive(Deserialize)]
struct ReconnectFile {
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
    /// Consecutive failures before giving up. 0 = retry forever.
    #[serde(default)]
    max_attempts: u32,
}

impl Default for ReconnectFile {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: 0,
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_auto_reply() -> String {
    DEFAULT_AUTO_REPLY.to_string()
}

fn default_welcome() -> String {
    "welcome to the group! 👋".to_string()
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

pub struct Config {
    pub bot_token: String,
    pub command_prefix: char,
    pub auto_reply_text: String,
    pub welcome_text: String,
    /// Directory for state files (credentials, logs).
    pub data_dir: PathBuf,
    /// Where the credential store keeps its blob.
    pub credentials_dir: PathBuf,
    pub keepalive_port: Option<u16>,
    pub operator_chat_id: Option<i64>,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.bot_token.is_empty() {
            return Err(ConfigError::Validation("bot_token is required".into()));
        }
        // Bot tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let mut prefix_chars = file.command_prefix.chars();
        let command_prefix = match (prefix_chars.next(), prefix_chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ConfigError::Validation(
                    "command_prefix must be exactly one character".into(),
                ));
            }
        };

        if file.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Validation("reconnect.base_delay_ms must be positive".into()));
        }
        if file.reconnect.base_delay_ms > file.reconnect.max_delay_ms {
            return Err(ConfigError::Validation(
                "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms".into(),
            ));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let credentials_dir = data_dir.join("auth");

        Ok(Self {
            bot_token: file.bot_token,
            command_prefix,
            auto_reply_text: file.auto_reply_text,
            welcome_text: file.welcome_text,
            data_dir,
            credentials_dir,
            keepalive_port: file.keepalive_port,
            operator_chat_id: file.operator_chat_id,
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(file.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(file.reconnect.max_delay_ms),
                max_attempts: file.reconnect.max_attempts,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.command_prefix, '!');
        assert_eq!(config.auto_reply_text, DEFAULT_AUTO_REPLY);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.credentials_dir, PathBuf::from("./auth"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "bot_token": "" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["no_colon_here", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(r#"{{ "bot_token": "{token}" }}"#));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token:?}");
        }
    }

    #[test]
    fn test_custom_prefix() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "command_prefix": "."
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.command_prefix, '.');
    }

    #[test]
    fn test_multi_char_prefix_is_rejected() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "command_prefix": "!!"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("command_prefix"));
    }

    #[test]
    fn test_backoff_bounds_are_validated() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "reconnect": { "base_delay_ms": 5000, "max_delay_ms": 1000 }
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn test_reconnect_overrides() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "reconnect": { "base_delay_ms": 500, "max_delay_ms": 10000, "max_attempts": 8 }
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 8);
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
