//! Process-wide configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid value: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Parameters of every provider call. Never mutated after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Wall-clock cap on a single relay, provider call included.
    pub relay_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            relay_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub templates_dir: String,
    pub static_dir: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let temperature: f32 = parse(&lookup, "TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("TEMPERATURE", temperature, "must be between 0 and 2"));
        }

        let max_tokens: u32 = parse(&lookup, "MAX_TOKENS", 1000)?;
        if max_tokens == 0 {
            return Err(invalid("MAX_TOKENS", max_tokens, "must be positive"));
        }

        let timeout_secs: u64 = parse(&lookup, "RELAY_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(invalid("RELAY_TIMEOUT_SECS", timeout_secs, "must be positive"));
        }

        let chat = ChatConfig {
            model: text("AI_MODEL", DEFAULT_MODEL),
            system_prompt: text("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            temperature,
            max_tokens,
            relay_timeout: Duration::from_secs(timeout_secs),
        };

        let provider = ProviderConfig {
            base_url: text("OPENAI_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()),
        };

        let server = ServerConfig {
            host: text("HOST", "127.0.0.1"),
            port: parse(&lookup, "PORT", 8080)?,
            templates_dir: text("TEMPLATES_DIR", "templates"),
            static_dir: text("STATIC_DIR", "static"),
        };

        Ok(Self {
            server,
            provider,
            chat,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
            ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }
        }),
        _ => Ok(default),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
