//! Configuration management module
//!
//! Provides centralized configuration including:
//! - Portable paths (log file, config file, records directory) under `$HOME/.parakeet/`
//! - Build information (date, version, authors)
//! - Bot settings ([`BotConfig`]): `config.toml`, overridden by environment variables
//!   and `.config.env` files

use crate::conversation::SeedPolicy;
use crate::security;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Path and build-info helpers.
pub struct Config;

impl Config {
    /// Base directory: `$HOME/.parakeet`, or a temp directory if HOME is not set.
    pub fn base_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".parakeet");
        }
        std::env::temp_dir().join("parakeet")
    }

    /// Log file: `$HOME/.parakeet/debug.log`
    pub fn log_file_path() -> PathBuf {
        Self::base_dir().join("debug.log")
    }

    /// Ensure the directory containing the log file exists.
    pub fn ensure_log_directory() -> std::io::Result<()> {
        let log_path = Self::log_file_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Settings file: `$HOME/.parakeet/config.toml`
    pub fn config_file_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Default directory for feedback and interaction records: `$HOME/.parakeet/records/`
    pub fn records_dir() -> PathBuf {
        Self::base_dir().join("records")
    }

    /// `.config.env` candidates, lowest precedence first: `~/.parakeet/.config.env`, then the working directory.
    pub fn config_env_paths() -> Vec<PathBuf> {
        let mut paths = vec![Self::base_dir().join(security::CONFIG_ENV_FILE)];
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(security::CONFIG_ENV_FILE));
        }
        paths
    }

    /// Build date stamped by build.rs, or "unknown".
    pub fn build_date() -> String {
        option_env!("BUILD_DATE").unwrap_or("unknown").to_string()
    }

    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    pub fn authors() -> String {
        env!("CARGO_PKG_AUTHORS").to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid URL for {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("missing required setting {0}")]
    Missing(&'static str),
}

/// Completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Ollama,
}

impl std::str::FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            _ => Err(()),
        }
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    /// API key for the hosted provider (OPENAI_API_KEY).
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// Ollama endpoint, used when `provider = "ollama"`.
    pub ollama_endpoint: String,
    /// Reply token budget sent with every request.
    pub max_tokens: u32,
    /// Model context window, used to trim old turns from the prompt.
    pub context_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: crate::llm::openai::DEFAULT_BASE_URL.to_string(),
            ollama_endpoint: "http://localhost:11434".to_string(),
            max_tokens: 4096,
            context_tokens: 16384,
            temperature: None,
        }
    }
}

/// Bot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub discord_token: Option<String>,
    /// Prefix that marks a message as a bot command, e.g. `gpt:help`.
    pub command_prefix: String,
    /// Role a guild member needs before the bot answers. `None` disables the gate.
    pub opt_in_role: Option<String>,
    /// System prompt seeded into every new conversation.
    pub system_prompt: Option<String>,
    /// Text file sent for the privacy command. Built-in text when unset.
    pub privacy_policy_file: Option<PathBuf>,
    pub conversation_timeout_secs: u64,
    pub response_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Where feedback and interaction records are appended. Defaults to `~/.parakeet/records`.
    pub records_dir: Option<PathBuf>,
    pub llm: LlmSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            discord_token: None,
            command_prefix: "gpt:".to_string(),
            opt_in_role: Some("AI Trainer".to_string()),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            privacy_policy_file: None,
            conversation_timeout_secs: 600,
            response_timeout_secs: 60,
            sweep_interval_secs: 60,
            records_dir: None,
            llm: LlmSettings::default(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a Discord bot tasked with assisting members of the server you are in. Keep answers short and friendly.";

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

impl BotConfig {
    /// Load settings: TOML file (explicit path must exist; the default one is optional),
    /// then `.config.env` files, then process environment. Validated before returning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same sources as [`load`](Self::load), without [`validate`](Self::validate).
    /// Used to print settings that are still incomplete.
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = Config::config_file_path();
                if p.is_file() {
                    Self::from_file(&p)?
                } else {
                    debug!("Config: no {}, using defaults", p.display());
                    Self::default()
                }
            }
        };

        let mut env = HashMap::new();
        for p in Config::config_env_paths() {
            env.extend(security::read_env_file(&p));
        }
        env.extend(std::env::vars());
        config.apply_env(&env)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides. Empty values are ignored.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        let get = |key: &str| env.get(key).and_then(|v| non_empty(v));

        if let Some(v) = get("DISCORD_BOT_TOKEN") {
            self.discord_token = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("OLLAMA_ENDPOINT") {
            self.llm.ollama_endpoint = v;
        }
        if let Some(v) = get("PARAKEET_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("PARAKEET_PROVIDER") {
            self.llm.provider = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PARAKEET_PROVIDER",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("OPT_IN_ROLE_NAME") {
            self.opt_in_role = Some(v);
        }
        if let Some(v) = get("COMMAND_PREFIX") {
            self.command_prefix = v;
        }
        if let Some(v) = get("FEEDBACK_BASE_DIR") {
            self.records_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CONVERSATION_TIMEOUT_MINUTES") {
            let minutes: u64 = parse_number("CONVERSATION_TIMEOUT_MINUTES", &v)?;
            self.conversation_timeout_secs = minutes.saturating_mul(60);
        }
        if let Some(v) = get("RESPONSE_TIMEOUT_SECONDS") {
            self.response_timeout_secs = parse_number("RESPONSE_TIMEOUT_SECONDS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord_token.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(ConfigError::Missing("DISCORD_BOT_TOKEN"));
        }
        if self.command_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "command_prefix",
                value: self.command_prefix.clone(),
            });
        }
        if self.response_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "response_timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sweep_interval_secs",
                value: "0".to_string(),
            });
        }
        match self.llm.provider {
            Provider::OpenAi => {
                if self.llm.api_key.is_none() {
                    return Err(ConfigError::Missing("OPENAI_API_KEY"));
                }
                url::Url::parse(&self.llm.base_url)
                    .map_err(|source| ConfigError::InvalidUrl { key: "llm.base_url", source })?;
            }
            Provider::Ollama => {
                url::Url::parse(&self.llm.ollama_endpoint).map_err(|source| ConfigError::InvalidUrl {
                    key: "llm.ollama_endpoint",
                    source,
                })?;
            }
        }
        Ok(())
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.records_dir.clone().unwrap_or_else(Config::records_dir)
    }

    pub fn seed_policy(&self) -> SeedPolicy {
        match self.system_prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => SeedPolicy::SystemPrompt(p.to_string()),
            _ => SeedPolicy::Empty,
        }
    }

    /// Copy with secrets masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.discord_token = c.discord_token.as_deref().map(security::mask_credential);
        c.llm.api_key = c.llm.api_key.as_deref().map(security::mask_credential);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults() {
        let c = BotConfig::default();
        assert_eq!(c.command_prefix, "gpt:");
        assert_eq!(c.llm.max_tokens, 4096);
        assert_eq!(c.conversation_timeout(), Duration::from_secs(600));
        assert!(matches!(c.seed_policy(), SeedPolicy::SystemPrompt(_)));
    }

    #[test]
    fn toml_partial_file() {
        let c = BotConfig::from_toml(
            r#"
            command_prefix = "!ai"
            opt_in_role = "Beta"
            system_prompt = ""

            [llm]
            provider = "ollama"
            model = "llama3"
            "#,
        )
        .unwrap();
        assert_eq!(c.command_prefix, "!ai");
        assert_eq!(c.opt_in_role.as_deref(), Some("Beta"));
        assert_eq!(c.llm.provider, Provider::Ollama);
        assert_eq!(c.llm.max_tokens, 4096);
        assert_eq!(c.seed_policy(), SeedPolicy::Empty);
    }

    #[test]
    fn env_overrides() {
        let mut c = BotConfig::default();
        c.apply_env(&env(&[
            ("DISCORD_BOT_TOKEN", "tok"),
            ("OPENAI_API_KEY", "sk-abc"),
            ("CONVERSATION_TIMEOUT_MINUTES", "5"),
            ("RESPONSE_TIMEOUT_SECONDS", "30"),
            ("OPT_IN_ROLE_NAME", "AI Trainer"),
            ("FEEDBACK_BASE_DIR", "/tmp/fb"),
            ("PARAKEET_PROVIDER", "Ollama"),
            ("COMMAND_PREFIX", "  "),
        ]))
        .unwrap();
        assert_eq!(c.discord_token.as_deref(), Some("tok"));
        assert_eq!(c.conversation_timeout_secs, 300);
        assert_eq!(c.response_timeout_secs, 30);
        assert_eq!(c.records_dir(), PathBuf::from("/tmp/fb"));
        assert_eq!(c.llm.provider, Provider::Ollama);
        assert_eq!(c.command_prefix, "gpt:");
    }

    #[test]
    fn bad_number_rejected() {
        let mut c = BotConfig::default();
        let err = c.apply_env(&env(&[("CONVERSATION_TIMEOUT_MINUTES", "ten")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "CONVERSATION_TIMEOUT_MINUTES", .. }));
    }

    #[test]
    fn validation() {
        let mut c = BotConfig::default();
        assert!(matches!(c.validate(), Err(ConfigError::Missing("DISCORD_BOT_TOKEN"))));
        c.discord_token = Some("tok".to_string());
        assert!(matches!(c.validate(), Err(ConfigError::Missing("OPENAI_API_KEY"))));
        c.llm.api_key = Some("sk".to_string());
        assert!(c.validate().is_ok());
        c.llm.base_url = "::nope".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidUrl { .. })));
        c.llm.provider = Provider::Ollama;
        c.llm.api_key = None;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn redacted_masks_secrets() {
        let mut c = BotConfig::default();
        c.discord_token = Some("MTIzNDU2Nzg5.abcdef.ghijkl".to_string());
        c.llm.api_key = Some("short".to_string());
        let r = c.redacted();
        assert_eq!(r.discord_token.as_deref(), Some("MTIz...ijkl"));
        assert_eq!(r.llm.api_key.as_deref(), Some("****"));
    }

    #[test]
    fn unvalidated_load_keeps_incomplete_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "command_prefix = \" \"\nresponse_timeout_secs = 7\n").unwrap();
        assert!(BotConfig::load(Some(&path)).is_err());
        let c = BotConfig::load_unvalidated(Some(&path)).unwrap();
        assert_eq!(c.response_timeout(), Duration::from_secs(7));
        assert!(toml::to_string_pretty(&c.redacted()).is_ok());
    }

    #[test]
    fn from_file_roundtrip_via_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sweep_interval_secs = 5\n").unwrap();
        let c = BotConfig::from_file(&path).unwrap();
        assert_eq!(c.sweep_interval(), Duration::from_secs(5));
        assert!(matches!(
            BotConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
