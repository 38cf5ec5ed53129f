//! Configuration management for Helpdesk
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, HelpdeskError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Instruction prepended to every conversation sent to the model
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI tech support assistant that helps users solve their technical problems. Provide clear, step-by-step instructions. If you need more information to diagnose the issue, ask clarifying questions.";

/// Main configuration structure for Helpdesk
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream completions API used by the proxy
    #[serde(default)]
    pub provider: ProviderConfig,
    /// AI client settings (proxy location, model options, credentials)
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// HTTP service settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Local state storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Upstream provider configuration
///
/// The proxy forwards completion requests to `{api_base}/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the upstream completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Value sent upstream as `HTTP-Referer`
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Value sent upstream as `X-Title`
    #[serde(default = "default_app_title")]
    pub app_title: String,

    /// Timeout for upstream requests (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_referer() -> String {
    "https://computer-support-assistant.local".to_string()
}

fn default_app_title() -> String {
    "Computer Support Assistant".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            referer: default_referer(),
            app_title: default_app_title(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl ProviderConfig {
    /// Full upstream completions URL
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk::config::ProviderConfig;
    ///
    /// let cfg = ProviderConfig::default();
    /// assert_eq!(cfg.completions_url(), "https://openrouter.ai/api/v1/chat/completions");
    /// ```
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// AI client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Same-origin proxy endpoint the client talks to
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens generated per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Fixed system instruction prepended to the history
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Primary API credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// Backup API credential, used once the primary is rejected
    #[serde(default)]
    pub backup_api_key: Option<String>,

    /// Stream responses by default
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Timeout for requests to the proxy (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_proxy_url() -> String {
    "http://127.0.0.1:3000/api/openrouter".to_string()
}

fn default_model() -> String {
    "deepseek/deepseek-r1:free".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_stream() -> bool {
    true
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            api_key: None,
            backup_api_key: None,
            stream: default_stream(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl AssistantConfig {
    /// Base URL of the service hosting the proxy (scheme, host and port)
    ///
    /// Used to reach sibling routes such as `/api/upload`.
    pub fn service_base(&self) -> Result<String> {
        let url = url::Url::parse(&self.proxy_url)
            .map_err(|e| HelpdeskError::Config(format!("Invalid proxy_url: {}", e)))?;
        Ok(url.origin().ascii_serialization())
    }
}

/// HTTP service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory holding the `uploads/` folder
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Maximum accepted upload size (bytes)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024 // 5 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_dir: default_public_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Local state storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Database location; the platform data directory is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HelpdeskError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| HelpdeskError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(key) = std::env::var("HELPDESK_API_KEY") {
            self.assistant.api_key = Some(key);
        }

        if let Ok(key) = std::env::var("HELPDESK_BACKUP_API_KEY") {
            self.assistant.backup_api_key = Some(key);
        }

        if let Ok(model) = std::env::var("HELPDESK_MODEL") {
            self.assistant.model = model;
        }

        if let Ok(proxy_url) = std::env::var("HELPDESK_PROXY_URL") {
            self.assistant.proxy_url = proxy_url;
        }

        if let Ok(api_base) = std::env::var("HELPDESK_API_BASE") {
            self.provider.api_base = api_base;
        }

        if let Ok(temperature) = std::env::var("HELPDESK_TEMPERATURE") {
            if let Ok(value) = temperature.parse() {
                self.assistant.temperature = value;
            } else {
                tracing::warn!("Invalid HELPDESK_TEMPERATURE: {}", temperature);
            }
        }

        if let Ok(max_tokens) = std::env::var("HELPDESK_MAX_TOKENS") {
            if let Ok(value) = max_tokens.parse() {
                self.assistant.max_tokens = value;
            } else {
                tracing::warn!("Invalid HELPDESK_MAX_TOKENS: {}", max_tokens);
            }
        }

        if let Ok(bind) = std::env::var("HELPDESK_BIND") {
            self.server.bind = bind;
        }

        if let Ok(dir) = std::env::var("HELPDESK_PUBLIC_DIR") {
            self.server.public_dir = PathBuf::from(dir);
        }

        if let Ok(db) = std::env::var("HELPDESK_STATE_DB") {
            self.storage.path = Some(PathBuf::from(db));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(path) = &cli.storage_path {
            tracing::debug!(path = %path, "CLI override: storage path");
            self.storage.path = Some(PathBuf::from(path));
        }

        if let crate::cli::Commands::Serve { bind, public_dir } = &cli.command {
            if let Some(bind) = bind {
                self.server.bind = bind.clone();
            }
            if let Some(dir) = public_dir {
                self.server.public_dir = dir.clone();
            }
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set. Credentials are not
    /// checked here; the AI client rejects unusable keys when it is built.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.provider.api_base).map_err(|e| {
            HelpdeskError::Config(format!(
                "provider.api_base is not a valid URL ({}): {}",
                self.provider.api_base, e
            ))
        })?;

        url::Url::parse(&self.assistant.proxy_url).map_err(|e| {
            HelpdeskError::Config(format!(
                "assistant.proxy_url is not a valid URL ({}): {}",
                self.assistant.proxy_url, e
            ))
        })?;

        if self.provider.timeout_seconds == 0 || self.assistant.timeout_seconds == 0 {
            return Err(
                HelpdeskError::Config("timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        if !(0.0..=2.0).contains(&self.assistant.temperature) {
            return Err(HelpdeskError::Config(
                "assistant.temperature must be between 0.0 and 2.0".to_string(),
            )
            .into());
        }

        if self.assistant.max_tokens == 0 {
            return Err(HelpdeskError::Config(
                "assistant.max_tokens must be greater than 0".to_string(),
            )
            .into());
        }

        if self.assistant.model.trim().is_empty() {
            return Err(
                HelpdeskError::Config("assistant.model cannot be empty".to_string()).into(),
            );
        }

        self.server.bind.parse::<SocketAddr>().map_err(|e| {
            HelpdeskError::Config(format!(
                "server.bind is not a socket address ({}): {}",
                self.server.bind, e
            ))
        })?;

        if self.server.max_upload_bytes == 0 {
            return Err(HelpdeskError::Config(
                "server.max_upload_bytes must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
