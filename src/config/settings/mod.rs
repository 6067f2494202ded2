
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::DistanceMetric;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_OPENAI_DIMENSION: u32 = 1536;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text:latest";
pub const DEFAULT_OLLAMA_DIMENSION: u32 = 768;
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Largest vector column pgvector accepts.
pub const MAX_EMBEDDING_DIMENSION: u32 = 16_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub table_name: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub distance_metric: DistanceMetric,
    pub create_index: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            table_name: "documents".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 10,
            distance_metric: DistanceMetric::default(),
            create_index: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub dimension: Option<u32>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            api_key: None,
            model: None,
            dimension: None,
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub tool_timeout_secs: u64,
    pub default_search_limit: u32,
    pub max_search_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            default_search_limit: 5,
            max_search_limit: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid database URL: {0} (must start with postgres:// or postgresql://)")]
    InvalidDatabaseUrl(String),
    #[error("Invalid table name: {0} (letters, digits and underscores only, not starting with a digit)")]
    InvalidTableName(String),
    #[error("Invalid max connections: {0} (must be between 1 and 1000)")]
    InvalidMaxConnections(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 16000)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout for {0}: must be greater than 0 seconds")]
    InvalidTimeout(&'static str),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid search limits: default {0}, max {1} (need 1 <= default <= max)")]
    InvalidSearchLimits(u32, u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.agentic-chat-mcp`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".agentic-chat-mcp"))
            .or_else(|| dirs::config_dir().map(|dir| dir.join("agentic-chat-mcp")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Read `config.toml` from `config_dir` if present, then apply environment overrides.
    ///
    /// Validation is left to the caller so `config --show` can display a
    /// partially filled configuration.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read `config.toml` from `config_dir` without looking at the environment
    #[inline]
    pub fn load_file<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        Ok(config)
    }

    /// Environment variables win over the file. `lookup` is `std::env::var` outside tests.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        match self.embedding.provider {
            ProviderKind::OpenAi => {
                if let Some(key) = lookup("OPENAI_API_KEY") {
                    self.embedding.api_key = Some(key);
                }
            }
            ProviderKind::Ollama => {
                if let Some(host) = lookup("OLLAMA_HOST") {
                    self.embedding.base_url = Some(host);
                }
            }
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(api_url) = lookup("GITHUB_API_URL") {
            self.github.api_url = api_url;
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.embedding.validate()?;
        self.github.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("database.url (or DATABASE_URL)"))?;

        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ConfigError::InvalidDatabaseUrl(redact_url(url)));
        }

        if !is_plain_identifier(&self.table_name) {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }

        if self.max_connections == 0 || self.max_connections > 1000 {
            return Err(ConfigError::InvalidMaxConnections(self.max_connections));
        }

        if self.acquire_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("database.acquire_timeout_secs"));
        }

        Ok(())
    }

    pub fn url(&self) -> Result<&str, ConfigError> {
        self.url
            .as_deref()
            .ok_or(ConfigError::Missing("database.url (or DATABASE_URL)"))
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.model().trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model().to_string()));
        }

        let dimension = self.dimension();
        if dimension == 0 || dimension > MAX_EMBEDDING_DIMENSION {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }

        if self.provider == ProviderKind::OpenAi
            && self.api_key.as_deref().is_none_or(|key| key.trim().is_empty())
        {
            return Err(ConfigError::Missing("embedding.api_key (or OPENAI_API_KEY)"));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("embedding.timeout_secs"));
        }

        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.base_url.as_deref().unwrap_or(match self.provider {
            ProviderKind::OpenAi => DEFAULT_OPENAI_URL,
            ProviderKind::Ollama => DEFAULT_OLLAMA_URL,
        });
        parse_http_url(raw)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.provider {
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
            ProviderKind::Ollama => DEFAULT_OLLAMA_MODEL,
        })
    }

    pub fn dimension(&self) -> u32 {
        self.dimension.unwrap_or(match self.provider {
            ProviderKind::OpenAi => DEFAULT_OPENAI_DIMENSION,
            ProviderKind::Ollama => DEFAULT_OLLAMA_DIMENSION,
        })
    }
}

impl GitHubConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_http_url(&self.api_url)?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("github.timeout_secs"));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("server.tool_timeout_secs"));
        }
        if self.default_search_limit == 0 || self.default_search_limit > self.max_search_limit {
            return Err(ConfigError::InvalidSearchLimits(
                self.default_search_limit,
                self.max_search_limit,
            ));
        }
        Ok(())
    }
}

fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

/// Table names are spliced into SQL, so only bare identifiers are accepted.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip the password from a connection string before it reaches logs or the terminal.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}

/// Show only the last four characters of a secret.
pub fn redact_secret(secret: &str) -> String {
    let visible: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}
