// Configuration management module
// TOML file in the config directory, environment overrides, interactive setup

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, DatabaseConfig, EmbeddingConfig, GitHubConfig, ProviderKind,
    ServerConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
