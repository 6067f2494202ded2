use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("GitHub error: {0}")]
    GitHub(#[from] github::GitHubError),

    #[error("MCP error: {0}")]
    Mcp(#[from] mcp::McpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod github;
pub mod mcp;
pub mod store;
