use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

use super::settings::{redact_secret, redact_url};
use super::{Config, EmbeddingConfig, ProviderKind};
use crate::database::DistanceMetric;
use crate::embeddings::build_provider;

#[inline]
pub async fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!(
        "{}",
        style("🔧 Agentic Chat MCP Configuration Setup").bold().cyan()
    );
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Database").bold().yellow());
    eprintln!("PostgreSQL with the pgvector extension stores documents and embeddings.");
    eprintln!();
    configure_database(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Embeddings").bold().yellow());
    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("GitHub").bold().yellow());
    eprintln!("Leave the token empty to disable the repository and issue tools.");
    let token: String = Password::new()
        .with_prompt("GitHub token")
        .allow_empty_password(true)
        .interact()?;
    if !token.trim().is_empty() {
        config.github.token = Some(token);
    }

    eprintln!();
    eprintln!("{}", style("Testing embedding provider...").yellow());

    match test_embedding_provider(&config.embedding).await {
        Ok(()) => eprintln!("{}", style("✓ Embedding provider reachable!").green()),
        Err(e) => {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not reach the embedding provider").yellow()
            );
            eprintln!("  {}", e);
            eprintln!("You can continue, but storage and search will fail until it is reachable.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Database:").bold().yellow());
    match config.database.url.as_deref() {
        Some(url) => eprintln!("  URL: {}", style(redact_url(url)).cyan()),
        None => eprintln!("  URL: {}", style("not set").red()),
    }
    eprintln!("  Table: {}", style(&config.database.table_name).cyan());
    eprintln!(
        "  Distance metric: {}",
        style(config.database.distance_metric).cyan()
    );
    eprintln!(
        "  Max connections: {}",
        style(config.database.max_connections).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Embeddings:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    match config.embedding.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(config.embedding.model()).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension()).cyan());
    if let Some(key) = config.embedding.api_key.as_deref() {
        eprintln!("  API key: {}", style(redact_secret(key)).cyan());
    }

    eprintln!();
    eprintln!("{}", style("GitHub:").bold().yellow());
    eprintln!("  API: {}", style(&config.github.api_url).cyan());
    match config.github.token.as_deref() {
        Some(token) => eprintln!("  Token: {}", style(redact_secret(token)).cyan()),
        None => eprintln!("  Token: {}", style("not set (tools disabled)").dim()),
    }

    eprintln!();
    match config.validate() {
        Ok(()) => eprintln!("{}", style("✓ Configuration is valid").green()),
        Err(e) => eprintln!("{} {}", style("✗ Configuration is incomplete:").red(), e),
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_database(config: &mut Config) -> Result<()> {
    let url: String = Input::new()
        .with_prompt("PostgreSQL URL")
        .with_initial_text(config.database.url.clone().unwrap_or_default())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.starts_with("postgres://") || input.starts_with("postgresql://") {
                Ok(())
            } else {
                Err("URL must start with postgres:// or postgresql://")
            }
        })
        .interact_text()?;

    let table_name: String = Input::new()
        .with_prompt("Documents table")
        .default(config.database.table_name.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if super::settings::is_plain_identifier(input) {
                Ok(())
            } else {
                Err("Use letters, digits and underscores only")
            }
        })
        .interact_text()?;

    let metrics = [DistanceMetric::L2, DistanceMetric::Cosine];
    let default_index = metrics
        .iter()
        .position(|m| *m == config.database.distance_metric)
        .unwrap_or(0);
    let metric_index = Select::new()
        .with_prompt("Distance metric")
        .default(default_index)
        .items(&metrics)
        .interact()?;

    config.database.url = Some(url);
    config.database.table_name = table_name;
    config.database.distance_metric = metrics[metric_index];
    Ok(())
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let providers = [ProviderKind::OpenAi, ProviderKind::Ollama];
    let default_index = providers
        .iter()
        .position(|p| *p == embedding.provider)
        .unwrap_or(0);

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(&providers)
        .interact()?;

    let provider = providers[provider_index];
    if provider != embedding.provider {
        // Defaults differ per provider, so drop overrides from the previous one
        *embedding = EmbeddingConfig {
            provider,
            ..EmbeddingConfig::default()
        };
    }

    if provider == ProviderKind::OpenAi {
        let key: String = Password::new()
            .with_prompt("OpenAI API key (empty keeps the current one)")
            .allow_empty_password(true)
            .interact()?;
        if !key.trim().is_empty() {
            embedding.api_key = Some(key);
        }
    }

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model().to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension())
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 || *input > super::settings::MAX_EMBEDDING_DIMENSION {
                Err("Dimension must be between 1 and 16000")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.model = Some(model);
    embedding.dimension = Some(dimension);
    Ok(())
}

async fn test_embedding_provider(embedding: &EmbeddingConfig) -> Result<()> {
    let provider = build_provider(embedding)?;
    provider.health_check().await?;
    Ok(())
}
