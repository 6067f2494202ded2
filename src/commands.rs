use anyhow::{Context, Result, bail};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::config::settings::redact_url;
use crate::embeddings::build_provider;
use crate::github::GitHubClient;
use crate::mcp::{McpServer, register_tools};
use crate::store::DocumentStore;

const SERVER_INSTRUCTIONS: &str = "Store text documents with store_document and find related ones with similarity_search. \
     search_repositories and create_issue reach GitHub when a token is configured.";

/// Load and validate configuration, then connect the document store
async fn open_store(config_dir: &Path) -> Result<(Config, DocumentStore)> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration is incomplete; run 'agentic-chat-mcp config'")?;

    let store = DocumentStore::initialize(&config)
        .await
        .context("Failed to initialize document store")?;
    Ok((config, store))
}

/// Parse `--metadata`, which must be a JSON object
fn parse_metadata(raw: Option<&str>) -> Result<serde_json::Map<String, serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str(raw).context("Invalid metadata JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("Metadata must be a JSON object"),
    }
}

/// Start MCP server on stdio
#[inline]
pub async fn serve_mcp(config_dir: &Path) -> Result<()> {
    let (config, store) = open_store(config_dir).await?;
    let store = Arc::new(store);

    // An unreachable provider only fails individual tool calls
    if let Err(e) = store.provider().health_check().await {
        warn!("Embedding provider health check failed: {}", e);
        eprintln!("Warning: embedding provider is not healthy: {}", e);
    }

    let github = if config.github.is_enabled() {
        Some(Arc::new(
            GitHubClient::new(&config.github).context("Failed to create GitHub client")?,
        ))
    } else {
        info!("No GitHub token configured, GitHub tools disabled");
        None
    };

    let server = McpServer::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        Duration::from_secs(config.server.tool_timeout_secs),
    )
    .with_instructions(SERVER_INSTRUCTIONS);
    register_tools(&server, Arc::clone(&store), github, &config.server).await;
    let server = Arc::new(server);

    // stdout carries the protocol, so everything human-readable goes to stderr
    eprintln!(
        "MCP server ready with tools: {}",
        server.tool_names().await.join(", ")
    );

    let outcome = tokio::select! {
        result = Arc::clone(&server).serve_stdio() => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Received interrupt signal, shutting down...");
            Ok(())
        }
    };

    store.close().await;

    match outcome {
        Ok(()) => {
            info!("MCP server stopped normally");
            Ok(())
        }
        Err(e) => {
            error!("MCP server error: {:#}", e);
            Err(e)
        }
    }
}

/// Create the extension, table and index if they do not exist yet
#[inline]
pub async fn init_store(config_dir: &Path) -> Result<()> {
    let (config, store) = open_store(config_dir).await?;
    let count = store.count().await.context("Failed to count documents")?;
    store.close().await;

    println!("✅ Document store ready");
    println!(
        "   Database: {}",
        redact_url(config.database.url().unwrap_or_default())
    );
    println!("   Table: {}", config.database.table_name);
    println!(
        "   Embeddings: {} {} ({} dimensions)",
        config.embedding.provider,
        config.embedding.model(),
        config.embedding.dimension()
    );
    println!("   Distance: {}", config.database.distance_metric);
    println!("   Documents: {}", count);
    Ok(())
}

/// Embed and store one document
#[inline]
pub async fn add_document(config_dir: &Path, content: &str, metadata: Option<&str>) -> Result<()> {
    if content.trim().is_empty() {
        bail!("Document content must not be empty");
    }
    let metadata = parse_metadata(metadata)?;

    let (_, store) = open_store(config_dir).await?;
    let result = store.add(content, &metadata).await;
    store.close().await;
    result.context("Failed to add document")?;

    println!("✅ Document added successfully");
    Ok(())
}

/// Print the documents nearest to `query`
#[inline]
pub async fn search_documents(config_dir: &Path, query: &str, limit: u32) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let limit = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);

    let (_, store) = open_store(config_dir).await?;
    let result = store.search(query, limit).await;
    store.close().await;
    let results = result.context("Search failed")?;

    if results.is_empty() {
        println!("No documents found.");
        println!("Use 'agentic-chat-mcp add <content>' to store one.");
        return Ok(());
    }

    println!("Found {} documents:", results.len());
    println!();
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [id {}] distance {:.4}",
            rank + 1,
            result.document.id,
            result.distance
        );
        println!("   {}", result.document.content);
        if !result.document.metadata.is_empty() {
            println!(
                "   metadata: {}",
                serde_json::Value::Object(result.document.metadata.clone())
            );
        }
    }
    Ok(())
}

/// Report configuration, provider health and document count
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📊 Agentic Chat MCP Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("⚙️  Configuration:");
    match config.validate() {
        Ok(()) => println!("   ✅ Valid ({})", config.config_file_path().display()),
        Err(e) => {
            println!("   ❌ {}", e);
            println!("   Use 'agentic-chat-mcp config' to fix it.");
            return Ok(());
        }
    }

    println!("🤖 Embedding Provider:");
    match build_provider(&config.embedding) {
        Ok(provider) => match provider.health_check().await {
            Ok(()) => println!(
                "   ✅ {}: {} ({} dimensions)",
                provider.name(),
                provider.model(),
                provider.dimension()
            ),
            Err(e) => println!("   ⚠️  {}: unhealthy - {}", provider.name(), e),
        },
        Err(e) => println!("   ❌ Failed to create provider - {}", e),
    }

    println!("🗄️  Document Store:");
    match DocumentStore::initialize(&config).await {
        Ok(store) => {
            match store.count().await {
                Ok(count) => println!(
                    "   ✅ {} documents in '{}' ({} distance)",
                    count, config.database.table_name, config.database.distance_metric
                ),
                Err(e) => println!("   ⚠️  Connected but failed to count documents - {}", e),
            }
            store.close().await;
        }
        Err(e) => println!("   ❌ {}", e),
    }

    println!("🐙 GitHub:");
    if config.github.is_enabled() {
        println!("   ✅ Token configured ({})", config.github.api_url);
    } else {
        println!("   ➖ No token, repository and issue tools disabled");
    }

    Ok(())
}
