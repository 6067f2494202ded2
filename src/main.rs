use agentic_chat_mcp::Result;
use agentic_chat_mcp::commands::{
    add_document, init_store, search_documents, serve_mcp, show_status,
};
use agentic_chat_mcp::config::{get_config_dir, run_interactive_config, show_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agentic-chat-mcp")]
#[command(about = "MCP server exposing a pgvector document store and GitHub tools")]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.agentic-chat-mcp)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure database, embeddings and GitHub access
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start MCP server on stdio
    Serve,
    /// Create the document table and index if missing
    Init,
    /// Store a document
    Add {
        /// Text content of the document
        content: String,
        /// Metadata as a JSON object, e.g. '{"source": "notes"}'
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Search stored documents by meaning
    Search {
        /// Text to search for
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// Show configuration, provider health and document count
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for the MCP protocol
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir).await?;
            }
        }
        Commands::Serve => {
            serve_mcp(&config_dir).await?;
        }
        Commands::Init => {
            init_store(&config_dir).await?;
        }
        Commands::Add { content, metadata } => {
            add_document(&config_dir, &content, metadata.as_deref()).await?;
        }
        Commands::Search { query, limit } => {
            search_documents(&config_dir, &query, limit).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert!(parsed.config_dir.is_none());
        }
    }

    #[test]
    fn add_command_with_metadata() {
        let cli = Cli::try_parse_from([
            "agentic-chat-mcp",
            "add",
            "cats are mammals",
            "--metadata",
            r#"{"source": "notes"}"#,
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Add { content, metadata } = parsed.command {
                assert_eq!(content, "cats are mammals");
                assert_eq!(metadata.as_deref(), Some(r#"{"source": "notes"}"#));
            } else {
                panic!("expected add command");
            }
        }
    }

    #[test]
    fn search_limit_defaults_to_five() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "search", "felines"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search { query, limit } = parsed.command {
                assert_eq!(query, "felines");
                assert_eq!(limit, 5);
            } else {
                panic!("expected search command");
            }
        }
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "serve", "--config-dir", "/tmp/acm"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Serve));
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/acm")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["agentic-chat-mcp", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
