//! DocuMind CLI
//!
//! Command-line interface for DocuMind - ask questions about your documents.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use documind_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "documind")]
#[command(about = "DocuMind - Question answering over your documents")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Check that the API is up
    Health,
    /// Manage conversations
    #[command(alias = "conv")]
    Conversation {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Ask a question, streaming the answer
    Ask {
        /// Conversation ID
        conversation_id: String,
        /// The question
        question: String,
    },
    /// Manage documents
    #[command(alias = "doc")]
    Document {
        #[command(subcommand)]
        command: DocumentCommands,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, ws_url, chat_transport, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// Start a new conversation
    New {
        /// Conversation title
        #[arg(short = 'T', long)]
        title: Option<String>,
    },
    /// List conversations
    #[command(alias = "ls")]
    List,
    /// Show a conversation with its messages
    Show {
        /// Conversation ID
        id: String,
    },
    /// Delete a conversation
    #[command(alias = "rm")]
    Delete {
        /// Conversation ID
        id: String,
    },
}

#[derive(Subcommand)]
enum DocumentCommands {
    /// List documents
    #[command(alias = "ls")]
    List {
        /// Page number
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Documents per page
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Show document details
    Show {
        /// Document ID
        id: String,
    },
    /// Upload a document for processing
    Upload {
        /// File to upload
        path: PathBuf,
        /// Follow processing until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Delete a document
    #[command(alias = "rm")]
    Delete {
        /// Document ID
        id: String,
    },
    /// Follow processing of a document
    Watch {
        /// Document ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands must work even when the stored config is invalid
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config = Config::load_with_cli_override(config_path)?;
    init_logging(&config);

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Health => commands::health::check(&config, &output).await,
        Commands::Conversation { command } => match command {
            ConversationCommands::New { title } => {
                commands::conversation::create(&config, title, &output).await
            }
            ConversationCommands::List => commands::conversation::list(&config, &output).await,
            ConversationCommands::Show { id } => {
                commands::conversation::show(&config, id, &output).await
            }
            ConversationCommands::Delete { id } => {
                commands::conversation::delete(&config, id, &output).await
            }
        },
        Commands::Ask {
            conversation_id,
            question,
        } => commands::ask::ask(&config, conversation_id, question, &output).await,
        Commands::Document { command } => match command {
            DocumentCommands::List { page, page_size } => {
                commands::document::list(&config, page, page_size, &output).await
            }
            DocumentCommands::Show { id } => commands::document::show(&config, id, &output).await,
            DocumentCommands::Upload { path, watch } => {
                commands::document::upload(&config, path, watch, &output).await
            }
            DocumentCommands::Delete { id } => {
                commands::document::delete(&config, id, &output).await
            }
            DocumentCommands::Watch { id } => commands::document::watch(&config, id, &output).await,
        },
    }
}

/// Initialize logging
///
/// Only logs if DOCUMIND_LOG (or RUST_LOG) is set. Logs go to
/// config.log_file when set, stderr otherwise.
fn init_logging(config: &Config) {
    let Some(log_level) = std::env::var("DOCUMIND_LOG")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
    else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "documind_core={},documind_cli={}",
        log_level, log_level
    ));

    match config.log_file {
        Some(ref log_path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
