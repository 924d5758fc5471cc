mod chat;
mod conversation_cmds;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opsmate_config::AppConfig;
use opsmate_exec::SshConnector;
use opsmate_llm::OllamaClient;
use opsmate_runtime::{ConversationStore, Pipeline};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "opsmate",
    version,
    about = "A safe, plain-English assistant for checking one Linux server"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat session (default).
    Chat {
        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Send one message and print the reply.
    Ask {
        message: Vec<String>,
        #[arg(long)]
        conversation: Option<String>,
        /// Print the full turn as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show which action a message would map to, without running it.
    Route { message: Vec<String> },
    /// List the actions the assistant can take.
    Tools,
    /// Inspect stored conversations.
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Show or write the configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConversationCommands {
    /// Most recently updated first.
    List,
    /// Print a transcript and its tool runs.
    Show { id: String },
    /// Give a conversation a new title (at most 200 characters).
    Rename {
        id: String,
        #[arg(required = true)]
        title: Vec<String>,
    },
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (file plus environment) as TOML.
    Show,
    /// Write the defaults to the config path.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Chat { conversation: None }) {
        Commands::Chat { conversation } => {
            let pipeline = build_pipeline(&config)?;
            chat::run_line_session(&pipeline, conversation).await?;
        }
        Commands::Ask {
            message,
            conversation,
            json,
        } => {
            let pipeline = build_pipeline(&config)?;
            let reply = pipeline
                .handle_turn(conversation.as_deref(), &message.join(" "))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("{}", reply.text);
                eprintln!("(conversation {})", reply.conversation_id);
            }
        }
        Commands::Route { message } => {
            let text = message.join(" ");
            if text.trim().is_empty() {
                bail!("nothing to route");
            }
            let pipeline = build_pipeline(&config)?;
            let preview = pipeline.preview(&text).await;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::Tools => print_tools(),
        Commands::Conversations { command } => {
            let store = ConversationStore::new(&config.storage.data_dir);
            match command {
                ConversationCommands::List => conversation_cmds::run_list(&store)?,
                ConversationCommands::Show { id } => conversation_cmds::run_show(&store, &id)?,
                ConversationCommands::Rename { id, title } => {
                    conversation_cmds::run_rename(&store, &id, &title.join(" "))?
                }
                ConversationCommands::Delete { id, yes } => {
                    conversation_cmds::run_delete(&store, &id, yes)?
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => print!("{}", config.to_toml()?),
            ConfigCommands::Init { force } => init_config(&cli.config, force)?,
        },
    }

    Ok(())
}

fn build_pipeline(config: &AppConfig) -> Result<Pipeline<OllamaClient, SshConnector>> {
    let client = OllamaClient::new(&config.llm)?;
    let connector = SshConnector::new(config.remote.clone());
    Ok(Pipeline::new(config, client, connector))
}

fn print_tools() {
    let specs = opsmate_tools::vocabulary();
    println!("── actions ──────────────────────────────────────────");
    for spec in &specs {
        let mode = if spec.metadata.read_only { "read" } else { "write" };
        println!("  {} [{}/{}] - {}", spec.name, spec.metadata.group, mode, spec.description);
        for p in &spec.params {
            println!(
                "      {} [{}] - {}",
                p.name,
                if p.required { "required" } else { "optional" },
                p.description
            );
        }
    }
    println!("  ({} actions total)", specs.len());
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    AppConfig::default().save_to(path)?;
    println!("wrote {}", path.display());
    Ok(())
}
