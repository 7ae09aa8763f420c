use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use dao_chat::{chat, config::ChatConfig, constants, web_server};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web server.
    Start {
        #[arg(long, env = "DAO_CHAT_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, env = "DAO_CHAT_HOST", default_value = "0.0.0.0", help = "Address to bind.")]
        host: String,
        #[arg(long, help = "Model to use instead of DAO_CHAT_MODEL.")]
        model: Option<String>,
        #[arg(long, default_value_t = constants::DEFAULT_MAX_ROUND_TRIPS, help = "Maximum tool round trips per turn.")]
        max_round_trips: usize,
        #[arg(long, default_value_t = constants::DEFAULT_TEMPERATURE, help = "Sampling temperature.")]
        temperature: f32,
        #[arg(long, default_value = "templates", help = "Directory with the HTML templates.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory with static assets.")]
        static_dir: PathBuf,
    },
    /// Chat with a running server from the terminal.
    Chat {
        #[arg(long, env = "DAO_CHAT_SERVER", default_value = "http://127.0.0.1:9900", help = "Server URL.")]
        server: String,
    },
    /// Ask a single question and print the answer.
    Ask {
        question: String,
        #[arg(long, env = "DAO_CHAT_SERVER", default_value = "http://127.0.0.1:9900", help = "Server URL.")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (MISTRAL_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,dao_chat=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = ChatConfig::from_env();

    match cli.command {
        Commands::Start {
            port,
            host,
            model,
            max_round_trips,
            temperature,
            templates,
            static_dir,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            config.max_round_trips = max_round_trips;
            config.temperature = temperature;
            config.templates_dir = templates;
            config.static_dir = static_dir;

            if config.api_key.is_empty() {
                warn!("MISTRAL_API_KEY is not set; model requests will be rejected");
            }
            info!(
                dao = %config.dao.name,
                model = %config.model,
                max_round_trips = config.max_round_trips,
                "Starting dao-chat on {}:{}",
                host,
                port
            );

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(config, &host, port).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { server } => {
            chat::run_interactive_chat(&server, config.dao)
                .await
                .context("Chat session failed")?;
        }
        Commands::Ask { question, server } => {
            chat::ask(&server, config.dao, &question)
                .await
                .context("Question failed")?;
        }
    }

    Ok(())
}
