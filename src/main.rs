use anyhow::{Context, Result};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use chatrelay::constants::{self, DEFAULT_MAX_DURATION_SECS, DEFAULT_PORT};
use chatrelay::gemini::GeminiGenerator;
use chatrelay::{chat, proxy, ProxyConfig, ResponseMode};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat proxy endpoint.
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT, help = "Port for the proxy server.")]
        port: u16,
        #[arg(
            long,
            value_enum,
            env = "CHATRELAY_MODE",
            default_value_t = ResponseMode::Buffered,
            help = "Reply once with JSON or relay text as it is generated."
        )]
        mode: ResponseMode,
        #[arg(long, help = "Generation model identifier (defaults to CHATRELAY_MODEL).")]
        model: Option<String>,
        #[arg(
            long,
            env = "CHATRELAY_SYSTEM_PROMPT",
            help = "Persona used when a request carries no systemPrompt."
        )]
        system_prompt: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_DURATION_SECS, help = "Upper bound on one chat exchange, in seconds.")]
        max_duration_secs: u64,
        #[arg(long, help = "Base URL of the generation API (defaults to CHATRELAY_API_BASE).")]
        api_base: Option<String>,
        #[arg(long, env = "GOOGLE_GENERATIVE_AI_API_KEY", hide_env_values = true, help = "Generation API key.")]
        api_key: String,
    },
    /// Chat with the assistant through a running proxy.
    Chat {
        #[arg(long, default_value_t = constants::DEFAULT_PROXY_URL.clone(), help = "Chat endpoint of the proxy.")]
        url: String,
        #[arg(long, help = "Persona override sent with every message.")]
        system_prompt: Option<String>,
    },
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,chatrelay=debug)
    // Logs go to stderr; stdout carries the chat session
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            mode,
            model,
            system_prompt,
            max_duration_secs,
            api_base,
            api_key,
        } => {
            let mut config = ProxyConfig::default()
                .with_mode(mode)
                .with_max_duration(Duration::from_secs(max_duration_secs));
            if let Some(model) = model {
                config = config.with_model(model);
            }
            if let Some(system_prompt) = system_prompt {
                config = config.with_system_prompt(system_prompt);
            }

            let api_base = api_base.unwrap_or_else(|| constants::GEMINI_API_BASE.clone());
            let generator = Arc::new(GeminiGenerator::new(api_key, api_base));

            info!("Starting chat proxy on port {}...", port);
            let mut server_handle = tokio::spawn(async move {
                if let Err(e) = proxy::start_proxy_server(port, config, generator).await {
                    error!("Chat proxy failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            // Pin the ctrl_c future to the stack so its address is stable
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut server_handle => {
                    match res {
                        Ok(_) => info!("Chat proxy task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Chat proxy task panicked: {:?}", e),
                        Err(e) => error!("Chat proxy task failed: {:?}", e),
                    }
                }
            }

            if !server_handle.is_finished() {
                info!("Aborting chat proxy task...");
                server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { url, system_prompt } => {
            chat::run_chat_session(&url, system_prompt)
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
