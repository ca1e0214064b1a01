pub mod commands;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;

#[derive(Parser)]
#[command(name = "boarding-gateway")]
#[command(about = "Boarding gateway - verifies bearer tokens and forwards requests to backend services")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the gateway (default when no command is given)")]
    Serve(commands::serve::ServeArgs),

    #[command(about = "Sign a development token with the configured secret")]
    Token(commands::token::TokenArgs),

    #[command(about = "Show the effective route table")]
    Routes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// `RUST_LOG` wins, then `LOG_LEVEL`, then debug in development and info elsewhere.
pub fn init_tracing(config: &GatewayConfig) {
    let fallback = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| if config.is_development() { "debug" } else { "info" }.to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = GatewayConfig::from_env();
    init_tracing(&config);

    match cli.command {
        None => commands::serve::handle(commands::serve::ServeArgs::default(), config).await,
        Some(Commands::Serve(args)) => commands::serve::handle(args, config).await,
        Some(Commands::Token(args)) => commands::token::handle(args, config, output_format),
        Some(Commands::Routes) => commands::routes::handle(config, output_format),
    }
}
