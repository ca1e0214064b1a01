use boarding_gateway::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so local runs pick up JWT_SECRET and the service URLs
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = boarding_gateway::cli::run(cli).await {
        match std::env::var("GATEWAY_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
            _ => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }

    Ok(())
}
