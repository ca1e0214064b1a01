use chrono::{DateTime, Duration};
use clap::Args;
use serde_json::json;

use crate::auth::{sign_token, IssuedClaims, Role};
use crate::cli::OutputFormat;
use crate::config::GatewayConfig;

#[derive(Args)]
pub struct TokenArgs {
    #[arg(long, help = "Subject (user) id")]
    pub subject: String,

    #[arg(long, help = "User email")]
    pub email: String,

    #[arg(long, default_value = "USER", help = "ADMIN, CLIENT_ADMIN or USER")]
    pub role: Role,

    #[arg(long, default_value_t = 86400, help = "Lifetime in seconds")]
    pub ttl_secs: i64,
}

pub fn handle(args: TokenArgs, config: GatewayConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let claims = IssuedClaims::new(args.subject, args.email, args.role, Duration::seconds(args.ttl_secs));
    let token = sign_token(&config.security.jwt_secret, &claims)?;

    match output_format {
        OutputFormat::Json => {
            let expires_at = DateTime::from_timestamp(claims.exp, 0);
            println!(
                "{}",
                json!({ "token": token, "role": claims.role, "expires_at": expires_at })
            );
        }
        OutputFormat::Text => println!("{}", token),
    }

    Ok(())
}
