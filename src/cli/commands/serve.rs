use std::net::SocketAddr;

use anyhow::Context;
use clap::Args;

use crate::config::{GatewayConfig, DEFAULT_JWT_SECRET};
use crate::gateway::{app, GatewayState};

#[derive(Args, Default)]
pub struct ServeArgs {
    #[arg(long, help = "Bind address (overrides HOST)")]
    pub host: Option<String>,

    #[arg(long, help = "Listen port (overrides PORT)")]
    pub port: Option<u16>,
}

pub async fn handle(args: ServeArgs, mut config: GatewayConfig) -> anyhow::Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if config.security.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("JWT_SECRET is not set; using the built-in development secret");
    }

    let name = config.server.name.clone();
    let environment = config.environment;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let state = GatewayState::from_config(config).context("invalid gateway configuration")?;
    for rule in state.routes.rules() {
        tracing::info!(
            "Proxy {} -> {} ({}, {}{})",
            rule.prefix,
            rule.upstream,
            rule.service,
            rule.rewrite.describe(),
            if rule.requires_auth { ", auth" } else { "" }
        );
    }
    state.spawn_maintenance();

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("{} running on http://{}", name, bind_addr);
    tracing::info!("Environment: {}", environment.as_str());

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
