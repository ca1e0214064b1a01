use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::gateway::GatewayState;

/// One line per request once the response is ready; 4xx/5xx at warn.
pub async fn log_requests(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let ip = state.client_ip(&request);
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    if status >= 400 {
        tracing::warn!(%ip, user_agent = %user_agent, "{} {} - {} - {}ms", method, uri, status, duration_ms);
    } else {
        tracing::info!(%ip, user_agent = %user_agent, "{} {} - {} - {}ms", method, uri, status, duration_ms);
    }

    response
}
