use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use sysinfo::System;

use super::GatewayState;

const MB: u64 = 1024 * 1024;

/// GET / - gateway banner
pub async fn root(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": format!("Welcome to {}", state.config.server.name),
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/api-docs"
    }))
}

/// GET /health - liveness, uptime and process memory. Never touches upstreams.
pub async fn health(State(state): State<GatewayState>) -> Json<Value> {
    let (used, total) = process_memory();

    Json(json!({
        "success": true,
        "status": "ok",
        "gateway": state.config.server.name,
        "environment": state.config.environment.as_str(),
        "timestamp": chrono::Utc::now(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "memory": {
            "used": used / MB,
            "total": total / MB,
            "unit": "MB"
        }
    }))
}

/// Resident and virtual memory of this process in bytes.
fn process_memory() -> (u64, u64) {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return (0, 0);
    };

    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| (process.memory(), process.virtual_memory()))
        .unwrap_or((0, 0))
}
