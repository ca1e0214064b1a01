#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use boarding_gateway::auth::{sign_token, IssuedClaims, Role};
use boarding_gateway::config::GatewayConfig;
use boarding_gateway::{app, GatewayState};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const TEST_SECRET: &str = "integration-test-secret";

/// What the fake backend saw for one request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

struct MockState {
    hits: Mutex<Vec<Recorded>>,
    status: AtomicU16,
    delay_ms: AtomicU64,
}

/// Fake backend service: records every request and answers with a JSON echo.
pub struct MockUpstream {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn spawn() -> Result<Self> {
        let state = Arc::new(MockState {
            hits: Mutex::new(Vec::new()),
            status: AtomicU16::new(200),
            delay_ms: AtomicU64::new(0),
        });

        let router = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            state,
        })
    }

    /// Status code returned for every subsequent request.
    pub fn respond_with(&self, status: StatusCode) {
        self.state.status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Hold every subsequent response for `delay`.
    pub fn respond_after(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hits(&self) -> Vec<Recorded> {
        self.state.hits.lock().unwrap().clone()
    }

    pub fn last(&self) -> Recorded {
        self.hits().pop().expect("upstream was not called")
    }
}

async fn record(State(state): State<Arc<MockState>>, mut request: Request) -> Response {
    // Protocol switch: echo whatever arrives on the upgraded stream
    let on_upgrade = request
        .headers()
        .contains_key(header::UPGRADE)
        .then(|| hyper::upgrade::on(&mut request));

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    state.hits.lock().unwrap().push(Recorded {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        body,
    });

    if let Some(on_upgrade) = on_upgrade {
        let protocol = parts.headers[header::UPGRADE].clone();
        tokio::spawn(async move {
            if let Ok(upgraded) = on_upgrade.await {
                let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            }
        });

        return Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, protocol)
            .body(Body::empty())
            .unwrap();
    }

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    let mut response = (
        status,
        Json(json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert("x-upstream", "mock".parse().unwrap());
    response
}

/// A gateway running in-process on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send `request` verbatim over a fresh connection and return everything
    /// the gateway writes back. Lets a test use request targets that an HTTP
    /// client would normalise first.
    pub async fn raw(&self, request: &str) -> Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .context("gateway did not close the connection")??;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

/// Status line of a raw HTTP response, e.g. `HTTP/1.1 400 Bad Request`.
pub fn status_line(raw: &str) -> &str {
    raw.lines().next().unwrap_or("")
}

/// Start a gateway whose services all point at `upstream_url`. `overrides`
/// are applied on top as if they were environment variables.
pub async fn spawn_gateway(upstream_url: &str, overrides: &[(&str, &str)]) -> Result<TestGateway> {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("JWT_SECRET".into(), TEST_SECRET.into());
    env.insert("AUTH_SERVICE_URL".into(), upstream_url.into());
    env.insert("USERS_SERVICE_URL".into(), upstream_url.into());
    env.insert("IA_SERVICE_URL".into(), upstream_url.into());
    env.insert("UPSTREAM_TIMEOUT_MS".into(), "2000".into());
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }

    let config = GatewayConfig::from_lookup(|key| env.get(key).cloned());
    let state = GatewayState::from_config(config).context("gateway config rejected")?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    Ok(TestGateway {
        addr,
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
    })
}

/// Mock upstream plus a gateway in front of it.
pub async fn ensure_stack(overrides: &[(&str, &str)]) -> Result<(MockUpstream, TestGateway)> {
    let upstream = MockUpstream::spawn().await?;
    let gateway = spawn_gateway(&upstream.base_url, overrides).await?;
    Ok((upstream, gateway))
}

pub fn token(id: &str, email: &str, role: Role) -> String {
    token_with_ttl(id, email, role, chrono::Duration::hours(1))
}

pub fn token_with_ttl(id: &str, email: &str, role: Role, ttl: chrono::Duration) -> String {
    sign_token(TEST_SECRET, &IssuedClaims::new(id, email, role, ttl)).expect("sign test token")
}

pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
