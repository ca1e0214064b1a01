use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use futures::{SinkExt, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use thiserror::Error;

use super::headers::{self, TrustHeaders};
use super::rules::RouteRule;

/// Body of a forwarded request.
pub enum ForwardBody {
    Empty,
    /// Already-parsed JSON, re-serialised so `Content-Length` is exact.
    Json(Value),
    /// Anything else, streamed through without buffering.
    Stream(Body),
}

/// Request handed to the forwarder. Owned for the duration of one proxy call.
pub struct ForwardedRequest {
    pub method: Method,
    /// Inbound path before the route's rewrite is applied.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: ForwardBody,
    /// Present for protected routes; replaces any client-supplied values.
    pub trust: Option<TrustHeaders>,
    /// Inbound half of a protocol upgrade, if the client asked for one.
    pub on_upgrade: Option<OnUpgrade>,
}

/// What happened when the request was sent upstream.
pub enum UpstreamOutcome {
    Success {
        status: StatusCode,
        headers: HeaderMap,
        body: Body,
    },
    Timeout,
    ConnectionRefused,
    OtherNetworkError(String),
}

impl std::fmt::Debug for UpstreamOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamOutcome::Success { status, .. } => write!(f, "Success({})", status),
            UpstreamOutcome::Timeout => write!(f, "Timeout"),
            UpstreamOutcome::ConnectionRefused => write!(f, "ConnectionRefused"),
            UpstreamOutcome::OtherNetworkError(detail) => write!(f, "OtherNetworkError({})", detail),
        }
    }
}

/// Local failures that happen before anything reaches the network.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to serialize request body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Issues proxied requests to upstream services. No retries: forwarded
/// verbs may be mutating.
pub struct UpstreamForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .no_gzip()
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(ForwardError::Client)?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn forward(
        &self,
        rule: &RouteRule,
        request: ForwardedRequest,
    ) -> Result<UpstreamOutcome, ForwardError> {
        let ForwardedRequest {
            method,
            path,
            query,
            headers: inbound_headers,
            body,
            trust,
            on_upgrade,
        } = request;

        let target = rule.target_url(&path, query.as_deref());
        let upgrade = on_upgrade.is_some();

        let mut headers = headers::upstream_request_headers(&inbound_headers, upgrade);
        if let Some(trust) = &trust {
            trust.apply(&mut headers);
        }

        let body = match body {
            ForwardBody::Empty => None,
            ForwardBody::Json(value) => {
                let bytes = serde_json::to_vec(&value)?;
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Some(reqwest::Body::from(bytes))
            }
            ForwardBody::Stream(body) => Some(stream_body(body)),
        };

        tracing::debug!("Proxy request: {} {} -> {}", method, path, target);

        let mut builder = self.client.request(method, target).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Err(_) => return Ok(UpstreamOutcome::Timeout),
            Ok(Err(e)) => return Ok(classify(&e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        tracing::info!("Response from {}: {}", rule.service, status.as_u16());

        if status == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(on_upgrade) = on_upgrade {
                let headers = headers::client_response_headers(response.headers(), true);
                let service = rule.service.clone();
                tokio::spawn(async move {
                    if let Err(e) = bridge_upgrade(on_upgrade, response).await {
                        tracing::warn!("Upgraded connection to {} closed with error: {}", service, e);
                    }
                });

                return Ok(UpstreamOutcome::Success {
                    status,
                    headers,
                    body: Body::empty(),
                });
            }
        }

        let headers = headers::client_response_headers(response.headers(), false);
        Ok(UpstreamOutcome::Success {
            status,
            headers,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

fn classify(error: &reqwest::Error) -> UpstreamOutcome {
    if error.is_timeout() {
        UpstreamOutcome::Timeout
    } else if error.is_connect() {
        UpstreamOutcome::ConnectionRefused
    } else {
        UpstreamOutcome::OtherNetworkError(error.to_string())
    }
}

/// Feed the inbound body to reqwest through a channel. The axum body is not
/// `Sync`, so it cannot be handed to `wrap_stream` directly.
fn stream_body(body: Body) -> reqwest::Body {
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let item = chunk.map_err(std::io::Error::other);
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(rx)
}

async fn bridge_upgrade(on_upgrade: OnUpgrade, response: reqwest::Response) -> anyhow::Result<()> {
    let mut upstream = response.upgrade().await?;
    let mut client = TokioIo::new(on_upgrade.await?);
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
