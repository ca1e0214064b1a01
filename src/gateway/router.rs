// Proxy pipeline for every path that is not served locally:
// resolve route -> auth-attempt limit -> classify -> verify -> forward -> relay.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
};

use super::forwarder::{ForwardBody, ForwardedRequest, UpstreamOutcome};
use super::headers::{self, TrustHeaders};
use super::rules::RouteRule;
use super::GatewayState;
use crate::error::ApiError;
use crate::middleware::authenticate;

pub async fn proxy(State(state): State<GatewayState>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    // Upstream URLs resolve `.`/`..`, so such a path could be classified as
    // one route and delivered to another.
    if has_dot_segment(&path) {
        tracing::warn!("Rejected path with dot segments: {}", path);
        return ApiError::InvalidPath(path).into_response();
    }

    let Some(rule) = state.routes.resolve(&path) else {
        tracing::debug!("No route for {} {}", request.method(), path);
        return ApiError::RouteNotFound(path).into_response();
    };

    // Login attempts are counted on arrival and handed back if they succeed.
    let attempt = if rule.strict_rate_limit {
        let ip = state.client_ip(&request);
        let decision = state.auth_limiter.check(ip);
        if !decision.allowed {
            tracing::warn!("Auth rate limit exceeded for IP: {}", ip);
            return state.auth_limiter.reject(&decision);
        }
        Some(decision)
    } else {
        None
    };

    let response = match dispatch(&state, rule, &path, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    if let Some(decision) = &attempt {
        if response.status().as_u16() < 400 {
            state.auth_limiter.release(decision);
        }
    }

    response
}

async fn dispatch(
    state: &GatewayState,
    rule: &RouteRule,
    path: &str,
    request: Request,
) -> Result<Response, ApiError> {
    let trust = if rule.requires_auth && !state.classifier.is_public(path) {
        let claims = authenticate(&state.verifier, request.headers(), path)?;
        Some(TrustHeaders::project(&claims))
    } else {
        None
    };

    let forwarded = into_forwarded(
        request,
        trust,
        state.config.upstream.max_body_bytes,
        state.config.is_development(),
    )
    .await?;

    let outcome = state.forwarder.forward(rule, forwarded).await.map_err(|e| {
        tracing::error!("Failed to prepare request for {}: {}", rule.service, e);
        ApiError::internal_server_error("Failed to forward request")
    })?;

    relay(state, rule, outcome)
}

fn relay(state: &GatewayState, rule: &RouteRule, outcome: UpstreamOutcome) -> Result<Response, ApiError> {
    let service = rule.service.clone();
    let expose = state.config.is_development();

    match outcome {
        UpstreamOutcome::Success { status, headers, body } => {
            let mut response = Response::new(body);
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            Ok(response)
        }
        UpstreamOutcome::Timeout => {
            tracing::error!("Proxy error for {}: upstream timed out", service);
            let detail = expose.then(|| {
                format!("no response within {}ms", state.forwarder.timeout().as_millis())
            });
            Err(ApiError::UpstreamTimeout { service, detail })
        }
        UpstreamOutcome::ConnectionRefused => {
            tracing::error!("Proxy error for {}: connection refused", service);
            let detail = expose.then(|| format!("could not connect to {}", rule.upstream));
            Err(ApiError::UpstreamUnreachable { service, detail })
        }
        UpstreamOutcome::OtherNetworkError(message) => {
            tracing::error!("Proxy error for {}: {}", service, message);
            Err(ApiError::UpstreamOtherError {
                service,
                detail: expose.then_some(message),
            })
        }
    }
}

/// True if any segment is `.` or `..`, literally or percent-encoded.
/// Backslashes count as separators since URL parsing treats them that way.
fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn has_body(headers: &HeaderMap) -> bool {
    content_length(headers).map(|n| n > 0).unwrap_or(false)
        || headers.contains_key(header::TRANSFER_ENCODING)
}

/// Turn the inbound request into what the forwarder sends upstream.
async fn into_forwarded(
    mut request: Request,
    trust: Option<TrustHeaders>,
    max_body_bytes: usize,
    expose_detail: bool,
) -> Result<ForwardedRequest, ApiError> {
    let upgrade = headers::is_upgrade_request(request.headers());
    let on_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));

    let (parts, body) = request.into_parts();
    let rewrites_body = matches!(parts.method, Method::POST | Method::PUT | Method::PATCH);

    let body = if upgrade || !has_body(&parts.headers) {
        ForwardBody::Empty
    } else if rewrites_body && is_json(&parts.headers) {
        read_json(body, &parts.headers, max_body_bytes, expose_detail).await?
    } else {
        ForwardBody::Stream(body)
    };

    Ok(ForwardedRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        trust,
        on_upgrade,
    })
}

/// Parse error text goes in the envelope only when `expose_detail` is set.
async fn read_json(
    body: Body,
    headers: &HeaderMap,
    limit: usize,
    expose_detail: bool,
) -> Result<ForwardBody, ApiError> {
    if content_length(headers).is_some_and(|n| n > limit) {
        return Err(ApiError::PayloadTooLarge(limit));
    }

    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(limit))?;

    if bytes.is_empty() {
        return Ok(ForwardBody::Empty);
    }

    let value = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::InvalidJson(expose_detail.then(|| e.to_string())))?;
    Ok(ForwardBody::Json(value))
}
