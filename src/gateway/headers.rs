use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::auth::Claims;

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");
pub const X_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers only the gateway may set. Client-supplied copies are always dropped.
pub const TRUST_HEADERS: [HeaderName; 3] = [X_USER_ID, X_USER_EMAIL, X_USER_ROLE];

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Trust headers derived from verified claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustHeaders {
    pub user_id: HeaderValue,
    pub email: HeaderValue,
    pub role: HeaderValue,
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

impl TrustHeaders {
    pub fn project(claims: &Claims) -> Self {
        Self {
            user_id: header_value(&claims.subject_id),
            email: header_value(&claims.email),
            role: HeaderValue::from_static(claims.role.as_str()),
        }
    }

    /// Replace any existing trust headers with these values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_USER_ID, self.user_id.clone());
        headers.insert(X_USER_EMAIL, self.email.clone());
        headers.insert(X_USER_ROLE, self.role.clone());
    }
}

/// True when the client asked for a protocol switch (websocket and friends).
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Headers to send upstream: everything the client sent minus hop-by-hop
/// headers, `host` and the trust headers. Upgrade requests keep their
/// `connection` / `upgrade` pair.
pub fn upstream_request_headers(inbound: &HeaderMap, upgrade: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        let lower = name.as_str();
        if lower == "host" || HOP_BY_HOP.contains(&lower) || TRUST_HEADERS.contains(name) {
            continue;
        }
        if lower == "upgrade" && !upgrade {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    }

    headers
}

/// Headers relayed back to the client from the upstream response.
pub fn client_response_headers(upstream: &HeaderMap, upgrade: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        let lower = name.as_str();
        let keep_for_upgrade = upgrade && (lower == "connection" || lower == "upgrade");
        if !keep_for_upgrade && (HOP_BY_HOP.contains(&lower) || lower == "upgrade") {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers
}
