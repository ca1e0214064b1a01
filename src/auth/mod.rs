use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tokens are always HMAC-SHA256 signed with the shared secret.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Closed set of roles the dashboard knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    ClientAdmin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::ClientAdmin => "CLIENT_ADMIN",
            Role::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "CLIENT_ADMIN" => Ok(Role::ClientAdmin),
            "USER" => Ok(Role::User),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Verified identity carried by a bearer token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: String,
    pub email: String,
    pub role: Role,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Why a request could not be authenticated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no bearer token provided")]
    Missing,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT secret is not configured")]
    EmptySecret,

    #[error("JWT generation error: {0}")]
    Generation(#[from] jsonwebtoken::errors::Error),
}

/// Raw token payload as issued by the auth service.
///
/// The auth service signs `{id, email}`; older tokens carry `userId`, and
/// standard tooling emits `sub`. Ids may be strings or numbers.
#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "userId")]
    user_id: Option<Value>,
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
    exp: i64,
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

impl TryFrom<TokenPayload> for Claims {
    type Error = AuthFailure;

    fn try_from(payload: TokenPayload) -> Result<Self, Self::Error> {
        let subject_id = [&payload.id, &payload.user_id, &payload.sub]
            .into_iter()
            .flatten()
            .find_map(id_to_string)
            .ok_or_else(|| AuthFailure::Invalid("token has no subject id".to_string()))?;

        let email = payload
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AuthFailure::Invalid("token has no email".to_string()))?;

        let role = match payload.role.as_deref() {
            None | Some("") => Role::default(),
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|e| AuthFailure::Invalid(e.to_string()))?,
        };

        let expires_at = timestamp(payload.exp)
            .ok_or_else(|| AuthFailure::Invalid("token expiry out of range".to_string()))?;

        Ok(Claims {
            subject_id,
            email,
            role,
            issued_at: payload.iat.and_then(timestamp),
            expires_at,
        })
    }
}

/// Verifies bearer tokens against the shared secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verify the value of an `Authorization` header.
    pub fn verify(&self, auth_header: Option<&str>) -> Result<Claims, AuthFailure> {
        let token = extract_bearer(auth_header).ok_or(AuthFailure::Missing)?;
        self.verify_token(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthFailure> {
        let data = decode::<TokenPayload>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                _ => AuthFailure::Invalid(e.to_string()),
            },
        )?;

        Claims::try_from(data.claims)
    }
}

/// Pull the token out of `Bearer <token>`. The scheme is case-insensitive.
pub fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
    let value = auth_header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Payload signed by [`sign_token`]; mirrors what the auth service issues.
#[derive(Debug, Serialize)]
pub struct IssuedClaims {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl IssuedClaims {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

pub fn sign_token(secret: &str, claims: &IssuedClaims) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    Ok(encode(&Header::new(SIGNING_ALGORITHM), claims, &encoding_key)?)
}
