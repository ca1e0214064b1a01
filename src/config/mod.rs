use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::gateway::rules::{PathRewrite, RouteRule};

/// Secret used when `JWT_SECRET` is unset. Refused in production.
pub const DEFAULT_JWT_SECRET: &str = "default_secret_change_in_production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub public_routes: Vec<String>,
    pub cors_origins: Vec<String>,
    pub cors_credentials: bool,
    /// Read the client address from `X-Forwarded-For`. Off unless the
    /// gateway really sits behind `trusted_proxy_hops` proxies.
    pub trust_proxy: bool,
    pub trusted_proxy_hops: usize,
}

impl SecurityConfig {
    /// Number of right-most `X-Forwarded-For` entries appended by our own
    /// proxies; zero when forwarded headers are ignored.
    pub fn forwarded_hops(&self) -> usize {
        if self.trust_proxy {
            self.trusted_proxy_hops.max(1)
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    pub auth_window_ms: u64,
    pub auth_max_attempts: u32,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub auth_service_url: String,
    pub users_service_url: String,
    pub ia_service_url: String,
    pub timeout_ms: u64,
    pub max_body_bytes: usize,
    /// YAML route table replacing the built-in one.
    pub routes_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT secret must not be empty")]
    EmptySecret,

    #[error("JWT_SECRET must be set to a non-default value in production")]
    DefaultSecretInProduction,

    #[error("invalid upstream URL for {service}: {source}")]
    InvalidUpstream {
        service: String,
        #[source]
        source: url::ParseError,
    },

    #[error("rate limit {0} must be greater than zero")]
    InvalidRateLimit(&'static str),

    #[error("duplicate route prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("route prefix '{0}' must start with '/'")]
    InvalidPrefix(String),

    #[error("failed to read routes file {path}: {source}")]
    RoutesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse routes file: {0}")]
    RoutesYaml(#[from] serde_yaml::Error),
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_upstream(service: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUpstream {
        service: service.to_string(),
        source,
    })
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = match lookup("NODE_ENV").or_else(|| lookup("APP_ENV")).as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(lookup)
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Server overrides
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Some(v) = lookup("API_GATEWAY_NAME") {
            self.server.name = v;
        }

        // Security overrides
        if let Some(v) = lookup("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Some(v) = lookup("PUBLIC_ROUTES") {
            self.security.public_routes = split_list(&v);
        }
        if let Some(v) = lookup("CORS_ORIGIN") {
            self.security.cors_origins = split_list(&v);
        }
        if let Some(v) = lookup("CORS_CREDENTIALS") {
            self.security.cors_credentials = v == "true";
        }
        if let Some(v) = lookup("TRUST_PROXY") {
            self.security.trust_proxy = v.parse().unwrap_or(self.security.trust_proxy);
        }
        if let Some(v) = lookup("TRUSTED_PROXY_HOPS") {
            self.security.trusted_proxy_hops = v.parse().unwrap_or(self.security.trusted_proxy_hops);
        }

        // Rate limit overrides
        if let Some(v) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = v.parse().unwrap_or(self.rate_limit.window_ms);
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = v.parse().unwrap_or(self.rate_limit.max_requests);
        }
        if let Some(v) = lookup("AUTH_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.auth_window_ms = v.parse().unwrap_or(self.rate_limit.auth_window_ms);
        }
        if let Some(v) = lookup("AUTH_RATE_LIMIT_MAX_ATTEMPTS") {
            self.rate_limit.auth_max_attempts = v.parse().unwrap_or(self.rate_limit.auth_max_attempts);
        }

        // Upstream overrides
        if let Some(v) = lookup("AUTH_SERVICE_URL") {
            self.upstream.auth_service_url = v;
        }
        if let Some(v) = lookup("USERS_SERVICE_URL") {
            self.upstream.users_service_url = v;
        }
        if let Some(v) = lookup("IA_SERVICE_URL") {
            self.upstream.ia_service_url = v;
        }
        if let Some(v) = lookup("UPSTREAM_TIMEOUT_MS") {
            self.upstream.timeout_ms = v.parse().unwrap_or(self.upstream.timeout_ms);
        }
        if let Some(v) = lookup("MAX_BODY_BYTES") {
            self.upstream.max_body_bytes = v.parse().unwrap_or(self.upstream.max_body_bytes);
        }
        if let Some(v) = lookup("GATEWAY_ROUTES_FILE") {
            self.upstream.routes_file = Some(PathBuf::from(v));
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                name: "api-gateway".to_string(),
            },
            security: SecurityConfig {
                jwt_secret: DEFAULT_JWT_SECRET.to_string(),
                public_routes: vec![
                    "/auth/login".to_string(),
                    "/auth/register".to_string(),
                    "/health".to_string(),
                    "/api-docs/*".to_string(),
                ],
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                cors_credentials: false,
                trust_proxy: false,
                trusted_proxy_hops: 1,
            },
            rate_limit: RateLimitConfig {
                window_ms: 15 * 60 * 1000,
                max_requests: 100,
                auth_window_ms: 15 * 60 * 1000,
                auth_max_attempts: 5,
                cleanup_interval_secs: 60,
            },
            upstream: UpstreamConfig {
                auth_service_url: "http://localhost:3001".to_string(),
                users_service_url: "http://localhost:3002".to_string(),
                ia_service_url: "http://localhost:3003".to_string(),
                timeout_ms: 30_000,
                max_body_bytes: 10 * 1024 * 1024, // 10MB
                routes_file: None,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.upstream.max_body_bytes = 2 * 1024 * 1024; // 2MB
        config
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment, Environment::Development)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.timeout_ms)
    }

    /// Built-in route table wired to the configured service URLs.
    pub fn default_routes(&self) -> Result<Vec<RouteRule>, ConfigError> {
        let auth = parse_upstream("auth", &self.upstream.auth_service_url)?;
        let users = parse_upstream("users", &self.upstream.users_service_url)?;
        let ia = parse_upstream("ia", &self.upstream.ia_service_url)?;

        let users_route = |resource: &str| {
            RouteRule::new(format!("/{}", resource), "users", users.clone()).rewrite(PathRewrite::ReplacePrefix {
                with: format!("/api/{}", resource),
            })
        };

        Ok(vec![
            RouteRule::new("/auth", "auth", auth).public().strict_rate_limit(),
            users_route("users"),
            users_route("clients"),
            users_route("projects"),
            RouteRule::new("/ia", "ia", ia).rewrite(PathRewrite::StripPrefix),
        ])
    }

    /// The effective route table: the YAML file when configured, else the defaults.
    pub fn routes(&self) -> Result<Vec<RouteRule>, ConfigError> {
        let rules = match &self.upstream.routes_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RoutesFile {
                    path: path.clone(),
                    source,
                })?;
                serde_yaml::from_str(&raw)?
            }
            None => self.default_routes()?,
        };

        validate_routes(&rules)?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.environment == Environment::Production && self.security.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(ConfigError::DefaultSecretInProduction);
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidRateLimit("max_requests"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidRateLimit("window_ms"));
        }
        if self.rate_limit.auth_max_attempts == 0 {
            return Err(ConfigError::InvalidRateLimit("auth_max_attempts"));
        }
        if self.rate_limit.auth_window_ms == 0 {
            return Err(ConfigError::InvalidRateLimit("auth_window_ms"));
        }
        self.routes().map(|_| ())
    }
}

fn validate_routes(rules: &[RouteRule]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !rule.prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(rule.prefix.clone()));
        }
        if !seen.insert(rule.prefix.trim_end_matches('/')) {
            return Err(ConfigError::DuplicatePrefix(rule.prefix.clone()));
        }
    }
    Ok(())
}
