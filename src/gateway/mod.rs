pub mod classifier;
pub mod forwarder;
pub mod headers;
pub mod health;
pub mod router;
pub mod rules;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::auth::{TokenError, TokenVerifier};
use crate::config::{ConfigError, GatewayConfig, SecurityConfig};
use crate::error::handle_panic;
use crate::middleware::rate_limit::{AUTH_LIMIT_MESSAGE, GENERAL_LIMIT_MESSAGE};
use crate::middleware::{client_ip, log_requests, rate_limit_middleware, request_id, RateLimiter};

pub use classifier::RouteClassifier;
pub use forwarder::{ForwardBody, ForwardError, ForwardedRequest, UpstreamForwarder, UpstreamOutcome};
pub use headers::TrustHeaders;
pub use rules::{PathRewrite, RouteRule, RouteTable};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

/// Everything a request needs, built once at startup and shared read-only
/// (the limiters synchronise internally).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub routes: Arc<RouteTable>,
    pub classifier: Arc<RouteClassifier>,
    pub verifier: Arc<TokenVerifier>,
    pub forwarder: Arc<UpstreamForwarder>,
    pub limiter: Arc<RateLimiter>,
    pub auth_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        routes: RouteTable,
        verifier: TokenVerifier,
        forwarder: UpstreamForwarder,
        limiter: RateLimiter,
        auth_limiter: RateLimiter,
    ) -> Self {
        let classifier = RouteClassifier::new(&config.security.public_routes);
        Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            classifier: Arc::new(classifier),
            verifier: Arc::new(verifier),
            forwarder: Arc::new(forwarder),
            limiter: Arc::new(limiter),
            auth_limiter: Arc::new(auth_limiter),
            started_at: Instant::now(),
        }
    }

    /// Wire up every collaborator from configuration.
    pub fn from_config(config: GatewayConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let routes = RouteTable::new(config.routes()?);
        let verifier = TokenVerifier::new(&config.security.jwt_secret)?;
        let forwarder = UpstreamForwarder::new(config.upstream_timeout())?;
        let limiter = RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_millis(config.rate_limit.window_ms),
            GENERAL_LIMIT_MESSAGE,
        );
        let auth_limiter = RateLimiter::new(
            config.rate_limit.auth_max_attempts,
            Duration::from_millis(config.rate_limit.auth_window_ms),
            AUTH_LIMIT_MESSAGE,
        );

        Ok(Self::new(config, routes, verifier, forwarder, limiter, auth_limiter))
    }

    /// The address every limiter and log line keys on for this request.
    pub fn client_ip(&self, request: &Request) -> IpAddr {
        client_ip(request, self.config.security.forwarded_hops())
    }

    /// Start background purging of expired rate-limit windows.
    pub fn spawn_maintenance(&self) {
        let every = Duration::from_secs(self.config.rate_limit.cleanup_interval_secs.max(1));
        self.limiter.spawn_cleanup(every);
        self.auth_limiter.spawn_cleanup(every);
    }
}

pub fn app(state: GatewayState) -> Router {
    let cors = cors_layer(&state.config.security);

    Router::new()
        // Public
        .route("/", get(health::root))
        .route("/health", get(health::health))
        // Everything else goes through the proxy pipeline
        .fallback(router::proxy)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        // Global middleware
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), log_requests))
                .layer(middleware::from_fn(request_id))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_DNS_PREFETCH_CONTROL,
                    HeaderValue::from_static("off"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let wildcard = security.cors_origins.iter().any(|o| o == "*");
    let origins = if wildcard {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            security
                .cors_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static("content-range"),
            HeaderName::from_static("x-content-range"),
        ])
        .max_age(Duration::from_secs(86400));

    // Credentials cannot be combined with a wildcard origin
    if security.cors_credentials && !wildcard {
        layer.allow_credentials(true)
    } else {
        layer
    }
}
