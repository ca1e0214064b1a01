pub mod auth;
pub mod logging;
pub mod rate_limit;
pub mod request_id;

pub use auth::authenticate;
pub use logging::log_requests;
pub use rate_limit::{client_ip, rate_limit_middleware, RateDecision, RateLimiter};
pub use request_id::request_id;
