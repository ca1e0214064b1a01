use axum::http::{header, HeaderMap};

use crate::auth::{AuthFailure, Claims, TokenVerifier};
use crate::error::ApiError;

/// Verify the bearer token on a protected request.
pub fn authenticate(verifier: &TokenVerifier, headers: &HeaderMap, path: &str) -> Result<Claims, ApiError> {
    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    match verifier.verify(auth_header) {
        Ok(claims) => {
            tracing::info!("User {} authenticated successfully", claims.subject_id);
            Ok(claims)
        }
        Err(AuthFailure::Missing) => {
            tracing::warn!("Authentication failed: No token provided for {}", path);
            Err(ApiError::AuthMissing)
        }
        Err(failure) => {
            tracing::error!("JWT verification failed for {}: {}", path, failure);
            Err(failure.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign_token, IssuedClaims, Role};
    use axum::http::HeaderValue;
    use chrono::Duration;

    #[test]
    fn maps_verifier_results() {
        let verifier = TokenVerifier::new("secret").unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(authenticate(&verifier, &headers, "/users").unwrap_err(), ApiError::AuthMissing);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert_eq!(authenticate(&verifier, &headers, "/users").unwrap_err(), ApiError::AuthInvalid);

        let token = sign_token(
            "secret",
            &IssuedClaims::new("u9", "u9@example.com", Role::User, Duration::minutes(5)),
        )
        .unwrap();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        assert_eq!(authenticate(&verifier, &headers, "/users").unwrap().subject_id, "u9");
    }
}
