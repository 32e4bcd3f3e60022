//! API-key authentication.
//!
//! Every protected endpoint requires an `x-proview-key` header equal to the
//! configured key.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-proview-key";

/// Generate a random 32-character hex key.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// Read the API key from `env_var`, or generate one.
///
/// Returns the key and whether it was generated.
pub fn resolve_api_key(env_var: &str) -> (String, bool) {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => (key.trim().to_string(), false),
        _ => (generate_token(), true),
    }
}

/// Middleware that rejects requests without a valid `x-proview-key`.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let provided = req.headers().get(API_KEY_HEADER).map(|v| v.to_str());

    match provided {
        Some(Ok(key)) if key == state.api_key => next.run(req).await,
        Some(Ok(_)) => {
            tracing::warn!(path = %req.uri().path(), "Rejected request with invalid API key");
            ApiError::Unauthorized("Invalid API key".to_string()).into_response()
        }
        Some(Err(_)) => ApiError::Unauthorized("Invalid API key header encoding".to_string()).into_response(),
        None => ApiError::Unauthorized(format!("Missing {} header", API_KEY_HEADER)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_resolve_api_key_generates_when_unset() {
        let (key, generated) = resolve_api_key("PROVIEW_TEST_KEY_THAT_IS_NEVER_SET");
        assert!(generated);
        assert_eq!(key.len(), 32);
    }
}
