//! Caller identity.
//!
//! Authentication happens in front of this service: the authenticating
//! proxy forwards the user id in the `x-user-id` header. Requests without it
//! are rejected.

use super::errors::ApiError;
use super::state::ServerState;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

pub const HEADER_USER_ID: &str = "x-user-id";
const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
}

fn extract_user_id_from_headers(parts: &Parts) -> Option<String> {
    let raw = parts.headers.get(HEADER_USER_ID)?.to_str().ok()?.trim();
    if raw.is_empty() || raw.len() > MAX_USER_ID_LEN {
        return None;
    }
    Some(raw.to_string())
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        match extract_user_id_from_headers(parts) {
            Some(user_id) => Ok(Session { user_id }),
            None => {
                debug!("No usable {} header on {}", HEADER_USER_ID, parts.uri.path());
                Err(ApiError::Unauthorized)
            }
        }
    }
}
