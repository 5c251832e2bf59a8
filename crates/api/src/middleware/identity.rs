//! Caller identity extractor.
//!
//! Authentication happens upstream; this layer only reads the already
//! established user id from the `x-user-id` header, or from a `user_id`
//! query parameter for browser WebSocket upgrades that cannot set headers.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use docpipe_core::error::CoreError;
use docpipe_core::types::UserId;
use serde::Deserialize;

use crate::error::AppError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the calling user.
///
/// ```ignore
/// async fn my_handler(caller: UserIdentity) -> AppResult<Json<()>> {
///     tracing::info!(user_id = %caller.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: UserId,
}

#[derive(Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let user_id = match from_header {
            Some(id) => Some(id),
            None => Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.user_id)
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        };

        user_id
            .map(|user_id| UserIdentity { user_id })
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(format!(
                    "Missing caller identity ({USER_ID_HEADER} header or user_id query parameter)"
                )))
            })
    }
}
