use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, as asserted by the upstream gateway in `X-User-ID`.
///
/// Handlers take this by value and pass it explicitly into every service call;
/// nothing below the HTTP layer reads identity from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Uuid,
}

impl CallerContext {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }

    pub fn owns(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header")))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid X-User-ID header")))?;

        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        Ok(CallerContext { user_id })
    }
}
