use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;

/// Set by the authenticating gateway in front of this service.
pub const DRIVER_ID_HEADER: &str = "x-driver-id";

/// Verified identity of the calling driver, if any.
pub struct Caller(pub Option<Uuid>);

impl Caller {
    pub fn require(&self) -> Result<Uuid, AppError> {
        self.0
            .ok_or_else(|| AppError::Unauthenticated("you must be authenticated".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(DRIVER_ID_HEADER) else {
            return Ok(Caller(None));
        };

        let parsed = raw
            .to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok());
        if parsed.is_none() {
            warn!("ignoring malformed {DRIVER_ID_HEADER} header");
        }

        Ok(Caller(parsed))
    }
}
