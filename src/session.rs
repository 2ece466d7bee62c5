use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use crate::AppError;

/// Session key under which the identity layer stores the authenticated user.
pub const USER_ID: &str = "user_id";

/// The already-authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, reason)| AppError::Unauthenticated(reason.to_owned()))?;

        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::Unauthenticated("no user in session".to_owned()));
        };

        Ok(Caller(user_id))
    }
}
