//! Identity collaborator. The fronting authentication layer injects the
//! current user as headers; this module only reads them.
//!
//! `X-User-Id` (required), `X-User-Name` (optional display name),
//! `X-User-Editor: 1` (privileged editor capability).

use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub name: String,
    pub is_editor: bool,
}

impl CurrentUser {
    pub fn require_editor(&self) -> Result<(), AppError> {
        if self.is_editor {
            Ok(())
        } else {
            Err(AppError::Forbidden("editor access required".into()))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or(AppError::Unauthorized)?;
        let name = parts
            .headers
            .get("x-user-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let is_editor = parts
            .headers
            .get("x-user-editor")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "1")
            .unwrap_or(false);
        Ok(Self { id, name, is_editor })
    }
}
