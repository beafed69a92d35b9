use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;

const TOKEN_PREFIX: &str = "mock_token_";
const DEFAULT_USERNAME: &str = "anonymous";
const DEFAULT_ROLE: &str = "parent";
const KNOWN_ROLES: &[&str] = &["parent", "teacher", "admin"];
/// Width of the `owner_username` column.
const MAX_USERNAME_CHARS: usize = 128;

/// Who submitted a request. Derived from a placeholder bearer token of the
/// form `mock_token_<username>_<role>`; provenance only, never verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Submitter {
    pub(crate) username: String,
    pub(crate) role: String,
}

impl Submitter {
    fn anonymous() -> Self {
        Self { username: DEFAULT_USERNAME.to_string(), role: DEFAULT_ROLE.to_string() }
    }

    pub(crate) fn from_token(token: &str) -> Self {
        let Some(rest) = token.trim().strip_prefix(TOKEN_PREFIX) else {
            return Self::anonymous();
        };
        let Some((username, role)) = rest.rsplit_once('_') else {
            return Self::anonymous();
        };
        if username.is_empty()
            || username.chars().count() > MAX_USERNAME_CHARS
            || !KNOWN_ROLES.contains(&role)
        {
            return Self::anonymous();
        }

        Self { username: username.to_string(), role: role.to_string() }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Submitter
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let submitter = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(Submitter::from_token)
            .unwrap_or_else(Submitter::anonymous);

        Ok(submitter)
    }
}
