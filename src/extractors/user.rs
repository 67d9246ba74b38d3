//! Extract the authenticated user from the request (`X-Remote-User`, set by the fronting proxy).

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated user name.
pub const REMOTE_USER_HEADER: &str = "X-Remote-User";

/// User assumed when no authenticated user is present.
pub const GUEST_USER: &str = "guest";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAsUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RunAsUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(REMOTE_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| GUEST_USER.to_string());
        Ok(RunAsUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> RunAsUser {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(REMOTE_USER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        RunAsUser::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn header_value_is_trimmed() {
        assert_eq!(extract(Some("  alice ")).await, RunAsUser("alice".into()));
    }

    #[tokio::test]
    async fn missing_or_blank_header_means_guest() {
        assert_eq!(extract(None).await.0, GUEST_USER);
        assert_eq!(extract(Some("   ")).await.0, GUEST_USER);
    }
}
