//! Request guards: checkout session, anti-forgery token, admin bearer token.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::header::AUTHORIZATION;
use http::request::Parts;

use crate::api::AppState;
use crate::error::AppError;

pub const SESSION_HEADER: &str = "x-session-id";
pub const CSRF_HEADER: &str = "x-csrf-token";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Browser session id from `X-Session-Id`.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

#[async_trait]
impl FromRequestParts<AppState> for SessionId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        header(parts, SESSION_HEADER)
            .map(|s| SessionId(s.to_string()))
            .ok_or_else(|| AppError::BadRequest("X-Session-Id header is required".to_string()))
    }
}

/// Session id whose `X-CSRF-Token` checked out. Required on every mutating
/// checkout endpoint.
#[derive(Debug, Clone)]
pub struct ProtectedSession(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ProtectedSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let SessionId(session_id) = SessionId::from_request_parts(parts, state).await?;
        let token = header(parts, CSRF_HEADER).ok_or(AppError::Forbidden)?;
        if !state.csrf.verify(&session_id, token) {
            tracing::warn!("Anti-forgery token rejected");
            return Err(AppError::Forbidden);
        }
        Ok(ProtectedSession(session_id))
    }
}

/// `Authorization: Bearer <ADMIN_API_TOKEN>`.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.admin_token.as_deref().ok_or(AppError::Unauthorized)?;
        let provided = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if constant_time_eq(provided.trim().as_bytes(), expected.as_bytes()) {
            Ok(AdminAuth)
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
    }
}
