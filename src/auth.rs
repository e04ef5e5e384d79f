//! Bearer-token gate for the read endpoints, with a loopback bypass so the
//! dashboard and local tooling on the same host need no token. A single
//! static token instead of a session/role store, since this service has
//! exactly one trust boundary to guard.

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::future::Future;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

/// Marker extractor: succeeds for loopback peers unconditionally, and for
/// any other peer only when the request's `Authorization: Bearer` header
/// matches `config.auth_token`. If no token is configured, every peer is
/// treated as trusted (single-operator deployments with no token set).
pub struct RequireAuth;

impl<S> FromRequestParts<S> for RequireAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let app_state = AppState::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let header_token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        async move {
            if app_state.config.localhost_bypass_enabled && peer.is_some_and(|ip| ip.is_loopback()) {
                return Ok(RequireAuth);
            }

            match &app_state.config.auth_token {
                None => Ok(RequireAuth),
                Some(expected) => {
                    let provided = header_token
                        .ok_or_else(|| AppError::unauthorized("Missing or invalid token"))?;
                    let matches: bool = provided.as_bytes().ct_eq(expected.as_bytes()).into();
                    if matches {
                        Ok(RequireAuth)
                    } else {
                        Err(AppError::unauthorized("Missing or invalid token"))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_eq_rejects_mismatched_length() {
        let matches: bool = b"short"[..].ct_eq(&b"longer-token"[..]).into();
        assert!(!matches);
    }

    #[test]
    fn ct_eq_accepts_identical_bytes() {
        let matches: bool = b"same-token"[..].ct_eq(&b"same-token"[..]).into();
        assert!(matches);
    }

    #[test]
    fn ct_eq_rejects_single_byte_difference() {
        let matches: bool = b"token-a"[..].ct_eq(&b"token-b"[..]).into();
        assert!(!matches);
    }
}
