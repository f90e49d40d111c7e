//! Bearer-token middleware
//!
//! Every route outside the public allow-list requires a valid bearer
//! token. Verified claims ride the request extensions into handlers.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::{Claims, TokenIssuer};
use crate::error::ApiError;

/// Routes reachable without a token. The token route itself must be
/// public or login would be unreachable.
pub const PUBLIC_PATHS: &[&str] = &["/health", "/token", "/auth/login", "/auth/register"];

/// Authenticated caller identity, available via `Extension<CurrentUser>`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl CurrentUser {
    fn from_claims(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            scopes: claims.scopes,
        }
    }

    /// Admin-gated routes call this before doing anything else.
    pub fn require_scope(&self, scope: &str) -> Result<(), ApiError> {
        if self.scopes.iter().any(|s| s == scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub async fn middleware(
    State(issuer): State<Arc<TokenIssuer>>,
    mut request: Request,
    next: Next,
) -> Response {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let claims = match bearer_token(&request).map(|token| issuer.verify(token)) {
        Some(Ok(claims)) => claims,
        // Missing, malformed, expired and forged tokens are
        // indistinguishable to the caller
        _ => return ApiError::Unauthorized.into_response(),
    };

    request
        .extensions_mut()
        .insert(CurrentUser::from_claims(claims));
    next.run(request).await
}
