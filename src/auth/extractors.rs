use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::claims::{Claims, Role};
use crate::auth::jwt::JwtKeys;
use crate::error::ApiError;

/// Pulls `Authorization: Bearer <token>` out of the request and verifies it.
/// Rejection short-circuits the route before any handler logic runs.
fn bearer_claims<S>(parts: &Parts, state: &S) -> Result<Claims, ApiError>
where
    JwtKeys: FromRef<S>,
{
    let keys = JwtKeys::from_ref(state);

    let auth_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Token tidak ditemukan".into()))?;

    let token = auth_header
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ApiError::Unauthorized("Token tidak valid".into()))?;

    keys.verify(token).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        ApiError::Unauthorized("Token tidak valid".into())
    })
}

fn require_role(claims: Claims, required: Role) -> Result<Claims, ApiError> {
    if claims.role != required {
        return Err(ApiError::Forbidden(format!(
            "Akses ditolak (bukan {})",
            required
        )));
    }
    Ok(claims)
}

/// Any authenticated principal, role checked by the handler itself.
pub struct AuthUser(pub Claims);

/// Authenticated principal with role `user`.
pub struct RegularUser(pub Claims);

/// Authenticated principal with role `admin`.
pub struct AdminUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        bearer_claims(parts, state).map(AuthUser)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RegularUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;
        require_role(claims, Role::User).map(RegularUser)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;
        require_role(claims, Role::Admin).map(AdminUser)
    }
}
