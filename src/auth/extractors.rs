use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use super::jwt::{Claims, JwtKeys, TokenError};
use crate::error::ApiError;
use crate::store::Role;

/// Cookie carrying the session token.
pub(crate) const SESSION_COOKIE: &str = "accessToken";

/// Extracts and verifies the session cookie. The verified claims are the only
/// identity a handler ever sees; nothing in the request body or headers is
/// trusted. Absent, invalid, and expired cookies all reject with 401.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthenticated("Not authenticated".into()))?;

        let cookie = jar
            .get(SESSION_COOKIE)
            .ok_or_else(|| ApiError::Unauthenticated("Not authenticated".into()))?;

        let claims = keys.verify(cookie.value()).map_err(|e| {
            match e {
                TokenError::Expired => warn!("session token expired"),
                TokenError::Invalid => warn!("session token invalid"),
            }
            ApiError::Unauthenticated("Invalid token. Please login again.".into())
        })?;

        Ok(AuthUser(claims))
    }
}

/// `AuthUser` plus an admin-role requirement. A valid session without the
/// admin role rejects with 403, which is kept distinct from the 401s above.
pub struct AdminUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;

        if claims.role != Role::Admin {
            warn!(user_id = %claims.sub, "admin route refused");
            return Err(ApiError::Forbidden(
                "Access denied. Admin privileges required.".into(),
            ));
        }

        Ok(AdminUser(claims))
    }
}
