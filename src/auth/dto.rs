use serde::{Deserialize, Serialize};

use super::jwt::Claims;
use crate::store::{Role, User};

/// Request body for signup. Fields are optional so missing input gets the
/// validation path instead of a framework rejection.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// The identity slice exposed to the client; never includes hash material.
#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub email: String,
    pub username: Option<String>,
    pub role: Role,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role,
        }
    }
}

impl From<&Claims> for SessionUser {
    fn from(claims: &Claims) -> Self {
        Self {
            email: claims.email.clone(),
            username: claims.username.clone(),
            role: claims.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: SessionUser,
}
