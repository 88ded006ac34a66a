use axum::{
    extract::{Path, State},
    routing::{delete, get, patch},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::dto::MessageResponse;
use crate::auth::extractors::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{Provider, Role, User, UserFilter, UserStore};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:user_id", delete(delete_user))
        .route("/admin/users/:user_id/promote", patch(promote_user))
        .route("/admin/stats", get(stats))
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    success: bool,
    // User's serde derive strips password_hash.
    users: Vec<User>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct PromoteResponse {
    success: bool,
    user: User,
}

#[derive(Debug, Serialize)]
struct Stats {
    total_users: u64,
    admin_users: u64,
    regular_users: u64,
    google_users: u64,
    local_users: u64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    success: bool,
    stats: Stats,
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation("Invalid user id.".into()))
}

#[instrument(skip(state))]
async fn list_users(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.store.list_all(UserFilter::all()).await?;
    let total = users.len();
    Ok(Json(UsersResponse {
        success: true,
        users,
        total,
    }))
}

#[instrument(skip(state, claims), fields(admin = %claims.sub))]
async fn delete_user(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_user_id(&user_id)?;

    if id == claims.sub {
        return Err(ApiError::Validation(
            "Cannot delete your own account".into(),
        ));
    }

    let user = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if user.role == Role::Admin {
        return Err(ApiError::Forbidden("Cannot delete admin accounts".into()));
    }

    if !state.store.delete(id).await? {
        // Lost a race with another delete.
        return Err(ApiError::NotFound("User not found".into()));
    }

    info!(deleted = %id, email = %user.email, "user deleted");
    Ok(Json(MessageResponse::ok("User deleted successfully")))
}

#[instrument(skip(state, claims), fields(admin = %claims.sub))]
async fn promote_user(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<PromoteResponse>, ApiError> {
    let id = parse_user_id(&user_id)?;

    let mut user = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if user.role == Role::Admin {
        return Err(ApiError::Validation("User is already an admin.".into()));
    }

    user.role = Role::Admin;
    let user = state.store.save(&user).await?;

    info!(promoted = %user.id, email = %user.email, "user promoted to admin");
    Ok(Json(PromoteResponse {
        success: true,
        user,
    }))
}

#[instrument(skip(state))]
async fn stats(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
) -> Result<Json<StatsResponse>, ApiError> {
    let store = &state.store;
    let stats = Stats {
        total_users: store.count(UserFilter::all()).await?,
        admin_users: store.count(UserFilter::by_role(Role::Admin)).await?,
        regular_users: store.count(UserFilter::by_role(Role::User)).await?,
        google_users: store.count(UserFilter::by_provider(Provider::Google)).await?,
        local_users: store.count(UserFilter::by_provider(Provider::Local)).await?,
    };
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}
