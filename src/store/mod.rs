use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Which authentication method owns the account: a local password or a
/// linked Google identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "auth_provider", rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
}

/// User record as stored. `password_hash` never serializes into a response;
/// it is the empty string for OAuth-originated accounts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub provider: Provider,
    pub google_id: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields a caller supplies at creation; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub provider: Provider,
    pub google_id: Option<String>,
    pub role: Role,
}

/// Conjunctive filter for list/count; the empty filter matches every user.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub provider: Option<Provider>,
}

impl UserFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn by_provider(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |r| user.role == r)
            && self.provider.map_or(true, |p| user.provider == p)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::DuplicateEmail;
            }
        }
        StoreError::Backend(err.into())
    }
}

/// One contract for both backends. The implementation is chosen once at
/// startup and injected as `Arc<dyn UserStore>`; handlers never know which
/// one they are talking to.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;
    /// Fails with `DuplicateEmail` instead of overwriting an existing record.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;
    /// Upsert by id; bumps `updated_at`.
    async fn save(&self, user: &User) -> Result<User, StoreError>;
    /// Returns false when no such user existed. Deletion is immediate and
    /// irreversible; there is no soft delete.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn list_all(&self, filter: UserFilter) -> Result<Vec<User>, StoreError>;
    async fn count(&self, filter: UserFilter) -> Result<u64, StoreError>;
}
