use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{NewUser, Provider, Role, StoreError, User, UserFilter};

/// Process-local fallback used when the database is unreachable at startup.
/// Everything in it is gone on restart; the boot log says so whenever this
/// backend is selected.
pub struct MemStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Fallback deployments would otherwise have no way to mint a first
    /// admin, so this constructor seeds one. The caller hashes the password.
    pub fn with_bootstrap_admin(email: &str, password_hash: String) -> Self {
        let store = Self::new();
        let now = OffsetDateTime::now_utc();
        let admin = User {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            username: Some("Admin".into()),
            password_hash,
            provider: Provider::Local,
            google_id: None,
            role: Role::Admin,
            created_at: now,
            updated_at: now,
        };
        {
            let mut users = store.lock();
            users.insert(admin.id, admin);
        }
        store
    }

    // The lock is held for the whole of each operation and never across an
    // await, so concurrent request tasks see each create/save/delete whole.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::UserStore for MemStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.lock();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.lock();
        Ok(users.get(&id).cloned())
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let users = self.lock();
        Ok(users
            .values()
            .find(|u| u.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut users = self.lock();
        if users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            username: new_user.username,
            password_hash: new_user.password_hash,
            provider: new_user.provider,
            google_id: new_user.google_id,
            role: new_user.role,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<User, StoreError> {
        let mut users = self.lock();
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let mut saved = user.clone();
        saved.updated_at = OffsetDateTime::now_utc();
        users.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.lock();
        Ok(users.remove(&id).is_some())
    }

    async fn list_all(&self, filter: UserFilter) -> Result<Vec<User>, StoreError> {
        let users = self.lock();
        let mut matched: Vec<User> = users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        matched.sort_by_key(|u| u.created_at);
        Ok(matched)
    }

    async fn count(&self, filter: UserFilter) -> Result<u64, StoreError> {
        let users = self.lock();
        Ok(users.values().filter(|u| filter.matches(u)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserStore;

    fn local_user(email: &str) -> NewUser {
        NewUser {
            username: Some("someone".into()),
            email: email.into(),
            password_hash: "hash".into(),
            provider: Provider::Local,
            google_id: None,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email_and_leaves_store_unchanged() {
        let store = MemStore::new();
        store.create(local_user("a@x.com")).await.unwrap();

        let err = store.create(local_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_upserts_and_bumps_updated_at() {
        let store = MemStore::new();
        let created = store.create(local_user("a@x.com")).await.unwrap();

        let mut changed = created.clone();
        changed.role = Role::Admin;
        let saved = store.save(&changed).await.unwrap();

        assert_eq!(saved.id, created.id);
        assert_eq!(saved.role, Role::Admin);
        assert!(saved.updated_at >= created.updated_at);
        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_rejects_stealing_another_users_email() {
        let store = MemStore::new();
        store.create(local_user("a@x.com")).await.unwrap();
        let second = store.create(local_user("b@x.com")).await.unwrap();

        let mut renamed = second.clone();
        renamed.email = "a@x.com".into();
        let err = store.save(&renamed).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_user_existed() {
        let store = MemStore::new();
        let user = store.create(local_user("a@x.com")).await.unwrap();

        assert!(store.delete(user.id).await.unwrap());
        assert!(!store.delete(user.id).await.unwrap());
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
        assert!(store
            .list_all(UserFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn filters_select_by_role_and_provider() {
        let store = MemStore::new();
        store.create(local_user("a@x.com")).await.unwrap();
        store
            .create(NewUser {
                username: None,
                email: "g@x.com".into(),
                password_hash: String::new(),
                provider: Provider::Google,
                google_id: Some("sub-1".into()),
                role: Role::User,
            })
            .await
            .unwrap();
        store
            .create(NewUser {
                role: Role::Admin,
                ..local_user("root@x.com")
            })
            .await
            .unwrap();

        assert_eq!(store.count(UserFilter::all()).await.unwrap(), 3);
        assert_eq!(store.count(UserFilter::by_role(Role::Admin)).await.unwrap(), 1);
        assert_eq!(store.count(UserFilter::by_role(Role::User)).await.unwrap(), 2);
        assert_eq!(
            store
                .count(UserFilter::by_provider(Provider::Google))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count(UserFilter::by_provider(Provider::Local))
                .await
                .unwrap(),
            2
        );

        let googlers = store
            .list_all(UserFilter::by_provider(Provider::Google))
            .await
            .unwrap();
        assert_eq!(googlers.len(), 1);
        assert_eq!(googlers[0].email, "g@x.com");
    }

    #[tokio::test]
    async fn bootstrap_admin_is_seeded_and_findable() {
        let store = MemStore::with_bootstrap_admin("Admin@Deforestation.com", "hash".into());
        let admin = store
            .find_by_email("admin@deforestation.com")
            .await
            .unwrap()
            .expect("seeded admin");
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.provider, Provider::Local);
    }
}
