use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User},
};

/// Process-local store. Uniqueness is checked under the write lock, so
/// concurrent inserts of the same email or username cannot both succeed.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.email == email || u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users
            .iter()
            .any(|u| u.email == new.email || u.username == new.username)
        {
            return Err(StoreError::Duplicate);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            full_name: new.full_name,
            role: new.role,
            created_at: OffsetDateTime::now_utc(),
            qr_code: None,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }

    async fn update_qr_code(&self, id: Uuid, payload: &str) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.qr_code = Some(payload.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
