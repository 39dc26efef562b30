//! In-memory user directory for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::UserDirectory;
use crate::auth::AuthError;
use crate::models::auth::{NewUser, User};

/// [`UserDirectory`] held in a map behind an async lock.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyExists);
        }
        let now = Utc::now();
        let record = User {
            id: Uuid::now_v7(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(AuthError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(AuthError::UserNotFound)?;
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::Role;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let dir = InMemoryUserDirectory::new();
        dir.create(new_user("a@example.com")).await.unwrap();
        assert!(matches!(
            dir.create(new_user("a@example.com")).await,
            Err(AuthError::EmailAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn lookup_by_id_and_email_agree() {
        let dir = InMemoryUserDirectory::new();
        let created = dir.create(new_user("b@example.com")).await.unwrap();
        let by_id = dir.get_by_id(created.id).await.unwrap().unwrap();
        let by_email = dir.get_by_email("b@example.com").await.unwrap().unwrap();
        assert_eq!(by_id, by_email);
        assert!(by_id.is_active);
    }

    #[tokio::test]
    async fn mutations_on_unknown_user_fail() {
        let dir = InMemoryUserDirectory::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            dir.update_password(id, "x").await,
            Err(AuthError::UserNotFound)
        ));
        assert!(matches!(
            dir.set_active(id, false).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
