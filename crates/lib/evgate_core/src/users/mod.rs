//! User directory: the lookup collaborator behind login, refresh and reset.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::models::auth::{NewUser, User};

pub use memory::InMemoryUserDirectory;
pub use postgres::PgUserDirectory;

/// Narrow user lookup and mutation interface the token service depends on.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Fails with [`AuthError::EmailAlreadyExists`] on a duplicate email.
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;

    /// Fails with [`AuthError::UserNotFound`] for an unknown ID.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError>;

    /// Fails with [`AuthError::UserNotFound`] for an unknown ID.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<User, AuthError>;
}
