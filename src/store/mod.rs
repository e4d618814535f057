//! Repository interfaces for the user/app and passkey stores.
//!
//! Persistence is an external collaborator: the engine only depends on
//! these traits. Transactional semantics are the store's responsibility;
//! every method degrades to a per-request error on failure, never a crash.
//! An in-memory implementation backs the dev server and the test suite.

pub mod memory;
mod models;

pub use memory::MemoryStore;
pub use models::{AuthorizedApp, OAuthApp, PermLevel, SavedPasskey, User};

use anyhow::Result;
use async_trait::async_trait;

/// User, grant and OAuth-app persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>>;
    async fn get_user_by_stripe_customer(&self, stripe_id: &str) -> Result<Option<User>>;
    async fn add_user(&self, user: &User) -> Result<()>;
    async fn update_user(&self, user: &User) -> Result<()>;
    /// Deleting a user cascades to their authorized-app grants.
    async fn delete_user(&self, id: &str) -> Result<()>;

    /// Replaces any existing grant for the same (user, app) pair.
    async fn add_authorized_app(&self, user_id: &str, grant: &AuthorizedApp) -> Result<()>;
    async fn get_authorized_apps(&self, user_id: &str) -> Result<Vec<AuthorizedApp>>;
    async fn delete_authorized_app(&self, user_id: &str, app_id: &str) -> Result<()>;

    async fn get_oauth_app(&self, app_id: &str) -> Result<Option<OAuthApp>>;
    async fn add_oauth_app(&self, app: &OAuthApp) -> Result<()>;
    async fn update_oauth_app(&self, app: &OAuthApp) -> Result<()>;
    async fn delete_oauth_app(&self, app_id: &str) -> Result<()>;
    async fn get_oauth_apps_from_user(&self, owner_id: &str) -> Result<Vec<OAuthApp>>;
}

/// Passwordless-credential persistence.
#[async_trait]
pub trait PasskeyStore: Send + Sync {
    async fn create_passkey(&self, key: &SavedPasskey) -> Result<()>;
    async fn get_users_passkeys(&self, user_id: &str) -> Result<Vec<SavedPasskey>>;
    async fn get_passkey(&self, credential_id: &[u8]) -> Result<Option<SavedPasskey>>;
    async fn get_user_id_from_passkey_id(&self, credential_id: &[u8]) -> Result<Option<String>>;
    async fn set_passkey_sign_count(&self, credential_id: &[u8], sign_count: u32) -> Result<()>;
    async fn update_passkey_device_public_keys(
        &self,
        credential_id: &[u8],
        device_public_keys: &[Vec<u8>],
    ) -> Result<()>;
    async fn delete_passkey(&self, credential_id: &[u8]) -> Result<()>;
}
