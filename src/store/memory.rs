//! In-memory store used by the dev server and the test suite.

use super::{AuthorizedApp, OAuthApp, PasskeyStore, SavedPasskey, User, UserStore};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    grants: RwLock<HashMap<String, Vec<AuthorizedApp>>>,
    apps: RwLock<HashMap<String, OAuthApp>>,
    passkeys: RwLock<Vec<SavedPasskey>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn get_user_by_stripe_customer(&self, stripe_id: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.stripe_customer_id.as_deref() == Some(stripe_id))
            .cloned())
    }

    async fn add_user(&self, user: &User) -> Result<()> {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        self.users.write().await.remove(id);
        self.grants.write().await.remove(id);
        Ok(())
    }

    async fn add_authorized_app(&self, user_id: &str, grant: &AuthorizedApp) -> Result<()> {
        let mut grants = self.grants.write().await;
        let entry = grants.entry(user_id.to_string()).or_default();
        entry.retain(|existing| existing.app_id != grant.app_id);
        entry.push(grant.clone());
        Ok(())
    }

    async fn get_authorized_apps(&self, user_id: &str) -> Result<Vec<AuthorizedApp>> {
        Ok(self
            .grants
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_authorized_app(&self, user_id: &str, app_id: &str) -> Result<()> {
        if let Some(entry) = self.grants.write().await.get_mut(user_id) {
            entry.retain(|grant| grant.app_id != app_id);
        }
        Ok(())
    }

    async fn get_oauth_app(&self, app_id: &str) -> Result<Option<OAuthApp>> {
        Ok(self.apps.read().await.get(app_id).cloned())
    }

    async fn add_oauth_app(&self, app: &OAuthApp) -> Result<()> {
        self.apps.write().await.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn update_oauth_app(&self, app: &OAuthApp) -> Result<()> {
        self.apps.write().await.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn delete_oauth_app(&self, app_id: &str) -> Result<()> {
        self.apps.write().await.remove(app_id);
        Ok(())
    }

    async fn get_oauth_apps_from_user(&self, owner_id: &str) -> Result<Vec<OAuthApp>> {
        Ok(self
            .apps
            .read()
            .await
            .values()
            .filter(|app| app.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PasskeyStore for MemoryStore {
    async fn create_passkey(&self, key: &SavedPasskey) -> Result<()> {
        self.passkeys.write().await.push(key.clone());
        Ok(())
    }

    async fn get_users_passkeys(&self, user_id: &str) -> Result<Vec<SavedPasskey>> {
        Ok(self
            .passkeys
            .read()
            .await
            .iter()
            .filter(|key| key.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_passkey(&self, credential_id: &[u8]) -> Result<Option<SavedPasskey>> {
        Ok(self
            .passkeys
            .read()
            .await
            .iter()
            .find(|key| key.credential_id == credential_id)
            .cloned())
    }

    async fn get_user_id_from_passkey_id(&self, credential_id: &[u8]) -> Result<Option<String>> {
        Ok(self
            .passkeys
            .read()
            .await
            .iter()
            .find(|key| key.credential_id == credential_id)
            .map(|key| key.owner_id.clone()))
    }

    async fn set_passkey_sign_count(&self, credential_id: &[u8], sign_count: u32) -> Result<()> {
        if let Some(key) = self
            .passkeys
            .write()
            .await
            .iter_mut()
            .find(|key| key.credential_id == credential_id)
        {
            key.sign_count = sign_count;
        }
        Ok(())
    }

    async fn update_passkey_device_public_keys(
        &self,
        credential_id: &[u8],
        device_public_keys: &[Vec<u8>],
    ) -> Result<()> {
        if let Some(key) = self
            .passkeys
            .write()
            .await
            .iter_mut()
            .find(|key| key.credential_id == credential_id)
        {
            key.device_public_keys = device_public_keys.to_vec();
        }
        Ok(())
    }

    async fn delete_passkey(&self, credential_id: &[u8]) -> Result<()> {
        self.passkeys
            .write()
            .await
            .retain(|key| key.credential_id != credential_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PermLevel;

    fn user(name: &str) -> User {
        User::new(name.to_string(), format!("{name}@example.com"))
    }

    #[tokio::test]
    async fn user_lookup_by_id_name_and_stripe() -> Result<()> {
        let store = MemoryStore::new();
        let mut alice = user("alice");
        alice.stripe_customer_id = Some("cus_123".to_string());
        store.add_user(&alice).await?;

        assert!(store.get_user(&alice.id).await?.is_some());
        assert!(store.get_user_by_name("alice").await?.is_some());
        assert!(store.get_user_by_name("nobody").await?.is_none());
        assert!(store.get_user_by_stripe_customer("cus_123").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn reauthorizing_replaces_the_grant() -> Result<()> {
        let store = MemoryStore::new();
        let grant = AuthorizedApp {
            app_id: "app-1".to_string(),
            scope: "01000".to_string(),
        };
        store.add_authorized_app("user-1", &grant).await?;
        let wider = AuthorizedApp {
            app_id: "app-1".to_string(),
            scope: "01100".to_string(),
        };
        store.add_authorized_app("user-1", &wider).await?;

        let grants = store.get_authorized_apps("user-1").await?;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].scope, "01100");
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_grants() -> Result<()> {
        let store = MemoryStore::new();
        let mut bob = user("bob");
        bob.perm_level = PermLevel::Normal;
        store.add_user(&bob).await?;
        store
            .add_authorized_app(
                &bob.id,
                &AuthorizedApp {
                    app_id: "app-1".to_string(),
                    scope: "10000".to_string(),
                },
            )
            .await?;

        store.delete_user(&bob.id).await?;
        assert!(store.get_user(&bob.id).await?.is_none());
        assert!(store.get_authorized_apps(&bob.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn passkey_sign_count_and_device_keys_update() -> Result<()> {
        let store = MemoryStore::new();
        let key = SavedPasskey {
            owner_id: "user-1".to_string(),
            name: "yubikey".to_string(),
            credential_id: vec![1, 2, 3],
            public_key: vec![],
            sign_count: 0,
            aa_guid: uuid::Uuid::nil(),
            device_public_keys: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        store.create_passkey(&key).await?;

        store.set_passkey_sign_count(&[1, 2, 3], 7).await?;
        store
            .update_passkey_device_public_keys(&[1, 2, 3], &[vec![9, 9]])
            .await?;

        let stored = store.get_passkey(&[1, 2, 3]).await?.expect("passkey");
        assert_eq!(stored.sign_count, 7);
        assert_eq!(stored.device_public_keys, vec![vec![9, 9]]);
        assert_eq!(
            store.get_user_id_from_passkey_id(&[1, 2, 3]).await?,
            Some("user-1".to_string())
        );
        Ok(())
    }
}
