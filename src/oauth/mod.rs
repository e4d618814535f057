//! App authorization flow.
//!
//! A user authorizes a registered app for a set of scopes and receives a
//! short-lived authorization code. The app exchanges the code, together
//! with its client secret, for an access/refresh token pair. Authorization
//! is stateful: the grant recorded at authorize time is re-checked on every
//! refresh, so revoking it cuts the app off once its current access token
//! expires.

use crate::scope::{self, Scope};
use crate::store::{AuthorizedApp, UserStore};
use crate::token::{TokenError, TokenService};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const GRANT_TYPE_CODE: &str = "authorization_code";
pub const GRANT_TYPE_REFRESH: &str = "refresh_token";

#[derive(Debug, Error)]
pub enum OauthError {
    #[error("invalid authorization code")]
    InvalidCode,

    #[error("unknown app")]
    UnknownApp,

    #[error("client secret mismatch")]
    SecretMismatch,

    #[error("unsupported grant type")]
    UnsupportedGrantType,

    #[error("authorization has been revoked")]
    GrantRevoked,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Exchange response; `refresh_token` survives refreshes unchanged.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub struct OauthFlow {
    tokens: TokenService,
    users: Arc<dyn UserStore>,
}

impl OauthFlow {
    #[must_use]
    pub fn new(tokens: TokenService, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Record (or replace) the user's grant for `app_id` and mint an
    /// authorization code carrying the canonical scope string.
    ///
    /// # Errors
    /// `UnknownApp` if no such app is registered.
    pub async fn authorize(
        &self,
        user_id: &str,
        app_id: &str,
        scopes: &[Scope],
    ) -> Result<String, OauthError> {
        if self.users.get_oauth_app(app_id).await?.is_none() {
            return Err(OauthError::UnknownApp);
        }

        let scope = scope::encode(scopes);
        self.users
            .add_authorized_app(
                user_id,
                &AuthorizedApp {
                    app_id: app_id.to_string(),
                    scope: scope.clone(),
                },
            )
            .await?;
        info!(user = %user_id, app = %app_id, %scope, "app authorized");

        Ok(self.tokens.issue_authorization_code(user_id, app_id, &scope)?)
    }

    /// Exchange an authorization code for an access/refresh token pair.
    /// Checks run in a fixed order: code, app, secret, grant type; tokens
    /// are only minted after the secret comparison passes.
    ///
    /// # Errors
    /// One of `InvalidCode`, `UnknownApp`, `SecretMismatch`,
    /// `UnsupportedGrantType`.
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        grant_type: &str,
    ) -> Result<TokenPair, OauthError> {
        let (user_id, scope) = self
            .tokens
            .validate_authorization_code(code, client_id)
            .map_err(|err| {
                debug!("authorization code rejected: {err}");
                OauthError::InvalidCode
            })?;
        // The code outliving its subject must read the same as a bad code.
        if self.users.get_user(&user_id).await?.is_none() {
            return Err(OauthError::InvalidCode);
        }
        self.check_client(client_id, client_secret).await?;
        if grant_type != GRANT_TYPE_CODE {
            return Err(OauthError::UnsupportedGrantType);
        }

        let access_token = self.tokens.issue_access(&user_id, &scope)?;
        let refresh_token = self.tokens.issue_refresh(&user_id, client_id, &scope)?;
        info!(user = %user_id, app = %client_id, "authorization code exchanged");
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: self.tokens.access_ttl_seconds(),
        })
    }

    /// Redeem a refresh token for a fresh access token. The grant recorded
    /// at authorize time must still exist; the same refresh token is echoed
    /// back.
    ///
    /// # Errors
    /// One of `InvalidCode`, `UnknownApp`, `SecretMismatch`,
    /// `UnsupportedGrantType`, `GrantRevoked`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
        grant_type: &str,
    ) -> Result<TokenPair, OauthError> {
        let (user_id, scope) = self
            .tokens
            .validate_refresh(refresh_token, client_id)
            .map_err(|err| {
                debug!("refresh token rejected: {err}");
                OauthError::InvalidCode
            })?;
        if self.users.get_user(&user_id).await?.is_none() {
            return Err(OauthError::InvalidCode);
        }
        self.check_client(client_id, client_secret).await?;
        if grant_type != GRANT_TYPE_REFRESH {
            return Err(OauthError::UnsupportedGrantType);
        }

        let grant_live = self
            .users
            .get_authorized_apps(&user_id)
            .await?
            .iter()
            .any(|grant| grant.app_id == client_id);
        if !grant_live {
            return Err(OauthError::GrantRevoked);
        }

        let access_token = self.tokens.issue_access(&user_id, &scope)?;
        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            token_type: "bearer",
            expires_in: self.tokens.access_ttl_seconds(),
        })
    }

    /// Drop the user's grant for `app_id`. Outstanding access tokens keep
    /// working until they expire; refreshes stop immediately.
    ///
    /// # Errors
    /// `Store` on persistence failure.
    pub async fn revoke(&self, user_id: &str, app_id: &str) -> Result<(), OauthError> {
        self.users.delete_authorized_app(user_id, app_id).await?;
        info!(user = %user_id, app = %app_id, "authorization revoked");
        Ok(())
    }

    async fn check_client(&self, client_id: &str, client_secret: &str) -> Result<(), OauthError> {
        let app = self
            .users
            .get_oauth_app(client_id)
            .await?
            .ok_or(OauthError::UnknownApp)?;
        if !constant_time_eq(app.client_secret.as_bytes(), client_secret.as_bytes()) {
            return Err(OauthError::SecretMismatch);
        }
        Ok(())
    }
}

// Length still leaks, but equal-length comparisons take uniform time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OAuthApp, User};
    use crate::token::TokenConfig;
    use secrecy::SecretString;

    const SECRET: &str = "s3cr3t-client-secret";

    async fn flow() -> (OauthFlow, Arc<MemoryStore>, User, OAuthApp) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("alice".to_string(), "alice@example.com".to_string());
        store.add_user(&user).await.expect("add user");
        let app = OAuthApp {
            id: "app-1".to_string(),
            owner_id: user.id.clone(),
            name: "Test App".to_string(),
            description: "integration fixture".to_string(),
            client_secret: SECRET.to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
        };
        store.add_oauth_app(&app).await.expect("add app");

        let tokens = TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "konto".to_string(),
            "konto-api".to_string(),
        ));
        (OauthFlow::new(tokens, store.clone()), store, user, app)
    }

    #[tokio::test]
    async fn full_code_exchange_yields_scoped_tokens() -> anyhow::Result<()> {
        let (flow, store, user, app) = flow().await;

        let code = flow
            .authorize(&user.id, &app.id, &[Scope::FileHost, Scope::UserInfo])
            .await?;
        let pair = flow
            .exchange_code(&code, &app.id, SECRET, GRANT_TYPE_CODE)
            .await?;

        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 3600);
        let (subject, scope) = flow.tokens.validate_access(&pair.access_token)?;
        assert_eq!(subject, user.id);
        assert_eq!(scope, "01100");

        let grants = store.get_authorized_apps(&user.id).await?;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].scope, "01100");
        Ok(())
    }

    #[tokio::test]
    async fn authorizing_an_unregistered_app_fails() {
        let (flow, _, user, _) = flow().await;
        let err = flow
            .authorize(&user.id, "nope", &[Scope::FileHost])
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::UnknownApp));
    }

    #[tokio::test]
    async fn exchange_rejects_each_mutated_field() -> anyhow::Result<()> {
        let (flow, _, user, app) = flow().await;
        let code = flow.authorize(&user.id, &app.id, &[Scope::FileHost]).await?;

        let err = flow
            .exchange_code("not-a-code", &app.id, SECRET, GRANT_TYPE_CODE)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::InvalidCode));

        // A code bound to app-1 presented by another registered app
        let other = OAuthApp {
            id: "app-2".to_string(),
            owner_id: user.id.clone(),
            name: "Other".to_string(),
            description: String::new(),
            client_secret: "other-secret".to_string(),
            redirect_uri: String::new(),
        };
        flow.users.add_oauth_app(&other).await?;
        let err = flow
            .exchange_code(&code, "app-2", "other-secret", GRANT_TYPE_CODE)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::InvalidCode));

        let err = flow
            .exchange_code(&code, &app.id, "wrong-secret", GRANT_TYPE_CODE)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::SecretMismatch));

        let err = flow
            .exchange_code(&code, &app.id, SECRET, "implicit")
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::UnsupportedGrantType));

        // The untouched request still goes through
        assert!(flow
            .exchange_code(&code, &app.id, SECRET, GRANT_TYPE_CODE)
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_reissues_access_and_echoes_the_refresh_token() -> anyhow::Result<()> {
        let (flow, _, user, app) = flow().await;
        let code = flow.authorize(&user.id, &app.id, &[Scope::UserInfo]).await?;
        let pair = flow
            .exchange_code(&code, &app.id, SECRET, GRANT_TYPE_CODE)
            .await?;

        let refreshed = flow
            .refresh(&pair.refresh_token, &app.id, SECRET, GRANT_TYPE_REFRESH)
            .await?;
        assert_eq!(refreshed.refresh_token, pair.refresh_token);
        let (subject, scope) = flow.tokens.validate_access(&refreshed.access_token)?;
        assert_eq!(subject, user.id);
        assert_eq!(scope, "00100");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_requires_its_own_grant_type() -> anyhow::Result<()> {
        let (flow, _, user, app) = flow().await;
        let code = flow.authorize(&user.id, &app.id, &[Scope::UserInfo]).await?;
        let pair = flow
            .exchange_code(&code, &app.id, SECRET, GRANT_TYPE_CODE)
            .await?;

        let err = flow
            .refresh(&pair.refresh_token, &app.id, SECRET, GRANT_TYPE_CODE)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::UnsupportedGrantType));
        Ok(())
    }

    #[tokio::test]
    async fn revocation_blocks_refresh_but_not_the_access_token() -> anyhow::Result<()> {
        let (flow, _, user, app) = flow().await;
        let code = flow.authorize(&user.id, &app.id, &[Scope::UserInfo]).await?;
        let pair = flow
            .exchange_code(&code, &app.id, SECRET, GRANT_TYPE_CODE)
            .await?;

        flow.revoke(&user.id, &app.id).await?;

        let err = flow
            .refresh(&pair.refresh_token, &app.id, SECRET, GRANT_TYPE_REFRESH)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::GrantRevoked));
        // Already-issued access tokens ride out their lifetime
        assert!(flow.tokens.validate_access(&pair.access_token).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn an_access_token_is_not_an_authorization_code() -> anyhow::Result<()> {
        let (flow, _, user, app) = flow().await;
        let access = flow.tokens.issue_access(&user.id, "00100")?;
        let err = flow
            .exchange_code(&access, &app.id, SECRET, GRANT_TYPE_CODE)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::InvalidCode));
        Ok(())
    }

    #[tokio::test]
    async fn reauthorization_narrows_the_recorded_grant() -> anyhow::Result<()> {
        let (flow, store, user, app) = flow().await;
        flow.authorize(&user.id, &app.id, &[Scope::FullAccess]).await?;
        flow.authorize(&user.id, &app.id, &[Scope::UserInfo]).await?;

        let grants = store.get_authorized_apps(&user.id).await?;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].scope, "00100");
        Ok(())
    }
}
