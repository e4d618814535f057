//! TOTP second factor.
//!
//! A password login for a TOTP-enabled account yields a first-step token
//! instead of a full login token. The client redeems it here together with
//! the current authenticator code. Secrets are provisioned lazily: the
//! provisioning endpoint generates and persists one the first time it is
//! asked.

use crate::store::{User, UserStore};
use crate::token::{TokenError, TokenService};
use std::sync::Arc;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("invalid first-step token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("user not found")]
    UserNotFound,

    #[error("multi-factor code rejected")]
    CodeInvalid,

    #[error("TOTP is not enabled for this account")]
    NotEnabled,

    #[error("TOTP secret is malformed")]
    BadSecret,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What a password login hands back: either the real credential or a
/// first-step token that must clear the second factor first.
#[derive(Debug)]
pub enum LoginOutcome {
    Full(String),
    FirstStep(String),
}

/// Details returned by the provisioning endpoint so the client can enroll
/// an authenticator app.
pub struct TotpProvisioning {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_png_base64: String,
}

pub struct MfaService {
    tokens: TokenService,
    users: Arc<dyn UserStore>,
    issuer: String,
}

impl MfaService {
    #[must_use]
    pub fn new(tokens: TokenService, users: Arc<dyn UserStore>, issuer: String) -> Self {
        Self {
            tokens,
            users,
            issuer,
        }
    }

    /// Issue the right credential for a freshly password-verified user:
    /// a first-step token when TOTP is enabled, a full login token
    /// otherwise.
    ///
    /// # Errors
    /// Returns `InvalidToken` if signing fails.
    pub fn login_outcome(&self, user: &User) -> Result<LoginOutcome, MfaError> {
        if user.totp_enabled && user.totp_secret.is_some() {
            Ok(LoginOutcome::FirstStep(
                self.tokens.issue_first_step(&user.id)?,
            ))
        } else {
            Ok(LoginOutcome::Full(self.tokens.issue_login(&user.id)?))
        }
    }

    /// Redeem a first-step token plus authenticator code for a full login
    /// token. The first-step token stays valid until it expires, so a user
    /// who fat-fingers a code can retry without logging in again.
    ///
    /// # Errors
    /// `CodeInvalid` when the code does not match within the allowed window;
    /// `InvalidToken` for a bad or expired first-step token.
    pub async fn verify(&self, first_step_token: &str, code: &str) -> Result<String, MfaError> {
        let user_id = self.tokens.validate_first_step(first_step_token)?;
        let user = self
            .users
            .get_user(&user_id)
            .await?
            .ok_or(MfaError::UserNotFound)?;
        let secret = user.totp_secret.as_deref().ok_or(MfaError::NotEnabled)?;

        let totp = self.totp(secret, &user.email)?;
        let ok = totp.check_current(code).map_err(|_| MfaError::BadSecret)?;
        if !ok {
            warn!(user = %user.id, "rejected TOTP code");
            return Err(MfaError::CodeInvalid);
        }

        Ok(self.tokens.issue_login(&user.id)?)
    }

    /// Provisioning details for the authenticated user. Generates and
    /// persists a secret on first call; later calls return the same secret
    /// so a half-finished enrollment can be resumed.
    ///
    /// # Errors
    /// `UserNotFound` if the subject no longer exists; `Store` on
    /// persistence failure.
    pub async fn provision(&self, user_id: &str) -> Result<TotpProvisioning, MfaError> {
        let mut user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(MfaError::UserNotFound)?;

        let secret = match &user.totp_secret {
            Some(secret) => secret.clone(),
            None => {
                let secret = Secret::generate_secret().to_encoded().to_string();
                user.totp_secret = Some(secret.clone());
                self.users.update_user(&user).await?;
                secret
            }
        };

        let totp = self.totp(&secret, &user.email)?;
        let qr_png_base64 = totp.get_qr_base64().map_err(|_| MfaError::BadSecret)?;
        Ok(TotpProvisioning {
            secret,
            otpauth_url: totp.get_url(),
            qr_png_base64,
        })
    }

    // Enrollment and verification must agree on these parameters; the ±1
    // step skew tolerates clock drift between server and authenticator.
    fn totp(&self, secret_base32: &str, account: &str) -> Result<TOTP, MfaError> {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|_| MfaError::BadSecret)?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|_| MfaError::BadSecret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::TokenConfig;
    use secrecy::SecretString;

    fn service(users: Arc<dyn UserStore>) -> MfaService {
        let tokens = TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "konto".to_string(),
            "konto-api".to_string(),
        ));
        MfaService::new(tokens, users, "Konto".to_string())
    }

    async fn enrolled_user(store: &MemoryStore) -> (User, String) {
        let mut user = User::new("alice".to_string(), "alice@example.com".to_string());
        let secret = Secret::generate_secret().to_encoded().to_string();
        user.totp_secret = Some(secret.clone());
        user.totp_enabled = true;
        store.add_user(&user).await.expect("add user");
        (user, secret)
    }

    fn current_code(service: &MfaService, secret: &str, email: &str) -> String {
        service
            .totp(secret, email)
            .expect("totp")
            .generate_current()
            .expect("code")
    }

    #[tokio::test]
    async fn totp_enabled_user_gets_a_first_step_token() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (user, _) = enrolled_user(&store).await;
        let service = service(store);

        match service.login_outcome(&user)? {
            LoginOutcome::FirstStep(token) => {
                assert!(service.tokens.validate_first_step(&token).is_ok());
            }
            LoginOutcome::Full(_) => panic!("expected a first-step token"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn plain_user_gets_a_full_login_token() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("bob".to_string(), "bob@example.com".to_string());
        store.add_user(&user).await?;
        let service = service(store);

        assert!(matches!(
            service.login_outcome(&user)?,
            LoginOutcome::Full(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn correct_code_upgrades_to_a_login_token() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (user, secret) = enrolled_user(&store).await;
        let service = service(store);

        let first_step = service.tokens.issue_first_step(&user.id)?;
        let code = current_code(&service, &secret, &user.email);

        let login = service.verify(&first_step, &code).await?;
        assert_eq!(service.tokens.validate_login(&login)?, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_but_token_stays_usable() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (user, secret) = enrolled_user(&store).await;
        let service = service(store);

        let first_step = service.tokens.issue_first_step(&user.id)?;
        let err = service.verify(&first_step, "000000").await.unwrap_err();
        assert!(matches!(err, MfaError::CodeInvalid));

        // Retry with the same first-step token and a valid code succeeds
        let code = current_code(&service, &secret, &user.email);
        assert!(service.verify(&first_step, &code).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn login_token_is_not_a_first_step_token() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (user, secret) = enrolled_user(&store).await;
        let service = service(store);

        let login = service.tokens.issue_login(&user.id)?;
        let code = current_code(&service, &secret, &user.email);
        let err = service.verify(&login, &code).await.unwrap_err();
        assert!(matches!(err, MfaError::InvalidToken(_)));
        Ok(())
    }

    #[tokio::test]
    async fn code_from_the_previous_step_is_accepted() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (user, secret) = enrolled_user(&store).await;
        let service = service(store);

        let totp = service.totp(&secret, &user.email)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .expect("clock")
            .as_secs();
        let previous = totp.generate(now - 30);

        let first_step = service.tokens.issue_first_step(&user.id)?;
        assert!(service.verify(&first_step, &previous).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn provisioning_is_lazy_and_stable() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("carol".to_string(), "carol@example.com".to_string());
        store.add_user(&user).await?;
        let service = service(store.clone());

        let first = service.provision(&user.id).await?;
        assert!(!first.secret.is_empty());
        assert!(first.otpauth_url.starts_with("otpauth://totp/"));
        assert!(!first.qr_png_base64.is_empty());

        // Secret was persisted and is returned unchanged on the next call
        let again = service.provision(&user.id).await?;
        assert_eq!(again.secret, first.secret);
        let stored = store.get_user(&user.id).await?.expect("user");
        assert_eq!(stored.totp_secret.as_deref(), Some(first.secret.as_str()));
        Ok(())
    }
}
