//! Passwordless-credential (`WebAuthn`) ceremony engine.
//!
//! Drives the two ceremonies:
//! 1) Registration: creation options bound to the authenticated user, state
//!    parked in the challenge cache keyed by that user, attestation verified
//!    and a credential persisted only after the whole ceremony succeeds.
//! 2) Assertion: options issued under a fresh opaque challenge id with a
//!    short TTL; the challenge is consumed on first use, so a replayed id
//!    fails even when the first attempt failed. A successful assertion
//!    persists the new signature counter and mints a login token for the
//!    credential's owner.
//!
//! Security boundaries:
//! - Challenge consumption is atomic (`ChallengeCache::get_and_remove`).
//! - Signature verification happens before any persistence and before any
//!   token is minted; failures never leave partial state.
//! - A signature counter that does not advance is a possible cloned
//!   authenticator and is logged, not silently accepted.

pub mod cache;

pub use cache::{CHALLENGE_TTL, ChallengeCache, MemoryChallengeCache};

use crate::store::{PasskeyStore, SavedPasskey, User, UserStore};
use crate::token::{TokenError, TokenService};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use webauthn_rs::prelude::*;

const DEFAULT_RP_NAME: &str = "Konto";

#[derive(Clone, Debug)]
pub struct PasskeyConfig {
    rp_id: String,
    rp_name: String,
    rp_origin: String,
    challenge_ttl: Duration,
}

impl PasskeyConfig {
    #[must_use]
    pub fn new(rp_id: String, rp_origin: String) -> Self {
        Self {
            rp_id,
            rp_name: DEFAULT_RP_NAME.to_string(),
            rp_origin,
            challenge_ttl: CHALLENGE_TTL,
        }
    }

    #[must_use]
    pub fn with_rp_name(mut self, rp_name: String) -> Self {
        self.rp_name = rp_name;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }
}

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Challenge absent, expired, or already consumed.
    #[error("challenge not found")]
    ChallengeNotFound,
    /// The asserted credential id is not bound to any user.
    #[error("unknown credential")]
    UnknownCredential,
    #[error("unknown user")]
    UnknownUser,
    /// Any cryptographic or protocol failure inside the ceremony; the
    /// underlying reason stays in logs, never in responses.
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Assertion state parked between begin and finish. Anonymous callers get a
/// discoverable ("any registered credential") challenge; named callers get
/// one scoped to their known credential ids.
#[derive(Serialize, Deserialize)]
enum AssertionState {
    Scoped(PasskeyAuthentication),
    Discoverable(DiscoverableAuthentication),
}

pub struct CeremonyEngine {
    webauthn: Webauthn,
    users: Arc<dyn UserStore>,
    passkeys: Arc<dyn PasskeyStore>,
    cache: Arc<dyn ChallengeCache>,
    tokens: TokenService,
    challenge_ttl: Duration,
}

impl CeremonyEngine {
    /// Create the engine for one relying party.
    ///
    /// # Errors
    /// Returns an error if the origin URL is invalid or the `WebAuthn`
    /// builder rejects the relying-party parameters.
    pub fn new(
        config: &PasskeyConfig,
        users: Arc<dyn UserStore>,
        passkeys: Arc<dyn PasskeyStore>,
        cache: Arc<dyn ChallengeCache>,
        tokens: TokenService,
    ) -> anyhow::Result<Self> {
        let rp_origin = Url::parse(&config.rp_origin)?;
        let webauthn = WebauthnBuilder::new(&config.rp_id, &rp_origin)?
            .rp_name(&config.rp_name)
            .build()?;
        Ok(Self {
            webauthn,
            users,
            passkeys,
            cache,
            tokens,
            challenge_ttl: config.challenge_ttl,
        })
    }

    /// Begin credential registration for an authenticated user.
    ///
    /// The in-progress state is keyed by the user, not by a returned id:
    /// the finish step runs under the same authenticated context.
    ///
    /// # Errors
    /// See [`CeremonyError`].
    pub async fn register_begin(
        &self,
        user: &User,
    ) -> Result<CreationChallengeResponse, CeremonyError> {
        let exclude: Vec<CredentialID> = self
            .passkeys
            .get_users_passkeys(&user.id)
            .await?
            .into_iter()
            .map(|key| key.credential_id.into())
            .collect();
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(exclude)
        };

        let (options, state) = self
            .webauthn
            .start_passkey_registration(
                user.webauthn_handle(),
                &user.username,
                &user.username,
                exclude,
            )
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;

        let value = serde_json::to_vec(&state)
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;
        self.cache
            .set(registration_key(&user.id), value, self.challenge_ttl)
            .await;

        Ok(options)
    }

    /// Finish registration: verify the attestation, enforce credential-id
    /// uniqueness across all users, and persist the credential.
    ///
    /// # Errors
    /// See [`CeremonyError`]. No credential is persisted on failure.
    pub async fn register_finish(
        &self,
        user: &User,
        name: &str,
        response: &RegisterPublicKeyCredential,
    ) -> Result<SavedPasskey, CeremonyError> {
        let bytes = self
            .cache
            .get_and_remove(&registration_key(&user.id))
            .await
            .ok_or(CeremonyError::ChallengeNotFound)?;
        let state: PasskeyRegistration = serde_json::from_slice(&bytes)
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(response, &state)
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;

        // Uniqueness: a credential id may be bound to at most one account.
        if self
            .passkeys
            .get_user_id_from_passkey_id(passkey.cred_id().as_slice())
            .await?
            .is_some()
        {
            return Err(CeremonyError::VerificationFailed(
                "credential is already registered".to_string(),
            ));
        }

        let saved = SavedPasskey::from_registration(&user.id, name, &passkey)?;
        self.passkeys.create_passkey(&saved).await?;
        info!(user = %user.id, "registered new passkey");
        Ok(saved)
    }

    /// Begin an assertion (login) ceremony.
    ///
    /// A named user gets a challenge scoped to their registered credential
    /// ids; anonymous callers get a discoverable challenge usable with any
    /// registered credential. Returns the opaque challenge id the caller
    /// must present at the finish step.
    ///
    /// # Errors
    /// See [`CeremonyError`].
    pub async fn assert_begin(
        &self,
        username: Option<&str>,
    ) -> Result<(Uuid, RequestChallengeResponse), CeremonyError> {
        let (options, state) = match username {
            Some(name) => {
                let user = self
                    .users
                    .get_user_by_name(name)
                    .await?
                    .ok_or(CeremonyError::UnknownUser)?;
                let credentials: Vec<Passkey> = self
                    .passkeys
                    .get_users_passkeys(&user.id)
                    .await?
                    .iter()
                    .filter_map(|key| key.credential().ok())
                    .collect();
                if credentials.is_empty() {
                    return Err(CeremonyError::UnknownCredential);
                }
                let (options, state) = self
                    .webauthn
                    .start_passkey_authentication(&credentials)
                    .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;
                (options, AssertionState::Scoped(state))
            }
            None => {
                let (options, state) = self
                    .webauthn
                    .start_discoverable_authentication()
                    .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;
                (options, AssertionState::Discoverable(state))
            }
        };

        let challenge_id = Uuid::new_v4();
        let value = serde_json::to_vec(&state)
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;
        self.cache
            .set(assertion_key(challenge_id), value, self.challenge_ttl)
            .await;

        Ok((challenge_id, options))
    }

    /// Finish an assertion: consume the challenge, verify the signature and
    /// ownership, persist the new counter, and mint a login token.
    ///
    /// The challenge is consumed first, so a replay fails with
    /// `ChallengeNotFound` regardless of this attempt's outcome.
    ///
    /// # Errors
    /// See [`CeremonyError`]. Nothing is persisted unless verification
    /// succeeded.
    pub async fn assert_finish(
        &self,
        challenge_id: Uuid,
        response: &PublicKeyCredential,
    ) -> Result<(String, String), CeremonyError> {
        let bytes = self
            .cache
            .get_and_remove(&assertion_key(challenge_id))
            .await
            .ok_or(CeremonyError::ChallengeNotFound)?;
        let state: AssertionState = serde_json::from_slice(&bytes)
            .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;

        let stored = self
            .passkeys
            .get_passkey(response.raw_id.as_ref())
            .await?
            .ok_or(CeremonyError::UnknownCredential)?;

        let result = match state {
            AssertionState::Scoped(state) => self
                .webauthn
                .finish_passkey_authentication(response, &state)
                .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?,
            AssertionState::Discoverable(state) => {
                let (user_handle, _) = self
                    .webauthn
                    .identify_discoverable_authentication(response)
                    .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?;
                // Ownership: the asserting user handle must own this
                // credential id.
                let owner = self
                    .users
                    .get_user(&stored.owner_id)
                    .await?
                    .ok_or(CeremonyError::UnknownUser)?;
                if owner.webauthn_handle() != user_handle {
                    return Err(CeremonyError::VerificationFailed(
                        "credential is not owned by the asserting user".to_string(),
                    ));
                }
                let credential = stored.credential()?;
                self.webauthn
                    .finish_discoverable_authentication(
                        response,
                        state,
                        &[DiscoverableKey::from(&credential)],
                    )
                    .map_err(|err| CeremonyError::VerificationFailed(err.to_string()))?
            }
        };

        // Verification succeeded; only now may state change.
        if counter_regressed(stored.sign_count, result.counter()) {
            warn!(
                credential = %Base64UrlUnpadded::encode_string(&stored.credential_id),
                stored = stored.sign_count,
                presented = result.counter(),
                "assertion signature counter did not advance; authenticator may be cloned"
            );
        }
        self.passkeys
            .set_passkey_sign_count(response.raw_id.as_ref(), result.counter())
            .await?;

        let token = self.tokens.issue_login(&stored.owner_id)?;
        info!(user = %stored.owner_id, "passkey assertion succeeded");
        Ok((stored.owner_id, token))
    }
}

/// A signature counter that fails to advance past the stored value points
/// at a possible cloned authenticator. Authenticators that do not implement
/// counters report zero on both sides, which is not suspicious.
fn counter_regressed(stored: u32, presented: u32) -> bool {
    (presented > 0 || stored > 0) && presented <= stored
}

fn registration_key(user_id: &str) -> String {
    format!("register:{user_id}")
}

fn assertion_key(challenge_id: Uuid) -> String {
    format!("assert:{challenge_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::TokenConfig;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use secrecy::SecretString;

    fn engine(store: Arc<MemoryStore>) -> CeremonyEngine {
        let config = PasskeyConfig::new("localhost".to_string(), "http://localhost".to_string());
        let tokens = TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "konto".to_string(),
            "konto-api".to_string(),
        ));
        CeremonyEngine::new(
            &config,
            store.clone(),
            store,
            Arc::new(MemoryChallengeCache::new()),
            tokens,
        )
        .expect("engine")
    }

    fn assertion_response(credential_id: &[u8]) -> PublicKeyCredential {
        let id = Base64UrlUnpadded::encode_string(credential_id);
        serde_json::from_value(serde_json::json!({
            "id": id,
            "rawId": id,
            "response": {
                "authenticatorData": "",
                "clientDataJSON": "",
                "signature": "",
                "userHandle": null
            },
            "extensions": {},
            "type": "public-key"
        }))
        .expect("well-formed assertion response")
    }

    #[tokio::test]
    async fn anonymous_challenge_is_issued_and_single_use() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);

        let (challenge_id, options) = engine.assert_begin(None).await?;
        assert!(!options.public_key.challenge.as_ref().is_empty());

        // First finish consumes the challenge even though it fails
        // (unregistered credential).
        let response = assertion_response(&[1, 2, 3, 4]);
        let first = engine.assert_finish(challenge_id, &response).await;
        assert!(matches!(first, Err(CeremonyError::UnknownCredential)));

        // Replaying the same challenge id must fail as not-found.
        let second = engine.assert_finish(challenge_id, &response).await;
        assert!(matches!(second, Err(CeremonyError::ChallengeNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn stale_challenge_id_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let response = assertion_response(&[9, 9, 9]);
        let result = engine.assert_finish(Uuid::new_v4(), &response).await;
        assert!(matches!(result, Err(CeremonyError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn named_challenge_requires_known_user_with_credentials() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        let result = engine.assert_begin(Some("nobody")).await;
        assert!(matches!(result, Err(CeremonyError::UnknownUser)));

        let user = User::new("carol".to_string(), "carol@example.com".to_string());
        store.add_user(&user).await.expect("add user");
        let result = engine.assert_begin(Some("carol")).await;
        assert!(matches!(result, Err(CeremonyError::UnknownCredential)));
    }

    #[tokio::test]
    async fn registration_finish_without_begin_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user = User::new("dave".to_string(), "dave@example.com".to_string());
        store.add_user(&user).await.expect("add user");

        let response: RegisterPublicKeyCredential = serde_json::from_value(serde_json::json!({
            "id": "AAAA",
            "rawId": "AAAA",
            "response": {
                "attestationObject": "",
                "clientDataJSON": ""
            },
            "extensions": {},
            "type": "public-key"
        }))
        .expect("well-formed registration response");

        let result = engine.register_finish(&user, "key", &response).await;
        assert!(matches!(result, Err(CeremonyError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn registration_begin_parks_state_for_the_user() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user = User::new("erin".to_string(), "erin@example.com".to_string());
        store.add_user(&user).await?;

        let options = engine.register_begin(&user).await?;
        assert_eq!(options.public_key.rp.id, "localhost");
        assert_eq!(options.public_key.user.name, "erin");
        Ok(())
    }

    #[test]
    fn counter_must_advance_past_the_stored_value() {
        // Normal use: the authenticator counts up
        assert!(!counter_regressed(3, 4));
        assert!(!counter_regressed(0, 1));

        // Stalled or rewound counters point at a clone
        assert!(counter_regressed(3, 3));
        assert!(counter_regressed(3, 2));
        assert!(counter_regressed(3, 0));

        // Authenticators without a counter always report zero
        assert!(!counter_regressed(0, 0));
    }
}
