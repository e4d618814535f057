//! Data model for the user, app and passkey stores.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webauthn_rs::prelude::Passkey;

/// Account permission levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermLevel {
    Disabled,
    Normal,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub verified_email: bool,
    /// PHC-format Argon2id hash; the salt used is also kept alongside.
    pub password_hash: Option<String>,
    pub password_salt: Option<String>,
    pub perm_level: PermLevel,
    pub stripe_customer_id: Option<String>,
    pub totp_enabled: bool,
    pub totp_secret: Option<String>,
    pub language: Option<String>,
}

impl User {
    #[must_use]
    pub fn new(username: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            verified_email: false,
            password_hash: None,
            password_salt: None,
            perm_level: PermLevel::Normal,
            stripe_customer_id: None,
            totp_enabled: false,
            totp_secret: None,
            language: None,
        }
    }

    /// Hash and store a new password.
    ///
    /// # Errors
    /// Returns an error if Argon2 hashing fails.
    pub fn set_password(&mut self, password: &str) -> anyhow::Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;
        self.password_hash = Some(hash.to_string());
        self.password_salt = Some(salt.to_string());
        Ok(())
    }

    /// Verify a candidate password. Accounts without a password never match.
    #[must_use]
    pub fn check_password(&self, candidate: &str) -> bool {
        let Some(stored) = self.password_hash.as_deref() else {
            return false;
        };
        let Ok(hash) = PasswordHash::new(stored) else {
            return false;
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &hash)
            .is_ok()
    }

    /// Stable WebAuthn user handle derived from the account id.
    #[must_use]
    pub fn webauthn_handle(&self) -> Uuid {
        Uuid::parse_str(&self.id)
            .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, self.id.as_bytes()))
    }
}

/// A user's consent for a third-party app: unique per (user, app),
/// re-authorizing replaces the scope rather than duplicating the grant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizedApp {
    pub app_id: String,
    pub scope: String,
}

/// A registered third-party OAuth client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthApp {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// A persisted passwordless credential.
///
/// `sign_count` and `device_public_keys` are the only fields mutated after
/// creation, on each successful assertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedPasskey {
    pub owner_id: String,
    pub name: String,
    pub credential_id: Vec<u8>,
    /// Serialized `webauthn-rs` credential (public key + attestation
    /// metadata).
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub aa_guid: Uuid,
    pub device_public_keys: Vec<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl SavedPasskey {
    /// Build a record from a freshly verified registration.
    ///
    /// # Errors
    /// Returns an error if the credential cannot be serialized.
    pub fn from_registration(
        owner_id: &str,
        name: &str,
        passkey: &Passkey,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            credential_id: passkey.cred_id().as_slice().to_vec(),
            public_key: serde_json::to_vec(passkey)?,
            sign_count: 0,
            aa_guid: Uuid::nil(),
            device_public_keys: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Deserialize the stored credential for verification.
    ///
    /// # Errors
    /// Returns an error if the stored bytes are not a valid credential.
    pub fn credential(&self) -> anyhow::Result<Passkey> {
        serde_json::from_slice(&self.public_key)
            .map_err(|err| anyhow::anyhow!("corrupt stored credential: {err}"))
    }
}
