//! Token service: issues and validates the signed bearer credentials used by
//! every authentication flow.
//!
//! All tokens are HS256 JWTs carrying a flat claim map with a mandatory
//! `type` discriminator. Validation is stateless: signature, issuer,
//! audience and expiry, then the discriminator, then kind-specific
//! cross-checks. There is no revocation list; the discriminator check is the
//! primary safety net against a token of one kind being replayed as another.
//!
//! The signing secret, issuer and audience are explicit configuration passed
//! in at construction. The one exception to the global secret is the
//! checkout-success token, which is signed with a caller-supplied
//! per-product secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_LONG_LIVED_HOURS: i64 = 87_600; // ~10 years
const DEFAULT_ACCESS_HOURS: i64 = 1;
const DEFAULT_REFRESH_HOURS: i64 = 876_000; // ~100 years

/// The seven token kinds and their wire discriminators.
///
/// The discriminator strings are a compatibility contract; do not rename.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Login,
    FirstStepLogin,
    OauthAuthorization,
    OauthAccess,
    OauthRefresh,
    EmailConfirmation,
    CheckoutSuccess,
}

impl TokenKind {
    #[must_use]
    pub const fn discriminator(self) -> &'static str {
        match self {
            Self::Login => "user",
            Self::FirstStepLogin => "first-step-login",
            Self::OauthAuthorization => "oauth-authorization",
            Self::OauthAccess => "oauth-access",
            Self::OauthRefresh => "oauth-refresh",
            Self::EmailConfirmation => "email-confirmation",
            Self::CheckoutSuccess => "checkout_success",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Wrong secret, tampered payload, wrong issuer/audience, or a string
    /// that is not a JWT at all.
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("missing claim: {0}")]
    MissingClaims(&'static str),
    #[error("wrong token kind: expected {expected}")]
    WrongKind { expected: &'static str },
    /// Authorization-code and refresh tokens are bound to one app id.
    #[error("token is bound to a different app")]
    AppIdMismatch,
    #[error("failed to sign token")]
    Signing,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    aud: String,
    exp: i64,
    iat: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    userid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    appid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    productid: Option<String>,
}

impl Claims {
    fn empty(kind: TokenKind, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            kind: kind.discriminator().to_string(),
            userid: None,
            appid: None,
            scope: None,
            email: None,
            productid: None,
        }
    }

    fn require(claim: Option<String>, name: &'static str) -> Result<String, TokenError> {
        claim.ok_or(TokenError::MissingClaims(name))
    }
}

/// Token service configuration. Lifetimes keep the source deployment's
/// defaults but are overridable; several "short-lived in intent" kinds use a
/// deliberately overlong default, so kind checks, not expiry, carry the
/// single-use semantics.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    audience: String,
    long_lived_ttl_hours: i64,
    access_ttl_hours: i64,
    refresh_ttl_hours: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString, issuer: String, audience: String) -> Self {
        Self {
            secret,
            issuer,
            audience,
            long_lived_ttl_hours: DEFAULT_LONG_LIVED_HOURS,
            access_ttl_hours: DEFAULT_ACCESS_HOURS,
            refresh_ttl_hours: DEFAULT_REFRESH_HOURS,
        }
    }

    #[must_use]
    pub fn with_long_lived_ttl_hours(mut self, hours: i64) -> Self {
        self.long_lived_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_access_ttl_hours(mut self, hours: i64) -> Self {
        self.access_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_hours(mut self, hours: i64) -> Self {
        self.refresh_ttl_hours = hours;
        self
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        let hours = match kind {
            TokenKind::OauthAccess => self.access_ttl_hours,
            TokenKind::OauthRefresh => self.refresh_ttl_hours,
            _ => self.long_lived_ttl_hours,
        };
        Duration::hours(hours)
    }
}

/// Issues and validates all bearer tokens. Pure construction and
/// verification; subject resolution against the user store is the calling
/// flow's responsibility.
#[derive(Clone, Debug)]
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Access-token lifetime in seconds, for `expires_in` response fields.
    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.config.access_ttl_hours * 3600
    }

    /// Full-access bearer credential, issued after password or passkey
    /// authentication with no MFA step pending.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_login(&self, user_id: &str) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::Login);
        claims.userid = Some(user_id.to_string());
        self.sign(&claims, None)
    }

    /// Issued when the password was correct but a TOTP code is still
    /// required before a login token may be granted.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_first_step(&self, user_id: &str) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::FirstStepLogin);
        claims.userid = Some(user_id.to_string());
        self.sign(&claims, None)
    }

    /// OAuth authorization code, bound to one app and scope.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_authorization_code(
        &self,
        user_id: &str,
        app_id: &str,
        scope: &str,
    ) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::OauthAuthorization);
        claims.userid = Some(user_id.to_string());
        claims.appid = Some(app_id.to_string());
        claims.scope = Some(scope.to_string());
        self.sign(&claims, None)
    }

    /// Scoped bearer credential for an authorized app.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_access(&self, user_id: &str, scope: &str) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::OauthAccess);
        claims.userid = Some(user_id.to_string());
        claims.scope = Some(scope.to_string());
        self.sign(&claims, None)
    }

    /// Long-lived token redeemable for fresh access tokens, bound to one
    /// app id.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        app_id: &str,
        scope: &str,
    ) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::OauthRefresh);
        claims.userid = Some(user_id.to_string());
        claims.appid = Some(app_id.to_string());
        claims.scope = Some(scope.to_string());
        self.sign(&claims, None)
    }

    /// Redeemed by the email-confirmation link. The caller must additionally
    /// check the embedded email still matches and the user is not already
    /// verified.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_email_confirmation(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::EmailConfirmation);
        claims.userid = Some(user_id.to_string());
        claims.email = Some(email.to_string());
        self.sign(&claims, None)
    }

    /// Proof-of-purchase handed to a redirect target, signed with a
    /// per-product secret instead of the global one.
    ///
    /// # Errors
    /// Returns `Signing` if the JWT cannot be encoded.
    pub fn issue_checkout_success(
        &self,
        product_id: &str,
        product_secret: &str,
    ) -> Result<String, TokenError> {
        let mut claims = self.claims(TokenKind::CheckoutSuccess);
        claims.productid = Some(product_id.to_string());
        self.sign(&claims, Some(product_secret))
    }

    /// Validate a login token and return the subject's user id.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn validate_login(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.verify(token, TokenKind::Login, None)?;
        Claims::require(claims.userid, "userid")
    }

    /// Validate a first-step login token and return the subject's user id.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn validate_first_step(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.verify(token, TokenKind::FirstStepLogin, None)?;
        Claims::require(claims.userid, "userid")
    }

    /// Validate an authorization code presented by `app_id` and return
    /// `(user_id, scope)`.
    ///
    /// # Errors
    /// `AppIdMismatch` if the code was issued to a different app; otherwise
    /// see [`TokenError`].
    pub fn validate_authorization_code(
        &self,
        token: &str,
        app_id: &str,
    ) -> Result<(String, String), TokenError> {
        let claims = self.verify(token, TokenKind::OauthAuthorization, None)?;
        let user_id = Claims::require(claims.userid, "userid")?;
        let token_app_id = Claims::require(claims.appid, "appid")?;
        let scope = Claims::require(claims.scope, "scope")?;
        if token_app_id != app_id {
            return Err(TokenError::AppIdMismatch);
        }
        Ok((user_id, scope))
    }

    /// Validate an access token and return `(user_id, scope)`.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn validate_access(&self, token: &str) -> Result<(String, String), TokenError> {
        let claims = self.verify(token, TokenKind::OauthAccess, None)?;
        let user_id = Claims::require(claims.userid, "userid")?;
        let scope = Claims::require(claims.scope, "scope")?;
        Ok((user_id, scope))
    }

    /// Validate a refresh token presented by `app_id` and return
    /// `(user_id, scope)`.
    ///
    /// # Errors
    /// `AppIdMismatch` if the token is bound to a different app; otherwise
    /// see [`TokenError`].
    pub fn validate_refresh(
        &self,
        token: &str,
        app_id: &str,
    ) -> Result<(String, String), TokenError> {
        let claims = self.verify(token, TokenKind::OauthRefresh, None)?;
        let user_id = Claims::require(claims.userid, "userid")?;
        let token_app_id = Claims::require(claims.appid, "appid")?;
        let scope = Claims::require(claims.scope, "scope")?;
        if token_app_id != app_id {
            return Err(TokenError::AppIdMismatch);
        }
        Ok((user_id, scope))
    }

    /// Validate an email-confirmation token and return `(user_id, email)`.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn validate_email_confirmation(
        &self,
        token: &str,
    ) -> Result<(String, String), TokenError> {
        let claims = self.verify(token, TokenKind::EmailConfirmation, None)?;
        let user_id = Claims::require(claims.userid, "userid")?;
        let email = Claims::require(claims.email, "email")?;
        Ok((user_id, email))
    }

    /// Validate a checkout-success token against its per-product secret and
    /// return the product id.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn validate_checkout_success(
        &self,
        token: &str,
        product_secret: &str,
    ) -> Result<String, TokenError> {
        let claims = self.verify(token, TokenKind::CheckoutSuccess, Some(product_secret))?;
        Claims::require(claims.productid, "productid")
    }

    fn claims(&self, kind: TokenKind) -> Claims {
        Claims::empty(
            kind,
            &self.config.issuer,
            &self.config.audience,
            self.config.ttl(kind),
        )
    }

    fn sign(&self, claims: &Claims, secret_override: Option<&str>) -> Result<String, TokenError> {
        let key = match secret_override {
            Some(secret) => EncodingKey::from_secret(secret.as_bytes()),
            None => EncodingKey::from_secret(self.config.secret.expose_secret().as_bytes()),
        };
        encode(&Header::default(), claims, &key).map_err(|_| TokenError::Signing)
    }

    fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        secret_override: Option<&str>,
    ) -> Result<Claims, TokenError> {
        let key = match secret_override {
            Some(secret) => DecodingKey::from_secret(secret.as_bytes()),
            None => DecodingKey::from_secret(self.config.secret.expose_secret().as_bytes()),
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        let data = decode::<Claims>(token, &key, &validation).map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            // A claim map that cannot be decoded means a required claim is
            // absent or the wrong shape.
            ErrorKind::Json(_) => TokenError::MissingClaims("type"),
            _ => TokenError::InvalidSignature,
        })?;

        if data.claims.kind != expected.discriminator() {
            return Err(TokenError::WrongKind {
                expected: expected.discriminator(),
            });
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "konto".to_string(),
            "konto-api".to_string(),
        ))
    }

    #[test]
    fn login_token_round_trips() -> anyhow::Result<()> {
        let service = service();
        let token = service.issue_login("user-1")?;
        assert_eq!(service.validate_login(&token)?, "user-1");
        Ok(())
    }

    #[test]
    fn kind_discriminator_rejects_cross_validation() -> anyhow::Result<()> {
        let service = service();
        // Both kinds carry only a userid claim; the `type` check is what
        // keeps them apart.
        let first_step = service.issue_first_step("user-1")?;
        assert_eq!(
            service.validate_login(&first_step),
            Err(TokenError::WrongKind { expected: "user" })
        );
        let login = service.issue_login("user-1")?;
        assert_eq!(
            service.validate_first_step(&login),
            Err(TokenError::WrongKind {
                expected: "first-step-login"
            })
        );
        Ok(())
    }

    #[test]
    fn every_kind_rejects_every_other_kind() -> anyhow::Result<()> {
        let service = service();
        let tokens = [
            service.issue_login("u")?,
            service.issue_first_step("u")?,
            service.issue_authorization_code("u", "a", "10000")?,
            service.issue_access("u", "10000")?,
            service.issue_refresh("u", "a", "10000")?,
            service.issue_email_confirmation("u", "u@example.com")?,
        ];
        let mut rejections = 0;
        for (index, token) in tokens.iter().enumerate() {
            if index != 0 && service.validate_login(token).is_err() {
                rejections += 1;
            }
            if index != 3 && service.validate_access(token).is_err() {
                rejections += 1;
            }
        }
        assert_eq!(rejections, 10);
        Ok(())
    }

    #[test]
    fn wrong_secret_is_an_invalid_signature() -> anyhow::Result<()> {
        let token = service().issue_login("user-1")?;
        let other = TokenService::new(TokenConfig::new(
            SecretString::from("a-different-secret-entirely-here"),
            "konto".to_string(),
            "konto-api".to_string(),
        ));
        assert_eq!(other.validate_login(&token), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn wrong_issuer_or_audience_is_an_invalid_signature() -> anyhow::Result<()> {
        let token = service().issue_login("user-1")?;
        let other = TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "somebody-else".to_string(),
            "konto-api".to_string(),
        ));
        assert_eq!(other.validate_login(&token), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn garbage_is_an_invalid_signature() {
        assert_eq!(
            service().validate_login("not-a-jwt"),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() -> anyhow::Result<()> {
        let service = TokenService::new(
            TokenConfig::new(
                SecretString::from("a-test-secret-that-is-long-enough"),
                "konto".to_string(),
                "konto-api".to_string(),
            )
            .with_long_lived_ttl_hours(-1),
        );
        let token = service.issue_login("user-1")?;
        assert_eq!(service.validate_login(&token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn authorization_code_is_bound_to_its_app() -> anyhow::Result<()> {
        let service = service();
        let code = service.issue_authorization_code("user-1", "app-1", "01000")?;
        assert_eq!(
            service.validate_authorization_code(&code, "app-1")?,
            ("user-1".to_string(), "01000".to_string())
        );
        assert_eq!(
            service.validate_authorization_code(&code, "app-2"),
            Err(TokenError::AppIdMismatch)
        );
        Ok(())
    }

    #[test]
    fn refresh_token_is_bound_to_its_app() -> anyhow::Result<()> {
        let service = service();
        let refresh = service.issue_refresh("user-1", "app-1", "00100")?;
        assert!(service.validate_refresh(&refresh, "app-1").is_ok());
        assert_eq!(
            service.validate_refresh(&refresh, "app-2"),
            Err(TokenError::AppIdMismatch)
        );
        Ok(())
    }

    #[test]
    fn checkout_success_uses_the_per_product_secret() -> anyhow::Result<()> {
        let service = service();
        let token = service.issue_checkout_success("prod-9", "product-secret")?;
        assert_eq!(
            service.validate_checkout_success(&token, "product-secret")?,
            "prod-9"
        );
        // The global secret must not validate it
        assert_eq!(
            service.validate_checkout_success(&token, "a-test-secret-that-is-long-enough"),
            Err(TokenError::InvalidSignature)
        );
        Ok(())
    }

    #[test]
    fn email_confirmation_carries_the_email() -> anyhow::Result<()> {
        let service = service();
        let token = service.issue_email_confirmation("user-1", "old@example.com")?;
        let (user_id, email) = service.validate_email_confirmation(&token)?;
        assert_eq!(user_id, "user-1");
        assert_eq!(email, "old@example.com");
        Ok(())
    }
}
