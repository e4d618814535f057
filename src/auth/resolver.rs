//! Per-request principal resolution.
//!
//! Two header schemes are accepted and resolved once, at the boundary, into
//! a closed variant:
//!
//!   Konto-Auth: User <token>      — direct user login token (full access)
//!   Konto-Auth: App <token>       — OAuth access token (scoped)
//!   Authorization: Bearer <token> — compatibility path; tried as a user
//!                                   token first, then as an app token
//!
//! "No recognized header" is anonymous (`NoResult`), which is distinct from
//! an explicitly invalid header (`Fail`); routes decide whether anonymous
//! access is permitted.

use crate::scope;
use crate::store::UserStore;
use crate::token::TokenService;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Dedicated auth header carrying an explicit scheme prefix.
pub const AUTH_HEADER: &str = "konto-auth";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthKind {
    User,
    App,
}

/// The authenticated caller: subject, scheme kind, and the scope string
/// gating what it may do.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: String,
    pub kind: AuthKind,
    pub scope: String,
}

impl Principal {
    /// Whether this principal carries a capability, directly or through
    /// `full_access`.
    #[must_use]
    pub fn has_scope(&self, capability: scope::Scope) -> bool {
        scope::has(&self.scope, capability)
    }
}

#[derive(Debug)]
pub enum Resolution {
    Principal(Principal),
    /// No recognized auth header at all: anonymous, not invalid.
    NoResult,
    Fail(&'static str),
}

/// Header scheme, resolved once; handlers never look at raw headers.
enum HeaderScheme {
    User(String),
    App(String),
    Bearer(String),
}

pub struct Resolver {
    tokens: TokenService,
    users: Arc<dyn UserStore>,
}

impl Resolver {
    #[must_use]
    pub fn new(tokens: TokenService, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Resolve request headers into a principal.
    pub async fn resolve(&self, headers: &HeaderMap) -> Resolution {
        let scheme = match parse_headers(headers) {
            Ok(Some(scheme)) => scheme,
            Ok(None) => return Resolution::NoResult,
            Err(reason) => return Resolution::Fail(reason),
        };

        match scheme {
            HeaderScheme::User(token) => self.as_user(&token).await,
            HeaderScheme::App(token) => self.as_app(&token).await,
            HeaderScheme::Bearer(token) => {
                // User token first: a token that satisfies both shapes is
                // always treated as a user token.
                match self.as_user(&token).await {
                    Resolution::Principal(principal) => Resolution::Principal(principal),
                    _ => self.as_app(&token).await,
                }
            }
        }
    }

    async fn as_user(&self, token: &str) -> Resolution {
        let user_id = match self.tokens.validate_login(token) {
            Ok(user_id) => user_id,
            Err(err) => {
                debug!("user token rejected: {err}");
                return Resolution::Fail("invalid user token");
            }
        };
        match self.users.get_user(&user_id).await {
            Ok(Some(_)) => Resolution::Principal(Principal {
                user_id,
                kind: AuthKind::User,
                // Direct user credentials always carry full access.
                scope: scope::FULL_ACCESS.to_string(),
            }),
            Ok(None) => Resolution::Fail("user not found"),
            Err(err) => {
                error!("user lookup failed during authentication: {err}");
                Resolution::Fail("authentication unavailable")
            }
        }
    }

    async fn as_app(&self, token: &str) -> Resolution {
        let (user_id, token_scope) = match self.tokens.validate_access(token) {
            Ok(validated) => validated,
            Err(err) => {
                debug!("app access token rejected: {err}");
                return Resolution::Fail("invalid app access token");
            }
        };
        match self.users.get_user(&user_id).await {
            Ok(Some(_)) => Resolution::Principal(Principal {
                user_id,
                kind: AuthKind::App,
                scope: token_scope,
            }),
            Ok(None) => Resolution::Fail("user not found"),
            Err(err) => {
                error!("user lookup failed during authentication: {err}");
                Resolution::Fail("authentication unavailable")
            }
        }
    }
}

fn parse_headers(headers: &HeaderMap) -> Result<Option<HeaderScheme>, &'static str> {
    if let Some(value) = headers.get(AUTH_HEADER) {
        let value = value.to_str().map_err(|_| "auth header is not valid text")?;
        let mut parts = value.splitn(2, ' ');
        let kind = parts.next().unwrap_or_default();
        let Some(token) = parts.next() else {
            return Err("auth header must be in the format 'TYPE TOKEN'");
        };
        return match kind {
            "User" => Ok(Some(HeaderScheme::User(token.to_string()))),
            "App" => Ok(Some(HeaderScheme::App(token.to_string()))),
            _ => Err("unknown auth type"),
        };
    }

    if let Some(value) = headers.get(AUTHORIZATION) {
        let Ok(value) = value.to_str() else {
            return Ok(None);
        };
        let mut parts = value.splitn(2, ' ');
        let kind = parts.next().unwrap_or_default();
        let Some(token) = parts.next() else {
            return Ok(None);
        };
        // Only intercept Bearer; Basic auth belongs to the password login
        // endpoint.
        if kind.eq_ignore_ascii_case("bearer") {
            return Ok(Some(HeaderScheme::Bearer(token.to_string())));
        }
        return Ok(None);
    }

    Ok(None)
}

/// Extractor requiring an authenticated principal. Anonymous and invalid
/// requests are both rejected with 401.
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resolver = parts
            .extensions
            .get::<Arc<Resolver>>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        match resolver.resolve(&parts.headers).await {
            Resolution::Principal(principal) => Ok(principal),
            Resolution::NoResult | Resolution::Fail(_) => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

/// Extractor for routes that permit anonymous access: `NoResult` becomes
/// `None`, while an explicitly invalid header is still rejected.
pub struct MaybePrincipal(pub Option<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for MaybePrincipal {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resolver = parts
            .extensions
            .get::<Arc<Resolver>>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        match resolver.resolve(&parts.headers).await {
            Resolution::Principal(principal) => Ok(Self(Some(principal))),
            Resolution::NoResult => Ok(Self(None)),
            Resolution::Fail(_) => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, User};
    use crate::token::TokenConfig;
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    fn token_service() -> TokenService {
        TokenService::new(TokenConfig::new(
            SecretString::from("a-test-secret-that-is-long-enough"),
            "konto".to_string(),
            "konto-api".to_string(),
        ))
    }

    async fn resolver_with_user() -> (Resolver, User, TokenService) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("alice".to_string(), "alice@example.com".to_string());
        store.add_user(&user).await.expect("add user");
        let tokens = token_service();
        (Resolver::new(tokens.clone(), store), user, tokens)
    }

    fn headers(name: &'static str, value: String) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(&value).expect("header"));
        headers
    }

    #[tokio::test]
    async fn dedicated_header_resolves_a_user_principal() -> anyhow::Result<()> {
        let (resolver, user, tokens) = resolver_with_user().await;
        let token = tokens.issue_login(&user.id)?;

        let resolution = resolver
            .resolve(&headers(AUTH_HEADER, format!("User {token}")))
            .await;
        let Resolution::Principal(principal) = resolution else {
            panic!("expected a principal");
        };
        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.kind, AuthKind::User);
        assert_eq!(principal.scope, scope::FULL_ACCESS);
        Ok(())
    }

    #[tokio::test]
    async fn dedicated_header_resolves_an_app_principal_with_its_scope() -> anyhow::Result<()> {
        let (resolver, user, tokens) = resolver_with_user().await;
        let token = tokens.issue_access(&user.id, "01000")?;

        let resolution = resolver
            .resolve(&headers(AUTH_HEADER, format!("App {token}")))
            .await;
        let Resolution::Principal(principal) = resolution else {
            panic!("expected a principal");
        };
        assert_eq!(principal.kind, AuthKind::App);
        assert_eq!(principal.scope, "01000");
        assert!(principal.has_scope(scope::Scope::FileHost));
        assert!(!principal.has_scope(scope::Scope::UserInfo));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_auth_type_fails_explicitly() {
        let (resolver, _, _) = resolver_with_user().await;
        let resolution = resolver
            .resolve(&headers(AUTH_HEADER, "Robot beep-boop".to_string()))
            .await;
        assert!(matches!(resolution, Resolution::Fail("unknown auth type")));
    }

    #[tokio::test]
    async fn bearer_prefers_user_over_app_interpretation() -> anyhow::Result<()> {
        let (resolver, user, tokens) = resolver_with_user().await;

        let login = tokens.issue_login(&user.id)?;
        let resolution = resolver
            .resolve(&headers("authorization", format!("Bearer {login}")))
            .await;
        let Resolution::Principal(principal) = resolution else {
            panic!("expected a principal");
        };
        assert_eq!(principal.kind, AuthKind::User);

        let access = tokens.issue_access(&user.id, "00100")?;
        let resolution = resolver
            .resolve(&headers("authorization", format!("Bearer {access}")))
            .await;
        let Resolution::Principal(principal) = resolution else {
            panic!("expected a principal");
        };
        assert_eq!(principal.kind, AuthKind::App);
        Ok(())
    }

    #[tokio::test]
    async fn no_headers_is_anonymous_not_invalid() {
        let (resolver, _, _) = resolver_with_user().await;
        assert!(matches!(
            resolver.resolve(&HeaderMap::new()).await,
            Resolution::NoResult
        ));
    }

    #[tokio::test]
    async fn basic_authorization_is_left_alone() {
        let (resolver, _, _) = resolver_with_user().await;
        let resolution = resolver
            .resolve(&headers("authorization", "Basic dXNlcjpwYXNz".to_string()))
            .await;
        assert!(matches!(resolution, Resolution::NoResult));
    }

    #[tokio::test]
    async fn token_for_a_deleted_user_fails() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tokens = token_service();
        let resolver = Resolver::new(tokens.clone(), store);
        let token = tokens.issue_login("ghost")?;

        let resolution = resolver
            .resolve(&headers(AUTH_HEADER, format!("User {token}")))
            .await;
        assert!(matches!(resolution, Resolution::Fail("user not found")));
        Ok(())
    }
}
