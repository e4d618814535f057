//! Passkey ceremony endpoints.
//!
//! Registration runs under an authenticated user; login is open to
//! anonymous callers (discoverable credentials) or may name a user to get
//! a challenge scoped to their credentials. Challenges are single-use and
//! expire after a few minutes; raw authenticator payloads are never logged.

use super::{auth::TokenResponse, bad_request, error_response, internal_error, unauthorized};
use crate::auth::{AuthKind, Principal};
use crate::passkey::{CeremonyEngine, CeremonyError};
use crate::store::{PasskeyStore, SavedPasskey, UserStore};
use crate::token::TokenKind;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeResponse {
    /// Options to pass to `navigator.credentials.create()` or `.get()`.
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterFinishRequest {
    /// Display name for the new credential.
    pub name: String,
    /// Authenticator response, as produced by the browser.
    pub response: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginBeginRequest {
    /// Omit for a discoverable (usernameless) challenge.
    pub username: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginBeginResponse {
    pub challenge_id: Uuid,
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginFinishRequest {
    pub challenge_id: Uuid,
    pub response: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PasskeySummary {
    pub name: String,
    /// Credential id, base64url-encoded without padding.
    pub credential_id: String,
    pub aa_guid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<&SavedPasskey> for PasskeySummary {
    fn from(key: &SavedPasskey) -> Self {
        Self {
            name: key.name.clone(),
            credential_id: Base64UrlUnpadded::encode_string(&key.credential_id),
            aa_guid: key.aa_guid,
            created_at: key.created_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkey/register/begin",
    responses(
        (status = 200, description = "Creation options issued", body = ChallengeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "passkey"
)]
/// Start registering a new passkey for the authenticated user.
pub async fn register_begin(
    principal: Principal,
    Extension(users): Extension<Arc<dyn UserStore>>,
    Extension(engine): Extension<Arc<CeremonyEngine>>,
) -> Response {
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }
    let user = match users.get_user(&principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized(),
        Err(err) => {
            error!("user lookup failed: {err}");
            return internal_error();
        }
    };

    match engine.register_begin(&user).await {
        Ok(options) => match serde_json::to_value(&options) {
            Ok(options) => Json(ChallengeResponse { options }).into_response(),
            Err(err) => {
                error!("failed to serialize creation options: {err}");
                internal_error()
            }
        },
        Err(err) => {
            error!("registration begin failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkey/register/finish",
    request_body = RegisterFinishRequest,
    responses(
        (status = 201, description = "Credential registered", body = PasskeySummary),
        (status = 400, description = "Missing challenge or failed attestation"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "passkey"
)]
/// Finish registration with the authenticator's attestation response.
pub async fn register_finish(
    principal: Principal,
    Extension(users): Extension<Arc<dyn UserStore>>,
    Extension(engine): Extension<Arc<CeremonyEngine>>,
    Json(request): Json<RegisterFinishRequest>,
) -> Response {
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }
    let user = match users.get_user(&principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized(),
        Err(err) => {
            error!("user lookup failed: {err}");
            return internal_error();
        }
    };
    let Ok(response) = serde_json::from_value::<RegisterPublicKeyCredential>(request.response)
    else {
        return bad_request("malformed authenticator response");
    };

    match engine.register_finish(&user, &request.name, &response).await {
        Ok(saved) => (StatusCode::CREATED, Json(PasskeySummary::from(&saved))).into_response(),
        Err(CeremonyError::Store(err)) => {
            error!("store failure during registration: {err}");
            internal_error()
        }
        Err(err) => {
            warn!("passkey registration rejected: {err}");
            bad_request("registration failed")
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkey/login/begin",
    request_body = LoginBeginRequest,
    responses(
        (status = 200, description = "Assertion options issued", body = LoginBeginResponse),
        (status = 400, description = "Unknown user or no credentials")
    ),
    tag = "passkey"
)]
/// Start a passkey login. Anonymous requests get a discoverable challenge.
pub async fn login_begin(
    Extension(engine): Extension<Arc<CeremonyEngine>>,
    Json(request): Json<LoginBeginRequest>,
) -> Response {
    match engine.assert_begin(request.username.as_deref()).await {
        Ok((challenge_id, options)) => match serde_json::to_value(&options) {
            Ok(options) => Json(LoginBeginResponse {
                challenge_id,
                options,
            })
            .into_response(),
            Err(err) => {
                error!("failed to serialize assertion options: {err}");
                internal_error()
            }
        },
        Err(CeremonyError::UnknownUser | CeremonyError::UnknownCredential) => {
            // One body for both: do not reveal whether the username exists
            warn!("assertion begin rejected");
            bad_request("cannot start passkey login")
        }
        Err(err) => {
            error!("assertion begin failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkey/login/finish",
    request_body = LoginFinishRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 401, description = "Verification failed or challenge expired")
    ),
    tag = "passkey"
)]
/// Finish a passkey login and receive a full login token.
pub async fn login_finish(
    Extension(engine): Extension<Arc<CeremonyEngine>>,
    Json(request): Json<LoginFinishRequest>,
) -> Response {
    let Ok(response) = serde_json::from_value::<PublicKeyCredential>(request.response) else {
        return bad_request("malformed authenticator response");
    };

    match engine.assert_finish(request.challenge_id, &response).await {
        Ok((_user_id, token)) => Json(TokenResponse {
            token,
            token_type: TokenKind::Login.discriminator().to_string(),
        })
        .into_response(),
        Err(CeremonyError::Store(err)) => {
            error!("store failure during assertion: {err}");
            internal_error()
        }
        Err(err) => {
            warn!("passkey assertion rejected: {err}");
            unauthorized()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/passkey",
    responses(
        (status = 200, description = "Registered credentials", body = [PasskeySummary]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "passkey"
)]
/// List the authenticated user's registered passkeys.
pub async fn list(
    principal: Principal,
    Extension(passkeys): Extension<Arc<dyn PasskeyStore>>,
) -> Response {
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }

    match passkeys.get_users_passkeys(&principal.user_id).await {
        Ok(keys) => {
            let summaries: Vec<PasskeySummary> = keys.iter().map(PasskeySummary::from).collect();
            Json(summaries).into_response()
        }
        Err(err) => {
            error!("passkey listing failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/auth/passkey/{credential_id}",
    params(
        ("credential_id" = String, Path, description = "Credential id, base64url without padding")
    ),
    responses(
        (status = 204, description = "Credential removed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token"),
        (status = 404, description = "No such credential on this account")
    ),
    tag = "passkey"
)]
/// Delete one of the authenticated user's passkeys.
pub async fn delete(
    principal: Principal,
    Extension(passkeys): Extension<Arc<dyn PasskeyStore>>,
    Path(credential_id): Path<String>,
) -> Response {
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }
    let Ok(credential_id) = Base64UrlUnpadded::decode_vec(&credential_id) else {
        return bad_request("malformed credential id");
    };

    // Another account's credential reads the same as a missing one
    match passkeys.get_user_id_from_passkey_id(&credential_id).await {
        Ok(Some(owner)) if owner == principal.user_id => {}
        Ok(_) => return error_response(StatusCode::NOT_FOUND, "no such credential"),
        Err(err) => {
            error!("passkey lookup failed: {err}");
            return internal_error();
        }
    }

    match passkeys.delete_passkey(&credential_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("passkey deletion failed: {err}");
            internal_error()
        }
    }
}
