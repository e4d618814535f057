//! App authorization endpoints.

use super::{bad_request, error_response, internal_error};
use crate::auth::{AuthKind, Principal};
use crate::oauth::{OauthError, OauthFlow, TokenPair};
use crate::scope;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    pub app_id: String,
    /// Scope string in canonical bit encoding, e.g. `01100`.
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeResponse {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant_type: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant_type: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type.to_string(),
            expires_in: pair.expires_in,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/oauth/authorize",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Authorization code issued", body = AuthorizeResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "oauth"
)]
/// Authorize an app for the authenticated user and mint an authorization
/// code. Re-authorizing replaces the previous grant.
pub async fn authorize(
    principal: Principal,
    Extension(flow): Extension<Arc<OauthFlow>>,
    Json(request): Json<AuthorizeRequest>,
) -> Response {
    // Only the account owner may delegate access, never another app
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }

    let scopes = scope::decode(&request.scope);
    match flow
        .authorize(&principal.user_id, &request.app_id, &scopes)
        .await
    {
        Ok(code) => Json(AuthorizeResponse { code }).into_response(),
        Err(err) => oauth_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/oauth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPairResponse),
        (status = 400, description = "Invalid request")
    ),
    tag = "oauth"
)]
/// Exchange an authorization code for an access/refresh token pair.
pub async fn token(
    Extension(flow): Extension<Arc<OauthFlow>>,
    Json(request): Json<TokenRequest>,
) -> Response {
    match flow
        .exchange_code(
            &request.code,
            &request.client_id,
            &request.client_secret,
            &request.grant_type,
        )
        .await
    {
        Ok(pair) => Json(TokenPairResponse::from(pair)).into_response(),
        Err(err) => oauth_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/oauth/token/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Fresh access token issued", body = TokenPairResponse),
        (status = 400, description = "Invalid request")
    ),
    tag = "oauth"
)]
/// Redeem a refresh token for a fresh access token. Fails once the user
/// has revoked the grant.
pub async fn refresh(
    Extension(flow): Extension<Arc<OauthFlow>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    match flow
        .refresh(
            &request.refresh_token,
            &request.client_id,
            &request.client_secret,
            &request.grant_type,
        )
        .await
    {
        Ok(pair) => Json(TokenPairResponse::from(pair)).into_response(),
        Err(err) => oauth_error(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/oauth/authorize/{app_id}",
    params(
        ("app_id" = String, Path, description = "App to revoke")
    ),
    responses(
        (status = 204, description = "Grant removed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "oauth"
)]
/// Revoke the authenticated user's grant for an app.
pub async fn revoke(
    principal: Principal,
    Extension(flow): Extension<Arc<OauthFlow>>,
    Path(app_id): Path<String>,
) -> Response {
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }

    match flow.revoke(&principal.user_id, &app_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("revocation failed: {err}");
            internal_error()
        }
    }
}

/// Every failed flow check gets the same response. Which check failed is
/// an oracle for the caller, so the reason stays in the logs.
fn oauth_error(err: &OauthError) -> Response {
    match err {
        OauthError::InvalidCode
        | OauthError::UnknownApp
        | OauthError::SecretMismatch
        | OauthError::UnsupportedGrantType
        | OauthError::GrantRevoked => {
            warn!("authorization flow rejected: {err}");
            bad_request("invalid request")
        }
        OauthError::Token(_) | OauthError::Store(_) => {
            error!("authorization flow failed: {err}");
            internal_error()
        }
    }
}
