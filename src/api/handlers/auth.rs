//! Password login and the TOTP second factor.
//!
//! `GET /v1/auth` takes Basic credentials and answers with either a full
//! login token or a first-step token, depending on whether the account has
//! TOTP enabled. Failures are reported with one generic body; the reason
//! only goes to the logs.

use super::{MAX_PASSWORD_LENGTH, bad_request, error_response, internal_error, unauthorized};
use crate::auth::{AuthKind, LoginOutcome, MfaError, MfaService, Principal};
use crate::store::{PermLevel, UserStore};
use crate::token::TokenKind;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    /// Discriminator of the issued token: `user` or `first-step-login`.
    pub token_type: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaRequest {
    /// First-step token from the password login.
    pub token: String,
    /// Current 6-digit authenticator code.
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TotpProvisionResponse {
    /// Base32 shared secret, for manual entry.
    pub secret: String,
    pub otpauth_url: String,
    /// PNG rendering of the otpauth URL, base64-encoded.
    pub qr_png_base64: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth",
    params(
        ("Authorization" = String, Header, description = "Basic credentials")
    ),
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 400, description = "Malformed credentials"),
        (status = 401, description = "Invalid username or password"),
        (status = 403, description = "Account is disabled")
    ),
    tag = "auth"
)]
/// Password login. TOTP-enabled accounts receive a first-step token that
/// must be redeemed at `/v1/auth/mfa`.
pub async fn login(
    headers: HeaderMap,
    Extension(users): Extension<Arc<dyn UserStore>>,
    Extension(mfa): Extension<Arc<MfaService>>,
) -> Response {
    let Some((username, password)) = basic_credentials(&headers) else {
        return bad_request("expected Basic authorization");
    };
    if password.len() > MAX_PASSWORD_LENGTH {
        return bad_request("password too long");
    }

    let user = match users.get_user_by_name(&username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(%username, "login attempt for unknown user");
            return unauthorized();
        }
        Err(err) => {
            error!("user lookup failed: {err}");
            return internal_error();
        }
    };

    if !user.check_password(&password) {
        warn!(user = %user.id, "login attempt with wrong password");
        return unauthorized();
    }
    if user.perm_level == PermLevel::Disabled {
        warn!(user = %user.id, "login attempt on disabled account");
        return error_response(StatusCode::FORBIDDEN, "account is disabled");
    }

    match mfa.login_outcome(&user) {
        Ok(LoginOutcome::Full(token)) => {
            info!(user = %user.id, "password login");
            Json(TokenResponse {
                token,
                token_type: TokenKind::Login.discriminator().to_string(),
            })
            .into_response()
        }
        Ok(LoginOutcome::FirstStep(token)) => {
            info!(user = %user.id, "password verified, TOTP pending");
            Json(TokenResponse {
                token,
                token_type: TokenKind::FirstStepLogin.discriminator().to_string(),
            })
            .into_response()
        }
        Err(err) => {
            error!("token issuance failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa",
    request_body = MfaRequest,
    responses(
        (status = 200, description = "Second factor cleared", body = TokenResponse),
        (status = 401, description = "Invalid token or code")
    ),
    tag = "auth"
)]
/// Redeem a first-step token plus TOTP code for a full login token.
pub async fn mfa_verify(
    Extension(mfa): Extension<Arc<MfaService>>,
    Json(request): Json<MfaRequest>,
) -> Response {
    match mfa.verify(&request.token, &request.code).await {
        Ok(token) => Json(TokenResponse {
            token,
            token_type: TokenKind::Login.discriminator().to_string(),
        })
        .into_response(),
        Err(MfaError::Store(err)) => {
            error!("store failure during MFA verification: {err}");
            internal_error()
        }
        Err(err) => {
            warn!("MFA verification rejected: {err}");
            unauthorized()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/mfa/totp/provision",
    responses(
        (status = 200, description = "Enrollment details", body = TotpProvisionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires a direct user token")
    ),
    tag = "auth"
)]
/// Enrollment details for the authenticated user; generates and persists a
/// secret on first call.
pub async fn totp_provision(
    principal: Principal,
    Extension(mfa): Extension<Arc<MfaService>>,
) -> Response {
    // Account security settings are off-limits to delegated app tokens
    if principal.kind != AuthKind::User {
        return error_response(StatusCode::FORBIDDEN, "requires a direct user token");
    }

    match mfa.provision(&principal.user_id).await {
        Ok(details) => Json(TotpProvisionResponse {
            secret: details.secret,
            otpauth_url: details.otpauth_url,
            qr_png_base64: details.qr_png_base64,
        })
        .into_response(),
        Err(MfaError::UserNotFound) => unauthorized(),
        Err(err) => {
            error!("TOTP provisioning failed: {err}");
            internal_error()
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = Base64::decode_vec(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
