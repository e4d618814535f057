//! Email confirmation.

use super::{bad_request, internal_error};
use crate::store::UserStore;
use crate::token::TokenService;
use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmEmailResponse {
    pub email: String,
}

#[utoipa::path(
    get,
    path = "/v1/account/confirm-email/{token}",
    params(
        ("token" = String, Path, description = "Confirmation token from the email link")
    ),
    responses(
        (status = 200, description = "Email confirmed", body = ConfirmEmailResponse),
        (status = 400, description = "Invalid, expired or stale token")
    ),
    tag = "account"
)]
/// Redeem an email-confirmation token. The embedded address must still
/// match the account's current one, and an already-verified account cannot
/// be re-confirmed.
pub async fn confirm_email(
    Extension(users): Extension<Arc<dyn UserStore>>,
    Extension(tokens): Extension<TokenService>,
    Path(token): Path<String>,
) -> Response {
    let (user_id, email) = match tokens.validate_email_confirmation(&token) {
        Ok(validated) => validated,
        Err(err) => {
            warn!("email confirmation token rejected: {err}");
            return bad_request("invalid confirmation token");
        }
    };

    let mut user = match users.get_user(&user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return bad_request("invalid confirmation token"),
        Err(err) => {
            error!("user lookup failed: {err}");
            return internal_error();
        }
    };

    if user.verified_email {
        return bad_request("email is already confirmed");
    }
    // The link was minted for a previous address; force a fresh email
    if user.email != email {
        warn!(user = %user.id, "confirmation token for a stale email address");
        return bad_request("invalid confirmation token");
    }

    user.verified_email = true;
    if let Err(err) = users.update_user(&user).await {
        error!("failed to persist email confirmation: {err}");
        return internal_error();
    }

    info!(user = %user.id, "email confirmed");
    Json(ConfirmEmailResponse { email }).into_response()
}
