use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::admission::Identity;
use crate::error::AppError;
use crate::state::AppState;
use crate::supabase::{StoreError, User};

const INVALID_REQUEST: &str = "Invalid request";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub code: String,
    pub external_id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub user_id: String,
}

/// Exchange an Apple authorization code, find or create the account and
/// return a session token for it.
pub async fn sign_in_with_apple(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload.map_err(|_| AppError::BadRequest(INVALID_REQUEST))?;
    if req.code.is_empty() || req.external_id.is_empty() {
        return Err(AppError::BadRequest(INVALID_REQUEST));
    }

    state.identity_provider.exchange_code(&req.code).await?;

    let user = match state.store.get_user(&req.external_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            let mut user = User {
                email: req.email,
                external_user_id: req.external_id,
                ..User::default()
            };
            user.user_id = state.store.add_user(&user).await?;
            info!(user_id = %user.user_id, "created account");
            user
        }
        Err(e) => return Err(e.into()),
    };

    let token = state.tokens.issue(&user.user_id, chrono::Utc::now().timestamp())?;
    Ok(Json(json!({ "jwt_token": token })))
}

/// Delete the caller's own account.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<Identity>>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload.map_err(|_| AppError::BadRequest(INVALID_REQUEST))?;

    let caller = identity
        .as_ref()
        .and_then(|Extension(identity)| identity.user_id())
        .ok_or(AppError::Unauthorized)?;
    if caller != req.user_id {
        return Err(AppError::Forbidden);
    }

    state.store.delete_user(&req.user_id).await?;
    info!(user_id = %req.user_id, "deleted account");

    Ok(Json(json!({ "success": "true" })))
}
