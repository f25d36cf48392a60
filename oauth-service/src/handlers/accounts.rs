use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{CreateAccountRequest, CreateAccountResponse, UpdateAccountRequest};
use crate::models::SanitizedAccount;
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn create_user(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.accounts.create(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            account: account.sanitize(),
        }),
    ))
}

pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<SanitizedAccount>>, AppError> {
    let accounts = state.accounts.get_all().await?;
    Ok(Json(accounts.iter().map(|a| a.sanitize()).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SanitizedAccount>, AppError> {
    let account = state
        .accounts
        .get(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("user {} not found", user_id)))?;

    Ok(Json(account.sanitize()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateAccountRequest>,
) -> Result<Json<SanitizedAccount>, AppError> {
    let account = state.accounts.update(&user_id, req).await?;
    Ok(Json(account.sanitize()))
}
