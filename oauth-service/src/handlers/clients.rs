use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{CreateClientRequest, CreateClientResponse};
use crate::middleware::Authenticated;
use crate::models::SanitizedClient;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Registers a client. The plaintext secret is only ever returned here.
pub async fn create_client(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    ValidatedJson(req): ValidatedJson<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.clients.create(req).await?;

    tracing::info!(
        client_id = %created.client.id,
        registered_by = %caller.client_id,
        "Client registered through the API"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateClientResponse {
            client: created.client.sanitize(),
            client_secret: created.secret,
        }),
    ))
}

pub async fn list_clients(
    State(state): State<AppState>,
) -> Result<Json<Vec<SanitizedClient>>, AppError> {
    let clients = state.clients.get_all().await?;
    Ok(Json(clients.iter().map(|c| c.sanitize()).collect()))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<SanitizedClient>, AppError> {
    let client = state
        .clients
        .get(&client_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("client {} not found", client_id)))?;

    Ok(Json(client.sanitize()))
}
