use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, SendMessageRequest};

use crate::auth::AppState;
use crate::conversations::join_error;
use crate::error_status;

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let message = tokio::task::spawn_blocking(move || {
        sync.send_message(claims.sub, conversation_id, req.message, req.image)
    })
    .await
    .map_err(join_error)?
    .map_err(error_status)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let messages = tokio::task::spawn_blocking(move || {
        sync.conversation_messages(claims.sub, conversation_id)
    })
    .await
    .map_err(join_error)?
    .map_err(error_status)?;

    Ok(Json(messages))
}
