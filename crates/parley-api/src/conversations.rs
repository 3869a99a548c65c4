use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use parley_types::api::{Claims, CreateConversationRequest};

use crate::auth::AppState;
use crate::error_status;

/// One endpoint covers both flavors:
/// `{ user_id }` starts (or reuses) a one-to-one conversation,
/// `{ is_group, members, name }` creates a group.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let initiator = claims.sub;

    let conversation = tokio::task::spawn_blocking(move || {
        if req.is_group {
            let members: Vec<Uuid> = req
                .members
                .unwrap_or_default()
                .iter()
                .map(|m| m.value)
                .collect();
            let name = req.name.unwrap_or_default();
            sync.create_group_conversation(initiator, &members, &name)
        } else {
            let target = req.user_id.ok_or_else(|| {
                parley_sync::SyncError::Validation("user_id is required".into())
            })?;
            sync.create_or_reuse_conversation(initiator, target)
        }
    })
    .await
    .map_err(join_error)?
    .map_err(error_status)?;

    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let conversations = tokio::task::spawn_blocking(move || sync.list_conversations(claims.sub))
        .await
        .map_err(join_error)?
        .map_err(error_status)?;

    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let conversation =
        tokio::task::spawn_blocking(move || sync.get_conversation(claims.sub, conversation_id))
            .await
            .map_err(join_error)?
            .map_err(error_status)?;

    Ok(Json(conversation))
}

/// Mark the conversation's latest message as seen by the caller.
pub async fn mark_seen(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let sync = state.sync.clone();
    let message = tokio::task::spawn_blocking(move || sync.mark_seen(claims.sub, conversation_id))
        .await
        .map_err(join_error)?
        .map_err(error_status)?;

    Ok(Json(message))
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
