use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use parley_db::models::UserRow;
use parley_types::api::{Claims, UpdateSettingsRequest};
use parley_types::models::User;

use crate::auth::AppState;
use crate::conversations::join_error;

/// Everyone except the caller — the directory used to start conversations.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let users: Vec<User> =
        tokio::task::spawn_blocking(move || db.list_users_except(&claims.sub.to_string()))
            .await
            .map_err(join_error)?
            .map_err(|e| {
                error!("repository failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .into_iter()
            .map(UserRow::into_user)
            .collect();

    Ok(Json(users))
}

/// Update the caller's display name and/or avatar reference.
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        db.update_user_profile(
            &claims.sub.to_string(),
            req.name.as_deref(),
            req.image.as_deref(),
        )?;
        db.get_user_by_id(&claims.sub.to_string())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("repository failure: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(user.into_user()))
}
