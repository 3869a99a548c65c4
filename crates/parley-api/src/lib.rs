pub mod auth;
pub mod conversations;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::http::StatusCode;
use tracing::error;

use parley_sync::SyncError;

/// Map a service failure onto the HTTP surface. Repository failures are the
/// only ones worth a server-side log line; the rest are client errors.
pub fn error_status(e: SyncError) -> StatusCode {
    match e {
        SyncError::Validation(_) => StatusCode::BAD_REQUEST,
        SyncError::Forbidden => StatusCode::FORBIDDEN,
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Repository(cause) => {
            error!("repository failure: {}", cause);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
