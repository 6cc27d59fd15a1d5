use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};

use crate::infra::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::session::CurrentSession;
use crate::store::{self, StoreError};

/// `DELETE /api/users/{user_id}`: admins only. Hands the user's projects to
/// the configured fallback owner and signs the user out everywhere.
pub async fn delete_user(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(user_id): Path<String>,
) -> AppResult<StatusCode> {
    if !session.is_admin() {
        warn!(username = %session.username(), %user_id, "non-admin tried to delete a user");
        return Err(AppError::forbidden("only administrators can delete users"));
    }
    if session.user_id() == user_id {
        return Err(AppError::bad_request("cannot delete your own account"));
    }

    let fallback_owner = &state.config.auth.fallback_owner;
    match store::delete_user(&state.pool, &user_id, fallback_owner).await {
        Ok(true) => {}
        Ok(false) => return Err(AppError::not_found("no such user")),
        Err(StoreError::FallbackOwnerTargeted(owner)) => {
            return Err(AppError::new(
                StatusCode::CONFLICT,
                format!("`{owner}` receives orphaned projects and cannot be deleted"),
            ));
        }
        Err(err) => return Err(err.into()),
    }

    let sessions = state.sessions.delete_for_user(&user_id);
    info!(by = %session.username(), %user_id, sessions, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
