//! Admin handlers. Mounted behind `require_auth` and `require_admin`.

use axum::Json;
use axum::extract::{Path, State};
use tracing::info;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{SetUserStatusRequest, UserResponse};

/// `GET /admin/users/{id}`: fetch any user's profile.
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let user = state.tokens.current_user(&id).await?;
    Ok(Json(user.into()))
}

/// `PUT /admin/users/{id}/status`: activate or deactivate an account.
pub async fn set_user_status_handler(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<SetUserStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state.tokens.set_user_active(&id, body.is_active).await?;
    info!(admin_id = %admin.0.user_id, user_id = %user.id, active = body.is_active, "admin changed user status");
    Ok(Json(user.into()))
}
