//! User routes — current profile and the contact list.

use axum::{
    Json, Router,
    extract::{Extension, State},
    middleware,
    routing::get,
};
use parley_common::{
    error::{ParleyError, ParleyResult},
    models::user::UserResponse,
};
use parley_db::repository::users;
use serde::Serialize;
use std::sync::Arc;

use crate::{AppState, middleware::AuthContext};

/// User routes (all require authentication).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/me", get(get_current_user))
        .route("/users", get(list_users))
        .route_layer(middleware::from_fn(crate::middleware::auth_middleware))
}

/// GET /api/v1/users/me — Get the authenticated user's profile.
async fn get_current_user(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> ParleyResult<Json<UserResponse>> {
    let user = users::find_by_id(&state.db.pool, auth.user_id)
        .await?
        .ok_or(ParleyError::NotFound {
            resource: "User".into(),
        })?;

    Ok(Json(user.into()))
}

#[derive(Serialize)]
struct UserListResponse {
    result: usize,
    users: Vec<UserResponse>,
}

/// GET /api/v1/users — Every account, with presence flags, for the sidebar.
async fn list_users(
    State(state): State<Arc<AppState>>,
) -> ParleyResult<Json<UserListResponse>> {
    let users: Vec<UserResponse> = users::list_users(&state.db.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(UserListResponse {
        result: users.len(),
        users,
    }))
}
