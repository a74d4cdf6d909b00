//! Message history routes.
//!
//! The gateway delivers live traffic; these endpoints backfill history when a
//! client opens a room or a 1:1 thread.

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    middleware,
    routing::get,
};
use parley_common::{error::ParleyResult, models::message::Message};
use parley_db::repository::messages;
use std::sync::Arc;
use uuid::Uuid;

use crate::{AppState, middleware::AuthContext};

/// Message history router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages/global", get(global_history))
        .route("/messages/with/{user_id}", get(conversation_history))
        .route_layer(middleware::from_fn(crate::middleware::auth_middleware))
}

/// GET /api/v1/messages/global — Global broadcast history, oldest first.
async fn global_history(State(state): State<Arc<AppState>>) -> ParleyResult<Json<Vec<Message>>> {
    Ok(Json(messages::list_global(&state.db.pool).await?))
}

/// GET /api/v1/messages/with/{user_id} — The 1:1 thread between the
/// authenticated user and `user_id`, oldest first.
async fn conversation_history(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> ParleyResult<Json<Vec<Message>>> {
    Ok(Json(
        messages::list_conversation(&state.db.pool, auth.user_id, user_id).await?,
    ))
}
