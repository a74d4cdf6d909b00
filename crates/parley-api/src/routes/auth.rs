//! Authentication routes — register and login.

use axum::{Json, Router, extract::State, routing::post};
use parley_common::{
    error::{ParleyError, ParleyResult},
    models::user::{CreateUserRequest, LoginRequest, UserResponse},
    validation::validate_request,
};
use parley_db::repository::users;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{AppState, auth};

/// Auth router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

#[derive(Serialize)]
struct AuthResponse {
    user: UserResponse,
    #[serde(flatten)]
    token: auth::SessionToken,
}

/// POST /api/v1/auth/register
///
/// Create a new account. Returns the profile + a session JWT.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUserRequest>,
) -> ParleyResult<Json<AuthResponse>> {
    validate_request(&body)?;

    if users::find_by_email(&state.db.pool, &body.email)
        .await?
        .is_some()
    {
        return Err(ParleyError::AlreadyExists {
            resource: "Email".into(),
        });
    }

    let password_hash = auth::hash_password(&body.password)
        .map_err(|e| ParleyError::Internal(anyhow::anyhow!("{e}")))?;

    let user = users::create_user(
        &state.db.pool,
        Uuid::now_v7(),
        &body.name,
        &body.email,
        &password_hash,
        body.avatar.as_deref(),
    )
    .await?;

    let config = parley_common::config::get();
    let token = auth::generate_session_token(
        user.id,
        &user.name,
        &config.auth.jwt_secret,
        config.auth.access_token_ttl_secs,
    )
    .map_err(|e| ParleyError::Internal(e.into()))?;

    tracing::info!(user_id = %user.id, name = %user.name, "New user registered");

    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

/// POST /api/v1/auth/login
///
/// Authenticate with email + password. Returns the profile + a session JWT.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> ParleyResult<Json<AuthResponse>> {
    validate_request(&body)?;

    let user = users::find_by_email(&state.db.pool, &body.email)
        .await?
        .ok_or(ParleyError::InvalidCredentials)?;

    let valid = auth::verify_password(&body.password, &user.password_hash)
        .map_err(|_| ParleyError::InvalidCredentials)?;
    if !valid {
        return Err(ParleyError::InvalidCredentials);
    }

    let config = parley_common::config::get();
    let token = auth::generate_session_token(
        user.id,
        &user.name,
        &config.auth.jwt_secret,
        config.auth.access_token_ttl_secs,
    )
    .map_err(|e| ParleyError::Internal(e.into()))?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}
