//! Middleware — authentication extraction.

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use parley_common::error::ParleyError;

/// Authentication context extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: uuid::Uuid,
    pub name: String,
}

/// Extract and validate the JWT from the Authorization: Bearer <token> header.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, ParleyError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ParleyError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ParleyError::Unauthorized)?;

    let config = parley_common::config::get();
    let claims = parley_common::auth::validate_token(token, &config.auth.jwt_secret)
        .map_err(|_| ParleyError::InvalidToken)?;

    let user_id = claims
        .sub
        .parse::<uuid::Uuid>()
        .map_err(|_| ParleyError::InvalidToken)?;

    let auth_ctx = AuthContext {
        user_id,
        name: claims.name,
    };

    // Insert auth context into request extensions for handlers to use
    request.extensions_mut().insert(auth_ctx);

    Ok(next.run(request).await)
}
