//! Authentication — Argon2id password hashing and JWT session issuance.
//!
//! Claims and token validation live in `parley-common::auth` so the gateway
//! side can validate without depending on this crate; hashing and token
//! generation are API-specific and stay here.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use parley_common::auth::Claims;
use serde::Serialize;
use uuid::Uuid;

/// Session token returned on login/register.
#[derive(Debug, Serialize)]
pub struct SessionToken {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a JWT access token for a session.
pub fn generate_session_token(
    user_id: Uuid,
    name: &str,
    secret: &str,
    ttl_secs: u64,
) -> Result<SessionToken, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        name: name.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs as i64)).timestamp(),
    };

    let access_token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(SessionToken {
        access_token,
        expires_in: ttl_secs,
        token_type: "Bearer".to_string(),
    })
}
