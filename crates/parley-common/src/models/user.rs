//! User model — the identity layer.
//!
//! A user's identity is persistent; their connection handle is not. The
//! `connection_id` column mirrors the in-memory Connection Registry so the
//! presence snapshot can be computed with a single query, and is wiped on
//! every server start (no handle from a previous incarnation can be valid).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A Parley user account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID (UUID v7 — time-sortable)
    pub id: Uuid,

    /// Display name shown in the user list and presence snapshots
    pub name: String,

    /// Login email (unique)
    #[serde(skip_serializing)]
    pub email: String,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Avatar URL (optional)
    pub avatar: Option<String>,

    /// Cached online flag, derived from `connection_id`
    pub is_online: bool,

    /// Live connection handle, if any. At most one per user; a reconnect
    /// overwrites it (last-writer-wins).
    pub connection_id: Option<Uuid>,

    /// Account creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last profile update
    pub updated_at: DateTime<Utc>,
}

/// One row of the presence snapshot broadcast to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct OnlineUser {
    pub id: Uuid,
    pub name: String,
}

/// Registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,

    /// Optional avatar URL
    pub avatar: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

/// Safe user representation for API responses (no sensitive fields)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            avatar: u.avatar,
            is_online: u.is_online,
            created_at: u.created_at,
        }
    }
}
