//! User repository — CRUD plus the presence mirror.

use parley_common::models::user::{OnlineUser, User};
use sqlx::PgPool;
use uuid::Uuid;

/// Create a new user account.
pub async fn create_user(
    pool: &PgPool,
    id: Uuid,
    name: &str,
    email: &str,
    password_hash: &str,
    avatar: Option<&str>,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, name, email, password_hash, avatar, is_online, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, FALSE, NOW(), NOW())
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(avatar)
    .fetch_one(pool)
    .await
}

/// Find a user by their unique ID.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Find a user by email (case-insensitive).
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
        .bind(email)
        .fetch_optional(pool)
        .await
}

/// List all users (for the contact sidebar).
pub async fn list_users(pool: &PgPool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name ASC")
        .fetch_all(pool)
        .await
}

/// Overwrite a user's connection mirror. `Some(conn)` marks them online with
/// that handle; `None` marks them offline.
pub async fn set_connection(
    pool: &PgPool,
    id: Uuid,
    connection_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE users SET
            connection_id = $2,
            is_online = $2 IS NOT NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(connection_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The presence snapshot: every user with a live connection handle.
pub async fn online_users(pool: &PgPool) -> Result<Vec<OnlineUser>, sqlx::Error> {
    sqlx::query_as::<_, OnlineUser>(
        "SELECT id, name FROM users WHERE connection_id IS NOT NULL ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await
}

/// Startup reconciliation: no handle from a previous process incarnation can
/// be valid, so force everyone offline. Returns the number of rows touched.
pub async fn reset_presence(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users SET connection_id = NULL, is_online = FALSE
        WHERE connection_id IS NOT NULL OR is_online
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
