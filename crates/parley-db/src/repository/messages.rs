//! Message repository — persistence behind the delivery state machine.
//!
//! Delivery-state transitions are bulk UPDATEs keyed on the current state, so
//! they are forward-only by construction: a row already past the target state
//! never matches the WHERE clause.

use parley_common::models::message::{DeliveryState, Message};
use sqlx::PgPool;
use uuid::Uuid;

/// Persist a new message (global broadcast, private message, or call attempt).
#[allow(clippy::too_many_arguments)]
pub async fn create_message(
    pool: &PgPool,
    id: Uuid,
    content: &str,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    is_global: bool,
    room_token: Option<&str>,
    delivery_state: DeliveryState,
) -> Result<Message, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (id, content, sender_id, receiver_id, is_global, room_token, delivery_state, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(content)
    .bind(sender_id)
    .bind(receiver_id)
    .bind(is_global)
    .bind(room_token)
    .bind(delivery_state)
    .fetch_one(pool)
    .await
}

/// Bulk-transition everything addressed to `receiver_id` that was persisted
/// while they were offline: `not-sent → sent`. Returns the transitioned rows
/// so the caller can deliver them to the fresh connection, oldest first.
pub async fn deliver_pending(
    pool: &PgPool,
    receiver_id: Uuid,
) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        r#"
        UPDATE messages SET delivery_state = 'sent'
        WHERE receiver_id = $1 AND delivery_state = 'not-sent'
        RETURNING *
        "#,
    )
    .bind(receiver_id)
    .fetch_all(pool)
    .await
    .map(|mut rows| {
        rows.sort_by_key(|m| m.created_at);
        rows
    })
}

/// Bulk-transition one direction of a thread to `read`: everything `sender_id`
/// sent to `reader_id` that the reader had not yet acknowledged. Returns the
/// number of rows transitioned, for the sender-side tick update.
pub async fn mark_conversation_read(
    pool: &PgPool,
    reader_id: Uuid,
    sender_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE messages SET delivery_state = 'read'
        WHERE receiver_id = $1 AND sender_id = $2 AND delivery_state <> 'read'
        "#,
    )
    .bind(reader_id)
    .bind(sender_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Acknowledge the call-attempt record for `room_token` (callee answered).
pub async fn ack_call_message(pool: &PgPool, room_token: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messages SET delivery_state = 'read'
        WHERE room_token = $1 AND delivery_state <> 'read'
        "#,
    )
    .bind(room_token)
    .execute(pool)
    .await?;
    Ok(())
}

/// Global broadcast history, oldest first.
pub async fn list_global(pool: &PgPool) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE is_global ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
}

/// The 1:1 thread between two users, oldest first.
pub async fn list_conversation(
    pool: &PgPool,
    a: Uuid,
    b: Uuid,
) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        r#"
        SELECT * FROM messages
        WHERE (sender_id = $1 AND receiver_id = $2)
           OR (sender_id = $2 AND receiver_id = $1)
        ORDER BY created_at ASC
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_all(pool)
    .await
}
