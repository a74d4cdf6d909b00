//! Persistence seam for the signaling core.
//!
//! The coordinator only ever needs a handful of point operations against the
//! durable store, so they are expressed as a trait: production wires in the
//! PostgreSQL-backed [`parley_db::Database`], tests wire in an in-memory
//! double. Store failures are caught at the handler boundary and logged; the
//! core never retries.

use async_trait::async_trait;
use parley_common::error::ParleyError;
use parley_common::models::message::{DeliveryState, Message};
use parley_common::models::user::{OnlineUser, User};
use parley_db::repository::{messages, users};
use uuid::Uuid;

use crate::events::ConnId;

/// What a new message looks like before the store assigns it an id and a
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub is_global: bool,
    pub room_token: Option<String>,
    pub delivery_state: DeliveryState,
}

/// The durable-store operations the coordinator depends on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ParleyError>;

    /// Overwrite a user's connection mirror (`Some` = online with that
    /// handle, `None` = offline).
    async fn set_connection(
        &self,
        user_id: Uuid,
        conn: Option<ConnId>,
    ) -> Result<(), ParleyError>;

    /// The presence snapshot: every user with a non-null handle mirror.
    async fn online_users(&self) -> Result<Vec<OnlineUser>, ParleyError>;

    /// Startup reconciliation: force every user offline, clear every handle.
    async fn reset_presence(&self) -> Result<u64, ParleyError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, ParleyError>;

    /// Bulk `not-sent → sent` for everything addressed to `receiver_id`,
    /// returning the transitioned records oldest first.
    async fn deliver_pending(&self, receiver_id: Uuid) -> Result<Vec<Message>, ParleyError>;

    /// Bulk `→ read` for everything `sender_id` sent to `reader_id`; returns
    /// the transitioned row count.
    async fn mark_conversation_read(
        &self,
        reader_id: Uuid,
        sender_id: Uuid,
    ) -> Result<u64, ParleyError>;

    /// Acknowledge the call-attempt record for an answered call.
    async fn ack_call_message(&self, room_token: &str) -> Result<(), ParleyError>;
}

#[async_trait]
impl Store for parley_db::Database {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ParleyError> {
        Ok(users::find_by_id(&self.pool, user_id).await?)
    }

    async fn set_connection(
        &self,
        user_id: Uuid,
        conn: Option<ConnId>,
    ) -> Result<(), ParleyError> {
        Ok(users::set_connection(&self.pool, user_id, conn).await?)
    }

    async fn online_users(&self) -> Result<Vec<OnlineUser>, ParleyError> {
        Ok(users::online_users(&self.pool).await?)
    }

    async fn reset_presence(&self) -> Result<u64, ParleyError> {
        Ok(users::reset_presence(&self.pool).await?)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, ParleyError> {
        Ok(messages::create_message(
            &self.pool,
            Uuid::now_v7(),
            &message.content,
            message.sender_id,
            message.receiver_id,
            message.is_global,
            message.room_token.as_deref(),
            message.delivery_state,
        )
        .await?)
    }

    async fn deliver_pending(&self, receiver_id: Uuid) -> Result<Vec<Message>, ParleyError> {
        Ok(messages::deliver_pending(&self.pool, receiver_id).await?)
    }

    async fn mark_conversation_read(
        &self,
        reader_id: Uuid,
        sender_id: Uuid,
    ) -> Result<u64, ParleyError> {
        Ok(messages::mark_conversation_read(&self.pool, reader_id, sender_id).await?)
    }

    async fn ack_call_message(&self, room_token: &str) -> Result<(), ParleyError> {
        Ok(messages::ack_call_message(&self.pool, room_token).await?)
    }
}
