//! Message model — the core content unit.
//!
//! One table covers both global broadcasts and private 1:1 messages; call
//! attempts are persisted as private messages carrying a `room_token` so the
//! call shows up in thread history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message or call-attempt record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,

    /// Message body. Call-attempt records carry a fixed marker string.
    pub content: String,

    /// Author user ID
    pub sender_id: Uuid,

    /// Recipient user ID; None for global broadcasts
    pub receiver_id: Option<Uuid>,

    /// Whether this message was broadcast to everyone
    pub is_global: bool,

    /// Call session token, set only for call-attempt records
    pub room_token: Option<String>,

    /// Delivery progress; meaningful only for private messages
    pub delivery_state: DeliveryState,

    pub created_at: DateTime<Utc>,
}

/// Per-recipient delivery progress for a private message.
///
/// Transitions are forward-only: `NotSent → Sent → Read`. Global messages
/// are stored as `Sent` and never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryState {
    /// Persisted while the recipient had no live connection
    NotSent,
    /// Handed to the recipient's connection (or broadcast, for global)
    Sent,
    /// Recipient acknowledged reading the thread
    Read,
}

/// Marker content stored for call-attempt records.
pub const CALL_ATTEMPT_CONTENT: &str = "Video call";
