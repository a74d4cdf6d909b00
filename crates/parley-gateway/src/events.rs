//! Gateway wire vocabulary.
//!
//! Every frame is a tagged JSON envelope `{"op": <event-name>, "d": <payload>}`
//! with kebab-case event names and camelCase payload keys. Offer, answer, and
//! candidate payloads are opaque [`serde_json::Value`]s — the relay routes
//! them without ever interpreting their contents.

use parley_common::models::message::Message;
use parley_common::models::user::OnlineUser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-connection identifier, minted when a WebSocket upgrades.
/// Lives exactly as long as that connection and is never reused.
pub type ConnId = Uuid;

/// Events a client sends to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Announce identity for this connection; registers the handle.
    #[serde(rename_all = "camelCase")]
    UserConnected { user_id: Uuid },

    /// Explicit sign-out (the transport close covers the implicit case).
    #[serde(rename_all = "camelCase")]
    UserDisconnected { user_id: Uuid },

    /// Broadcast chat to everyone.
    #[serde(rename_all = "camelCase")]
    GlobalMessage { content: String, sender_id: Uuid },

    /// 1:1 chat with delivery-state tracking.
    #[serde(rename_all = "camelCase")]
    PrivateMessage {
        content: String,
        sender_id: Uuid,
        receiver_id: Uuid,
    },

    /// Reader scrolled to the bottom of a thread: acknowledge everything
    /// `other_id` sent them.
    #[serde(rename_all = "camelCase")]
    ReadAllMessages { reader_id: Uuid, other_id: Uuid },

    /// Start a call. The caller mints `room_token` (a capability token) and
    /// attaches its SDP offer.
    #[serde(rename_all = "camelCase")]
    InitiateCall {
        caller_id: Uuid,
        callee_id: Uuid,
        offer: serde_json::Value,
        room_token: String,
    },

    /// Callee picked up: forward the SDP answer to the caller.
    #[serde(rename_all = "camelCase")]
    ReceivedCall {
        caller_id: Uuid,
        room_token: String,
        answer: serde_json::Value,
    },

    /// Callee declined.
    #[serde(rename_all = "camelCase")]
    RejectedCall { callee_id: Uuid, room_token: String },

    /// Either party hung up.
    #[serde(rename_all = "camelCase")]
    EndedCall { room_token: String },

    /// Trickle ICE: forward to the other side of the call.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        room_token: String,
        candidate: serde_json::Value,
    },
}

/// Events the gateway sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Presence snapshot, fanned out to every connection after each change.
    OnlineUsers(Vec<OnlineUser>),

    /// A persisted global broadcast.
    GlobalMessage(Message),

    /// A persisted private message. The sender receives its own copy back as
    /// the authoritative send confirmation.
    PrivateMessage(Message),

    /// The other party read the thread; update message ticks.
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        #[serde(rename = "senderId")]
        reader_id: Uuid,
        count: u64,
    },

    /// Incoming call: ring, with the caller's SDP offer attached.
    #[serde(rename_all = "camelCase")]
    WantVideoCall {
        room_token: String,
        offer: serde_json::Value,
    },

    /// The callee answered; here's their SDP answer.
    #[serde(rename_all = "camelCase")]
    ReceivedCall {
        room_token: String,
        answer: serde_json::Value,
    },

    /// The callee declined.
    #[serde(rename_all = "camelCase")]
    RejectedCall { room_token: String },

    /// The other party hung up (or disconnected).
    #[serde(rename_all = "camelCase")]
    EndedCall { room_token: String },

    /// Relayed ICE candidate from the other side.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        room_token: String,
        candidate: serde_json::Value,
    },
}

/// Routing scope for an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every live connection (presence snapshots, global chat).
    All,
    /// Exactly one connection handle (relay forwards, private delivery).
    Conn(ConnId),
}

/// An outbound event on the shared broadcast channel. Each connection's send
/// task forwards only the events addressed to it (or to everyone).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub event: ServerEvent,
}
