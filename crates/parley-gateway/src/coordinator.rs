//! Signaling & presence coordinator.
//!
//! One logical service drives everything the gateway does between the
//! transport and the store: it owns the Connection Registry and the Call
//! Session Table, fans presence snapshots out to every client, relays call
//! negotiation payloads between the two parties of a room token, advances
//! message delivery state off presence changes, and unwinds state when a
//! connection drops.
//!
//! Failure policy: stale lookups (unknown room token, offline target,
//! unregistered handle) are normal branches — logged at most, never errors.
//! Signaling races such as an ICE candidate arriving after the peer hung up
//! are expected and must not crash the relay or leak sessions.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use parley_common::models::message::{CALL_ATTEMPT_CONTENT, DeliveryState};

use crate::calls::{CallSession, CallTable};
use crate::events::{ClientEvent, ConnId, Outbound, ServerEvent, Target};
use crate::registry::ConnectionRegistry;
use crate::store::{NewMessage, Store};

/// Capacity of the outbound fan-out channel.
const OUTBOUND_CAPACITY: usize = 10_000;

/// The signaling & presence coordinator. One instance per process; every
/// connection handler dispatches into it.
pub struct Coordinator {
    registry: ConnectionRegistry,
    calls: CallTable,
    store: Arc<dyn Store>,
    outbound: broadcast::Sender<Outbound>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            registry: ConnectionRegistry::new(),
            calls: CallTable::new(),
            store,
            outbound,
        }
    }

    /// Subscribe to the outbound event stream. Each connection's send task
    /// filters for events targeted at it (or at everyone).
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    /// Dispatch one inbound client event.
    pub async fn handle_event(&self, conn: ConnId, event: ClientEvent) {
        match event {
            ClientEvent::UserConnected { user_id } => {
                self.handle_user_connected(conn, user_id).await;
            }
            ClientEvent::UserDisconnected { user_id } => {
                self.handle_user_disconnected(user_id).await;
            }
            ClientEvent::GlobalMessage { content, sender_id } => {
                self.handle_global_message(content, sender_id).await;
            }
            ClientEvent::PrivateMessage {
                content,
                sender_id,
                receiver_id,
            } => {
                self.handle_private_message(content, sender_id, receiver_id)
                    .await;
            }
            ClientEvent::ReadAllMessages {
                reader_id,
                other_id,
            } => {
                self.handle_read_all(reader_id, other_id).await;
            }
            ClientEvent::InitiateCall {
                caller_id,
                callee_id,
                offer,
                room_token,
            } => {
                self.handle_initiate_call(conn, caller_id, callee_id, offer, room_token)
                    .await;
            }
            ClientEvent::ReceivedCall {
                caller_id: _,
                room_token,
                answer,
            } => {
                self.handle_answer(room_token, answer).await;
            }
            ClientEvent::RejectedCall {
                callee_id: _,
                room_token,
            } => {
                self.handle_reject(room_token).await;
            }
            ClientEvent::EndedCall { room_token } => {
                self.handle_end(conn, room_token).await;
            }
            ClientEvent::IceCandidate {
                room_token,
                candidate,
            } => {
                self.handle_ice_candidate(conn, room_token, candidate).await;
            }
        }
    }

    // ── Presence ─────────────────────────────────────────────────────────────

    /// Register `conn` as `user_id`'s live handle, reconcile messages that
    /// arrived while they were offline, and republish presence.
    async fn handle_user_connected(&self, conn: ConnId, user_id: Uuid) {
        match self.store.find_user(user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(%user_id, "user-connected for unknown user");
                return;
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "user lookup failed");
                return;
            }
        }

        // Last-writer-wins: a reconnect (page refresh) displaces the old
        // handle. Any call session still referencing it is torn down now
        // rather than waiting for the old socket's disconnect to fire.
        if let Some(displaced) = self.registry.register(user_id, conn).await {
            tracing::debug!(%user_id, old = %displaced, new = %conn, "handle displaced on reconnect");
            self.end_sessions_for(displaced).await;
        }

        if let Err(e) = self.store.set_connection(user_id, Some(conn)).await {
            tracing::error!(%user_id, error = %e, "failed to persist online state");
        }

        // Reconcile messages sent while the user was offline.
        match self.store.deliver_pending(user_id).await {
            Ok(pending) => {
                for message in pending {
                    self.send(Target::Conn(conn), ServerEvent::PrivateMessage(message));
                }
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "failed to reconcile pending messages");
            }
        }

        tracing::info!(%user_id, conn = %conn, "user connected");
        self.publish_presence().await;
    }

    /// Explicit sign-out: resolve the user's current handle and run the same
    /// reconciliation as a transport close.
    async fn handle_user_disconnected(&self, user_id: Uuid) {
        if let Some(conn) = self.registry.handle_for(user_id).await {
            self.handle_disconnect(conn).await;
        } else {
            tracing::debug!(%user_id, "user-disconnected for offline user");
        }
    }

    /// Disconnect reconciler. Runs on transport close and explicit sign-out;
    /// idempotent against duplicate signals — a second call finds no registry
    /// entry and returns immediately.
    pub async fn handle_disconnect(&self, conn: ConnId) {
        let Some(user_id) = self.registry.unregister(conn).await else {
            tracing::debug!(conn = %conn, "disconnect for unregistered connection");
            return;
        };

        self.end_sessions_for(conn).await;

        if let Err(e) = self.store.set_connection(user_id, None).await {
            tracing::error!(%user_id, error = %e, "failed to persist offline state");
        }

        tracing::info!(%user_id, conn = %conn, "user disconnected");
        self.publish_presence().await;
    }

    /// Compute the online-user set and fan it out to every connection.
    /// Best-effort: lagging receivers never abort the publish.
    pub async fn publish_presence(&self) {
        match self.store.online_users().await {
            Ok(online) => {
                tracing::debug!(count = online.len(), "publishing presence snapshot");
                self.send(Target::All, ServerEvent::OnlineUsers(online));
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read presence snapshot");
            }
        }
    }

    // ── Chat delivery ────────────────────────────────────────────────────────

    async fn handle_global_message(&self, content: String, sender_id: Uuid) {
        if content.trim().is_empty() {
            tracing::warn!(%sender_id, "rejecting empty global message");
            return;
        }

        // Global messages carry no per-recipient state; stored as sent.
        let record = self
            .store
            .create_message(NewMessage {
                content,
                sender_id,
                receiver_id: None,
                is_global: true,
                room_token: None,
                delivery_state: DeliveryState::Sent,
            })
            .await;

        match record {
            Ok(message) => self.send(Target::All, ServerEvent::GlobalMessage(message)),
            Err(e) => tracing::error!(%sender_id, error = %e, "failed to persist global message"),
        }
    }

    async fn handle_private_message(&self, content: String, sender_id: Uuid, receiver_id: Uuid) {
        if content.trim().is_empty() {
            tracing::warn!(%sender_id, "rejecting empty private message");
            return;
        }

        let receiver_conn = self.registry.handle_for(receiver_id).await;
        let delivery_state = if receiver_conn.is_some() {
            DeliveryState::Sent
        } else {
            DeliveryState::NotSent
        };

        let record = self
            .store
            .create_message(NewMessage {
                content,
                sender_id,
                receiver_id: Some(receiver_id),
                is_global: false,
                room_token: None,
                delivery_state,
            })
            .await;

        let message = match record {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(%sender_id, %receiver_id, error = %e, "failed to persist private message");
                return;
            }
        };

        // The sender gets its own copy back as the server-confirmed record,
        // rather than trusting its optimistic local echo.
        if let Some(sender_conn) = self.registry.handle_for(sender_id).await {
            self.send(
                Target::Conn(sender_conn),
                ServerEvent::PrivateMessage(message.clone()),
            );
        }
        if let Some(receiver_conn) = receiver_conn {
            self.send(
                Target::Conn(receiver_conn),
                ServerEvent::PrivateMessage(message),
            );
        }
    }

    async fn handle_read_all(&self, reader_id: Uuid, other_id: Uuid) {
        let count = match self.store.mark_conversation_read(reader_id, other_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(%reader_id, %other_id, error = %e, "failed to mark thread read");
                return;
            }
        };

        if count == 0 {
            return;
        }

        if let Some(other_conn) = self.registry.handle_for(other_id).await {
            self.send(
                Target::Conn(other_conn),
                ServerEvent::MessagesRead { reader_id, count },
            );
        }
    }

    // ── Call signaling ───────────────────────────────────────────────────────

    async fn handle_initiate_call(
        &self,
        conn: ConnId,
        caller_id: Uuid,
        callee_id: Uuid,
        offer: serde_json::Value,
        room_token: String,
    ) {
        if room_token.is_empty() {
            tracing::warn!(%caller_id, "rejecting call initiate with empty room token");
            return;
        }

        // The UI should have prevented calling an offline user, but the race
        // is expected; drop the initiate rather than crash.
        let Some(callee_conn) = self.registry.handle_for(callee_id).await else {
            tracing::info!(%caller_id, %callee_id, "callee offline, dropping call initiate");
            return;
        };

        let session = CallSession {
            room_token: room_token.clone(),
            caller_id,
            callee_id,
            caller_conn: conn,
            callee_conn,
        };
        if !self.calls.insert(session).await {
            tracing::warn!(room = %room_token, "duplicate room token, dropping call initiate");
            return;
        }

        // Persist the call attempt so it shows up in thread history.
        let record = self
            .store
            .create_message(NewMessage {
                content: CALL_ATTEMPT_CONTENT.to_string(),
                sender_id: caller_id,
                receiver_id: Some(callee_id),
                is_global: false,
                room_token: Some(room_token.clone()),
                delivery_state: DeliveryState::NotSent,
            })
            .await;
        if let Err(e) = record {
            tracing::error!(room = %room_token, error = %e, "failed to persist call attempt");
            self.calls.remove(&room_token).await;
            return;
        }

        tracing::info!(%caller_id, %callee_id, room = %room_token, "call initiated");
        self.send(
            Target::Conn(callee_conn),
            ServerEvent::WantVideoCall { room_token, offer },
        );
    }

    async fn handle_answer(&self, room_token: String, answer: serde_json::Value) {
        // Unknown token: the caller already hung up. Normal race, no-op.
        let Some(session) = self.calls.get(&room_token).await else {
            tracing::debug!(room = %room_token, "answer for unknown room");
            return;
        };

        // Best-effort history annotation; the answer still goes through.
        if let Err(e) = self.store.ack_call_message(&room_token).await {
            tracing::error!(room = %room_token, error = %e, "failed to ack call attempt");
        }

        tracing::info!(room = %room_token, "call answered");
        self.send(
            Target::Conn(session.caller_conn),
            ServerEvent::ReceivedCall { room_token, answer },
        );
    }

    async fn handle_reject(&self, room_token: String) {
        let Some(session) = self.calls.remove(&room_token).await else {
            tracing::debug!(room = %room_token, "reject for unknown room");
            return;
        };

        tracing::info!(room = %room_token, "call rejected");
        self.send(
            Target::Conn(session.caller_conn),
            ServerEvent::RejectedCall { room_token },
        );
    }

    async fn handle_end(&self, conn: ConnId, room_token: String) {
        let Some(session) = self.calls.get(&room_token).await else {
            tracing::debug!(room = %room_token, "end for unknown room");
            return;
        };
        // Only a participant may end the call; the token is a capability.
        let Some(other_conn) = session.counterpart(conn) else {
            tracing::warn!(room = %room_token, conn = %conn, "end from non-participant");
            return;
        };

        self.calls.remove(&room_token).await;
        tracing::info!(room = %room_token, "call ended");
        self.send(
            Target::Conn(other_conn),
            ServerEvent::EndedCall { room_token },
        );
    }

    /// Forward an ICE candidate to the other side of the call. Symmetric:
    /// whichever of caller/callee did not send it receives it.
    async fn handle_ice_candidate(
        &self,
        conn: ConnId,
        room_token: String,
        candidate: serde_json::Value,
    ) {
        let Some(session) = self.calls.get(&room_token).await else {
            tracing::debug!(room = %room_token, "candidate for unknown room, dropping");
            return;
        };
        let Some(other_conn) = session.counterpart(conn) else {
            tracing::warn!(room = %room_token, conn = %conn, "candidate from non-participant");
            return;
        };

        self.send(
            Target::Conn(other_conn),
            ServerEvent::IceCandidate {
                room_token,
                candidate,
            },
        );
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// End every call session referencing `conn`, notifying counterparts.
    async fn end_sessions_for(&self, conn: ConnId) {
        for session in self.calls.remove_by_conn(conn).await {
            tracing::info!(room = %session.room_token, "ending call for lost handle");
            if let Some(other_conn) = session.counterpart(conn) {
                self.send(
                    Target::Conn(other_conn),
                    ServerEvent::EndedCall {
                        room_token: session.room_token,
                    },
                );
            }
        }
    }

    /// Best-effort send: an error only means no connection is currently
    /// subscribed, which is fine.
    fn send(&self, target: Target, event: ServerEvent) {
        let _ = self.outbound.send(Outbound { target, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parley_common::error::ParleyError;
    use parley_common::models::message::Message;
    use parley_common::models::user::{OnlineUser, User};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// In-memory stand-in for the PostgreSQL store.
    #[derive(Default)]
    struct MemoryStore {
        users: RwLock<HashMap<Uuid, User>>,
        messages: RwLock<Vec<Message>>,
    }

    impl MemoryStore {
        async fn add_user(&self, name: &str) -> Uuid {
            let id = Uuid::now_v7();
            let now = Utc::now();
            self.users.write().await.insert(
                id,
                User {
                    id,
                    name: name.to_string(),
                    email: format!("{name}@example.com"),
                    password_hash: "hash".into(),
                    avatar: None,
                    is_online: false,
                    connection_id: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        }

        async fn message_states(&self) -> Vec<DeliveryState> {
            self.messages
                .read()
                .await
                .iter()
                .map(|m| m.delivery_state)
                .collect()
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ParleyError> {
            Ok(self.users.read().await.get(&user_id).cloned())
        }

        async fn set_connection(
            &self,
            user_id: Uuid,
            conn: Option<ConnId>,
        ) -> Result<(), ParleyError> {
            if let Some(user) = self.users.write().await.get_mut(&user_id) {
                user.connection_id = conn;
                user.is_online = conn.is_some();
            }
            Ok(())
        }

        async fn online_users(&self) -> Result<Vec<OnlineUser>, ParleyError> {
            let mut online: Vec<OnlineUser> = self
                .users
                .read()
                .await
                .values()
                .filter(|u| u.connection_id.is_some())
                .map(|u| OnlineUser {
                    id: u.id,
                    name: u.name.clone(),
                })
                .collect();
            online.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(online)
        }

        async fn reset_presence(&self) -> Result<u64, ParleyError> {
            let mut count = 0;
            for user in self.users.write().await.values_mut() {
                if user.connection_id.is_some() || user.is_online {
                    user.connection_id = None;
                    user.is_online = false;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn create_message(&self, new: NewMessage) -> Result<Message, ParleyError> {
            let message = Message {
                id: Uuid::now_v7(),
                content: new.content,
                sender_id: new.sender_id,
                receiver_id: new.receiver_id,
                is_global: new.is_global,
                room_token: new.room_token,
                delivery_state: new.delivery_state,
                created_at: Utc::now(),
            };
            self.messages.write().await.push(message.clone());
            Ok(message)
        }

        async fn deliver_pending(&self, receiver_id: Uuid) -> Result<Vec<Message>, ParleyError> {
            let mut delivered = Vec::new();
            for message in self.messages.write().await.iter_mut() {
                if message.receiver_id == Some(receiver_id)
                    && message.delivery_state == DeliveryState::NotSent
                {
                    message.delivery_state = DeliveryState::Sent;
                    delivered.push(message.clone());
                }
            }
            Ok(delivered)
        }

        async fn mark_conversation_read(
            &self,
            reader_id: Uuid,
            sender_id: Uuid,
        ) -> Result<u64, ParleyError> {
            let mut count = 0;
            for message in self.messages.write().await.iter_mut() {
                if message.receiver_id == Some(reader_id)
                    && message.sender_id == sender_id
                    && message.delivery_state != DeliveryState::Read
                {
                    message.delivery_state = DeliveryState::Read;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn ack_call_message(&self, room_token: &str) -> Result<(), ParleyError> {
            for message in self.messages.write().await.iter_mut() {
                if message.room_token.as_deref() == Some(room_token) {
                    message.delivery_state = DeliveryState::Read;
                }
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        coordinator: Coordinator,
        rx: broadcast::Receiver<Outbound>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::default());
            let coordinator = Coordinator::new(store.clone());
            let rx = coordinator.subscribe();
            Self {
                store,
                coordinator,
                rx,
            }
        }

        /// Drain everything emitted so far.
        fn drain(&mut self) -> Vec<Outbound> {
            let mut events = Vec::new();
            while let Ok(outbound) = self.rx.try_recv() {
                events.push(outbound);
            }
            events
        }

        async fn connect(&mut self, user_id: Uuid) -> ConnId {
            let conn = Uuid::new_v4();
            self.coordinator
                .handle_event(conn, ClientEvent::UserConnected { user_id })
                .await;
            conn
        }
    }

    fn events_for(events: &[Outbound], conn: ConnId) -> Vec<&ServerEvent> {
        events
            .iter()
            .filter(|o| o.target == Target::Conn(conn))
            .map(|o| &o.event)
            .collect()
    }

    #[tokio::test]
    async fn presence_snapshot_matches_registered_set() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;

        h.connect(alice).await;
        let events = h.drain();
        let Some(Outbound {
            event: ServerEvent::OnlineUsers(online),
            ..
        }) = events.last()
        else {
            panic!("expected presence snapshot");
        };
        assert_eq!(online.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice]);

        let bob_conn = h.connect(bob).await;
        let events = h.drain();
        let Some(Outbound {
            event: ServerEvent::OnlineUsers(online),
            target,
        }) = events.last()
        else {
            panic!("expected presence snapshot");
        };
        assert_eq!(*target, Target::All);
        assert_eq!(online.len(), 2);

        // unregister shrinks the set again
        h.coordinator.handle_disconnect(bob_conn).await;
        let events = h.drain();
        let Some(Outbound {
            event: ServerEvent::OnlineUsers(online),
            ..
        }) = events.last()
        else {
            panic!("expected presence snapshot");
        };
        assert_eq!(online.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice]);
    }

    #[tokio::test]
    async fn unknown_user_connect_is_rejected() {
        let mut h = Harness::new();
        let conn = Uuid::new_v4();
        h.coordinator
            .handle_event(
                conn,
                ClientEvent::UserConnected {
                    user_id: Uuid::now_v7(),
                },
            )
            .await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn private_message_to_online_receiver_reaches_both() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::PrivateMessage {
                    content: "hi bob".into(),
                    sender_id: alice,
                    receiver_id: bob,
                },
            )
            .await;

        let events = h.drain();
        for conn in [alice_conn, bob_conn] {
            let delivered = events_for(&events, conn);
            assert_eq!(delivered.len(), 1);
            let ServerEvent::PrivateMessage(message) = delivered[0] else {
                panic!("expected private message");
            };
            assert_eq!(message.content, "hi bob");
            assert_eq!(message.delivery_state, DeliveryState::Sent);
        }
    }

    #[tokio::test]
    async fn offline_private_message_reconciles_on_connect() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::PrivateMessage {
                    content: "you there?".into(),
                    sender_id: alice,
                    receiver_id: bob,
                },
            )
            .await;

        // only the sender's confirmation copy goes out, stored as not-sent
        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Conn(alice_conn));
        let ServerEvent::PrivateMessage(message) = &events[0].event else {
            panic!("expected private message");
        };
        assert_eq!(message.delivery_state, DeliveryState::NotSent);

        // bob connects: the pending message transitions to sent and lands on
        // his fresh connection
        let bob_conn = h.connect(bob).await;
        let events = h.drain();
        let delivered = events_for(&events, bob_conn);
        assert_eq!(delivered.len(), 1);
        let ServerEvent::PrivateMessage(message) = delivered[0] else {
            panic!("expected private message");
        };
        assert_eq!(message.content, "you there?");
        assert_eq!(message.delivery_state, DeliveryState::Sent);
        assert_eq!(h.store.message_states().await, vec![DeliveryState::Sent]);
    }

    #[tokio::test]
    async fn global_message_broadcasts_to_all() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let alice_conn = h.connect(alice).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::GlobalMessage {
                    content: "hello everyone".into(),
                    sender_id: alice,
                },
            )
            .await;

        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::All);
        let ServerEvent::GlobalMessage(message) = &events[0].event else {
            panic!("expected global message");
        };
        assert!(message.is_global);
        assert_eq!(message.receiver_id, None);
    }

    #[tokio::test]
    async fn empty_messages_are_dropped() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let alice_conn = h.connect(alice).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::GlobalMessage {
                    content: "   ".into(),
                    sender_id: alice,
                },
            )
            .await;
        assert!(h.drain().is_empty());
        assert!(h.store.messages.read().await.is_empty());
    }

    #[tokio::test]
    async fn read_all_notifies_sender_with_count() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        for content in ["one", "two"] {
            h.coordinator
                .handle_event(
                    alice_conn,
                    ClientEvent::PrivateMessage {
                        content: content.into(),
                        sender_id: alice,
                        receiver_id: bob,
                    },
                )
                .await;
        }
        h.drain();

        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::ReadAllMessages {
                    reader_id: bob,
                    other_id: alice,
                },
            )
            .await;

        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Conn(alice_conn));
        let ServerEvent::MessagesRead { reader_id, count } = &events[0].event else {
            panic!("expected messages-read");
        };
        assert_eq!(*reader_id, bob);
        assert_eq!(*count, 2);
        assert_eq!(
            h.store.message_states().await,
            vec![DeliveryState::Read, DeliveryState::Read]
        );

        // everything already read: no second notification
        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::ReadAllMessages {
                    reader_id: bob,
                    other_id: alice,
                },
            )
            .await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn call_handshake_rings_answers_and_relays_ice() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        let offer = serde_json::json!({"type": "offer", "sdp": "v=0"});
        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: offer.clone(),
                    room_token: "r1".into(),
                },
            )
            .await;

        let events = h.drain();
        let ringing = events_for(&events, bob_conn);
        assert_eq!(ringing.len(), 1);
        let ServerEvent::WantVideoCall { room_token, offer: relayed } = ringing[0] else {
            panic!("expected ring");
        };
        assert_eq!(room_token, "r1");
        assert_eq!(*relayed, offer);
        // the call attempt is in history, pending
        assert_eq!(h.store.message_states().await, vec![DeliveryState::NotSent]);

        // bob answers: alice receives the answer, the attempt is acknowledged
        let answer = serde_json::json!({"type": "answer", "sdp": "v=0"});
        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::ReceivedCall {
                    caller_id: alice,
                    room_token: "r1".into(),
                    answer: answer.clone(),
                },
            )
            .await;

        let events = h.drain();
        let answered = events_for(&events, alice_conn);
        assert_eq!(answered.len(), 1);
        assert!(matches!(
            answered[0],
            ServerEvent::ReceivedCall { room_token, .. } if room_token == "r1"
        ));
        assert_eq!(h.store.message_states().await, vec![DeliveryState::Read]);

        // ICE flows symmetrically, never back to the sender
        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::IceCandidate {
                    room_token: "r1".into(),
                    candidate: serde_json::json!({"candidate": "a"}),
                },
            )
            .await;
        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::IceCandidate {
                    room_token: "r1".into(),
                    candidate: serde_json::json!({"candidate": "b"}),
                },
            )
            .await;

        let events = h.drain();
        let to_bob = events_for(&events, bob_conn);
        let to_alice = events_for(&events, alice_conn);
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_alice.len(), 1);
        assert!(matches!(to_bob[0], ServerEvent::IceCandidate { candidate, .. } if candidate["candidate"] == "a"));
        assert!(matches!(to_alice[0], ServerEvent::IceCandidate { candidate, .. } if candidate["candidate"] == "b"));
    }

    #[tokio::test]
    async fn end_deletes_session_and_notifies_counterpart() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;
        h.drain();

        h.coordinator
            .handle_event(bob_conn, ClientEvent::EndedCall { room_token: "r1".into() })
            .await;

        let events = h.drain();
        let to_alice = events_for(&events, alice_conn);
        assert_eq!(to_alice.len(), 1);
        assert!(matches!(
            to_alice[0],
            ServerEvent::EndedCall { room_token } if room_token == "r1"
        ));

        // the session is gone: further relays are no-ops
        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::IceCandidate {
                    room_token: "r1".into(),
                    candidate: serde_json::json!({}),
                },
            )
            .await;
        h.coordinator
            .handle_event(bob_conn, ClientEvent::EndedCall { room_token: "r1".into() })
            .await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn reject_notifies_caller_and_deletes_session() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;
        h.drain();

        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::RejectedCall {
                    callee_id: bob,
                    room_token: "r1".into(),
                },
            )
            .await;

        let events = h.drain();
        let to_alice = events_for(&events, alice_conn);
        assert_eq!(to_alice.len(), 1);
        assert!(matches!(
            to_alice[0],
            ServerEvent::RejectedCall { room_token } if room_token == "r1"
        ));

        // answering the rejected call is a no-op
        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::ReceivedCall {
                    caller_id: alice,
                    room_token: "r1".into(),
                    answer: serde_json::json!({}),
                },
            )
            .await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn initiate_to_offline_callee_is_a_noop() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;

        assert!(h.drain().is_empty());
        assert!(h.store.messages.read().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_room_token_is_dropped() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let carol = h.store.add_user("carol").await;
        let alice_conn = h.connect(alice).await;
        h.connect(bob).await;
        let carol_conn = h.connect(carol).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;
        h.coordinator
            .handle_event(
                carol_conn,
                ClientEvent::InitiateCall {
                    caller_id: carol,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;

        let rings: usize = h
            .drain()
            .iter()
            .filter(|o| matches!(o.event, ServerEvent::WantVideoCall { .. }))
            .count();
        assert_eq!(rings, 1);
        // only the first attempt persisted
        assert_eq!(h.store.messages.read().await.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_ends_live_call_and_is_idempotent() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;
        h.drain();

        h.coordinator.handle_disconnect(alice_conn).await;

        let events = h.drain();
        let to_bob = events_for(&events, bob_conn);
        assert_eq!(to_bob.len(), 1);
        assert!(matches!(
            to_bob[0],
            ServerEvent::EndedCall { room_token } if room_token == "r1"
        ));
        // presence republished without alice
        let Some(Outbound {
            event: ServerEvent::OnlineUsers(online),
            ..
        }) = events.last()
        else {
            panic!("expected presence snapshot");
        };
        assert_eq!(online.iter().map(|u| u.id).collect::<Vec<_>>(), vec![bob]);

        // candidates for the dead room are dropped
        h.coordinator
            .handle_event(
                bob_conn,
                ClientEvent::IceCandidate {
                    room_token: "r1".into(),
                    candidate: serde_json::json!({}),
                },
            )
            .await;
        assert!(h.drain().is_empty());

        // a duplicate disconnect signal does nothing at all
        h.coordinator.handle_disconnect(alice_conn).await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn reconnect_tears_down_calls_on_the_stale_handle() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let bob = h.store.add_user("bob").await;
        let alice_conn = h.connect(alice).await;
        let bob_conn = h.connect(bob).await;
        h.drain();

        h.coordinator
            .handle_event(
                alice_conn,
                ClientEvent::InitiateCall {
                    caller_id: alice,
                    callee_id: bob,
                    offer: serde_json::json!({}),
                    room_token: "r1".into(),
                },
            )
            .await;
        h.drain();

        // alice refreshes the page: new handle registers while the old socket
        // is still technically live
        h.connect(alice).await;

        let events = h.drain();
        let to_bob = events_for(&events, bob_conn);
        assert!(
            to_bob
                .iter()
                .any(|e| matches!(e, ServerEvent::EndedCall { room_token } if room_token == "r1"))
        );

        // the stale socket's eventual close must not knock alice offline
        h.coordinator.handle_disconnect(alice_conn).await;
        assert!(h.drain().is_empty());
        assert!(h.store.find_user(alice).await.unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn explicit_sign_out_runs_the_reconciler() {
        let mut h = Harness::new();
        let alice = h.store.add_user("alice").await;
        let alice_conn = h.connect(alice).await;
        h.drain();

        h.coordinator
            .handle_event(alice_conn, ClientEvent::UserDisconnected { user_id: alice })
            .await;

        let events = h.drain();
        let Some(Outbound {
            event: ServerEvent::OnlineUsers(online),
            ..
        }) = events.last()
        else {
            panic!("expected presence snapshot");
        };
        assert!(online.is_empty());
        assert!(!h.store.find_user(alice).await.unwrap().unwrap().is_online);
    }
}
