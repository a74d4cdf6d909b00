//! Call session table — room token → the two parties of a live call.
//!
//! A session exists from `initiate-call` until exactly one of reject, end, or
//! either party's disconnect removes it. Lookups against a missing token are
//! the caller's signal to drop the operation: the peer may have already ended
//! the call, and signaling races must never crash the relay.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::ConnId;

/// One active (ringing or live) call between two connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub room_token: String,
    pub caller_id: Uuid,
    pub callee_id: Uuid,
    pub caller_conn: ConnId,
    pub callee_conn: ConnId,
}

impl CallSession {
    /// The other side of the call, if `conn` is a participant. ICE relays use
    /// this symmetric rule, so the relay never needs to know which side is
    /// caller vs. callee after the initial handshake.
    pub fn counterpart(&self, conn: ConnId) -> Option<ConnId> {
        if conn == self.caller_conn {
            Some(self.callee_conn)
        } else if conn == self.callee_conn {
            Some(self.caller_conn)
        } else {
            None
        }
    }

    /// Whether `conn` is one of the two parties.
    pub fn involves(&self, conn: ConnId) -> bool {
        conn == self.caller_conn || conn == self.callee_conn
    }
}

/// In-memory table of active call sessions, keyed by room token.
///
/// Injectable so tests instantiate a fresh table per case; process-wide state
/// with no persistence — resets to empty on restart.
#[derive(Default)]
pub struct CallTable {
    sessions: RwLock<HashMap<String, CallSession>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. A room token resolves to at most one session:
    /// a duplicate token is rejected (first wins) and the caller should drop
    /// the initiate.
    pub async fn insert(&self, session: CallSession) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.room_token) {
            return false;
        }
        sessions.insert(session.room_token.clone(), session);
        true
    }

    /// Look up a session without removing it.
    pub async fn get(&self, room_token: &str) -> Option<CallSession> {
        self.sessions.read().await.get(room_token).cloned()
    }

    /// Remove and return a session.
    pub async fn remove(&self, room_token: &str) -> Option<CallSession> {
        self.sessions.write().await.remove(room_token)
    }

    /// Remove every session that `conn` participates in (disconnect sweep).
    /// Returns the removed sessions so the caller can notify counterparts.
    pub async fn remove_by_conn(&self, conn: ConnId) -> Vec<CallSession> {
        let mut sessions = self.sessions.write().await;
        let tokens: Vec<String> = sessions
            .values()
            .filter(|s| s.involves(conn))
            .map(|s| s.room_token.clone())
            .collect();
        tokens
            .into_iter()
            .filter_map(|t| sessions.remove(&t))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
