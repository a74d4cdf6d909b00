//! Connection registry — who owns which live connection handle.
//!
//! Two indexes kept in lockstep: user → handle and handle → user. The
//! invariant is at-most-one handle per user; registering a new handle for a
//! user silently displaces the old one (last-writer-wins) and reports it so
//! the caller can tear down anything still referencing it.
//!
//! Absence is `None`, never an error — "user offline" is a normal branch for
//! every caller.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::ConnId;

/// Maps authenticated users to their single live connection handle.
///
/// Injectable (not a module-level singleton) so tests instantiate a fresh
/// registry per case.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indexes>,
}

#[derive(Default)]
struct Indexes {
    by_user: HashMap<Uuid, ConnId>,
    by_conn: HashMap<ConnId, Uuid>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` as the live handle for `user_id`. Returns the displaced
    /// prior handle, if any; the displaced handle is forgotten entirely, so
    /// its eventual disconnect resolves to no user.
    pub async fn register(&self, user_id: Uuid, conn: ConnId) -> Option<ConnId> {
        let mut inner = self.inner.write().await;
        let displaced = inner.by_user.insert(user_id, conn);
        if let Some(old) = displaced {
            inner.by_conn.remove(&old);
        }
        inner.by_conn.insert(conn, user_id);
        displaced
    }

    /// Clear the mapping for `conn`, returning the affected user. A handle
    /// that is unknown (never registered, already displaced, or already
    /// unregistered) resolves to `None`, which makes duplicate disconnect
    /// signals harmless.
    pub async fn unregister(&self, conn: ConnId) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        let user_id = inner.by_conn.remove(&conn)?;
        // Only clear the forward index if conn is still the current handle.
        if inner.by_user.get(&user_id) == Some(&conn) {
            inner.by_user.remove(&user_id);
        }
        Some(user_id)
    }

    /// The live handle for a user, if they are connected.
    pub async fn handle_for(&self, user_id: Uuid) -> Option<ConnId> {
        self.inner.read().await.by_user.get(&user_id).copied()
    }

    /// Reverse lookup: the user behind a handle.
    pub async fn user_for(&self, conn: ConnId) -> Option<Uuid> {
        self.inner.read().await.by_conn.get(&conn).copied()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }
}
