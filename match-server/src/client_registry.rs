//! The set of live client sessions.
//!
//! The registry enforces the connection cap and login uniqueness, answers
//! username lookups for invitations, and carries the shutdown barrier: a
//! watch channel of the session count that lets the coordinator block until
//! every service loop has unregistered itself.

use crate::client::{ClientSession, SessionWriter};
use crate::error::RequestError;
use crate::player::Player;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// The hard cap on concurrently registered sessions.
pub const MAX_CLIENTS: usize = 64;

/// The registry of live sessions.
pub struct ClientRegistry {
    sessions: Mutex<Vec<Arc<ClientSession>>>,
    /// Mirrors the session count for [`ClientRegistry::wait_for_empty`].
    occupancy: watch::Sender<usize>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        let (occupancy, _) = watch::channel(0);
        ClientRegistry {
            sessions: Mutex::new(Vec::new()),
            occupancy,
        }
    }

    /// Creates and registers a session for an accepted connection. Refuses
    /// a duplicate connection id or a registry at capacity; the caller is
    /// expected to drop the fresh socket in that case.
    pub fn register(
        &self,
        conn_id: u64,
        peer_addr: SocketAddr,
        writer: SessionWriter,
    ) -> Result<Arc<ClientSession>, RequestError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.iter().any(|s| s.conn_id() == conn_id) {
            return Err(RequestError::Registry("connection already registered"));
        }
        if sessions.len() >= MAX_CLIENTS {
            return Err(RequestError::Registry("registry full"));
        }
        let session = ClientSession::new(conn_id, peer_addr, writer);
        sessions.push(session.clone());
        self.occupancy.send_replace(sessions.len());
        tracing::debug!(conn = conn_id, count = sessions.len(), "session registered");
        Ok(session)
    }

    /// Removes a session. When the registry empties, every waiter in
    /// [`ClientRegistry::wait_for_empty`] is released.
    pub fn unregister(&self, session: &Arc<ClientSession>) -> Result<(), RequestError> {
        let mut sessions = self.sessions.lock().unwrap();
        let index = sessions
            .iter()
            .position(|s| Arc::ptr_eq(s, session))
            .ok_or(RequestError::Registry("session not registered"))?;
        sessions.remove(index);
        self.occupancy.send_replace(sessions.len());
        tracing::debug!(
            conn = session.conn_id(),
            count = sessions.len(),
            "session unregistered"
        );
        Ok(())
    }

    /// The session currently logged in under `name`, if any. Linear scan;
    /// the registry is small by construction.
    pub fn lookup(&self, name: &str) -> Option<Arc<ClientSession>> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .iter()
            .find(|s| s.player_name().as_deref() == Some(name))
            .cloned()
    }

    /// A snapshot of the players bound by registered sessions, in
    /// registration order.
    pub fn all_players(&self) -> Vec<Arc<Player>> {
        let sessions = self.sessions.lock().unwrap();
        sessions.iter().filter_map(|s| s.player()).collect()
    }

    /// Logs `session` in as `player`. The name-uniqueness check and the
    /// bind happen under the registry guard, so two racing logins under one
    /// name cannot both succeed.
    pub fn login(
        &self,
        session: &Arc<ClientSession>,
        player: Arc<Player>,
    ) -> Result<(), RequestError> {
        let sessions = self.sessions.lock().unwrap();
        let taken = sessions
            .iter()
            .any(|s| !Arc::ptr_eq(s, session) && s.player_name().as_deref() == Some(player.name()));
        if taken {
            return Err(RequestError::NameInUse);
        }
        session.bind_player(player)
    }

    /// Blocks until the number of registered sessions reaches zero. Any
    /// number of tasks may wait concurrently; all are released together.
    pub async fn wait_for_empty(&self) {
        let mut occupancy = self.occupancy.subscribe();
        // wait_for checks the current value first, so an already-empty
        // registry returns immediately.
        let _ = occupancy.wait_for(|count| *count == 0).await;
    }

    /// Half-closes every registered session by cancelling its shutdown
    /// token. Each service loop stops reading, runs its logout cascade, and
    /// unregisters itself; nothing is torn down forcibly here.
    pub fn shutdown_all(&self) {
        let sessions = self.sessions.lock().unwrap();
        tracing::info!(count = sessions.len(), "shutting down all sessions");
        for session in sessions.iter() {
            session.shutdown_token().cancel();
        }
    }
}
