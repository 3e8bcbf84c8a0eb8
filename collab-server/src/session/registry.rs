//! `sessionId → Connection` and `documentId → set<sessionId>` (§4.7,
//! invariants 4-5).

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{CoreError, CoreResult};
use crate::protocol::WsCommand;

/// One connected client. `userId` may be shared by several sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    subscribed_documents: Vec<String>,
    pub last_activity_time: u64,
}

impl Session {
    pub fn subscribed_documents(&self) -> &[String] {
        &self.subscribed_documents
    }
}

struct Connection {
    sender: UnboundedSender<WsCommand>,
    session: Session,
    is_alive: bool,
}

/// Registry of live sessions and their document subscriptions. Internally
/// concurrent; every method takes `&self`.
#[derive(Default)]
pub struct SessionRegistry {
    clients: DashMap<String, Connection>,
    sessions_by_document: DashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection with `isAlive=true` and no subscriptions.
    pub fn register(&self, session_id: String, user_id: String, sender: UnboundedSender<WsCommand>, now: u64) {
        self.clients.insert(
            session_id.clone(),
            Connection {
                sender,
                session: Session {
                    session_id,
                    user_id,
                    subscribed_documents: Vec::new(),
                    last_activity_time: now,
                },
                is_alive: true,
            },
        );
    }

    /// Removes the session from every document it subscribed to and deletes
    /// the client entry, returning the removed [`Session`] metadata.
    pub fn unregister(&self, session_id: &str) -> Option<Session> {
        let (_, connection) = self.clients.remove(session_id)?;
        for document_id in &connection.session.subscribed_documents {
            if let Some(mut set) = self.sessions_by_document.get_mut(document_id) {
                set.remove(session_id);
                if set.is_empty() {
                    drop(set);
                    self.sessions_by_document.remove(document_id);
                }
            }
        }
        Some(connection.session)
    }

    pub fn subscribe(&self, session_id: &str, document_id: &str) -> CoreResult<()> {
        let mut entry = self
            .clients
            .get_mut(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        if !entry.session.subscribed_documents.iter().any(|d| d == document_id) {
            entry.session.subscribed_documents.push(document_id.to_string());
        }
        self.sessions_by_document
            .entry(document_id.to_string())
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    /// Silent no-op if the session or the subscription is absent.
    pub fn unsubscribe(&self, session_id: &str, document_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(session_id) {
            entry.session.subscribed_documents.retain(|d| d != document_id);
        }
        if let Some(mut set) = self.sessions_by_document.get_mut(document_id) {
            set.remove(session_id);
            if set.is_empty() {
                drop(set);
                self.sessions_by_document.remove(document_id);
            }
        }
    }

    pub fn user_id_of(&self, session_id: &str) -> Option<String> {
        self.clients.get(session_id).map(|c| c.session.user_id.clone())
    }

    pub fn is_subscribed(&self, session_id: &str, document_id: &str) -> bool {
        self.clients
            .get(session_id)
            .map(|c| c.session.subscribed_documents.iter().any(|d| d == document_id))
            .unwrap_or(false)
    }

    pub fn sessions_for_document(&self, document_id: &str) -> Vec<String> {
        self.sessions_by_document
            .get(document_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn touch(&self, session_id: &str, now: u64) {
        if let Some(mut entry) = self.clients.get_mut(session_id) {
            entry.session.last_activity_time = now;
        }
    }

    /// Marks a connection alive. Called by incoming heartbeat frames and
    /// transport-level pongs alike.
    pub fn mark_alive(&self, session_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(session_id) {
            entry.is_alive = true;
        }
    }

    pub fn all_session_ids(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Best-effort send; returns `false` (and logs) if the session is absent
    /// or its channel is closed. Never aborts a caller's fan-out loop.
    pub fn send(&self, session_id: &str, command: WsCommand) -> bool {
        match self.clients.get(session_id) {
            Some(conn) => conn.sender.send(command).is_ok(),
            None => false,
        }
    }

    /// Heartbeat pass (§4.7): connections still marked dead from the
    /// previous tick are returned for close-and-unregister; survivors are
    /// flipped back to not-alive and sent a heartbeat frame.
    pub fn heartbeat_sweep(&self, now: u64) -> Vec<String> {
        let mut dead = Vec::new();
        for mut entry in self.clients.iter_mut() {
            if !entry.is_alive {
                dead.push(entry.session.session_id.clone());
            } else {
                entry.is_alive = false;
                let _ = entry
                    .sender
                    .send(WsCommand::Send(crate::protocol::OutboundFrame::Heartbeat { timestamp: now }));
            }
        }
        dead
    }
}
