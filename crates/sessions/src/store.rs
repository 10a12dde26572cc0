//! In-memory session & message store (§4.1).
//!
//! Generalized from the teacher's flat key→token-counter `SessionStore`
//! into the richer `Session{id, title, created_at, updated_at, messages,
//! metadata}` model: every session and every mutation of its message
//! history lives behind one `RwLock` per session entry in a single map, so
//! `append_message`/`append_parts` are atomic with respect to `to_history`.
//! Durable persistence is out of scope here (see SPEC_FULL.md §2.1) — the
//! teacher's `sessions.json` flush/load is not carried over.

use std::collections::HashMap;

use ax_domain::error::{Error, Result};
use ax_domain::session::{Message, Part, Role, Session};
use parking_lot::RwLock;

/// In-memory mapping from session id to session object.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Create a new session with an opaque (UUID-class) id.
    pub fn create(&self, title: Option<String>) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(id, title)
    }

    /// Create a session with a caller-chosen id. Idempotent: if `id`
    /// already exists, returns the existing session unchanged.
    pub fn create_with_id(&self, id: impl Into<String>, title: Option<String>) -> Session {
        let id = id.into();
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&id) {
            return existing.clone();
        }
        let session = Session::new(id.clone(), title);
        sessions.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Remove a session entirely. Returns `true` if it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Apply `patch` to the session's metadata/title in place, then touch
    /// `updated_at`. A no-op (returning `Error::Other("not found")`) if `id`
    /// is unknown.
    pub fn update(&self, id: &str, patch: impl FnOnce(&mut Session)) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        patch(session);
        session.touch();
        Ok(session.clone())
    }

    /// Append a new message (built from `role` and `parts`) to the session,
    /// atomically with respect to `to_history`. Returns the created message.
    pub fn append_message(&self, session_id: &str, role: Role, parts: Vec<Part>) -> Result<Message> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| not_found(session_id))?;

        let mut message = Message::new(role);
        message.parts = parts;
        session.messages.push(message.clone());
        session.touch();

        Ok(message)
    }

    /// Append additional parts to an already-existing message, atomically
    /// (emission order preserved per invariant 1).
    pub fn append_parts(&self, session_id: &str, message_id: &str, parts: Vec<Part>) -> Result<Message> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| not_found(session_id))?;

        let message = session
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::Other(format!("message '{message_id}' not found in session '{session_id}'")))?;
        message.parts.extend(parts);
        let result = message.clone();

        session.touch();
        Ok(result)
    }

    /// The session's messages in emission order.
    pub fn to_history(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id).ok_or_else(|| not_found(session_id))?;
        Ok(session.messages.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &str) -> Error {
    Error::Other(format!("session '{id}' not found"))
}
