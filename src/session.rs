//! Active conversation registry
//!
//! One session per user. A session existing means the user is building a
//! question; ending it releases the user.

use crate::chat::{SurfaceId, UserId, UserRef};
use crate::flow::{FlowState, QuestionDraft};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("You are already building a question.")]
    AlreadyActive(UserId),
}

/// Mutable state of one user's build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserRef,
    pub draft: QuestionDraft,
    /// Scratch surface, attached once the platform has created it
    pub surface: Option<SurfaceId>,
    /// Channel the start command was issued in
    pub origin: Option<SurfaceId>,
    pub state: FlowState,
    pub started_at: DateTime<Utc>,
}

impl Session {
    fn new(user: UserRef) -> Self {
        Self {
            user,
            draft: QuestionDraft::default(),
            surface: None,
            origin: None,
            state: FlowState::Menu,
            started_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a session for `user`; fails if one is already live
    pub fn start(&self, user: UserRef) -> Result<(), SessionError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&user.id) {
            return Err(SessionError::AlreadyActive(user.id));
        }
        sessions.insert(user.id.clone(), Session::new(user));
        Ok(())
    }

    /// Snapshot of the user's session
    pub fn get(&self, user_id: &UserId) -> Option<Session> {
        self.sessions().get(user_id).cloned()
    }

    /// Remove the user's session. Ending twice is harmless.
    pub fn end(&self, user_id: &UserId) -> Option<Session> {
        self.sessions().remove(user_id)
    }

    /// Apply `f` to the live session, if any
    pub fn update<R>(&self, user_id: &UserId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions().get_mut(user_id).map(f)
    }

    pub fn attach_surface(&self, user_id: &UserId, surface: SurfaceId) -> bool {
        self.update(user_id, |session| session.surface = Some(surface))
            .is_some()
    }

    pub fn surface_of(&self, user_id: &UserId) -> Option<SurfaceId> {
        self.sessions()
            .get(user_id)
            .and_then(|session| session.surface.clone())
    }

    pub fn is_active(&self, user_id: &UserId) -> bool {
        self.sessions().contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }
}
