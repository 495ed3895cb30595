//! Process-wide lookup of live sessions.
//!
//! Sessions are keyed by `(service id, caller key)`, so two callers logged
//! in to the same service never share a session. Registering a session for
//! an existing key replaces the old one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use sigcall::{Uid, VerifyKey};
use tracing::info;

use crate::session::ApiSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub service_id: Uid,
    pub caller: VerifyKey,
}

impl SessionKey {
    pub fn of(session: &ApiSession) -> Self {
        Self {
            service_id: session.service_id(),
            caller: session.caller(),
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    sessions: HashMap<SessionKey, (u64, ApiSession)>,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Entries>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session`, returning the one it replaced, if any.
    pub fn register(&self, session: ApiSession) -> Option<ApiSession> {
        let key = SessionKey::of(&session);
        let mut entries = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        entries.seq += 1;
        let seq = entries.seq;
        info!(service = %key.service_id, caller = %key.caller, "session registered");
        entries
            .sessions
            .insert(key, (seq, session))
            .map(|(_, old)| old)
    }

    pub fn get(&self, service_id: Uid, caller: &VerifyKey) -> Option<ApiSession> {
        let key = SessionKey {
            service_id,
            caller: *caller,
        };
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(&key)
            .map(|(_, s)| s.clone())
    }

    /// The most recently registered session for `service_id`, whoever the caller.
    pub fn get_by_recent_service(&self, service_id: Uid) -> Option<ApiSession> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .iter()
            .filter(|(k, _)| k.service_id == service_id)
            .max_by_key(|(_, (seq, _))| *seq)
            .map(|(_, (_, s))| s.clone())
    }

    /// Every live session, oldest registration first.
    pub fn all(&self) -> Vec<ApiSession> {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut sessions: Vec<_> = entries.sessions.values().collect();
        sessions.sort_by_key(|(seq, _)| *seq);
        sessions.into_iter().map(|(_, s)| s.clone()).collect()
    }

    /// Drop the session for one caller at one service.
    pub fn invalidate(&self, service_id: Uid, caller: &VerifyKey) -> Option<ApiSession> {
        let key = SessionKey {
            service_id,
            caller: *caller,
        };
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .remove(&key)
            .map(|(_, s)| s)
    }

    /// Drop every session at `service_id`. Returns how many were removed.
    pub fn remove_service(&self, service_id: Uid) -> usize {
        let mut entries = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.sessions.len();
        entries.sessions.retain(|k, _| k.service_id != service_id);
        before - entries.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
