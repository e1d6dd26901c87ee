//! Ephemeral correlation of a live conversation to its incident record.
//!
//! Sessions exist only in memory. The record is the source of truth; the
//! session is a transient view over zero-or-one record, plus the pinned KB
//! entry the conversation started with (so a mid-conversation reindex cannot
//! change the context the engine reasons against).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tickethive_schema::KbEntry;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub incident_id: Option<String>,
    /// KB context pinned at first retrieval.
    pub bound_entry: Option<KbEntry>,
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl Session {
    fn new(session_id: &str, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            incident_id: None,
            bound_entry: None,
            turn_count: 0,
            created_at: now,
            last_active: now,
            ttl_seconds,
        }
    }

    pub fn is_expired(&self) -> bool {
        let elapsed = Utc::now() - self.last_active;
        elapsed.num_seconds() >= self.ttl_seconds
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Session>>>,
    default_ttl: i64,
}

impl SessionStore {
    pub fn new(default_ttl: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Fetch (or create) the session and count the turn. An expired session
    /// is replaced by a fresh, unbound one.
    pub fn get_or_create(&self, session_id: &str) -> Session {
        let mut map = self.inner.lock().expect("session store lock");
        let session = map
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, self.default_ttl));

        if session.is_expired() {
            tracing::debug!(session_id, "session expired, starting fresh");
            *session = Session::new(session_id, self.default_ttl);
        }

        session.turn_count += 1;
        session.touch();
        session.clone()
    }

    /// Attach the session to an incident, pinning the KB context it
    /// started with.
    pub fn bind(&self, session_id: &str, incident_id: &str, entry: Option<KbEntry>) {
        let mut map = self.inner.lock().expect("session store lock");
        if let Some(session) = map.get_mut(session_id) {
            session.incident_id = Some(incident_id.to_string());
            session.bound_entry = entry;
            session.touch();
        }
    }

    /// Detach from the current incident (record resolved or vanished).
    pub fn unbind(&self, session_id: &str) {
        let mut map = self.inner.lock().expect("session store lock");
        if let Some(session) = map.get_mut(session_id) {
            session.incident_id = None;
            session.bound_entry = None;
        }
    }

    pub fn bound_entry(&self, session_id: &str) -> Option<KbEntry> {
        let map = self.inner.lock().expect("session store lock");
        map.get(session_id).and_then(|s| s.bound_entry.clone())
    }

    /// Re-pin a KB entry recovered from the index after a session restart.
    pub fn pin_entry(&self, session_id: &str, entry: KbEntry) {
        let mut map = self.inner.lock().expect("session store lock");
        if let Some(session) = map.get_mut(session_id) {
            session.bound_entry = Some(entry);
        }
    }

    /// Explicit "end session". Returns whether a session existed.
    pub fn end(&self, session_id: &str) -> bool {
        let mut map = self.inner.lock().expect("session store lock");
        map.remove(session_id).is_some()
    }

    /// Drop expired sessions; call periodically.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.inner.lock().expect("session store lock");
        let before = map.len();
        map.retain(|_, session| !session.is_expired());
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> KbEntry {
        KbEntry {
            kb_id: "KB_VPN_01".into(),
            use_case: "vpn".into(),
            required_info: vec![],
            solution_steps: "fix".into(),
        }
    }

    #[test]
    fn get_or_create_counts_turns() {
        let store = SessionStore::new(1800);
        let first = store.get_or_create("s1");
        assert_eq!(first.turn_count, 1);
        assert!(first.incident_id.is_none());

        let second = store.get_or_create("s1");
        assert_eq!(second.turn_count, 2);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn bind_and_unbind() {
        let store = SessionStore::new(1800);
        store.get_or_create("s1");
        store.bind("s1", "INC1", Some(entry()));

        let session = store.get_or_create("s1");
        assert_eq!(session.incident_id.as_deref(), Some("INC1"));
        assert_eq!(store.bound_entry("s1").unwrap().kb_id, "KB_VPN_01");

        store.unbind("s1");
        let session = store.get_or_create("s1");
        assert!(session.incident_id.is_none());
        assert!(store.bound_entry("s1").is_none());
    }

    #[test]
    fn expired_session_is_replaced_unbound() {
        let store = SessionStore::new(0);
        store.get_or_create("s1");
        store.bind("s1", "INC1", Some(entry()));

        std::thread::sleep(std::time::Duration::from_millis(5));
        let session = store.get_or_create("s1");
        assert!(session.incident_id.is_none());
        assert_eq!(session.turn_count, 1);
    }

    #[test]
    fn end_removes_session() {
        let store = SessionStore::new(1800);
        store.get_or_create("s1");
        assert!(store.end("s1"));
        assert!(!store.end("s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn purge_expired_drops_only_stale() {
        let store = SessionStore::new(1800);
        store.get_or_create("fresh");
        {
            let mut map = store.inner.lock().unwrap();
            let mut stale = Session::new("stale", 0);
            stale.last_active = Utc::now() - chrono::TimeDelta::seconds(10);
            map.insert("stale".into(), stale);
        }

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
