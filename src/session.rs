//! Session Manager (C6): in-memory session map, TTL expiry, history-window
//! trimming, and a global session cap (§4.6).
//!
//! Constructed explicitly by the composition root and handed to
//! [`crate::search::ContextAwareSearch`] — no global/lazy singleton, per
//! §9's refactor note. Guarded by a single `std::sync::Mutex`, matching the
//! teacher's `Arc<RwLock<...>>` state-field convention rather than pulling
//! in `parking_lot` (§4.6.A).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::{ConversationTurn, Session};

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
    history_window: usize,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(ttl: Duration, history_window: usize, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            history_window,
            max_sessions,
        }
    }

    /// Create a fresh session with a generated id and insert it.
    pub fn create(&self) -> Session {
        let session = Session::new(Uuid::new_v4().to_string(), self.history_window);
        let mut sessions = self.lock();
        self.prune_expired(&mut sessions);
        self.evict_if_over_cap(&mut sessions);
        sessions.insert(session.session_id.clone(), session.clone());
        session
    }

    /// Look up a session by id, pruning it first if expired. Returns
    /// `None` on missing or expired (§4.6, B4).
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.lock();
        let expired = sessions
            .get(id)
            .map(|s| s.is_expired(self.ttl, Utc::now()))
            .unwrap_or(false);
        if expired {
            sessions.remove(id);
            return None;
        }
        sessions.get(id).cloned()
    }

    /// Return the session named by `id` if live, otherwise create a new
    /// one (also used when `id` is `None`).
    pub fn get_or_create(&self, id: Option<&str>) -> Session {
        if let Some(id) = id {
            if let Some(session) = self.get(id) {
                return session;
            }
        }
        self.create()
    }

    pub fn delete(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Append a turn to the named session, trimming FIFO to the history
    /// window (P4/B3) and refreshing `last_activity`.
    pub fn append_turn(
        &self,
        id: &str,
        turn: ConversationTurn,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.is_expired(self.ttl, Utc::now()) {
            sessions.remove(id);
            return Err(SessionError::Expired(id.to_string()));
        }
        session.push_turn(turn);
        session.last_activity = Utc::now();
        Ok(session.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().expect("session map lock poisoned")
    }

    fn prune_expired(&self, sessions: &mut HashMap<String, Session>) {
        let now = Utc::now();
        let ttl = self.ttl;
        sessions.retain(|_, session| !session.is_expired(ttl, now));
    }

    /// Global cap (default 1,000): prune expired first; if still over,
    /// evict oldest-by-`last_activity` (§4.6).
    fn evict_if_over_cap(&self, sessions: &mut HashMap<String, Session>) {
        if sessions.len() < self.max_sessions {
            return;
        }
        self.prune_expired(sessions);
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_activity)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryType;

    fn turn(query: &str) -> ConversationTurn {
        ConversationTurn {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_query: query.to_string(),
            query_type: QueryType::Standalone,
            expanded_query: None,
            analysis_summary: None,
            context_used: false,
            expansion_confidence: 0.0,
        }
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let session = mgr.create();
        let fetched = mgr.get(&session.session_id).unwrap();
        assert_eq!(fetched.session_id, session.session_id);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        assert!(mgr.get("nonexistent").is_none());
    }

    #[test]
    fn test_get_or_create_reuses_existing() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let session = mgr.create();
        let again = mgr.get_or_create(Some(&session.session_id));
        assert_eq!(again.session_id, session.session_id);
    }

    #[test]
    fn test_get_or_create_makes_new_when_none_given() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let a = mgr.get_or_create(None);
        let b = mgr.get_or_create(None);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_append_turn_trims_to_history_window_b3() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let session = mgr.create();
        for i in 0..10 {
            mgr.append_turn(&session.session_id, turn(&format!("q{i}")))
                .unwrap();
        }
        let full = mgr.get(&session.session_id).unwrap();
        assert_eq!(full.turns.len(), 10);

        let updated = mgr.append_turn(&session.session_id, turn("q10")).unwrap();
        assert_eq!(updated.turns.len(), 10);
        assert_eq!(updated.turns.front().unwrap().user_query, "q1");
        assert_eq!(updated.turns.back().unwrap().user_query, "q10");
    }

    #[test]
    fn test_append_turn_missing_session_errors() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let err = mgr.append_turn("missing", turn("q")).unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_delete_removes_session() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 1000);
        let session = mgr.create();
        mgr.delete(&session.session_id);
        assert!(mgr.get(&session.session_id).is_none());
    }

    #[test]
    fn test_eviction_at_cap_removes_oldest() {
        let mgr = SessionManager::new(Duration::from_secs(1800), 10, 2);
        let first = mgr.create();
        std::thread::sleep(Duration::from_millis(5));
        let _second = mgr.create();
        std::thread::sleep(Duration::from_millis(5));
        // Creating a third session while at cap (2) should evict the
        // oldest (`first`) rather than grow past the cap.
        let _third = mgr.create();
        assert!(mgr.get(&first.session_id).is_none());
    }

    #[test]
    fn test_expired_session_treated_as_missing_b4() {
        let mgr = SessionManager::new(Duration::from_millis(1), 10, 1000);
        let session = mgr.create();
        std::thread::sleep(Duration::from_millis(20));
        assert!(mgr.get(&session.session_id).is_none());
    }

    /// B4: accessed at exactly TTL → expired; at TTL - 1s → still live.
    /// Exercised directly against `Session::is_expired` with an explicit
    /// `now`, rather than via real sleeps, to pin the boundary precisely.
    #[test]
    fn test_session_expiry_boundary_b4() {
        let ttl = Duration::from_secs(1800);
        let session = Session::new("s1".to_string(), 10);

        let at_ttl = session.last_activity + chrono::Duration::seconds(1800);
        assert!(session.is_expired(ttl, at_ttl));

        let just_under_ttl = session.last_activity + chrono::Duration::seconds(1799);
        assert!(!session.is_expired(ttl, just_under_ttl));
    }
}
