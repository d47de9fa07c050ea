//! Progress/Event Channel (C9): step-level progress events keyed by
//! session, for external subscribers (§4.9). Fire-and-forget from the
//! producer's side — a slow or absent subscriber never blocks the engine.
//!
//! Implemented with a bounded `tokio::sync::broadcast` channel per
//! session: a lagging subscriber's next `recv()` returns
//! `Lagged(n)` and resumes from the oldest still-retained event, which is
//! exactly "bounded buffer per subscriber; oldest dropped on overflow"
//! (§4.9, §5) without a hand-rolled ring buffer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// `{ session_id, level, message, step?, total_steps?, details?, ts }`
/// (§6 "Progress events (outbound)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub level: ProgressLevel,
    pub message: String,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub details: Option<serde_json::Value>,
    pub ts: DateTime<Utc>,
}

pub struct ProgressChannel {
    senders: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to progress events for one session. Any number of
    /// subscribers may exist concurrently per session.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut senders = self.senders.lock().expect("progress channel lock poisoned");
        senders
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Emit an event to every current subscriber of `session_id`. Best
    /// effort: if there are no subscribers, the event is simply dropped.
    pub fn emit(
        &self,
        session_id: &str,
        level: ProgressLevel,
        message: impl Into<String>,
        step: Option<u32>,
        total_steps: Option<u32>,
        details: Option<serde_json::Value>,
    ) {
        let event = ProgressEvent {
            session_id: session_id.to_string(),
            level,
            message: message.into(),
            step,
            total_steps,
            details,
            ts: Utc::now(),
        };

        let mut senders = self.senders.lock().expect("progress channel lock poisoned");
        let sender = senders
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        // `send` errors only when there are zero receivers; that's a
        // no-op, not a failure the engine should ever observe.
        let _ = sender.send(event);
    }
}
