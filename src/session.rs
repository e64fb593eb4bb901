//! # Voice Session Management
//!
//! Session records for the voice bridge: one per open client channel, created
//! when the channel opens and destroyed when either side closes it. Also home
//! to [`SessionPhase`], the lifecycle enum shared between the server records
//! and the native client's state machine.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: channel open, backend session being established
//! 2. **Ready**: backend acknowledged, conversation can start
//! 3. **Listening / Thinking / Speaking**: conversation phases (client-driven)
//! 4. **Error**: session failed and is about to be torn down

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Externally observable phase of a conversation.
///
/// Exactly one per session, mutated only in response to explicit lifecycle or
/// backend events. `Idle` and `Error` are reachable from anywhere, but only
/// through the explicit reset and failure operations; ordinary transitions go
/// through [`SessionPhase::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Ready,
    Listening,
    Thinking,
    Speaking,
    Error,
}

impl SessionPhase {
    /// Convert to the string used in API responses and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Ready => "ready",
            SessionPhase::Listening => "listening",
            SessionPhase::Thinking => "thinking",
            SessionPhase::Speaking => "speaking",
            SessionPhase::Error => "error",
        }
    }

    /// Whether `next` is a valid event-driven transition from this phase.
    ///
    /// Failure is always valid. Returning to `Idle` never is: that happens
    /// only through an explicit disconnect or a backend session close, which
    /// reset the machine rather than transition it.
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Ready)
                | (Ready, Listening)
                | (Ready, Thinking)
                | (Ready, Speaking)
                | (Listening, Ready)
                | (Listening, Speaking)
                | (Thinking, Ready)
                | (Thinking, Speaking)
                | (Speaking, Speaking)
                | (Speaking, Ready)
                | (Speaking, Listening)
        )
    }
}

/// One voice session: a client channel multiplexed against one backend
/// session.
///
/// ## Thread Safety:
/// Shared between the WebSocket actor and spawned forwarding tasks, so the
/// phase sits behind a lock and the traffic counters are atomics.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub session_id: String,

    /// Owner of the channel, as authenticated by the caller
    pub user_id: String,

    /// Current lifecycle phase
    phase: Arc<RwLock<SessionPhase>>,

    /// When the channel was opened
    pub created_at: DateTime<Utc>,

    /// Client audio frames forwarded to the backend
    frames_forwarded: AtomicU64,

    /// Backend events relayed to the client
    events_relayed: AtomicU64,
}

impl Session {
    /// New session record. The channel is already open when the record is
    /// created, so the starting phase is `Connecting`.
    pub fn new(user_id: &str) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            phase: Arc::new(RwLock::new(SessionPhase::Connecting)),
            created_at: Utc::now(),
            frames_forwarded: AtomicU64::new(0),
            events_relayed: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read().unwrap()
    }

    /// Apply an event-driven phase transition, rejecting invalid ones.
    pub fn transition(&self, next: SessionPhase) -> AppResult<()> {
        let mut phase = self.phase.write().unwrap();
        if !phase.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "invalid phase transition {} -> {}",
                phase.as_str(),
                next.as_str()
            )));
        }
        debug!(
            session_id = %self.session_id,
            from = phase.as_str(),
            to = next.as_str(),
            "session phase transition"
        );
        *phase = next;
        Ok(())
    }

    /// Mark the session failed. Valid from any phase.
    pub fn fail(&self) {
        *self.phase.write().unwrap() = SessionPhase::Error;
    }

    pub fn record_frame_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_relayed(&self) {
        self.events_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    pub fn events_relayed(&self) -> u64 {
        self.events_relayed.load(Ordering::Relaxed)
    }

    /// Seconds since the channel opened.
    pub fn uptime_seconds(&self) -> f64 {
        let duration = Utc::now().signed_duration_since(self.created_at);
        duration.num_milliseconds() as f64 / 1000.0
    }
}

/// Tracks all live sessions and enforces the concurrency ceiling.
///
/// ## Thread Safety:
/// RwLock allows many readers (health/metrics lookups) or one writer
/// (open/close) at a time.
pub struct SessionManager {
    /// Active sessions mapped by session ID
    sessions: RwLock<HashMap<String, Arc<Session>>>,

    /// Maximum number of concurrent sessions allowed
    max_concurrent_sessions: usize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a new session for `user_id`.
    ///
    /// Fails when the concurrency ceiling is reached; the caller surfaces
    /// that to the client as an error event before closing the channel.
    pub fn create_session(&self, user_id: &str) -> AppResult<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::BadRequest(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            )));
        }

        let session = Arc::new(Session::new(user_id));
        sessions.insert(session.session_id.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Drop a session record. Idempotent; returns whether it was present.
    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Snapshot for health and metrics responses.
    pub fn summary(&self) -> SessionManagerSummary {
        let sessions = self.sessions.read().unwrap();

        let mut phase_counts = HashMap::new();
        let mut frames_forwarded = 0;
        let mut events_relayed = 0;

        for session in sessions.values() {
            *phase_counts
                .entry(session.phase().as_str().to_string())
                .or_insert(0) += 1;
            frames_forwarded += session.frames_forwarded();
            events_relayed += session.events_relayed();
        }

        SessionManagerSummary {
            active_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            phase_counts,
            frames_forwarded,
            events_relayed,
        }
    }
}

/// Aggregate view over all live sessions.
#[derive(Debug, Serialize)]
pub struct SessionManagerSummary {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub phase_counts: HashMap<String, usize>,
    pub frames_forwarded: u64,
    pub events_relayed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinary_transition_table() {
        use SessionPhase::*;

        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Ready));
        assert!(Listening.can_transition_to(Speaking));
        assert!(Speaking.can_transition_to(Ready));

        assert!(!Idle.can_transition_to(Ready));
        assert!(!Connecting.can_transition_to(Listening));
        assert!(!Ready.can_transition_to(Connecting));
    }

    #[test]
    fn test_error_reachable_from_anywhere() {
        use SessionPhase::*;
        for phase in [Idle, Connecting, Ready, Listening, Thinking, Speaking, Error] {
            assert!(phase.can_transition_to(Error));
        }
    }

    #[test]
    fn test_listening_reaches_only_ready_speaking_error() {
        use SessionPhase::*;
        for phase in [Idle, Connecting, Ready, Listening, Thinking, Speaking, Error] {
            let reachable = SessionPhase::Listening.can_transition_to(phase);
            let expected = matches!(phase, Ready | Speaking | Error);
            assert_eq!(reachable, expected, "listening -> {}", phase.as_str());
        }
    }

    #[test]
    fn test_idle_needs_explicit_reset() {
        use SessionPhase::*;
        for phase in [Connecting, Ready, Listening, Thinking, Speaking, Error] {
            assert!(!phase.can_transition_to(Idle));
        }
    }

    #[test]
    fn test_session_transition_validation() {
        let session = Session::new("u1");
        assert_eq!(session.phase(), SessionPhase::Connecting);

        session.transition(SessionPhase::Ready).unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);

        assert!(session.transition(SessionPhase::Connecting).is_err());
        assert_eq!(session.phase(), SessionPhase::Ready);

        session.fail();
        assert_eq!(session.phase(), SessionPhase::Error);
    }

    #[test]
    fn test_manager_enforces_session_limit() {
        let manager = SessionManager::new(2);
        let first = manager.create_session("u1").unwrap();
        let _second = manager.create_session("u2").unwrap();

        let err = manager.create_session("u3").unwrap_err();
        assert!(err.to_string().contains("Maximum concurrent sessions"));

        assert!(manager.remove_session(&first.session_id));
        assert!(!manager.remove_session(&first.session_id));
        assert!(manager.create_session("u3").is_ok());
    }

    #[test]
    fn test_manager_summary_counts_phases() {
        let manager = SessionManager::new(10);
        let a = manager.create_session("u1").unwrap();
        let _b = manager.create_session("u2").unwrap();
        a.transition(SessionPhase::Ready).unwrap();
        a.record_frame_forwarded();
        a.record_event_relayed();
        a.record_event_relayed();

        let summary = manager.summary();
        assert_eq!(summary.active_sessions, 2);
        assert_eq!(summary.max_sessions, 10);
        assert_eq!(summary.phase_counts.get("ready"), Some(&1));
        assert_eq!(summary.phase_counts.get("connecting"), Some(&1));
        assert_eq!(summary.frames_forwarded, 1);
        assert_eq!(summary.events_relayed, 2);
    }
}
