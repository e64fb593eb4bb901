//! # Client Session State Machine
//!
//! Tracks what the conversation is doing from the client's point of view and
//! gates every user action on the current phase. The machine is synchronous
//! and owns no I/O; the controller drives it from user commands, pipeline
//! events, and server envelopes, and consults it before touching the
//! microphone or the channel.
//!
//! ## Two kinds of input:
//! - **User actions** (`connect_requested`, `start_listening`, ...) must be
//!   valid for the current phase and return an error the UI can show when
//!   they are not.
//! - **Observed events** (`on_ready`, `on_playback_started`, ...) describe
//!   something that already happened; an event that does not fit the current
//!   phase is logged and ignored rather than rejected, because stale events
//!   are normal around transitions.
//!
//! `fail` and `reset` are always valid: any phase can collapse into `error`,
//! and an explicit disconnect (ours or the server's) returns the machine to
//! `idle` so the user can start over. Nothing else reaches `idle`.

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::session::SessionPhase;

/// Phase tracker plus the two pieces of client-local state the phase alone
/// cannot express: whether the microphone is open, and the last error text.
pub struct SessionStateMachine {
    phase: SessionPhase,
    capture_active: bool,
    last_error: Option<String>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            capture_active: false,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True while the microphone is (or should be) open.
    pub fn capture_active(&self) -> bool {
        self.capture_active
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// User asked to open a session. Only valid from `idle`.
    pub fn connect_requested(&mut self) -> AppResult<()> {
        self.require(SessionPhase::Idle, "start a session")?;
        self.set_phase(SessionPhase::Connecting);
        Ok(())
    }

    /// User toggled the microphone on. Valid from `ready`, which enters
    /// `listening`, and from `speaking`, where opening the mic is how the
    /// user barges in; there the phase stays `speaking` and follows the
    /// queue, only the capture flag changes.
    pub fn start_listening(&mut self) -> AppResult<()> {
        match self.phase {
            SessionPhase::Ready => {
                self.capture_active = true;
                self.set_phase(SessionPhase::Listening);
                Ok(())
            }
            SessionPhase::Speaking if !self.capture_active => {
                self.capture_active = true;
                debug!("microphone opened during playback");
                Ok(())
            }
            _ => Err(AppError::BadRequest(format!(
                "cannot start listening while {}",
                self.phase.as_str()
            ))),
        }
    }

    /// User toggled the microphone off. From `listening` this returns to
    /// `ready`; during `speaking` only the capture flag changes.
    pub fn stop_listening(&mut self) -> AppResult<()> {
        match self.phase {
            SessionPhase::Listening => {
                self.capture_active = false;
                self.set_phase(SessionPhase::Ready);
                Ok(())
            }
            SessionPhase::Speaking if self.capture_active => {
                self.capture_active = false;
                debug!("microphone released during playback");
                Ok(())
            }
            _ => Err(AppError::BadRequest(format!(
                "cannot stop listening while {}",
                self.phase.as_str()
            ))),
        }
    }

    /// User submitted a complete text turn. Only valid from `ready`; the
    /// machine sits in `thinking` until audio starts or the turn completes.
    pub fn text_submitted(&mut self) -> AppResult<()> {
        self.require(SessionPhase::Ready, "send a text turn")?;
        self.set_phase(SessionPhase::Thinking);
        Ok(())
    }

    /// The bridge confirmed the backend session is up.
    pub fn on_ready(&mut self) {
        self.apply_event(SessionPhase::Ready, "ready");
    }

    /// The playback pipeline began rendering; the assistant is audible.
    pub fn on_playback_started(&mut self) {
        self.apply_event(SessionPhase::Speaking, "playback started");
    }

    /// The playback queue drained. Where we land depends on whether the
    /// microphone is still open: back to `listening` if so, `ready` if not.
    pub fn on_playback_drained(&mut self) {
        if self.phase != SessionPhase::Speaking {
            debug!(
                phase = self.phase.as_str(),
                "playback drained outside speaking, ignoring"
            );
            return;
        }
        let next = if self.capture_active {
            SessionPhase::Listening
        } else {
            SessionPhase::Ready
        };
        self.set_phase(next);
    }

    /// The backend finished its turn. Only meaningful in `thinking`, where it
    /// signals a turn that produced no audio; during `speaking` the phase
    /// change waits for the queue to drain instead.
    pub fn on_turn_complete(&mut self) {
        if self.phase == SessionPhase::Thinking {
            self.set_phase(SessionPhase::Ready);
        }
    }

    /// Collapse into `error` from anywhere and halt capture.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(
            phase = self.phase.as_str(),
            error = %message,
            "session entered error state"
        );
        self.phase = SessionPhase::Error;
        self.capture_active = false;
        self.last_error = Some(message);
    }

    /// Explicit disconnect (user command, server `sessionClosed`, or channel
    /// teardown). The only path back to `idle`; clears all session state so
    /// a fresh `connect_requested` succeeds.
    pub fn reset(&mut self) {
        debug!(phase = self.phase.as_str(), "session reset to idle");
        self.phase = SessionPhase::Idle;
        self.capture_active = false;
        self.last_error = None;
    }

    fn require(&self, expected: SessionPhase, action: &str) -> AppResult<()> {
        if self.phase != expected {
            return Err(AppError::BadRequest(format!(
                "cannot {} while {}",
                action,
                self.phase.as_str()
            )));
        }
        Ok(())
    }

    fn apply_event(&mut self, next: SessionPhase, event: &str) {
        if self.phase.can_transition_to(next) {
            self.set_phase(next);
        } else {
            debug!(
                phase = self.phase.as_str(),
                event, "event does not fit current phase, ignoring"
            );
        }
    }

    fn set_phase(&mut self, next: SessionPhase) {
        debug!(
            from = self.phase.as_str(),
            to = next.as_str(),
            "client phase transition"
        );
        self.phase = next;
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_machine() -> SessionStateMachine {
        let mut machine = SessionStateMachine::new();
        machine.connect_requested().unwrap();
        machine.on_ready();
        machine
    }

    #[test]
    fn test_happy_path_voice_turn() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.phase(), SessionPhase::Idle);

        machine.connect_requested().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Connecting);

        machine.on_ready();
        assert_eq!(machine.phase(), SessionPhase::Ready);

        machine.start_listening().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Listening);
        assert!(machine.capture_active());

        // Assistant replies while the mic is still open
        machine.on_playback_started();
        assert_eq!(machine.phase(), SessionPhase::Speaking);
        assert!(machine.capture_active());

        // Queue drains with the mic open: straight back to listening
        machine.on_playback_drained();
        assert_eq!(machine.phase(), SessionPhase::Listening);

        machine.stop_listening().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Ready);
        assert!(!machine.capture_active());
    }

    #[test]
    fn test_drain_with_mic_closed_returns_to_ready() {
        let mut machine = ready_machine();
        machine.start_listening().unwrap();
        machine.on_playback_started();

        // User releases the mic while the assistant is speaking: the phase
        // stays with the queue, only the flag drops
        machine.stop_listening().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Speaking);
        assert!(!machine.capture_active());

        machine.on_playback_drained();
        assert_eq!(machine.phase(), SessionPhase::Ready);
    }

    #[test]
    fn test_barge_in_opens_mic_during_playback() {
        let mut machine = ready_machine();
        machine.text_submitted().unwrap();
        machine.on_playback_started();
        assert_eq!(machine.phase(), SessionPhase::Speaking);

        machine.start_listening().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Speaking);
        assert!(machine.capture_active());

        // When the (flushed) queue drains we are already listening
        machine.on_playback_drained();
        assert_eq!(machine.phase(), SessionPhase::Listening);
    }

    #[test]
    fn test_listening_never_reaches_idle_directly() {
        let mut machine = ready_machine();
        machine.start_listening().unwrap();

        // No observed event can take listening to idle
        machine.on_ready();
        machine.on_turn_complete();
        machine.on_playback_drained();
        assert_eq!(machine.phase(), SessionPhase::Listening);

        // Only the explicit paths leave: playback, stop, or error
        assert!(!SessionPhase::Listening.can_transition_to(SessionPhase::Idle));
        machine.fail("backend died");
        assert_eq!(machine.phase(), SessionPhase::Error);
        assert!(!machine.capture_active());
    }

    #[test]
    fn test_text_turn_path() {
        let mut machine = ready_machine();
        machine.text_submitted().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Thinking);

        // A text-only answer completes without any audio
        machine.on_turn_complete();
        assert_eq!(machine.phase(), SessionPhase::Ready);

        // A spoken answer goes through speaking and drains as usual
        machine.text_submitted().unwrap();
        machine.on_playback_started();
        assert_eq!(machine.phase(), SessionPhase::Speaking);
        machine.on_playback_drained();
        assert_eq!(machine.phase(), SessionPhase::Ready);
    }

    #[test]
    fn test_actions_rejected_in_wrong_phase() {
        let mut machine = SessionStateMachine::new();
        assert!(machine.start_listening().is_err());
        assert!(machine.stop_listening().is_err());
        assert!(machine.text_submitted().is_err());

        machine.connect_requested().unwrap();
        // Connecting twice is an error, not a silent no-op
        assert!(machine.connect_requested().is_err());
        assert!(machine.start_listening().is_err());

        machine.on_ready();
        machine.start_listening().unwrap();
        assert!(machine.text_submitted().is_err());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut machine = SessionStateMachine::new();
        // Events arriving before any session exists change nothing
        machine.on_ready();
        machine.on_playback_started();
        machine.on_playback_drained();
        machine.on_turn_complete();
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_reset_allows_fresh_session() {
        let mut machine = ready_machine();
        machine.start_listening().unwrap();
        machine.fail("device unplugged");
        assert_eq!(machine.phase(), SessionPhase::Error);
        assert_eq!(machine.last_error(), Some("device unplugged"));

        machine.reset();
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert!(machine.last_error().is_none());
        assert!(!machine.capture_active());

        // The machine is fully reusable after a reset
        machine.connect_requested().unwrap();
        machine.on_ready();
        machine.start_listening().unwrap();
        assert_eq!(machine.phase(), SessionPhase::Listening);
    }
}
