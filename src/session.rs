//! Session state machine for the voxkey daemon
//!
//! Interprets hotkey events into session start/stop transitions for the
//! three activation modes and enforces the lifecycle:
//! Idle → Recording → Stopping → Idle
//!
//! The machine is pure: it decides transitions, the daemon performs the
//! side effects (opening capture, closing the stream) and reports back
//! via `stop_complete`/`abort`. Events arriving while a stop is in
//! flight are debounced so sessions can never overlap.

use crate::config::ActivationMode;
use crate::hotkey::HotkeyEvent;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One start-to-stop dictation activity.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Committed transcript segments, in backend order.
    pub transcript: String,
    /// Error annotation set when the session was force-stopped.
    pub error: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            transcript: String::new(),
            error: None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the activation hotkey
    Idle,
    /// Capture and stream are live
    Recording,
    /// Capture stopped, waiting for the stream flush and injector drain
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Recording => write!(f, "recording"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Transition requested by the machine in response to a hotkey event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Open capture and stream for a new session
    StartSession,
    /// Stop capture, flush the stream, drain the injector
    StopSession,
}

/// Hotkey interpreter + lifecycle guard.
#[derive(Debug)]
pub struct SessionMachine {
    mode: ActivationMode,
    state: SessionState,
}

impl SessionMachine {
    pub fn new(mode: ActivationMode) -> Self {
        Self {
            mode,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Feed a hotkey event. Returns the transition the daemon should
    /// perform, if any. Events during `Stopping` are ignored.
    pub fn on_hotkey(&mut self, event: HotkeyEvent) -> Option<Transition> {
        let activate = self.is_activate(event);
        let deactivate = self.is_deactivate(event);

        match self.state {
            SessionState::Idle if activate => {
                self.state = SessionState::Recording;
                Some(Transition::StartSession)
            }
            SessionState::Recording if deactivate => {
                self.state = SessionState::Stopping;
                Some(Transition::StopSession)
            }
            SessionState::Stopping => {
                tracing::debug!("Hotkey event {:?} ignored while stopping", event);
                None
            }
            _ => None,
        }
    }

    /// Session teardown finished; return to `Idle`.
    pub fn stop_complete(&mut self) {
        self.state = SessionState::Idle;
    }

    /// Session start failed or a component died; force `Stopping` so the
    /// daemon runs the teardown path.
    pub fn force_stopping(&mut self) -> bool {
        if self.state == SessionState::Recording {
            self.state = SessionState::Stopping;
            true
        } else {
            false
        }
    }

    /// Session start failed before anything was opened; return to `Idle`.
    pub fn abort_start(&mut self) {
        if self.state == SessionState::Recording {
            self.state = SessionState::Idle;
        }
    }

    fn is_activate(&self, event: HotkeyEvent) -> bool {
        matches!(
            (self.mode, event),
            (ActivationMode::TapTap, HotkeyEvent::Pressed)
                | (ActivationMode::PushToTalk, HotkeyEvent::Pressed)
                | (ActivationMode::TwoPedal, HotkeyEvent::Pressed)
        )
    }

    fn is_deactivate(&self, event: HotkeyEvent) -> bool {
        match self.mode {
            // Second press of the same key
            ActivationMode::TapTap => event == HotkeyEvent::Pressed,
            ActivationMode::PushToTalk => event == HotkeyEvent::Released,
            // Distinct stop binding feeds the same machine
            ActivationMode::TwoPedal => event == HotkeyEvent::StopPressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_tap_toggles() {
        let mut m = SessionMachine::new(ActivationMode::TapTap);
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StartSession)
        );
        assert_eq!(m.state(), SessionState::Recording);
        // Release between taps does nothing
        assert_eq!(m.on_hotkey(HotkeyEvent::Released), None);
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StopSession)
        );
        assert_eq!(m.state(), SessionState::Stopping);
        m.stop_complete();
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_push_to_talk_press_release() {
        let mut m = SessionMachine::new(ActivationMode::PushToTalk);
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StartSession)
        );
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Released),
            Some(Transition::StopSession)
        );
    }

    #[test]
    fn test_two_pedal_uses_stop_key() {
        let mut m = SessionMachine::new(ActivationMode::TwoPedal);
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StartSession)
        );
        // The start key does not stop a two-pedal session
        assert_eq!(m.on_hotkey(HotkeyEvent::Pressed), None);
        assert_eq!(m.on_hotkey(HotkeyEvent::Released), None);
        assert_eq!(
            m.on_hotkey(HotkeyEvent::StopPressed),
            Some(Transition::StopSession)
        );
    }

    #[test]
    fn test_events_debounced_while_stopping() {
        let mut m = SessionMachine::new(ActivationMode::TapTap);
        m.on_hotkey(HotkeyEvent::Pressed);
        m.on_hotkey(HotkeyEvent::Pressed);
        assert_eq!(m.state(), SessionState::Stopping);

        // A second stop (or a new start) during teardown is ignored
        assert_eq!(m.on_hotkey(HotkeyEvent::Pressed), None);
        assert_eq!(m.on_hotkey(HotkeyEvent::StopPressed), None);
        assert_eq!(m.state(), SessionState::Stopping);

        // Stopping twice in immediate succession is identical to once
        m.stop_complete();
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_release_in_idle_does_not_start() {
        let mut m = SessionMachine::new(ActivationMode::PushToTalk);
        assert_eq!(m.on_hotkey(HotkeyEvent::Released), None);
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_force_stopping_only_from_recording() {
        let mut m = SessionMachine::new(ActivationMode::TapTap);
        assert!(!m.force_stopping());
        m.on_hotkey(HotkeyEvent::Pressed);
        assert!(m.force_stopping());
        assert_eq!(m.state(), SessionState::Stopping);
        assert!(!m.force_stopping());
    }

    #[test]
    fn test_abort_start_returns_to_idle() {
        let mut m = SessionMachine::new(ActivationMode::PushToTalk);
        m.on_hotkey(HotkeyEvent::Pressed);
        m.abort_start();
        assert_eq!(m.state(), SessionState::Idle);
        // A fresh activation works after the abort
        assert_eq!(
            m.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StartSession)
        );
    }

    #[test]
    fn test_sessions_are_distinct() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id, b.id);
        assert!(a.error.is_none());
        assert!(a.transcript.is_empty());
    }
}
