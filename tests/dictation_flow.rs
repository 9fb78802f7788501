//! End-to-end behavior tests: backend wire messages through the
//! injection state, and hotkey events through the session machine,
//! without any network, microphone, or uinput device involved.

use tokio::sync::mpsc;
use voxkey::audio::AudioFrame;
use voxkey::config::ActivationMode;
use voxkey::error::InjectError;
use voxkey::hotkey::HotkeyEvent;
use voxkey::inject::{InjectionState, KeySink};
use voxkey::session::{SessionMachine, SessionState, Transition};
use voxkey::stt::{ServerMessage, TranscriptEvent, TranscriptKind};

/// A text field stand-in that records what keystrokes would produce.
#[derive(Default)]
struct Screen {
    text: String,
    backspaces: usize,
}

impl KeySink for Screen {
    fn type_char(&mut self, c: char) -> Result<bool, InjectError> {
        if c.is_ascii() || c == '\n' {
            self.text.push(c);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn backspace(&mut self, count: usize) -> Result<(), InjectError> {
        self.backspaces += count;
        for _ in 0..count {
            self.text.pop();
        }
        Ok(())
    }
}

fn wire(json: &str) -> TranscriptEvent {
    match serde_json::from_str::<ServerMessage>(json).expect("valid server message") {
        ServerMessage::Transcript {
            kind,
            text,
            replace_from,
        } => TranscriptEvent {
            kind,
            text,
            replace_from,
        },
        other => panic!("expected transcript, got {:?}", other),
    }
}

#[test]
fn interim_then_final_converges_on_screen() {
    let mut state = InjectionState::new();
    let mut screen = Screen::default();

    for json in [
        r#"{"type":"transcript","kind":"interim","text":"hel","replace_from":0}"#,
        r#"{"type":"transcript","kind":"interim","text":"hello wor","replace_from":0}"#,
        r#"{"type":"transcript","kind":"final","text":"hello world","replace_from":0}"#,
    ] {
        state.apply(&wire(json), &mut screen).unwrap();
    }

    assert_eq!(screen.text, "hello world");
    // Every interim extended the previous text, so nothing was erased
    assert_eq!(screen.backspaces, 0);
    assert_eq!(state.committed_chars(), 11);
}

#[test]
fn backend_revision_retypes_only_the_difference() {
    let mut state = InjectionState::new();
    let mut screen = Screen::default();

    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"interim","text":"I want to recognize speech","replace_from":0}"#),
            &mut screen,
        )
        .unwrap();
    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"final","text":"I want to wreck a nice beach","replace_from":0}"#),
            &mut screen,
        )
        .unwrap();

    assert_eq!(screen.text, "I want to wreck a nice beach");
    // The shared prefix "I want to " survives untouched
    assert_eq!(screen.backspaces, "recognize speech".len());
}

#[test]
fn finals_accumulate_and_later_events_cannot_rewrite_them() {
    let mut state = InjectionState::new();
    let mut screen = Screen::default();

    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"final","text":"first sentence. ","replace_from":0}"#),
            &mut screen,
        )
        .unwrap();
    // A confused backend targets offset 0; the clamp turns it into an append
    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"interim","text":"second","replace_from":0}"#),
            &mut screen,
        )
        .unwrap();

    assert!(screen.text.starts_with("first sentence. "));
    assert_eq!(screen.text, "first sentence. second");
}

#[test]
fn reconnect_freezes_pending_interims() {
    let mut state = InjectionState::new();
    let mut screen = Screen::default();

    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"interim","text":"left hanging","replace_from":0}"#),
            &mut screen,
        )
        .unwrap();

    // Connection drop: the interim can never be revised now
    state.freeze();

    state
        .apply(
            &wire(r#"{"type":"transcript","kind":"final","text":" and more","replace_from":12}"#),
            &mut screen,
        )
        .unwrap();

    assert_eq!(screen.text, "left hanging and more");
    assert_eq!(screen.backspaces, 0);
}

#[test]
fn session_lifecycle_stays_serialized_under_rapid_hotkeys() {
    let mut machine = SessionMachine::new(ActivationMode::TapTap);

    assert_eq!(
        machine.on_hotkey(HotkeyEvent::Pressed),
        Some(Transition::StartSession)
    );
    assert_eq!(
        machine.on_hotkey(HotkeyEvent::Pressed),
        Some(Transition::StopSession)
    );

    // Hammering the key while teardown is in flight starts nothing
    for _ in 0..5 {
        assert_eq!(machine.on_hotkey(HotkeyEvent::Pressed), None);
    }
    assert_eq!(machine.state(), SessionState::Stopping);

    machine.stop_complete();
    assert_eq!(
        machine.on_hotkey(HotkeyEvent::Pressed),
        Some(Transition::StartSession)
    );
}

#[tokio::test]
async fn frames_reach_the_stream_side_in_capture_order() {
    let (capture_tx, mut capture_rx) = mpsc::channel::<AudioFrame>(8);
    let (stream_tx, mut stream_rx) = mpsc::channel::<AudioFrame>(8);

    // Same shape as the daemon's frame pump: forward one at a time
    // until capture closes, never batching or reordering
    let pump = tokio::spawn(async move {
        while let Some(frame) = capture_rx.recv().await {
            if stream_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let producer = tokio::spawn(async move {
        for seq in 0..200u64 {
            capture_tx
                .send(AudioFrame {
                    seq,
                    pcm: vec![0; 320],
                })
                .await
                .unwrap();
        }
        // capture_tx drops here: end of audio
    });

    let mut next = 0u64;
    while let Some(frame) = stream_rx.recv().await {
        assert_eq!(frame.seq, next, "frame left capture order");
        next += 1;
    }
    assert_eq!(next, 200);
    producer.await.unwrap();
    pump.await.unwrap();
}

#[test]
fn transcript_kind_round_trips_through_wire_tags() {
    let interim = wire(r#"{"type":"transcript","kind":"interim","text":"x","replace_from":0}"#);
    assert_eq!(interim.kind, TranscriptKind::Interim);
    let final_ = wire(r#"{"type":"transcript","kind":"final","text":"x","replace_from":0}"#);
    assert_eq!(final_.kind, TranscriptKind::Final);
}
