//! Text injection module
//!
//! Turns transcript events into synthetic keystrokes. The screen is
//! treated as an editable buffer: interim results may be revised by
//! backspacing and retyping, text confirmed by a final result is frozen
//! and never deleted, whatever offsets the backend sends afterwards.

#[cfg(target_os = "linux")]
pub mod keymap;
#[cfg(target_os = "linux")]
pub mod uinput;

use crate::error::InjectError;
use crate::stt::{SttEvent, TranscriptEvent, TranscriptKind};
use tokio::sync::mpsc;

/// Keystroke emitter abstraction.
///
/// The production implementation writes to a uinput virtual keyboard;
/// tests substitute an in-memory recorder.
pub trait KeySink: Send {
    /// Emit the keystroke(s) for one character. Returns `false` if the
    /// character has no key mapping and was skipped.
    fn type_char(&mut self, c: char) -> Result<bool, InjectError>;

    /// Emit `count` backspace keystrokes.
    fn backspace(&mut self, count: usize) -> Result<(), InjectError>;
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    ch: char,
    /// Whether the character actually made it to the screen. Unmappable
    /// characters stay in the transcript shadow so backend offsets keep
    /// lining up, but cost no backspaces.
    typed: bool,
}

/// Mirror of the on-screen text plus the commit boundary.
///
/// `shadow` tracks the session transcript character-for-character;
/// backend `replace_from` offsets index into it. Cells below `committed`
/// belong to final results (or to text orphaned by a reconnect) and are
/// never erased.
#[derive(Debug, Default)]
pub struct InjectionState {
    shadow: Vec<Cell>,
    committed: usize,
}

impl InjectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transcript event, emitting the minimal keystrokes that
    /// converge the screen to the new text: backspace over the suffix
    /// that changed, retype from there.
    pub fn apply(
        &mut self,
        event: &TranscriptEvent,
        sink: &mut dyn KeySink,
    ) -> Result<(), InjectError> {
        let mut from = event.replace_from;
        if from < self.committed {
            tracing::warn!(
                "Backend tried to revise committed text (offset {} < {}), clamping",
                from,
                self.committed
            );
            from = self.committed;
        }
        let from = from.min(self.shadow.len());

        let mut target: Vec<char> = self.shadow[..from].iter().map(|c| c.ch).collect();
        target.extend(event.text.chars());

        // Longest common prefix; everything past it gets erased and retyped
        let mut keep = 0;
        while keep < self.shadow.len()
            && keep < target.len()
            && self.shadow[keep].ch == target[keep]
        {
            keep += 1;
        }

        let erase = self.shadow[keep..].iter().filter(|c| c.typed).count();
        if erase > 0 {
            sink.backspace(erase)?;
        }
        self.shadow.truncate(keep);

        for &ch in &target[keep..] {
            let typed = sink.type_char(ch)?;
            if !typed {
                tracing::warn!("No key mapping for {:?}, skipping", ch);
            }
            self.shadow.push(Cell { ch, typed });
        }

        if event.kind == TranscriptKind::Final {
            self.committed = self.shadow.len();
        }
        Ok(())
    }

    /// Freeze everything typed so far. Called on reconnect: the new
    /// connection cannot revise text produced by the old one.
    pub fn freeze(&mut self) {
        self.committed = self.shadow.len();
    }

    /// The session transcript as currently materialized.
    pub fn text(&self) -> String {
        self.shadow.iter().map(|c| c.ch).collect()
    }

    pub fn committed_chars(&self) -> usize {
        self.committed
    }
}

/// Injector loop: drains transcript events into the sink until the
/// event channel closes, then returns the sink (for the next session)
/// and the full session transcript.
///
/// Runs on a blocking thread (`spawn_blocking`) because sinks may sleep
/// between keystrokes.
pub fn run_injector(
    mut events: mpsc::Receiver<SttEvent>,
    mut sink: Box<dyn KeySink>,
) -> (Box<dyn KeySink>, Result<String, InjectError>) {
    let mut state = InjectionState::new();
    while let Some(event) = events.blocking_recv() {
        let applied = match event {
            SttEvent::Transcript(event) => state.apply(&event, sink.as_mut()),
            SttEvent::Reconnected => {
                state.freeze();
                Ok(())
            }
        };
        if let Err(e) = applied {
            return (sink, Err(e));
        }
    }
    (sink, Ok(state.text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records keystrokes and mirrors what a text field would show.
    #[derive(Default)]
    struct RecordingSink {
        screen: String,
        backspaces: usize,
        typed: usize,
        unmappable: Vec<char>,
    }

    impl KeySink for RecordingSink {
        fn type_char(&mut self, c: char) -> Result<bool, InjectError> {
            if c == '\u{fffd}' {
                self.unmappable.push(c);
                return Ok(false);
            }
            self.screen.push(c);
            self.typed += 1;
            Ok(true)
        }

        fn backspace(&mut self, count: usize) -> Result<(), InjectError> {
            self.backspaces += count;
            for _ in 0..count {
                self.screen.pop();
            }
            Ok(())
        }
    }

    fn interim(text: &str, from: usize) -> TranscriptEvent {
        TranscriptEvent {
            kind: TranscriptKind::Interim,
            text: text.into(),
            replace_from: from,
        }
    }

    fn final_(text: &str, from: usize) -> TranscriptEvent {
        TranscriptEvent {
            kind: TranscriptKind::Final,
            text: text.into(),
            replace_from: from,
        }
    }

    #[test]
    fn test_growing_interims_append_only() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&interim("hel", 0), &mut sink).unwrap();
        state.apply(&interim("hello wor", 0), &mut sink).unwrap();
        state.apply(&final_("hello world", 0), &mut sink).unwrap();

        assert_eq!(sink.screen, "hello world");
        // Each interim extended the previous one: no erasing needed
        assert_eq!(sink.backspaces, 0);
        assert_eq!(sink.typed, 11);
        assert_eq!(state.committed_chars(), 11);
    }

    #[test]
    fn test_revision_backspaces_only_changed_suffix() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&interim("I scream", 0), &mut sink).unwrap();
        state.apply(&final_("ice cream", 0), &mut sink).unwrap();

        assert_eq!(sink.screen, "ice cream");
        // Common prefix is "I" vs "i": nothing shared, full rewrite;
        // with a shared prefix only the tail past it is redone
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();
        state.apply(&interim("it is ran", 0), &mut sink).unwrap();
        state.apply(&final_("it is raining", 0), &mut sink).unwrap();
        assert_eq!(sink.screen, "it is raining");
        // Prefix "it is ra" survives; the trailing "n" is erased and
        // "ining" typed in its place
        assert_eq!(sink.backspaces, 1);

        let mut sink2 = RecordingSink::default();
        let mut state2 = InjectionState::new();
        state2.apply(&interim("it is rank", 0), &mut sink2).unwrap();
        state2.apply(&final_("it is raining", 0), &mut sink2).unwrap();
        assert_eq!(sink2.screen, "it is raining");
        assert_eq!(sink2.backspaces, 2); // "nk" past the shared "it is ra"
    }

    #[test]
    fn test_committed_text_never_deleted() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&final_("hello ", 0), &mut sink).unwrap();
        // Backend misbehaves: tries to rewrite from offset 0
        state.apply(&interim("goodbye", 0), &mut sink).unwrap();

        assert!(sink.screen.starts_with("hello "));
        assert_eq!(sink.screen, "hello goodbye");
    }

    #[test]
    fn test_later_events_replace_from_midpoint() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&final_("hello ", 0), &mut sink).unwrap();
        state.apply(&interim("worl", 6), &mut sink).unwrap();
        state.apply(&final_("world", 6), &mut sink).unwrap();

        assert_eq!(sink.screen, "hello world");
        assert_eq!(sink.backspaces, 0);
        assert_eq!(state.committed_chars(), 11);
    }

    #[test]
    fn test_freeze_promotes_pending_text() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&interim("hello", 0), &mut sink).unwrap();
        state.freeze();
        // Post-reconnect events cannot touch the frozen prefix
        state.apply(&interim(" there", 5), &mut sink).unwrap();
        assert_eq!(sink.screen, "hello there");

        // An offset below the boundary clamps to it, so this event
        // supersedes the pending " there" but not the frozen "hello"
        state.apply(&interim("!", 0), &mut sink).unwrap();
        assert!(sink.screen.starts_with("hello"));
        assert_eq!(sink.screen, "hello!");
        assert_eq!(sink.backspaces, " there".len());
    }

    #[test]
    fn test_unmappable_chars_skipped_without_desync() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state
            .apply(&interim("a\u{fffd}b", 0), &mut sink)
            .unwrap();
        assert_eq!(sink.screen, "ab");
        assert_eq!(sink.unmappable.len(), 1);

        // Offsets from the backend still index the full transcript
        state.apply(&final_("a\u{fffd}bc", 0), &mut sink).unwrap();
        assert_eq!(sink.screen, "abc");
        assert_eq!(sink.backspaces, 0);
        assert_eq!(state.text(), "a\u{fffd}bc");
    }

    #[test]
    fn test_replace_beyond_end_appends() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&final_("hi", 0), &mut sink).unwrap();
        state.apply(&final_("!", 99), &mut sink).unwrap();
        assert_eq!(sink.screen, "hi!");
    }

    #[test]
    fn test_empty_event_is_noop() {
        let mut state = InjectionState::new();
        let mut sink = RecordingSink::default();

        state.apply(&interim("word", 0), &mut sink).unwrap();
        state.apply(&interim("word", 0), &mut sink).unwrap();
        assert_eq!(sink.backspaces, 0);
        assert_eq!(sink.typed, 4);
    }
}
