//! Streaming speech-to-text client
//!
//! Owns one bidirectional websocket per session: JSON control messages
//! travel as text frames, raw s16le audio as binary frames. The backend
//! answers with transcript events tagged `interim` or `final`, each
//! carrying the character offset in the session transcript that its text
//! replaces.

pub mod stream;

use crate::config::SttConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a transcript event may still be revised by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    /// Provisional text; a later event covering the same range supersedes it
    Interim,
    /// Committed text the backend will not revise
    Final,
}

/// One recognition result from the backend.
///
/// `replace_from` is a character offset into the session transcript:
/// everything at or after it is superseded by `text`. Offsets are
/// rebased by the stream client across reconnects, so consumers always
/// see session-absolute positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    pub replace_from: usize,
}

/// Events forwarded to the injector, in backend-emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    Transcript(TranscriptEvent),
    /// The connection dropped and was re-established. Text already
    /// produced can no longer be revised by the new connection.
    Reconnected,
}

/// Control messages sent to the backend as websocket text frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage<'a> {
    /// Handshake: credential + audio format negotiation
    Start {
        api_key: &'a str,
        encoding: &'a str,
        sample_rate: u32,
        language: &'a str,
    },
    /// End-of-audio signal; the backend flushes and replies with `done`
    Stop,
}

/// Messages received from the backend as websocket text frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; audio may flow
    Ready,
    Transcript {
        kind: TranscriptKind,
        text: String,
        #[serde(default)]
        replace_from: usize,
    },
    /// All outstanding transcripts have been flushed after `stop`
    Done,
    Error {
        code: String,
        message: String,
    },
}

/// Delay before reconnect attempt `attempt` (1-based): exponential from
/// `initial_backoff_ms`, doubling, capped at `max_backoff_ms`.
pub fn backoff_delay(config: &SttConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded_exponential() {
        let config = SttConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(2000));
        // Capped at max_backoff_ms from here on
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 50), Duration::from_millis(4000));
    }

    #[test]
    fn test_start_message_wire_shape() {
        let msg = ClientMessage::Start {
            api_key: "secret",
            encoding: "linear16",
            sample_rate: 16000,
            language: "en",
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["encoding"], "linear16");
        assert_eq!(json["sample_rate"], 16000);
    }

    #[test]
    fn test_stop_message_wire_shape() {
        let json = serde_json::to_string(&ClientMessage::Stop).unwrap();
        assert_eq!(json, r#"{"type":"stop"}"#);
    }

    #[test]
    fn test_parse_transcript_event() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"transcript","kind":"interim","text":"hello","replace_from":3}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Transcript {
                kind,
                text,
                replace_from,
            } => {
                assert_eq!(kind, TranscriptKind::Interim);
                assert_eq!(text, "hello");
                assert_eq!(replace_from, 3);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_transcript_defaults_replace_from() {
        // Backends may omit replace_from for plain appends
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"transcript","kind":"final","text":"hi"}"#).unwrap();
        match msg {
            ServerMessage::Transcript { replace_from, .. } => assert_eq!(replace_from, 0),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ready_done_error() {
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"ready"}"#).unwrap(),
            ServerMessage::Ready
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"done"}"#).unwrap(),
            ServerMessage::Done
        ));
        match serde_json::from_str::<ServerMessage>(
            r#"{"type":"error","code":"quota","message":"monthly limit reached"}"#,
        )
        .unwrap()
        {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, "quota");
                assert_eq!(message, "monthly limit reached");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
