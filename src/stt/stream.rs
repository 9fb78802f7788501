//! Websocket session driver for the streaming STT backend
//!
//! One driver task per session. It forwards audio frames in capture
//! order, parses transcript events and forwards them in receipt order,
//! and handles mid-session connection drops with bounded exponential
//! reconnect. On clean stop it sends the end-of-audio signal and waits
//! for the backend's `done` acknowledgment so trailing finals are never
//! lost.

use super::{backoff_delay, ClientMessage, ServerMessage, SttEvent, TranscriptEvent};
use crate::audio::AudioFrame;
use crate::config::SttConfig;
use crate::error::SttError;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maximum wait for the `ready` handshake reply.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum wait for the post-stop flush (`done` acknowledgment).
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A live streaming session.
///
/// Send captured frames into `frames` (dropping the sender signals
/// end-of-audio), read transcript events from `events`, and await
/// `handle` for the session outcome once audio has ended.
pub struct SttSession {
    pub frames: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<SttEvent>,
    pub handle: JoinHandle<Result<(), SttError>>,
}

/// Open the connection, perform the handshake, and spawn the driver.
///
/// Handshake failures (bad endpoint, rejected credential) surface here,
/// before any audio flows, so the daemon can treat them as session-start
/// failures.
pub async fn start_session(
    config: &SttConfig,
    sample_rate: u32,
    api_key: &str,
) -> Result<SttSession, SttError> {
    let ws = open(config, sample_rate, api_key).await?;

    let (frame_tx, frame_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(64);

    let driver = Driver {
        config: config.clone(),
        sample_rate,
        api_key: api_key.to_string(),
        events: event_tx,
        transcript_chars: 0,
        rebase: 0,
    };

    let handle = tokio::spawn(driver.run(ws, frame_rx));

    Ok(SttSession {
        frames: frame_tx,
        events: event_rx,
        handle,
    })
}

/// Connect and perform the credential + format handshake.
async fn open(config: &SttConfig, sample_rate: u32, api_key: &str) -> Result<WsStream, SttError> {
    let (mut ws, _) = connect_async(config.endpoint.as_str())
        .await
        .map_err(|e| SttError::BadEndpoint(config.endpoint.clone(), e.to_string()))?;

    let start = ClientMessage::Start {
        api_key,
        encoding: "linear16",
        sample_rate,
        language: &config.language,
    };
    let payload = serde_json::to_string(&start)
        .map_err(|e| SttError::Protocol(format!("encoding handshake: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| SttError::Websocket(e.to_string()))?;

    // Await `ready`, tolerating control frames in between
    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| SttError::Protocol("handshake timed out".into()))?;

        match msg {
            Some(Ok(Message::Text(txt))) => match parse_server_message(txt.as_str())? {
                ServerMessage::Ready => return Ok(ws),
                ServerMessage::Error { code, message } => {
                    return Err(classify_backend_error(code, message));
                }
                other => {
                    return Err(SttError::Protocol(format!(
                        "expected ready, got {:?}",
                        other
                    )))
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => {
                return Err(SttError::Protocol(format!(
                    "unexpected frame during handshake: {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(SttError::Websocket(e.to_string())),
            None => return Err(SttError::Websocket("connection closed in handshake".into())),
        }
    }
}

fn parse_server_message(txt: &str) -> Result<ServerMessage, SttError> {
    serde_json::from_str(txt)
        .map_err(|e| SttError::Protocol(format!("bad server message {:?}: {}", txt, e)))
}

fn classify_backend_error(code: String, message: String) -> SttError {
    if code == "auth" || code == "unauthorized" {
        SttError::AuthRejected(message)
    } else {
        SttError::Backend { code, message }
    }
}

/// What a received websocket message means for the driver loop.
enum Incoming {
    Continue,
    Done,
    ConnectionLost(String),
}

struct Driver {
    config: SttConfig,
    sample_rate: u32,
    api_key: String,
    events: mpsc::Sender<SttEvent>,
    /// Characters of session transcript produced so far (absolute).
    transcript_chars: usize,
    /// Offset added to backend-relative replace offsets. Bumped to the
    /// current transcript length on every reconnect, because a fresh
    /// connection starts its own revision context at zero.
    rebase: usize,
}

impl Driver {
    async fn run(
        mut self,
        mut ws: WsStream,
        mut frames: mpsc::Receiver<AudioFrame>,
    ) -> Result<(), SttError> {
        let mut expected_seq = 0u64;

        // Phase 1: stream audio while forwarding transcript events
        loop {
            tokio::select! {
                maybe_frame = frames.recv() => {
                    let Some(frame) = maybe_frame else {
                        break; // capture stopped: move to the flush phase
                    };

                    if frame.seq != expected_seq {
                        tracing::warn!(
                            "Audio frame out of sequence: got {}, expected {}",
                            frame.seq,
                            expected_seq
                        );
                    }
                    expected_seq = frame.seq + 1;

                    let payload = frame.to_le_bytes();
                    if let Err(e) = ws.send(Message::Binary(payload.clone().into())).await {
                        ws = self.reconnect(e.to_string()).await?;
                        // One retry on the fresh connection; losing the
                        // session here means the budget was just spent.
                        ws.send(Message::Binary(payload.into()))
                            .await
                            .map_err(|e| SttError::Websocket(e.to_string()))?;
                    }
                }

                msg = ws.next() => {
                    match self.handle_incoming(msg).await? {
                        Incoming::Continue => {}
                        Incoming::Done => {
                            return Err(SttError::Protocol(
                                "backend sent done before end-of-audio".into(),
                            ));
                        }
                        Incoming::ConnectionLost(reason) => {
                            ws = self.reconnect(reason).await?;
                        }
                    }
                }
            }
        }

        // Phase 2: end-of-audio, then bounded wait for the final flush
        let stop = serde_json::to_string(&ClientMessage::Stop)
            .map_err(|e| SttError::Protocol(format!("encoding stop: {}", e)))?;
        ws.send(Message::Text(stop.into()))
            .await
            .map_err(|e| SttError::Websocket(e.to_string()))?;

        tracing::debug!("End-of-audio sent, waiting for flush");

        match tokio::time::timeout(FLUSH_TIMEOUT, self.drain(&mut ws)).await {
            Ok(result) => result,
            Err(_) => Err(SttError::FlushTimeout),
        }
    }

    /// Read until the backend acknowledges the stop with `done`.
    async fn drain(&mut self, ws: &mut WsStream) -> Result<(), SttError> {
        loop {
            let msg = ws.next().await;
            match self.handle_incoming(msg).await? {
                Incoming::Continue => {}
                Incoming::Done => {
                    let _ = ws.close(None).await;
                    tracing::debug!("Backend flush complete");
                    return Ok(());
                }
                Incoming::ConnectionLost(reason) => {
                    // A connection lost after end-of-audio cannot be
                    // resumed; trailing finals are gone.
                    return Err(SttError::Websocket(reason));
                }
            }
        }
    }

    async fn handle_incoming(
        &mut self,
        msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Result<Incoming, SttError> {
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Ok(Incoming::ConnectionLost(e.to_string())),
            None => return Ok(Incoming::ConnectionLost("connection closed".into())),
        };

        match msg {
            Message::Text(txt) => match parse_server_message(txt.as_str())? {
                ServerMessage::Transcript {
                    kind,
                    text,
                    replace_from,
                } => {
                    let event = self.rebase_event(kind, text, replace_from);
                    // Bounded queue: backpressure, never dropped events.
                    // A closed receiver means the daemon is tearing the
                    // session down; nothing left to deliver to.
                    let _ = self.events.send(SttEvent::Transcript(event)).await;
                    Ok(Incoming::Continue)
                }
                ServerMessage::Done => Ok(Incoming::Done),
                ServerMessage::Error { code, message } => {
                    Err(classify_backend_error(code, message))
                }
                ServerMessage::Ready => {
                    tracing::warn!("Unexpected ready outside handshake, ignoring");
                    Ok(Incoming::Continue)
                }
            },
            Message::Close(_) => Ok(Incoming::ConnectionLost("server closed connection".into())),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Incoming::Continue),
            Message::Binary(_) => {
                tracing::warn!("Unexpected binary frame from backend, ignoring");
                Ok(Incoming::Continue)
            }
        }
    }

    /// Convert a backend-relative replace offset to a session-absolute
    /// one and track the resulting transcript length.
    fn rebase_event(
        &mut self,
        kind: super::TranscriptKind,
        text: String,
        replace_from: usize,
    ) -> TranscriptEvent {
        let mut from = self.rebase.saturating_add(replace_from);
        if from > self.transcript_chars {
            tracing::warn!(
                "Transcript replace offset {} beyond transcript length {}, clamping",
                from,
                self.transcript_chars
            );
            from = self.transcript_chars;
        }
        self.transcript_chars = from + text.chars().count();
        TranscriptEvent {
            kind,
            text,
            replace_from: from,
        }
    }

    /// Re-establish the connection with bounded exponential backoff.
    async fn reconnect(&mut self, reason: String) -> Result<WsStream, SttError> {
        tracing::warn!("STT connection lost ({}), reconnecting", reason);

        // The new connection starts a fresh revision context; everything
        // produced so far is frozen.
        self.rebase = self.transcript_chars;

        let mut last = reason;
        for attempt in 1..=self.config.max_retries {
            let delay = backoff_delay(&self.config, attempt);
            tracing::debug!(
                "Reconnect attempt {}/{} in {:?}",
                attempt,
                self.config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;

            match open(&self.config, self.sample_rate, &self.api_key).await {
                Ok(ws) => {
                    tracing::info!("STT connection re-established (attempt {})", attempt);
                    let _ = self.events.send(SttEvent::Reconnected).await;
                    return Ok(ws);
                }
                // A rejected credential will not get better with retries
                Err(e @ SttError::AuthRejected(_)) => return Err(e),
                Err(e) => last = e.to_string(),
            }
        }

        Err(SttError::RetriesExhausted {
            attempts: self.config.max_retries,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::TranscriptKind;

    fn driver() -> Driver {
        let (events, _rx) = mpsc::channel(8);
        Driver {
            config: SttConfig::default(),
            sample_rate: 16000,
            api_key: "test".into(),
            events,
            transcript_chars: 0,
            rebase: 0,
        }
    }

    #[test]
    fn test_rebase_tracks_transcript_length() {
        let mut d = driver();
        let e = d.rebase_event(TranscriptKind::Interim, "hel".into(), 0);
        assert_eq!(e.replace_from, 0);
        assert_eq!(d.transcript_chars, 3);

        let e = d.rebase_event(TranscriptKind::Final, "hello".into(), 0);
        assert_eq!(e.replace_from, 0);
        assert_eq!(d.transcript_chars, 5);

        let e = d.rebase_event(TranscriptKind::Interim, " world".into(), 5);
        assert_eq!(e.replace_from, 5);
        assert_eq!(d.transcript_chars, 11);
    }

    #[test]
    fn test_rebase_applies_after_reconnect() {
        let mut d = driver();
        d.rebase_event(TranscriptKind::Final, "hello".into(), 0);

        // Reconnect freezes the prior text
        d.rebase = d.transcript_chars;

        // The fresh connection emits offsets relative to its own start
        let e = d.rebase_event(TranscriptKind::Interim, " there".into(), 0);
        assert_eq!(e.replace_from, 5);
        assert_eq!(d.transcript_chars, 11);
    }

    #[test]
    fn test_out_of_range_offset_clamped_to_append() {
        let mut d = driver();
        d.rebase_event(TranscriptKind::Final, "hi".into(), 0);
        let e = d.rebase_event(TranscriptKind::Final, "!".into(), 40);
        assert_eq!(e.replace_from, 2);
        assert_eq!(d.transcript_chars, 3);
    }
}
