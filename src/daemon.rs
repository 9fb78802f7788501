//! Main daemon orchestration for voxkey
//!
//! Owns the long-lived pieces (hotkey listener, virtual keyboard, state
//! file) and runs the session lifecycle: a hotkey transition opens the
//! STT stream, then capture, and wires three tasks together (frame pump,
//! stream driver, injector); the stop transition tears them down in
//! order so trailing audio and final transcripts are never lost.

use crate::audio::{self, AudioCapture};
use crate::config::Config;
use crate::error::{InjectError, Result, SttError, VoxkeyError};
use crate::hotkey;
use crate::inject::{self, KeySink};
use crate::session::{Session, SessionMachine, SessionState, Transition};
use crate::stt::{stream, SttEvent, TranscriptKind};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A session's live plumbing.
struct ActiveSession {
    session: Session,
    capture: Box<dyn AudioCapture>,
    /// Pumps capture frames into the stream; ends when capture closes.
    pump: JoinHandle<()>,
    /// The websocket driver; resolves after the post-stop flush.
    driver: JoinHandle<std::result::Result<(), SttError>>,
    /// Applies transcript events as keystrokes; returns the sink.
    injector: JoinHandle<(Box<dyn KeySink>, std::result::Result<String, InjectError>)>,
    /// Absolute safety limit for the session.
    deadline: tokio::time::Instant,
}

/// Why the session-owned tasks woke the main loop.
enum SessionWake {
    DriverDone(std::result::Result<(), SttError>),
    DeadlineReached,
}

pub struct Daemon {
    config: Config,
    machine: SessionMachine,
    /// Parked between sessions; taken by the injector while one runs.
    sink: Option<Box<dyn KeySink>>,
    state_file: Option<PathBuf>,
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: Config, sink: Box<dyn KeySink>) -> Result<()> {
    let machine = SessionMachine::new(config.hotkey.mode);
    let state_file = config.resolve_state_file();
    let mut daemon = Daemon {
        config,
        machine,
        sink: Some(sink),
        state_file,
    };
    daemon.run().await
}

impl Daemon {
    async fn run(&mut self) -> Result<()> {
        let mut listener = hotkey::create_listener(&self.config.hotkey)?;
        let mut hotkeys = listener.start().await?;

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

        self.write_state(SessionState::Idle);
        tracing::info!(
            "voxkey ready: {} ({:?} mode), endpoint {}",
            self.config.hotkey.key,
            self.config.hotkey.mode,
            self.config.stt.endpoint
        );

        let mut active: Option<ActiveSession> = None;

        loop {
            tokio::select! {
                maybe_event = hotkeys.recv() => {
                    let Some(event) = maybe_event else {
                        tracing::error!("Hotkey listener stopped unexpectedly");
                        break;
                    };
                    match self.machine.on_hotkey(event) {
                        Some(Transition::StartSession) => {
                            match self.start_session().await {
                                Ok(s) => {
                                    active = Some(s);
                                    self.write_state(SessionState::Recording);
                                }
                                Err(e) => {
                                    tracing::error!("Session start failed: {}", e);
                                    self.machine.abort_start();
                                }
                            }
                        }
                        Some(Transition::StopSession) => {
                            self.write_state(SessionState::Stopping);
                            if let Some(s) = active.take() {
                                self.finish_session(s, None, None).await;
                            }
                            drain_hotkeys(&mut hotkeys);
                            self.machine.stop_complete();
                            self.write_state(SessionState::Idle);
                        }
                        None => {}
                    }
                }

                wake = session_wake(&mut active), if active.is_some() => {
                    match wake {
                        SessionWake::DriverDone(result) => {
                            let annotation = match &result {
                                Ok(()) => "stream ended unexpectedly".to_string(),
                                Err(e) => e.to_string(),
                            };
                            tracing::error!("STT stream died mid-session: {}", annotation);
                            self.machine.force_stopping();
                            self.write_state(SessionState::Stopping);
                            if let Some(s) = active.take() {
                                self.finish_session(s, Some(result), Some(annotation)).await;
                            }
                        }
                        SessionWake::DeadlineReached => {
                            tracing::warn!(
                                "Maximum session duration ({}s) reached, stopping",
                                self.config.audio.max_duration_secs
                            );
                            self.machine.force_stopping();
                            self.write_state(SessionState::Stopping);
                            if let Some(s) = active.take() {
                                self.finish_session(s, None, None).await;
                            }
                        }
                    }
                    drain_hotkeys(&mut hotkeys);
                    self.machine.stop_complete();
                    self.write_state(SessionState::Idle);
                }

                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    break;
                }
            }
        }

        if let Some(s) = active.take() {
            self.write_state(SessionState::Stopping);
            self.finish_session(s, None, Some("daemon shutdown".into())).await;
        }
        if let Err(e) = listener.stop().await {
            tracing::warn!("Hotkey listener shutdown: {}", e);
        }
        self.remove_state_file();
        tracing::info!("voxkey stopped");
        Ok(())
    }

    /// Open stream then capture, and wire the session tasks together.
    ///
    /// The stream handshake comes first so a bad endpoint or rejected
    /// credential fails the session before the microphone is touched.
    async fn start_session(&mut self) -> Result<ActiveSession> {
        let api_key = self.config.api_key().ok_or_else(|| {
            VoxkeyError::Stt(SttError::MissingCredential(
                self.config.stt.api_key_env.clone(),
            ))
        })?;

        let stt = stream::start_session(&self.config.stt, self.config.audio.sample_rate, &api_key)
            .await
            .map_err(VoxkeyError::Stt)?;

        let mut capture = audio::create_capture(&self.config.audio)?;
        let mut frames = capture.start().await?;

        let sink = self.sink.take().ok_or_else(|| {
            VoxkeyError::Inject(InjectError::DeviceWrite(
                "virtual keyboard was lost by a previous session".into(),
            ))
        })?;

        let frame_tx = stt.frames;
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame_tx.send(frame).await.is_err() {
                    tracing::warn!("STT stream closed with audio frames pending");
                    break;
                }
            }
            // frame_tx drops here: end-of-audio for the driver
        });

        let events = stt.events;
        let injector = tokio::task::spawn_blocking(move || inject::run_injector(events, sink));

        let session = Session::new();
        tracing::info!(session = %session.id, "Session started");

        Ok(ActiveSession {
            session,
            capture,
            pump,
            driver: stt.handle,
            injector,
            deadline: tokio::time::Instant::now()
                + Duration::from_secs(self.config.audio.max_duration_secs.into()),
        })
    }

    /// Tear a session down in dependency order: stop capture (closing
    /// the frame channel), wait for the pump, the driver's flush, and
    /// the injector's drain. `driver_result` is passed in when the
    /// driver already resolved (mid-session failure).
    async fn finish_session(
        &mut self,
        mut s: ActiveSession,
        driver_result: Option<std::result::Result<(), SttError>>,
        annotation: Option<String>,
    ) {
        if let Err(e) = s.capture.stop().await {
            tracing::warn!(session = %s.session.id, "Audio capture stop: {}", e);
        }
        if let Err(e) = s.pump.await {
            tracing::warn!(session = %s.session.id, "Frame pump task failed: {}", e);
        }

        let driver_result = match driver_result {
            Some(r) => r,
            None => flatten_driver(s.driver.await),
        };
        if let Err(e) = &driver_result {
            tracing::error!(session = %s.session.id, "STT stream: {}", e);
            s.session.error = Some(e.to_string());
        }

        match s.injector.await {
            Ok((sink, result)) => {
                self.sink = Some(sink);
                match result {
                    Ok(text) => {
                        s.session.transcript = text;
                    }
                    Err(e) => {
                        tracing::error!(session = %s.session.id, "Injection: {}", e);
                        s.session.error.get_or_insert_with(|| e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::error!(session = %s.session.id, "Injector task failed: {}", e);
            }
        }

        if let Some(note) = annotation {
            s.session.error.get_or_insert(note);
        }

        let elapsed = chrono::Utc::now() - s.session.started_at;
        match &s.session.error {
            None => tracing::info!(
                session = %s.session.id,
                "Session finished: {} chars in {}s",
                s.session.transcript.chars().count(),
                elapsed.num_seconds()
            ),
            Some(err) => tracing::warn!(
                session = %s.session.id,
                "Session finished with error after {}s: {}",
                elapsed.num_seconds(),
                err
            ),
        }
    }

    /// Publish the session state for external integrations (Waybar etc).
    /// Failures are logged, never fatal.
    fn write_state(&self, state: SessionState) {
        let Some(path) = &self.state_file else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, format!("{}\n", state)) {
            tracing::warn!("Could not write state file {:?}: {}", path, e);
        }
    }

    fn remove_state_file(&self) {
        if let Some(path) = &self.state_file {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Discard hotkey presses that queued up while a session was tearing
/// down. Teardown blocks the select loop (capture stop plus the stream
/// flush can take seconds), so a second tap of a double-tap stop sits
/// in the channel past the machine's debounce and would otherwise be
/// read as a fresh activation once the machine is idle again.
fn drain_hotkeys(hotkeys: &mut tokio::sync::mpsc::Receiver<hotkey::HotkeyEvent>) {
    let mut drained = 0u32;
    while hotkeys.try_recv().is_ok() {
        drained += 1;
    }
    if drained > 0 {
        tracing::debug!("Discarded {} hotkey event(s) buffered during teardown", drained);
    }
}

/// Wait for whichever session-owned wakeup comes first. Pends forever
/// when no session is active (the select arm is gated on that too).
async fn session_wake(active: &mut Option<ActiveSession>) -> SessionWake {
    match active.as_mut() {
        Some(s) => tokio::select! {
            result = &mut s.driver => SessionWake::DriverDone(flatten_driver(result)),
            _ = tokio::time::sleep_until(s.deadline) => SessionWake::DeadlineReached,
        },
        None => std::future::pending().await,
    }
}

fn flatten_driver(
    result: std::result::Result<std::result::Result<(), SttError>, tokio::task::JoinError>,
) -> std::result::Result<(), SttError> {
    match result {
        Ok(r) => r,
        Err(e) => Err(SttError::Websocket(format!("driver task failed: {}", e))),
    }
}

/// `voxkey test-audio`: capture a few seconds and report levels, with
/// no network or injection involved.
pub async fn run_test_audio(config: &Config) -> Result<()> {
    let mut capture = audio::create_capture(&config.audio)?;
    let mut frames = capture.start().await?;

    println!(
        "Capturing 3 seconds from '{}' at {} Hz...",
        config.audio.device, config.audio.sample_rate
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut frame_count: u64 = 0;
    let mut sample_count: u64 = 0;
    let mut peak: i32 = 0;
    let mut sum_squares: f64 = 0.0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            maybe_frame = frames.recv() => {
                let Some(frame) = maybe_frame else { break };
                frame_count += 1;
                sample_count += frame.pcm.len() as u64;
                for &s in &frame.pcm {
                    peak = peak.max((s as i32).abs());
                    sum_squares += (s as f64) * (s as f64);
                }
            }
        }
    }
    capture.stop().await?;

    if sample_count == 0 {
        println!("No audio captured. Is the microphone muted or in use?");
        return Ok(());
    }

    let rms = (sum_squares / sample_count as f64).sqrt();
    println!("Captured {} frames ({} samples)", frame_count, sample_count);
    println!(
        "Peak level: {:.1}%  RMS level: {:.1}%",
        peak as f64 / 327.67,
        rms / 327.67
    );
    Ok(())
}

/// `voxkey test-stt`: one full capture → stream → inject session
/// without the hotkey. Runs until Ctrl-C, then flushes and reports.
pub async fn run_test_stt(config: &Config, sink: Box<dyn KeySink>) -> Result<()> {
    let api_key = config.api_key().ok_or_else(|| {
        VoxkeyError::Stt(SttError::MissingCredential(config.stt.api_key_env.clone()))
    })?;

    println!("Connecting to {}...", config.stt.endpoint);
    let session = stream::start_session(&config.stt, config.audio.sample_rate, &api_key)
        .await
        .map_err(VoxkeyError::Stt)?;
    println!("Handshake accepted");

    let mut capture = audio::create_capture(&config.audio)?;
    let mut frames = capture.start().await?;

    let frame_tx = session.frames;
    let pump = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if frame_tx.send(frame).await.is_err() {
                break;
            }
        }
    });
    let injector = tokio::task::spawn_blocking(move || inject::run_injector(session.events, sink));

    println!("Dictating into the focused window. Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    capture.stop().await?;
    let _ = pump.await;
    flatten_driver(session.handle.await).map_err(VoxkeyError::Stt)?;

    match injector.await {
        Ok((_, Ok(text))) => {
            println!("Injected {} characters. Pipeline is usable.", text.chars().count());
            Ok(())
        }
        Ok((_, Err(e))) => Err(VoxkeyError::Inject(e)),
        Err(e) => Err(VoxkeyError::Inject(InjectError::DeviceWrite(format!(
            "injector task failed: {}",
            e
        )))),
    }
}

/// `voxkey debug-stt`: stream the microphone and print transcript
/// events to stdout instead of injecting them. Ctrl-C stops.
pub async fn run_debug_stt(config: &Config) -> Result<()> {
    let api_key = config.api_key().ok_or_else(|| {
        VoxkeyError::Stt(SttError::MissingCredential(config.stt.api_key_env.clone()))
    })?;

    let session = stream::start_session(&config.stt, config.audio.sample_rate, &api_key)
        .await
        .map_err(VoxkeyError::Stt)?;

    let mut capture = audio::create_capture(&config.audio)?;
    let mut frames = capture.start().await?;

    let frame_tx = session.frames;
    let pump = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if frame_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    println!("Streaming from '{}'. Ctrl-C to stop.", config.audio.device);
    let mut events = session.events;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(SttEvent::Transcript(e)) => {
                        let kind = match e.kind {
                            TranscriptKind::Interim => "interim",
                            TranscriptKind::Final => "final  ",
                        };
                        println!("{} @{:<4} {:?}", kind, e.replace_from, e.text);
                    }
                    Some(SttEvent::Reconnected) => println!("-- reconnected --"),
                    None => break,
                }
            }
        }
    }

    capture.stop().await?;
    let _ = pump.await;
    while events.recv().await.is_some() {}
    flatten_driver(session.handle.await).map_err(VoxkeyError::Stt)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivationMode;
    use crate::hotkey::HotkeyEvent;

    #[tokio::test]
    async fn test_double_tap_stop_does_not_start_a_new_session() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let mut machine = SessionMachine::new(ActivationMode::TapTap);

        assert_eq!(
            machine.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StartSession)
        );
        assert_eq!(
            machine.on_hotkey(HotkeyEvent::Pressed),
            Some(Transition::StopSession)
        );

        // The second tap of a double-tap stop lands while teardown is
        // still awaiting the stream flush, so it buffers in the channel
        // instead of reaching the machine's debounce
        tx.send(HotkeyEvent::Pressed).await.unwrap();
        tx.send(HotkeyEvent::Pressed).await.unwrap();

        drain_hotkeys(&mut rx);
        machine.stop_complete();

        // Nothing buffered survives to replay against the idle machine
        assert!(rx.try_recv().is_err());
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_drain_on_empty_channel_is_a_noop() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<HotkeyEvent>(32);
        drain_hotkeys(&mut rx);
        tx.send(HotkeyEvent::Pressed).await.unwrap();
        assert_eq!(rx.try_recv(), Ok(HotkeyEvent::Pressed));
    }
}
