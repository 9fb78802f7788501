//! cpal-based audio capture
//!
//! Uses the cpal crate for audio input, which works with PipeWire,
//! PulseAudio, and ALSA backends.
//!
//! Note: cpal::Stream is not Send, so the stream lives on a dedicated
//! thread and frames cross to the async side over a channel. The device
//! may run at any native rate/channel count; the callback mixes to mono,
//! resamples to the target rate, and a chunker cuts the result into
//! fixed-duration s16 frames with sequence numbers.

use super::{AudioCapture, AudioFrame};
use crate::config::AudioConfig;
use crate::error::AudioError;
use std::thread;
use tokio::sync::{mpsc, oneshot};

/// Commands sent to the audio capture thread
enum CaptureCommand {
    Stop(oneshot::Sender<()>),
}

/// Cuts an arbitrary sample stream into fixed-size frames with strictly
/// increasing sequence numbers.
struct FrameChunker {
    frame_samples: usize,
    pending: Vec<i16>,
    next_seq: u64,
}

impl FrameChunker {
    fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
            next_seq: 0,
        }
    }

    /// Append samples, returning every complete frame they produce.
    fn push(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_samples {
                frames.push(AudioFrame {
                    seq: self.next_seq,
                    pcm: std::mem::replace(
                        &mut self.pending,
                        Vec::with_capacity(self.frame_samples),
                    ),
                });
                self.next_seq += 1;
            }
        }
        frames
    }

    /// Flush the trailing partial frame, if any.
    fn finish(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let frame = AudioFrame {
            seq: self.next_seq,
            pcm: std::mem::take(&mut self.pending),
        };
        self.next_seq += 1;
        Some(frame)
    }
}

/// cpal-based audio capture implementation
pub struct CpalCapture {
    config: AudioConfig,
    cmd_tx: Option<std::sync::mpsc::Sender<CaptureCommand>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl CpalCapture {
    /// Create a new cpal audio capture instance
    pub fn new(config: &AudioConfig) -> Result<Self, AudioError> {
        Ok(Self {
            config: config.clone(),
            cmd_tx: None,
            thread_handle: None,
        })
    }
}

/// Find an audio input device by name with flexible matching.
///
/// Matching strategy (in order):
/// 1. Exact match (case-sensitive)
/// 2. Exact match (case-insensitive)
/// 3. Substring match: device name contains the search term (case-insensitive)
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .collect();

    let device_names: Vec<String> = devices.iter().filter_map(|d| d.name().ok()).collect();
    let search_lower = device_name.to_lowercase();

    let matched_name = device_names
        .iter()
        .find(|n| n.as_str() == device_name)
        .or_else(|| {
            device_names
                .iter()
                .find(|n| n.to_lowercase() == search_lower)
        })
        .or_else(|| {
            device_names
                .iter()
                .find(|n| n.to_lowercase().contains(&search_lower))
        })
        .cloned();

    if let Some(matched_name) = matched_name {
        tracing::debug!(
            "Found audio device: {} (searched for: {})",
            matched_name,
            device_name
        );
        return devices
            .into_iter()
            .find(|d| d.name().map(|n| n == matched_name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()));
    }

    // No match found - provide helpful error with available devices
    let available = if device_names.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            device_names
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(AudioError::DeviceNotFoundWithList {
        requested: device_name.to_string(),
        available,
    })
}

#[async_trait::async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();

        let device = if self.config.device == "default" {
            host.default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?
        } else {
            find_audio_device(&host, &self.config.device)?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Using audio device: {}", device_name);

        let supported_config = device
            .default_input_config()
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        let source_sample_rate = supported_config.sample_rate().0;
        let source_channels = supported_config.channels() as usize;
        let target_sample_rate = self.config.sample_rate;
        let sample_format = supported_config.sample_format();
        let frame_samples = self.config.frame_samples();

        tracing::debug!(
            "Device config: {} Hz, {} channel(s), format: {:?}; frames of {} samples at {} Hz",
            source_sample_rate,
            source_channels,
            sample_format,
            frame_samples,
            target_sample_rate
        );

        // Enough for several seconds of frames; the network side normally
        // drains far faster than capture produces.
        let (frame_tx, frame_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<CaptureCommand>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AudioError>>();

        let thread_handle = thread::spawn(move || {
            let stream_config = cpal::StreamConfig {
                channels: supported_config.channels(),
                sample_rate: supported_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };

            let err_fn = |err| tracing::error!("Audio stream error: {}", err);

            let chunker = std::sync::Arc::new(std::sync::Mutex::new(FrameChunker::new(
                frame_samples,
            )));
            let chunker_cb = chunker.clone();
            let cb_tx = frame_tx.clone();

            let params = StreamBuildParams {
                chunker: chunker_cb,
                tx: cb_tx,
                source_rate: source_sample_rate,
                target_rate: target_sample_rate,
                source_channels,
            };

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, params, err_fn),
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, params, err_fn),
                cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, params, err_fn),
                format => Err(AudioError::StreamError(format!(
                    "unsupported sample format: {:?}",
                    format
                ))),
            };

            // Build/play failures go back to start() so a busy or broken
            // device fails the session instead of closing the frame
            // channel and looking like instant end-of-audio
            let stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamError(format!(
                    "could not start stream: {}",
                    e
                ))));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            tracing::debug!("Audio capture thread started");

            // Wait for stop command
            if let Ok(CaptureCommand::Stop(response_tx)) = cmd_rx.recv() {
                drop(stream);

                // Emit the trailing partial frame so no speech is lost
                if let Ok(mut guard) = chunker.lock() {
                    if let Some(frame) = guard.finish() {
                        let _ = frame_tx.try_send(frame);
                    }
                }

                let _ = response_tx.send(());
            }

            // frame_tx drops here, closing the channel: end of audio
            tracing::debug!("Audio capture thread stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(AudioError::StreamError(
                    "capture thread exited before the stream started".to_string(),
                ));
            }
        }

        self.cmd_tx = Some(cmd_tx);
        self.thread_handle = Some(thread_handle);

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let (response_tx, response_rx) = oneshot::channel();

            if cmd_tx.send(CaptureCommand::Stop(response_tx)).is_ok() {
                match tokio::time::timeout(std::time::Duration::from_secs(2), response_rx).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        return Err(AudioError::StreamError("Capture thread exited".to_string()))
                    }
                    Err(_) => return Err(AudioError::StopTimeout(2)),
                }
            }
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        tracing::debug!("Audio capture stopped");
        Ok(())
    }
}

/// Parameters for building an audio input stream
struct StreamBuildParams {
    chunker: std::sync::Arc<std::sync::Mutex<FrameChunker>>,
    tx: mpsc::Sender<AudioFrame>,
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: StreamBuildParams,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let StreamBuildParams {
        chunker,
        tx,
        source_rate,
        target_rate,
        source_channels,
    } = params;

    let mut dropped: u64 = 0;
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Convert to f32 and mix to mono
                let mono_f32: Vec<f32> = data
                    .chunks(source_channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                            .sum();
                        sum / source_channels as f32
                    })
                    .collect();

                let resampled = if source_rate != target_rate {
                    resample(&mono_f32, source_rate, target_rate)
                } else {
                    mono_f32
                };

                let pcm: Vec<i16> = resampled
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();

                let frames = match chunker.lock() {
                    Ok(mut guard) => guard.push(&pcm),
                    Err(_) => return,
                };

                for frame in frames {
                    // The callback must never block; overflow means the
                    // network side stalled for several seconds and the
                    // dropped frames are speech that will never arrive.
                    if tx.try_send(frame).is_err() {
                        dropped += 1;
                        if drops_worth_logging(dropped) {
                            tracing::error!(
                                "Audio frame queue full: {} frame(s) dropped, speech is being lost",
                                dropped
                            );
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok(stream)
}

/// Report the first drop immediately, then every 50th, so a sustained
/// stall stays visible without flooding the log from a 20 ms callback.
fn drops_worth_logging(dropped: u64) -> bool {
    dropped == 1 || dropped % 50 == 0
}

/// Linear interpolation resampling
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_frames_in_order() {
        let mut chunker = FrameChunker::new(4);
        let frames = chunker.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[0].pcm, vec![1, 2, 3, 4]);
        assert_eq!(frames[1].seq, 1);
        assert_eq!(frames[1].pcm, vec![5, 6, 7, 8]);

        // Remainder is held until the next push or finish
        let frames = chunker.push(&[10, 11, 12]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].seq, 2);
        assert_eq!(frames[0].pcm, vec![9, 10, 11, 12]);
    }

    #[test]
    fn test_chunker_finish_flushes_partial() {
        let mut chunker = FrameChunker::new(4);
        chunker.push(&[1, 2, 3, 4, 5]);
        let tail = chunker.finish().unwrap();
        assert_eq!(tail.seq, 1);
        assert_eq!(tail.pcm, vec![5]);
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_chunker_seq_is_strictly_increasing() {
        let mut chunker = FrameChunker::new(2);
        let mut seqs = Vec::new();
        for _ in 0..10 {
            for frame in chunker.push(&[0, 0, 0]) {
                seqs.push(frame.seq);
            }
        }
        if let Some(tail) = chunker.finish() {
            seqs.push(tail.seq);
        }
        for pair in seqs.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[tokio::test]
    async fn test_start_with_unknown_device_fails_the_session_start() {
        let config = AudioConfig {
            device: "no-such-capture-device".to_string(),
            ..AudioConfig::default()
        };
        let mut capture = CpalCapture::new(&config).unwrap();
        // Fails with a device error; never panics, never hands back a
        // receiver that is already closed
        assert!(capture.start().await.is_err());
    }

    #[test]
    fn test_drop_logging_is_throttled() {
        let logged: Vec<u64> = (1..=120).filter(|&n| drops_worth_logging(n)).collect();
        assert_eq!(logged, vec![1, 50, 100]);
    }

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        let result = resample(&samples, 16000, 16000);
        assert_eq!(result, samples);
    }

    #[test]
    fn test_resample_downsample() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let result = resample(&samples, 48000, 16000);
        assert!(result.len() >= 2 && result.len() <= 4);
    }

    #[test]
    fn test_resample_upsample() {
        let samples = vec![1.0, 2.0];
        let result = resample(&samples, 8000, 16000);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_resample_empty() {
        let samples: Vec<f32> = vec![];
        let result = resample(&samples, 48000, 16000);
        assert!(result.is_empty());
    }
}
