//! Audio capture module
//!
//! Captures the microphone via cpal (PipeWire, PulseAudio, ALSA) and
//! produces a live sequence of fixed-duration PCM frames for the STT
//! stream. The frame channel closes when capture stops, which is the
//! end-of-audio signal for the rest of the pipeline.

pub mod cpal_capture;

use crate::config::AudioConfig;
use crate::error::AudioError;
use tokio::sync::mpsc;

/// One fixed-duration PCM buffer (s16le, mono, at the configured rate).
///
/// Sequence numbers increase strictly from 0 within a session, so frame
/// ordering is checkable at every hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub seq: u64,
    pub pcm: Vec<i16>,
}

impl AudioFrame {
    /// Encode the frame payload as little-endian bytes for the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pcm.len() * 2);
        for &sample in &self.pcm {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Trait for audio capture implementations
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Start capturing audio.
    /// Returns a channel receiver for frames; the channel closes when
    /// capture stops.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError>;

    /// Stop capturing. The frame channel drains its remaining frames and
    /// then closes.
    async fn stop(&mut self) -> Result<(), AudioError>;
}

/// Factory function to create audio capture
pub fn create_capture(config: &AudioConfig) -> Result<Box<dyn AudioCapture>, AudioError> {
    Ok(Box::new(cpal_capture::CpalCapture::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_le_encoding() {
        let frame = AudioFrame {
            seq: 0,
            pcm: vec![0x0102, -2],
        };
        assert_eq!(frame.to_le_bytes(), vec![0x02, 0x01, 0xFE, 0xFF]);
    }
}
