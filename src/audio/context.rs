//! Audio context: the shared handle used to decode assets and start sources.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

use super::decode;
use crate::sfx::SfxError;

/// Sample layout of an audio destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Decoded, playable audio: interleaved i16 PCM in the context's format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u32,
    pub samples: Vec<i16>,
}

#[cfg(test)]
impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Where started sources are played.
///
/// Implementations must not block in `start`; playback happens elsewhere
/// (e.g. a dedicated audio thread).
pub trait PlaybackSink: Send + Sync {
    fn format(&self) -> OutputFormat;

    /// Start a one-shot source for `buffer` immediately.
    fn start(&self, buffer: Arc<AudioBuffer>);
}

/// One audio context per player. Every decoded buffer is converted to the
/// destination format, so sources can be handed to the sink as-is.
pub struct AudioContext {
    format: OutputFormat,
    destination: Arc<dyn PlaybackSink>,
}

impl AudioContext {
    pub fn new(destination: Arc<dyn PlaybackSink>) -> Result<Self, SfxError> {
        let format = destination.format();
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(SfxError::NoAudio(format!(
                "destination reports {}Hz/{}ch",
                format.sample_rate, format.channels
            )));
        }
        Ok(Self {
            format,
            destination,
        })
    }

    /// Decode an encoded payload on the blocking pool.
    pub async fn decode_audio_data(&self, data: Bytes) -> Result<AudioBuffer> {
        let format = self.format;
        tokio::task::spawn_blocking(move || decode::decode_audio_data(data, format)).await?
    }

    /// Create a one-shot source bound to `buffer`, connect it to the
    /// destination and start it with no delay.
    pub fn start_buffer(&self, buffer: &Arc<AudioBuffer>) {
        self.destination.start(Arc::clone(buffer));
    }
}
