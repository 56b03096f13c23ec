//! audio - decoding and playback of sound effects
//!
//! Decodes WAV payloads with Symphonia into the output format and plays
//! one-shot sources through ALSA.

mod alsa_device;
mod context;
mod decode;
mod mixer;
mod play;

pub use context::{AudioBuffer, AudioContext, PlaybackSink};
pub use play::{AlsaSink, PlaybackConfig};

#[cfg(test)]
pub(crate) use context::test_support::RecordingSink;
#[cfg(test)]
pub(crate) use decode::test_support::wav_bytes;
