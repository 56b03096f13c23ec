use std::sync::Arc;

use super::context::{AudioBuffer, OutputFormat};

struct Voice {
    buffer: Arc<AudioBuffer>,
    pos: usize,
}

/// Sums overlapping one-shot sources into output periods.
pub struct Mixer {
    format: OutputFormat,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            voices: Vec::new(),
        }
    }

    pub fn start(&mut self, buffer: Arc<AudioBuffer>) {
        if buffer.channels != self.format.channels || buffer.sample_rate != self.format.sample_rate {
            log::warn!(
                "Dropping {}Hz/{}ch source on a {}Hz/{}ch output",
                buffer.sample_rate,
                buffer.channels,
                self.format.sample_rate,
                self.format.channels
            );
            return;
        }
        if !buffer.samples.is_empty() {
            self.voices.push(Voice { buffer, pos: 0 });
        }
    }

    pub fn is_idle(&self) -> bool {
        self.voices.is_empty()
    }

    /// Fill `out` (interleaved) with the next period. Finished voices are
    /// dropped; the tail of the period is silence when nothing is left.
    pub fn mix(&mut self, out: &mut [i16]) {
        let mut acc = vec![0i32; out.len()];
        for voice in &mut self.voices {
            let remaining = &voice.buffer.samples[voice.pos..];
            let n = remaining.len().min(acc.len());
            for (a, &s) in acc.iter_mut().zip(&remaining[..n]) {
                *a += s as i32;
            }
            voice.pos += n;
        }
        self.voices.retain(|v| v.pos < v.buffer.samples.len());

        for (o, a) in out.iter_mut().zip(acc) {
            *o = a.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
    }
}
