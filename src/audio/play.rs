//! ALSA-backed audio destination.
//!
//! Uses a dedicated std::thread (NOT a tokio task) for real-time output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device::{self, AlsaParams};
use super::context::{AudioBuffer, OutputFormat, PlaybackSink};
use super::mixer::Mixer;

/// Playback device configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Desired period size in frames (0 = let ALSA decide)
    pub period_size: usize,
}

pub struct AlsaSink {
    format: OutputFormat,
    tx: mpsc::UnboundedSender<Arc<AudioBuffer>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaSink {
    /// Open the playback device and start the output thread. Fails when the
    /// device cannot be opened, i.e. there is no usable audio output.
    pub fn open(config: &PlaybackConfig) -> Result<Self> {
        let period_size_opt = if config.period_size > 0 {
            Some(config.period_size)
        } else {
            None
        };
        let (pcm, params) = alsa_device::open_playback(
            &config.device,
            config.sample_rate,
            config.channels,
            period_size_opt,
        )?;

        let format = params.format;
        let (tx, rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("sfx-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(pcm, params, rx, &running) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            format,
            tx,
            running,
            handle: Some(handle),
        })
    }
}

impl PlaybackSink for AlsaSink {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn start(&self, buffer: Arc<AudioBuffer>) {
        if self.tx.send(buffer).is_err() {
            log::warn!("Playback thread is gone, dropping source");
        }
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // The thread exits once the channel closes; detach instead of joining
        // so drop never waits on a blocked ALSA write.
        self.handle.take();
    }
}

fn play_thread(
    pcm: PCM,
    params: AlsaParams,
    mut rx: mpsc::UnboundedReceiver<Arc<AudioBuffer>>,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.format.channels as usize;
    let period_size = params.period_size.max(1);
    let io = pcm.io_i16()?;

    let mut mixer = Mixer::new(params.format);
    let mut period = vec![0i16; period_size * channels];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.format.sample_rate,
        channels,
        period_size,
    );

    while running.load(Ordering::Relaxed) {
        // Block while nothing is playing
        if mixer.is_idle() {
            match rx.blocking_recv() {
                Some(buffer) => mixer.start(buffer),
                None => {
                    log::info!("Playback channel closed");
                    break;
                }
            }
        }
        while let Ok(buffer) = rx.try_recv() {
            mixer.start(buffer);
        }

        mixer.mix(&mut period);

        // Retry short writes and recover from XRUN; give up on the period
        // after a few failed recoveries.
        let total_frames = period.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&period[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
