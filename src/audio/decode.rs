//! Payload decoding with Symphonia, converted to the context's output format.

use anyhow::{Context, Result};
use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::context::{AudioBuffer, OutputFormat};

/// Decode a complete encoded payload (WAV/PCM) into an `AudioBuffer`
/// in `target` format.
pub fn decode_audio_data(data: Bytes, target: OutputFormat) -> Result<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(data)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio payload")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let mut source_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut source_channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u32)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                source_rate = spec.rate;
                source_channels = spec.channels.count() as u32;
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e).context("Decode failed"),
        }
    }

    if samples.is_empty() || source_rate == 0 || source_channels == 0 {
        anyhow::bail!("Audio payload contains no samples");
    }

    let samples = convert_channels(&samples, source_channels, target.channels);
    let samples = resample(&samples, target.channels, source_rate, target.sample_rate)?;

    Ok(AudioBuffer {
        sample_rate: target.sample_rate,
        channels: target.channels,
        samples,
    })
}

/// Downmix by averaging every source channel that folds onto an output
/// channel (`src % to`), upmix by cycling the source channels.
fn convert_channels(samples: &[i16], from: u32, to: u32) -> Vec<i16> {
    if from == to {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        for ch in 0..to {
            if to >= from {
                out.push(frame[ch % from]);
            } else {
                let folded: Vec<i32> = frame.iter().skip(ch).step_by(to).map(|&s| s as i32).collect();
                out.push((folded.iter().sum::<i32>() / folded.len() as i32) as i16);
            }
        }
    }
    out
}

const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited resampling of interleaved i16 PCM with rubato.
///
/// The output is trimmed of the filter delay and of the zero padding fed
/// after the last chunk, so it holds exactly `ceil(frames * to / from)` frames.
fn resample(samples: &[i16], channels: u32, from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    let channels = channels as usize;
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| anyhow::anyhow!("resampler init: {e}"))?;

    // Deinterleave into per-channel f32 planes
    let planes: Vec<Vec<f32>> = (0..channels)
        .map(|ch| {
            samples
                .iter()
                .skip(ch)
                .step_by(channels)
                .map(|&s| s as f32 / 32768.0)
                .collect()
        })
        .collect();

    let delay = resampler.output_delay();
    let out_frames = (in_frames as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let mut resampled: Vec<Vec<f32>> = vec![Vec::new(); channels];

    let mut pos = 0;
    while resampled[0].len() < delay + out_frames {
        // Past the end of the input this feeds silence to flush the filter
        let chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| {
                let start = pos.min(plane.len());
                let end = (pos + RESAMPLE_CHUNK).min(plane.len());
                let mut chunk = plane[start..end].to_vec();
                chunk.resize(RESAMPLE_CHUNK, 0.0);
                chunk
            })
            .collect();
        pos += RESAMPLE_CHUNK;

        let output = resampler
            .process(&chunk, None)
            .map_err(|e| anyhow::anyhow!("resampler process: {e}"))?;
        for (plane, out) in resampled.iter_mut().zip(output) {
            plane.extend_from_slice(&out);
        }
    }

    let mut out = Vec::with_capacity(out_frames * channels);
    for frame in delay..delay + out_frames {
        for plane in &resampled {
            out.push((plane[frame] * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
    }
    Ok(out)
}
