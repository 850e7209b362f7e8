//! Offline frequency-band analysis of recorded speech.
//!
//! Replays a clip through the same spectrum and band mapper the live stream
//! path uses, one analysis tick at a time, so a WAV file yields the mouth
//! track the avatar would have shown while it played.

use std::path::Path;

use serde::Serialize;

use super::{FrequencyBandMapper, Spectrum, VisemeSignal};
use crate::config::LipSyncConfig;
use crate::error::{AvatarError, Result};

/// Mouth state at one analysis tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFrame {
    /// Seconds from the start of the clip.
    pub time: f64,
    /// Driven control point, if any.
    pub target: Option<String>,
    /// Strength of the driven control point.
    pub strength: f32,
}

/// A run of ticks driving the same control point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSegment {
    pub start: f64,
    pub end: f64,
    pub target: String,
    /// Highest strength reached in the run.
    pub peak: f32,
}

/// Read a WAV file as mono `f32` samples, mixing channels down.
///
/// # Errors
///
/// Returns [`AvatarError::LipSync`] when the file cannot be opened or decoded.
pub fn load_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| AvatarError::LipSync(format!("cannot open WAV {}: {e}", path.display())))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| AvatarError::LipSync(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| AvatarError::LipSync(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    if spec.channels > 1 {
        let ch = usize::from(spec.channels);
        let mono = samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    } else {
        Ok((samples, spec.sample_rate))
    }
}

/// Run band analysis over `samples` at the configured tick interval.
///
/// Each tick looks at the newest `fft_size` samples played so far, padded
/// with silence at the start of the clip.
#[must_use]
pub fn analyze_samples(samples: &[f32], sample_rate: u32, config: &LipSyncConfig) -> Vec<TrackFrame> {
    let mut spectrum = Spectrum::from_config(config);
    let mapper = FrequencyBandMapper::new(config);
    let mut signal = VisemeSignal::default();
    let window = spectrum.fft_size();

    let hop = (u64::from(sample_rate) * config.analysis_interval_ms.max(1) / 1000).max(1) as usize;
    let mut frames = Vec::with_capacity(samples.len() / hop + 1);
    let mut buf = vec![0.0f32; window];

    let mut played = 0usize;
    while played < samples.len() {
        played = (played + hop).min(samples.len());
        let from = played.saturating_sub(window);
        let recent = &samples[from..played];
        buf.fill(0.0);
        buf[window - recent.len()..].copy_from_slice(recent);

        mapper.classify(spectrum.levels(&buf), &mut signal);
        frames.push(TrackFrame {
            time: played as f64 / f64::from(sample_rate.max(1)),
            target: signal.is_active().then(|| signal.active.clone()).flatten(),
            strength: signal.strength,
        });
    }
    frames
}

/// Analyse a WAV file.
///
/// # Errors
///
/// Returns [`AvatarError::LipSync`] when the file cannot be read.
pub fn analyze_wav(path: &Path, config: &LipSyncConfig) -> Result<Vec<TrackFrame>> {
    let (samples, rate) = load_wav_mono(path)?;
    Ok(analyze_samples(&samples, rate, config))
}

/// Merge consecutive frames with the same target into segments.
#[must_use]
pub fn segments(frames: &[TrackFrame]) -> Vec<TrackSegment> {
    let mut out: Vec<TrackSegment> = Vec::new();
    let mut prev_time = 0.0;
    for frame in frames {
        match (&frame.target, out.last_mut()) {
            (Some(target), Some(last)) if last.target == *target && last.end == prev_time => {
                last.end = frame.time;
                last.peak = last.peak.max(frame.strength);
            }
            (Some(target), _) => out.push(TrackSegment {
                start: prev_time,
                end: frame.time,
                target: target.clone(),
                peak: frame.strength,
            }),
            (None, _) => {}
        }
        prev_time = frame.time;
    }
    out
}
