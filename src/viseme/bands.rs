//! Frequency-band lip-sync.
//!
//! PCM is turned into a byte-scaled magnitude spectrum the way a browser
//! analyser node reports it, then summarised into low/mid/high band energy.
//! [`FrequencyBandMapper`] picks a mouth shape from band dominance.
//!
//! The thresholds are heuristics tuned by eye, not fitted to data.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::{MOUTH_OPEN, Viseme, VisemeSignal};
use crate::config::LipSyncConfig;

/// Decibel range mapped onto `0..=255`.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

const LOW_BINS: std::ops::Range<usize> = 0..10;
const MID_BINS: std::ops::Range<usize> = 10..30;
const HIGH_BINS: std::ops::Range<usize> = 30..60;

/// Normalised volume and band energies, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandLevels {
    /// Mean of every bin.
    pub volume: f32,
    /// Mean of bins `0..10`.
    pub low: f32,
    /// Mean of bins `10..30`.
    pub mid: f32,
    /// Mean of bins `30..60`.
    pub high: f32,
}

impl BandLevels {
    /// Summarise a byte-scaled spectrum.
    ///
    /// Bands that fall outside a short spectrum average over whatever bins
    /// exist, or read as zero.
    #[must_use]
    pub fn from_bytes(bins: &[u8]) -> Self {
        if bins.is_empty() {
            return Self::default();
        }
        let volume = mean(bins) / 255.0;
        let band = |range: std::ops::Range<usize>| {
            let start = range.start.min(bins.len());
            let end = range.end.min(bins.len());
            // Divide by the nominal band width so truncated bands read quieter.
            let sum: f32 = bins[start..end].iter().map(|&b| f32::from(b)).sum();
            sum / range.len() as f32 / 255.0
        };
        Self {
            volume,
            low: band(LOW_BINS),
            mid: band(MID_BINS),
            high: band(HIGH_BINS),
        }
    }
}

fn mean(bins: &[u8]) -> f32 {
    bins.iter().map(|&b| f32::from(b)).sum::<f32>() / bins.len() as f32
}

/// Smoothed magnitude spectrum of the most recent audio window.
pub struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectrum")
            .field("fft_size", &self.fft_size())
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl Spectrum {
    /// Create an analyser with `fft_size` samples per window.
    ///
    /// Sizes below 2 are raised to 2.
    #[must_use]
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let window = (0..size)
            .map(|n| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
            })
            .collect();
        Self {
            fft,
            window,
            smoothing: smoothing.clamp(0.0, 0.999),
            smoothed: vec![0.0; size / 2],
            bytes: vec![0; size / 2],
            scratch: vec![Complex::new(0.0, 0.0); size],
        }
    }

    /// Analyser configured from lip-sync settings.
    #[must_use]
    pub fn from_config(config: &LipSyncConfig) -> Self {
        Self::new(config.fft_size, config.smoothing)
    }

    /// Window length in samples.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Number of frequency bins (`fft_size / 2`).
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Analyse the latest window of `samples` and return the byte spectrum.
    ///
    /// Short input is zero-padded at the front. Only the last `fft_size`
    /// samples are used.
    pub fn update(&mut self, samples: &[f32]) -> &[u8] {
        let size = self.fft_size();
        let tail = &samples[samples.len().saturating_sub(size)..];
        let pad = size - tail.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = if i < pad { 0.0 } else { tail[i - pad] };
            let s = if s.is_finite() { s } else { 0.0 };
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.smoothing;
        for (k, (smoothed, byte)) in self
            .smoothed
            .iter_mut()
            .zip(self.bytes.iter_mut())
            .enumerate()
        {
            let magnitude = self.scratch[k].norm() / size as f32;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            let db = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                MIN_DECIBELS
            };
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
        &self.bytes
    }

    /// Analyse `samples` and summarise the result into band levels.
    pub fn levels(&mut self, samples: &[f32]) -> BandLevels {
        BandLevels::from_bytes(self.update(samples))
    }

    /// Forget smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
        self.bytes.iter_mut().for_each(|v| *v = 0);
    }
}

/// Picks a mouth shape from band dominance.
#[derive(Debug, Clone)]
pub struct FrequencyBandMapper {
    min_volume: f32,
    dominant_band: f32,
    dominance_ratio: f32,
    mid_band: f32,
    open_volume: f32,
    decay: f32,
    clear_below: f32,
}

impl Default for FrequencyBandMapper {
    fn default() -> Self {
        Self::new(&LipSyncConfig::default())
    }
}

impl FrequencyBandMapper {
    /// Create a mapper from lip-sync thresholds.
    #[must_use]
    pub fn new(config: &LipSyncConfig) -> Self {
        Self {
            min_volume: config.min_volume,
            dominant_band: config.dominant_band,
            dominance_ratio: config.dominance_ratio,
            mid_band: config.mid_band,
            open_volume: config.open_volume,
            decay: config.decay.clamp(0.0, 0.999),
            clear_below: config.clear_below,
        }
    }

    /// Update `signal` from one analysis tick.
    ///
    /// Above the minimum volume the dominant band picks the shape: high for
    /// a narrow front vowel, low for a rounded back vowel, mid for an open
    /// vowel, else a generic opening. Quiet ticks decay the strength until it
    /// drops below the clear threshold, at which point the signal is cleared.
    pub fn classify(&self, levels: BandLevels, signal: &mut VisemeSignal) {
        let v = levels.volume;
        if v > self.min_volume {
            if levels.high > self.dominant_band && levels.high > levels.mid * self.dominance_ratio
            {
                signal.set(Viseme::I.morph_name(), (v * 3.0).min(1.0));
            } else if levels.low > self.dominant_band
                && levels.low > levels.mid * self.dominance_ratio
            {
                signal.set(Viseme::U.morph_name(), (v * 3.0).min(1.0));
            } else if levels.mid > self.mid_band {
                signal.set(Viseme::AA.morph_name(), (v * 3.0).min(1.0));
            } else if v > self.open_volume {
                signal.set(MOUTH_OPEN, (v * 2.5).min(0.8));
            } else {
                signal.set_strength((v * 2.0).min(0.5));
            }
        } else {
            self.decay(signal);
        }
    }

    /// Apply one quiet tick of geometric decay.
    pub fn decay(&self, signal: &mut VisemeSignal) {
        signal.set_strength(signal.strength * self.decay);
        if signal.strength < self.clear_below {
            signal.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn levels(volume: f32, low: f32, mid: f32, high: f32) -> BandLevels {
        BandLevels {
            volume,
            low,
            mid,
            high,
        }
    }

    #[test]
    fn high_band_dominance_selects_narrow_shape() {
        let mut signal = VisemeSignal::default();
        FrequencyBandMapper::default().classify(levels(0.2, 0.1, 0.2, 0.5), &mut signal);
        assert_eq!(signal.active.as_deref(), Some("viseme_I"));
        assert!((signal.strength - 0.6).abs() < 1e-6);
    }

    #[test]
    fn low_band_dominance_selects_rounded_shape() {
        let mut signal = VisemeSignal::default();
        FrequencyBandMapper::default().classify(levels(0.5, 0.6, 0.2, 0.1), &mut signal);
        assert_eq!(signal.active.as_deref(), Some("viseme_U"));
        assert_eq!(signal.strength, 1.0);
    }

    #[test]
    fn mid_band_selects_open_shape() {
        let mut signal = VisemeSignal::default();
        FrequencyBandMapper::default().classify(levels(0.1, 0.3, 0.3, 0.3), &mut signal);
        assert_eq!(signal.active.as_deref(), Some("viseme_aa"));
    }

    #[test]
    fn loud_flat_spectrum_falls_back_to_mouth_open() {
        let mut signal = VisemeSignal::default();
        FrequencyBandMapper::default().classify(levels(0.4, 0.2, 0.2, 0.2), &mut signal);
        assert_eq!(signal.active.as_deref(), Some(MOUTH_OPEN));
        assert!((signal.strength - 0.8).abs() < 1e-6);
    }

    #[test]
    fn quiet_tick_keeps_shape_with_reduced_strength() {
        let mut signal = VisemeSignal::new("viseme_O", 0.9);
        FrequencyBandMapper::default().classify(levels(0.05, 0.1, 0.1, 0.1), &mut signal);
        assert_eq!(signal.active.as_deref(), Some("viseme_O"));
        assert!((signal.strength - 0.1).abs() < 1e-6);
    }

    #[test]
    fn silence_decays_monotonically_then_clears() {
        let mapper = FrequencyBandMapper::default();
        let mut signal = VisemeSignal::new("viseme_aa", 1.0);
        let mut previous = signal.strength;
        let mut ticks = 0;
        while signal.active.is_some() {
            mapper.classify(BandLevels::default(), &mut signal);
            assert!(signal.strength <= previous);
            previous = signal.strength;
            ticks += 1;
            assert!(ticks < 100, "decay never cleared");
        }
        assert_eq!(signal.strength, 0.0);
        // 0.85^n < 0.03 first holds at n = 22.
        assert_eq!(ticks, 22);
    }

    #[test]
    fn band_levels_average_nominal_ranges() {
        let mut bins = vec![0u8; 128];
        bins[..10].iter_mut().for_each(|b| *b = 255);
        let l = BandLevels::from_bytes(&bins);
        assert!((l.low - 1.0).abs() < 1e-6);
        assert_eq!(l.mid, 0.0);
        assert!((l.volume - 10.0 / 128.0).abs() < 1e-6);
        assert_eq!(BandLevels::from_bytes(&[]), BandLevels::default());
    }

    #[test]
    fn silence_produces_empty_spectrum() {
        let mut spectrum = Spectrum::new(256, 0.8);
        assert_eq!(spectrum.bin_count(), 128);
        let bins = spectrum.update(&[0.0; 256]);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn high_tone_lands_in_high_band() {
        let mut spectrum = Spectrum::new(256, 0.0);
        // Bin 45 of a 256-point FFT.
        let samples: Vec<f32> = (0..256)
            .map(|n| (2.0 * std::f32::consts::PI * 45.0 * n as f32 / 256.0).sin() * 0.8)
            .collect();
        let l = spectrum.levels(&samples);
        assert!(l.high > l.low);
        assert!(l.high > l.mid);
    }

    #[test]
    fn smoothing_carries_energy_into_silence() {
        let mut spectrum = Spectrum::new(256, 0.8);
        let tone: Vec<f32> = (0..256)
            .map(|n| (2.0 * std::f32::consts::PI * 20.0 * n as f32 / 256.0).sin() * 0.01)
            .collect();
        let loud = spectrum.levels(&tone);
        let after = spectrum.levels(&[0.0; 256]);
        assert!(after.mid > 0.0);
        assert!(after.mid < loud.mid);
    }
}
