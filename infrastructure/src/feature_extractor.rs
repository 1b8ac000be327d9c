//! Spectrogram and scalar descriptors for a mono signal.
//!
//! Frames are Hann-windowed and transformed independently on the rayon pool;
//! everything after the STFT is a cheap reduction over the magnitudes.

use crate::mfcc;
use domain::error::AnalyzerError;
use domain::models::{self, AudioAnalysis, FeatureMap, Spectrogram};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const ROLLOFF_PERCENT: f64 = 0.85;

const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
/// Centre and width (in octaves) of the log-normal tempo prior.
const PRIOR_BPM: f64 = 120.0;
const PRIOR_OCTAVES: f64 = 1.0;

pub struct FeatureExtractor {
    n_fft: usize,
    hop_length: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(N_FFT, HOP_LENGTH)
    }
}

impl FeatureExtractor {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let n_fft = n_fft.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);
        let window = (0..n_fft)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n_fft as f32).cos())
            .collect();
        Self {
            n_fft,
            hop_length: hop_length.max(1),
            fft,
            window,
        }
    }

    pub fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<AudioAnalysis, AnalyzerError> {
        if samples.is_empty() {
            return Err(AnalyzerError::Decode("no samples to analyse".to_string()));
        }
        if sample_rate == 0 {
            return Err(AnalyzerError::Decode("sample rate must be positive".to_string()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AnalyzerError::Decode("signal contains non-finite samples".to_string()));
        }

        let spectrogram = self.stft(samples, sample_rate);
        let bin_hz = spectrogram.bin_hz();
        let spectral = spectral_shape(&spectrogram.frames, bin_hz);
        let tempo = estimate_tempo(&spectrogram.frames, sample_rate, self.hop_length);
        let mfcc = mfcc::summarise(&mfcc::mfcc(&spectrogram.frames, sample_rate, self.n_fft));

        let mut features = FeatureMap::new();
        features.insert(models::DURATION.into(), samples.len() as f64 / sample_rate as f64);
        features.insert(models::SAMPLE_RATE.into(), sample_rate as f64);
        features.insert(models::TEMPO.into(), tempo);
        features.insert(models::RMS_ENERGY.into(), rms(samples));
        features.insert(models::SPECTRAL_CENTROID.into(), spectral.centroid);
        features.insert(models::SPECTRAL_BANDWIDTH.into(), spectral.bandwidth);
        features.insert(models::SPECTRAL_ROLLOFF.into(), spectral.rolloff);
        features.insert(models::ZERO_CROSSING_RATE.into(), zero_crossing_rate(samples));

        debug!(
            "extracted {} features over {} frames x {} bins",
            features.len(),
            spectrogram.n_frames(),
            spectrogram.n_bins()
        );
        Ok(AudioAnalysis {
            features,
            mfcc,
            spectrogram,
        })
    }

    fn stft(&self, samples: &[f32], sample_rate: u32) -> Spectrogram {
        let n_frames = 1 + samples.len().saturating_sub(self.n_fft) / self.hop_length;
        let n_bins = self.n_fft / 2 + 1;

        let frames: Vec<Vec<f32>> = (0..n_frames)
            .into_par_iter()
            .map(|index| {
                let start = index * self.hop_length;
                let mut buffer: Vec<Complex<f32>> = self
                    .window
                    .iter()
                    .enumerate()
                    .map(|(i, w)| {
                        let sample = samples.get(start + i).copied().unwrap_or(0.0);
                        Complex::new(sample * w, 0.0)
                    })
                    .collect();
                self.fft.process(&mut buffer);
                buffer[..n_bins].iter().map(|c| c.norm()).collect()
            })
            .collect();

        Spectrogram {
            frames,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            sample_rate,
        }
    }
}

fn rms(samples: &[f32]) -> f64 {
    let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (energy / samples.len() as f64).sqrt()
}

fn zero_crossing_rate(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

struct SpectralShape {
    centroid: f64,
    bandwidth: f64,
    rolloff: f64,
}

/// Per-frame centroid, bandwidth and rolloff, averaged over frames that carry energy.
fn spectral_shape(frames: &[Vec<f32>], bin_hz: f64) -> SpectralShape {
    let per_frame: Vec<(f64, f64, f64)> = frames
        .par_iter()
        .filter_map(|frame| {
            let total: f64 = frame.iter().map(|&m| m as f64).sum();
            if total <= f64::EPSILON {
                return None;
            }
            let centroid = frame
                .iter()
                .enumerate()
                .map(|(k, &m)| k as f64 * bin_hz * m as f64)
                .sum::<f64>()
                / total;
            let bandwidth = (frame
                .iter()
                .enumerate()
                .map(|(k, &m)| m as f64 * (k as f64 * bin_hz - centroid).powi(2))
                .sum::<f64>()
                / total)
                .sqrt();

            let threshold = ROLLOFF_PERCENT * total;
            let mut cumulative = 0.0;
            let mut rolloff_bin = frame.len().saturating_sub(1);
            for (k, &m) in frame.iter().enumerate() {
                cumulative += m as f64;
                if cumulative >= threshold {
                    rolloff_bin = k;
                    break;
                }
            }
            Some((centroid, bandwidth, rolloff_bin as f64 * bin_hz))
        })
        .collect();

    if per_frame.is_empty() {
        return SpectralShape {
            centroid: 0.0,
            bandwidth: 0.0,
            rolloff: 0.0,
        };
    }
    let n = per_frame.len() as f64;
    let (c, b, r) = per_frame
        .iter()
        .fold((0.0, 0.0, 0.0), |acc, v| (acc.0 + v.0, acc.1 + v.1, acc.2 + v.2));
    SpectralShape {
        centroid: c / n,
        bandwidth: b / n,
        rolloff: r / n,
    }
}

/// Positive log-magnitude spectral flux, one value per frame.
fn onset_envelope(frames: &[Vec<f32>]) -> Vec<f64> {
    let mut envelope = Vec::with_capacity(frames.len());
    envelope.push(0.0);
    for pair in frames.windows(2) {
        let flux = pair[0]
            .iter()
            .zip(&pair[1])
            .map(|(&prev, &cur)| ((cur as f64).ln_1p() - (prev as f64).ln_1p()).max(0.0))
            .sum();
        envelope.push(flux);
    }
    envelope
}

/// Tempo in BPM from the autocorrelation of the onset envelope, weighted by a
/// log-normal prior around 120 BPM. Returns 0.0 when there is no periodicity.
fn estimate_tempo(frames: &[Vec<f32>], sample_rate: u32, hop_length: usize) -> f64 {
    let frame_rate = sample_rate as f64 / hop_length as f64;
    let mut envelope = onset_envelope(frames);
    let mean = envelope.iter().sum::<f64>() / envelope.len().max(1) as f64;
    envelope.iter_mut().for_each(|v| *v -= mean);

    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() <= max_lag + 1 {
        return 0.0;
    }

    let autocorr = |lag: usize| -> f64 {
        envelope
            .iter()
            .zip(&envelope[lag..])
            .map(|(a, b)| a * b)
            .sum()
    };
    let scores: Vec<(usize, f64, f64)> = (min_lag.saturating_sub(1)..=max_lag + 1)
        .map(|lag| {
            let bpm = 60.0 * frame_rate / lag.max(1) as f64;
            let prior = (-0.5 * ((bpm / PRIOR_BPM).log2() / PRIOR_OCTAVES).powi(2)).exp();
            (lag, autocorr(lag), prior)
        })
        .collect();

    let best = scores
        .iter()
        .enumerate()
        .filter(|(_, (lag, _, _))| (min_lag..=max_lag).contains(lag))
        .max_by(|a, b| (a.1 .1 * a.1 .2).total_cmp(&(b.1 .1 * b.1 .2)));
    let Some((i, &(lag, peak, _))) = best else {
        return 0.0;
    };
    if peak <= 0.0 {
        return 0.0;
    }

    // Parabolic refinement over the neighbouring raw autocorrelation values.
    let (left, right) = (scores[i - 1].1, scores[i + 1].1);
    let curvature = left - 2.0 * peak + right;
    let offset = if curvature < 0.0 {
        (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let bpm = 60.0 * frame_rate / (lag as f64 + offset);
    bpm.clamp(MIN_BPM, MAX_BPM)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;

    fn sine(freq: f32, seconds: f32) -> Vec<f32> {
        (0..(SR as f32 * seconds) as usize)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn click_track(bpm: f64, seconds: f64) -> Vec<f32> {
        let mut samples = vec![0.0f32; (SR as f64 * seconds) as usize];
        let period = (60.0 / bpm * SR as f64) as usize;
        for start in (0..samples.len()).step_by(period) {
            for i in 0..256 {
                if let Some(s) = samples.get_mut(start + i) {
                    let decay = (-(i as f32) / 40.0).exp();
                    *s = decay * (2.0 * PI * 1_000.0 * i as f32 / SR as f32).sin();
                }
            }
        }
        samples
    }

    #[test]
    fn sine_features_track_its_frequency() {
        let analysis = FeatureExtractor::default().extract(&sine(440.0, 3.0), SR).unwrap();
        let centroid = analysis.feature(models::SPECTRAL_CENTROID).unwrap();
        assert!((centroid - 440.0).abs() < 30.0, "centroid {centroid}");
        let rolloff = analysis.feature(models::SPECTRAL_ROLLOFF).unwrap();
        assert!((rolloff - 440.0).abs() < 30.0, "rolloff {rolloff}");
        let rms = analysis.feature(models::RMS_ENERGY).unwrap();
        assert!((rms - 0.5 / 2f64.sqrt()).abs() < 1e-3);
        let zcr = analysis.feature(models::ZERO_CROSSING_RATE).unwrap();
        assert!((zcr - 2.0 * 440.0 / SR as f64).abs() < 1e-3);
        assert!((analysis.feature(models::DURATION).unwrap() - 3.0).abs() < 1e-6);
        assert_eq!(analysis.feature(models::SAMPLE_RATE), Some(SR as f64));

        let dominant = analysis.spectrogram.dominant_frequency().unwrap();
        assert!((dominant - 440.0).abs() <= analysis.spectrogram.bin_hz());
        assert_eq!(analysis.spectrogram.n_bins(), N_FFT / 2 + 1);
        assert_eq!(analysis.spectrogram.n_frames(), 1 + (3 * SR as usize - N_FFT) / HOP_LENGTH);
    }

    #[test]
    fn mfccs_summarise_thirteen_coefficients() {
        let extractor = FeatureExtractor::default();
        let low = extractor.extract(&sine(440.0, 2.0), SR).unwrap();
        let high = extractor.extract(&sine(3_000.0, 2.0), SR).unwrap();

        for analysis in [&low, &high] {
            assert_eq!(analysis.mfcc.n_coefficients(), mfcc::N_MFCC);
            assert_eq!(analysis.mfcc.std.len(), mfcc::N_MFCC);
            assert!(analysis.mfcc.mean.iter().all(|c| c.is_finite()));
            assert!(analysis.mfcc.std.iter().all(|s| *s >= 0.0));
        }
        assert!((low.mfcc.mean[1] - high.mfcc.mean[1]).abs() > 1.0);
    }

    #[test]
    fn louder_signal_only_moves_the_energy_coefficient() {
        let extractor = FeatureExtractor::default();
        let quiet = sine(440.0, 2.0);
        let loud: Vec<f32> = quiet.iter().map(|s| s * 2.0).collect();
        let a = extractor.extract(&quiet, SR).unwrap().mfcc;
        let b = extractor.extract(&loud, SR).unwrap().mfcc;

        // 6.02 dB in every mel band, spread over c0 by the orthonormal DCT.
        let shift = 10.0 * 4f64.log10() * (mfcc::N_MELS as f64).sqrt();
        assert!((b.mean[0] - a.mean[0] - shift).abs() < 1e-3);
        for k in 1..mfcc::N_MFCC {
            assert!((b.mean[k] - a.mean[k]).abs() < 1e-3, "c{k}");
        }
    }

    #[test]
    fn click_track_tempo() {
        let analysis = FeatureExtractor::default()
            .extract(&click_track(120.0, 8.0), SR)
            .unwrap();
        let tempo = analysis.feature(models::TEMPO).unwrap();
        assert!((tempo - 120.0).abs() < 8.0, "tempo {tempo}");
    }

    #[test]
    fn silence_and_short_clips_are_handled() {
        let analysis = FeatureExtractor::default().extract(&vec![0.0; 4096], SR).unwrap();
        assert_eq!(analysis.feature(models::SPECTRAL_CENTROID), Some(0.0));
        assert_eq!(analysis.feature(models::TEMPO), Some(0.0));

        let short = FeatureExtractor::default().extract(&[0.1, -0.1, 0.1], SR).unwrap();
        assert_eq!(short.spectrogram.n_frames(), 1);
    }

    #[test]
    fn rejects_unusable_input() {
        let extractor = FeatureExtractor::default();
        assert!(matches!(extractor.extract(&[], SR), Err(AnalyzerError::Decode(_))));
        assert!(matches!(extractor.extract(&[0.1], 0), Err(AnalyzerError::Decode(_))));
        assert!(matches!(extractor.extract(&[f32::NAN], SR), Err(AnalyzerError::Decode(_))));
    }
}
