//! Mel-frequency cepstral coefficients from an existing magnitude spectrogram.
//!
//! Slaney mel scale with area-normalised triangular filters, band power in
//! decibels floored 80 dB below the loudest band, then an orthonormal DCT-II.

use domain::models::MfccSummary;
use rayon::prelude::*;
use std::f64::consts::PI;

pub const N_MFCC: usize = 13;
pub const N_MELS: usize = 128;

const TOP_DB: f64 = 80.0;
const AMIN: f64 = 1e-10;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// `n_mels` triangular filters over the `n_fft / 2 + 1` STFT bins.
pub struct MelFilterbank {
    filters: Vec<Vec<f64>>,
}

impl MelFilterbank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let bin_hz = sample_rate as f64 / n_fft.max(1) as f64;
        let (low, high) = (hz_to_mel(0.0), hz_to_mel(sample_rate as f64 / 2.0));
        let edges: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(low + (high - low) * i as f64 / (n_mels + 1) as f64))
            .collect();

        let filters = edges
            .windows(3)
            .map(|w| {
                let (left, centre, right) = (w[0], w[1], w[2]);
                let norm = 2.0 / (right - left);
                (0..n_bins)
                    .map(|k| {
                        let f = k as f64 * bin_hz;
                        let rising = (f - left) / (centre - left);
                        let falling = (right - f) / (right - centre);
                        rising.min(falling).max(0.0) * norm
                    })
                    .collect()
            })
            .collect();
        Self { filters }
    }

    pub fn n_mels(&self) -> usize {
        self.filters.len()
    }

    fn apply(&self, power: &[f64]) -> Vec<f64> {
        self.filters
            .iter()
            .map(|filter| filter.iter().zip(power).map(|(w, p)| w * p).sum())
            .collect()
    }
}

/// First `n_out` rows of the orthonormal DCT-II basis of size `n_in`.
struct Dct {
    basis: Vec<Vec<f64>>,
}

impl Dct {
    fn new(n_in: usize, n_out: usize) -> Self {
        let n = n_in as f64;
        let basis = (0..n_out)
            .map(|k| {
                let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                (0..n_in)
                    .map(|m| scale * (PI * k as f64 * (2 * m + 1) as f64 / (2.0 * n)).cos())
                    .collect()
            })
            .collect();
        Self { basis }
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        self.basis
            .iter()
            .map(|row| row.iter().zip(input).map(|(b, x)| b * x).sum())
            .collect()
    }
}

/// MFCCs for every frame, one row of [`N_MFCC`] coefficients per frame.
pub fn mfcc(frames: &[Vec<f32>], sample_rate: u32, n_fft: usize) -> Vec<Vec<f64>> {
    if frames.is_empty() {
        return Vec::new();
    }
    let bank = MelFilterbank::new(sample_rate, n_fft, N_MELS);
    let mut mel_db: Vec<Vec<f64>> = frames
        .par_iter()
        .map(|frame| {
            let power: Vec<f64> = frame.iter().map(|&m| m as f64 * m as f64).collect();
            bank.apply(&power)
                .into_iter()
                .map(|p| 10.0 * p.max(AMIN).log10())
                .collect()
        })
        .collect();

    let peak = mel_db.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
    let floor = peak - TOP_DB;
    mel_db.iter_mut().flatten().for_each(|v| *v = v.max(floor));

    let dct = Dct::new(bank.n_mels(), N_MFCC);
    mel_db.par_iter().map(|bands| dct.apply(bands)).collect()
}

pub fn summarise(coefficients: &[Vec<f64>]) -> MfccSummary {
    let Some(first) = coefficients.first() else {
        return MfccSummary::default();
    };
    let frames = coefficients.len() as f64;
    let mean: Vec<f64> = (0..first.len())
        .map(|k| coefficients.iter().map(|c| c[k]).sum::<f64>() / frames)
        .collect();
    let std = mean
        .iter()
        .enumerate()
        .map(|(k, mu)| {
            let var = coefficients.iter().map(|c| (c[k] - mu).powi(2)).sum::<f64>() / frames;
            var.sqrt()
        })
        .collect();
    MfccSummary { mean, std }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 999.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6, "{hz}");
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn filters_are_triangles_inside_nyquist() {
        let bank = MelFilterbank::new(22_050, 2048, N_MELS);
        assert_eq!(bank.n_mels(), N_MELS);
        for filter in &bank.filters {
            assert_eq!(filter.len(), 1025);
            assert!(filter.iter().all(|w| *w >= 0.0));
            assert!(filter.iter().any(|w| *w > 0.0));
        }
    }

    #[test]
    fn silence_gives_a_flat_cepstrum() {
        let frames = vec![vec![0.0f32; 1025]; 4];
        let summary = summarise(&mfcc(&frames, 22_050, 2048));
        assert_eq!(summary.n_coefficients(), N_MFCC);
        assert!((summary.mean[0] + 100.0 * (N_MELS as f64).sqrt()).abs() < 1e-6);
        assert!(summary.mean[1..].iter().all(|c| c.abs() < 1e-6));
        assert!(summary.std.iter().all(|s| s.abs() < 1e-9));
    }

    #[test]
    fn empty_input_has_no_coefficients() {
        assert!(mfcc(&[], 22_050, 2048).is_empty());
        assert!(summarise(&[]).is_empty());
    }
}
