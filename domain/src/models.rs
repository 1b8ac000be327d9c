use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DURATION: &str = "duration";
pub const SAMPLE_RATE: &str = "sample_rate";
pub const TEMPO: &str = "tempo";
pub const RMS_ENERGY: &str = "rms_energy";
pub const SPECTRAL_CENTROID: &str = "spectral_centroid";
pub const SPECTRAL_BANDWIDTH: &str = "spectral_bandwidth";
pub const SPECTRAL_ROLLOFF: &str = "spectral_rolloff";
pub const ZERO_CROSSING_RATE: &str = "zero_crossing_rate";

pub type FeatureMap = BTreeMap<String, f64>;

/// Time-frequency magnitudes, one row per analysis frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrogram {
    #[serde(skip)]
    pub frames: Vec<Vec<f32>>,
    pub n_fft: usize,
    pub hop_length: usize,
    pub sample_rate: u32,
}

impl Spectrogram {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn n_bins(&self) -> usize {
        self.frames.first().map(Vec::len).unwrap_or(self.n_fft / 2 + 1)
    }

    pub fn bin_hz(&self) -> f64 {
        if self.n_fft == 0 {
            return 0.0;
        }
        self.sample_rate as f64 / self.n_fft as f64
    }

    /// Frequency of the bin with the most energy summed over all frames.
    pub fn dominant_frequency(&self) -> Option<f64> {
        let bins = self.n_bins();
        if self.frames.is_empty() || bins == 0 {
            return None;
        }
        let mut totals = vec![0.0f64; bins];
        for frame in &self.frames {
            for (total, &mag) in totals.iter_mut().zip(frame) {
                *total += mag as f64;
            }
        }
        totals
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin as f64 * self.bin_hz())
    }
}

/// Per-coefficient mean and standard deviation of the MFCCs over all frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MfccSummary {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl MfccSummary {
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn n_coefficients(&self) -> usize {
        self.mean.len()
    }
}

/// Output of the feature extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysis {
    pub features: FeatureMap,
    #[serde(default, skip_serializing_if = "MfccSummary::is_empty")]
    pub mfcc: MfccSummary,
    pub spectrogram: Spectrogram,
}

impl AudioAnalysis {
    pub fn from_features<I, K>(features: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            features: features.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            mfcc: MfccSummary::default(),
            spectrogram: Spectrogram::default(),
        }
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_frequency_ignores_dc() {
        let spectrogram = Spectrogram {
            frames: vec![vec![10.0, 0.0, 3.0, 1.0], vec![10.0, 0.0, 2.0, 1.0]],
            n_fft: 6,
            hop_length: 3,
            sample_rate: 600,
        };
        assert_eq!(spectrogram.n_bins(), 4);
        assert_eq!(spectrogram.dominant_frequency(), Some(200.0));
    }

    #[test]
    fn feature_lookup() {
        let analysis = AudioAnalysis::from_features([(TEMPO, 120.0)]);
        assert_eq!(analysis.feature(TEMPO), Some(120.0));
        assert_eq!(analysis.feature(RMS_ENERGY), None);
    }
}
