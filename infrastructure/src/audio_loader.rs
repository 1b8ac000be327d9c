use crate::config::Settings;
use domain::error::AnalyzerError;
use hound::{SampleFormat, WavReader};
use shared::utils::{is_supported_file, SUPPORTED_AUDIO_EXTENSIONS};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use std::time::Duration;
use tracing::{debug, info};

/// Mono PCM ready for feature extraction.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Set when the file was longer than the configured maximum duration.
    pub truncated: bool,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

pub struct AudioLoader {
    max_file_bytes: u64,
    max_duration: Duration,
}

impl AudioLoader {
    pub fn new(max_file_size_mb: u64, max_duration: Duration) -> Self {
        Self {
            max_file_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
            max_duration,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_file_size_mb, settings.max_audio_duration)
    }

    /// Check existence, type, extension and size before touching the decoder.
    pub fn validate(&self, path: &Path) -> Result<(), AnalyzerError> {
        let meta = std::fs::metadata(path).map_err(|_| {
            AnalyzerError::Decode(format!("audio file not found: {}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(AnalyzerError::Decode(format!("path is not a file: {}", path.display())));
        }
        if !is_supported_file(path) {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_else(|| "(none)".to_string());
            return Err(AnalyzerError::Decode(format!(
                "unsupported file format: {}. Supported formats: {}",
                ext,
                SUPPORTED_AUDIO_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        if meta.len() > self.max_file_bytes {
            return Err(AnalyzerError::Decode(format!(
                "file size ({:.1} MB) exceeds maximum allowed size ({} MB)",
                meta.len() as f64 / (1024.0 * 1024.0),
                self.max_file_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<DecodedAudio, AnalyzerError> {
        self.validate(path)?;

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        let pcm = if is_wav {
            self.decode_wav(path)
        } else {
            self.decode_compressed(path)
        }
        .map_err(|e| AnalyzerError::Decode(format!("{}: {}", path.display(), e)))?;

        let samples = downmix(&pcm.interleaved, pcm.channels as usize);
        if samples.is_empty() {
            let message = format!("{}: file contains no audio", path.display());
            return Err(AnalyzerError::Decode(message));
        }

        let decoded = DecodedAudio {
            samples,
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            truncated: pcm.truncated,
        };
        info!(
            "loaded {} ({:.2}s at {} Hz{})",
            path.display(),
            decoded.duration().as_secs_f64(),
            decoded.sample_rate,
            if decoded.truncated { ", truncated" } else { "" }
        );
        Ok(decoded)
    }

    fn max_frames(&self, sample_rate: u32) -> usize {
        (self.max_duration.as_secs_f64() * sample_rate as f64) as usize
    }

    fn decode_wav(&self, path: &Path) -> Result<Pcm, String> {
        let mut reader = WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err("invalid WAV header".to_string());
        }
        debug!(
            "{}: {} Hz, {} channel(s), {:?} {} bit",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.sample_format,
            spec.bits_per_sample
        );

        let total_frames = reader.duration() as usize;
        let keep_frames = total_frames.min(self.max_frames(spec.sample_rate));
        let keep_samples = keep_frames * spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .take(keep_samples)
                .collect::<Result<_, _>>(),
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .take(keep_samples)
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
            }
        }
        .map_err(|e| e.to_string())?;

        Ok(Pcm {
            interleaved,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            truncated: total_frames > keep_frames,
        })
    }

    /// MP3, FLAC and M4A (AAC) through symphonia's probe and codec registry.
    fn decode_compressed(&self, path: &Path) -> Result<Pcm, String> {
        let file = File::open(path).map_err(|e| e.to_string())?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let probed = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| e.to_string())?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| "no audio track".to_string())?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| e.to_string())?;

        let mut interleaved = Vec::new();
        let mut spec: Option<SignalSpec> = None;
        let mut truncated = false;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.to_string()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("{}: skipping undecodable packet: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(e.to_string()),
            };

            let current = *decoded.spec();
            let first = *spec.get_or_insert(current);
            if current.channels.count() != first.channels.count() || current.rate != first.rate {
                return Err("stream changes format mid-way".to_string());
            }
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, current);
            buffer.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buffer.samples());

            let limit = self.max_frames(first.rate) * first.channels.count();
            if interleaved.len() > limit {
                interleaved.truncate(limit);
                truncated = true;
                break;
            }
        }

        let spec = spec.ok_or_else(|| "file contains no audio".to_string())?;
        let channels = spec.channels.count();
        if channels == 0 || spec.rate == 0 {
            return Err("invalid stream parameters".to_string());
        }
        debug!("{}: {} Hz, {} channel(s)", path.display(), spec.rate, channels);
        Ok(Pcm {
            interleaved,
            sample_rate: spec.rate,
            channels: u16::try_from(channels).map_err(|_| "too many channels".to_string())?,
            truncated,
        })
    }
}

/// Interleaved samples straight out of a decoder.
struct Pcm {
    interleaved: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    truncated: bool,
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
