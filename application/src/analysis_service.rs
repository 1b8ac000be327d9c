use crate::guardrail_service::{GuardrailFilter, SYSTEM_CONTEXT};
use crate::prompt_builder;
use domain::error::AnalyzerError;
use domain::models::{AudioAnalysis, FeatureMap, MfccSummary};
use domain::request::{GenerationParams, Request, TokenUsage};
use domain::safety_policy::{Direction, GuardrailVerdict};
use infrastructure::audio_loader::AudioLoader;
use infrastructure::config::Settings;
use infrastructure::feature_extractor::FeatureExtractor;
use infrastructure::resilient_client::CompletionService;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Shape of the spectrogram without the magnitudes themselves.
#[derive(Debug, Clone, Serialize)]
pub struct SpectrogramSummary {
    pub frames: usize,
    pub bins: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub dominant_frequency_hz: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub text: String,
    pub model: String,
    pub attempts: u32,
    pub latency_ms: u64,
    pub usage: Option<TokenUsage>,
    /// True when the guardrail altered the prompt or the reply.
    pub filtered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub file: PathBuf,
    pub question: Option<String>,
    pub truncated: bool,
    pub features: FeatureMap,
    #[serde(skip_serializing_if = "MfccSummary::is_empty")]
    pub mfcc: MfccSummary,
    pub spectrogram: SpectrogramSummary,
    pub explanation: Explanation,
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }
}

/// Load, extract, prompt, filter, send. One request per file.
pub struct AnalysisService {
    loader: AudioLoader,
    extractor: FeatureExtractor,
    client: Arc<dyn CompletionService>,
    guardrail: GuardrailFilter,
    model: String,
    params: GenerationParams,
}

impl AnalysisService {
    pub fn new(
        loader: AudioLoader,
        client: Arc<dyn CompletionService>,
        guardrail: GuardrailFilter,
        model: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            loader,
            extractor: FeatureExtractor::default(),
            client,
            guardrail,
            model: model.into(),
            params,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        client: Arc<dyn CompletionService>,
        guardrail: GuardrailFilter,
    ) -> Self {
        Self::new(
            AudioLoader::from_settings(settings),
            client,
            guardrail,
            settings.model.clone(),
            settings.params,
        )
    }

    /// Decode and analyse a file without calling the model.
    pub fn extract(&self, path: &Path) -> Result<(AudioAnalysis, bool), AnalyzerError> {
        let audio = self.loader.load(path)?;
        let analysis = self.extractor.extract(&audio.samples, audio.sample_rate)?;
        Ok((analysis, audio.truncated))
    }

    pub async fn explain(
        &self,
        analysis: &AudioAnalysis,
        source: &str,
        question: Option<&str>,
    ) -> Result<Explanation, AnalyzerError> {
        let prompt = prompt_builder::analysis_prompt(analysis, Some(source), question);
        // The prompt itself is the analysis context, so topic focus is not enforced here.
        let outbound = self.guardrail.check(&prompt, Direction::Outbound, true);
        let (prompt, prompt_filtered) = match outbound {
            GuardrailVerdict::Allow => (prompt, false),
            GuardrailVerdict::Rewrite(text) => (text, true),
            GuardrailVerdict::Reject(reason) => {
                return Err(AnalyzerError::GuardrailRejected { reason })
            }
        };

        let request = Request::builder(self.model.clone(), self.params)
            .system(SYSTEM_CONTEXT)
            .prompt(prompt)
            .build();
        let response = self.client.send(request).await?;

        let inbound = self.guardrail.check(&response.text, Direction::Inbound, true);
        let (text, reply_filtered) = match inbound {
            GuardrailVerdict::Rewrite(text) => (text, true),
            _ => (response.text, false),
        };
        Ok(Explanation {
            text,
            model: response.model,
            attempts: response.attempts,
            latency_ms: response.latency.as_millis() as u64,
            usage: response.usage,
            filtered: prompt_filtered || reply_filtered,
        })
    }

    pub async fn analyze_file(
        &self,
        path: &Path,
        question: Option<&str>,
    ) -> Result<AnalysisReport, AnalyzerError> {
        info!("analysing {}", path.display());
        let (analysis, truncated) = self.extract(path)?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let explanation = self.explain(&analysis, &source, question).await?;

        let spectrogram = &analysis.spectrogram;
        Ok(AnalysisReport {
            file: path.to_path_buf(),
            question: question.map(str::to_string),
            truncated,
            spectrogram: SpectrogramSummary {
                frames: spectrogram.n_frames(),
                bins: spectrogram.n_bins(),
                n_fft: spectrogram.n_fft,
                hop_length: spectrogram.hop_length,
                dominant_frequency_hz: spectrogram.dominant_frequency(),
            },
            features: analysis.features,
            mfcc: analysis.mfcc,
            explanation,
        })
    }

    /// Files are processed one after another; a failure is recorded and the
    /// batch moves on.
    pub async fn analyze_many(&self, paths: &[PathBuf], question: Option<&str>) -> BatchReport {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let entry = match self.analyze_file(path, question).await {
                Ok(report) => BatchEntry {
                    file: path.clone(),
                    report: Some(report),
                    error: None,
                },
                Err(e) => {
                    error!("failed to analyse {}: {}", path.display(), e);
                    BatchEntry {
                        file: path.clone(),
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        let succeeded = entries.iter().filter(|e| e.report.is_some()).count();
        info!("batch analysis completed: {}/{} successful", succeeded, entries.len());
        BatchReport {
            total: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }
}
