use domain::request::{GenerationParams, Request};
use infrastructure::config::Settings;
use infrastructure::feature_extractor::FeatureExtractor;
use infrastructure::resilient_client::CompletionService;
use serde::Serialize;
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::{debug, warn};

const PROBE_PROMPT: &str = "Hello, this is a health check. Please respond with 'OK'.";
const PROBE_FREQUENCY: f32 = 440.0;
const PROBE_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub healthy: bool,
    pub detail: String,
}

impl ComponentStatus {
    fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            healthy: true,
            detail: detail.into(),
        }
    }

    fn failed(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            healthy: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub components: Vec<ComponentStatus>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.components.iter().all(|c| c.healthy)
    }
}

pub struct HealthService {
    client: Arc<dyn CompletionService>,
    model: String,
    params: GenerationParams,
}

impl HealthService {
    pub fn new(client: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            params: GenerationParams {
                temperature: 0.0,
                max_tokens: 10,
            },
        }
    }

    pub async fn run(&self, settings: &Settings) -> HealthReport {
        HealthReport {
            components: vec![
                configuration_status(settings),
                extractor_status(),
                self.api_status().await,
            ],
        }
    }

    pub async fn api_status(&self) -> ComponentStatus {
        let request = Request::builder(self.model.clone(), self.params)
            .prompt(PROBE_PROMPT)
            .build();
        match self.client.send(request).await {
            Ok(response) if !response.text.trim().is_empty() => ComponentStatus::ok(
                "api",
                format!(
                    "{} answered in {}ms after {} attempt(s)",
                    response.model,
                    response.latency.as_millis(),
                    response.attempts
                ),
            ),
            Ok(_) => ComponentStatus::failed("api", "empty response"),
            Err(e) => {
                warn!("API health check failed: {}", e);
                ComponentStatus::failed("api", e.to_string())
            }
        }
    }
}

pub fn configuration_status(settings: &Settings) -> ComponentStatus {
    ComponentStatus::ok(
        "configuration",
        format!(
            "model {} via {} (key {}), {} attempt(s), {}s per attempt",
            settings.model,
            settings.api_url,
            settings.redacted_key(),
            settings.retry.max_attempts,
            settings.retry.attempt_timeout.as_secs()
        ),
    )
}

/// Run the extractor on a synthetic one-second tone and check that the
/// spectrogram peak lands on it.
pub fn extractor_status() -> ComponentStatus {
    let tone: Vec<f32> = (0..PROBE_SAMPLE_RATE)
        .map(|i| 0.5 * (2.0 * PI * PROBE_FREQUENCY * i as f32 / PROBE_SAMPLE_RATE as f32).sin())
        .collect();
    match FeatureExtractor::default().extract(&tone, PROBE_SAMPLE_RATE) {
        Ok(analysis) => {
            let spectrogram = &analysis.spectrogram;
            match spectrogram.dominant_frequency() {
                Some(peak)
                    if (peak - PROBE_FREQUENCY as f64).abs() <= 2.0 * spectrogram.bin_hz() =>
                {
                    debug!("extractor self-test peak at {:.1} Hz", peak);
                    ComponentStatus::ok(
                        "audio extractor",
                        format!("{} Hz tone detected at {:.1} Hz", PROBE_FREQUENCY, peak),
                    )
                }
                other => ComponentStatus::failed(
                    "audio extractor",
                    format!("expected a peak near {} Hz, found {:?}", PROBE_FREQUENCY, other),
                ),
            }
        }
        Err(e) => ComponentStatus::failed("audio extractor", e.to_string()),
    }
}
