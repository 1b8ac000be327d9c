use application::analysis_service::AnalysisService;
use application::guardrail_service::GuardrailFilter;
use application::prompt_builder;
use domain::error::AnalyzerError;
use domain::models::{self, AudioAnalysis};
use domain::request::GenerationParams;
use domain::safety_policy::SafetyPolicy;
use infrastructure::audio_loader::AudioLoader;
use infrastructure::feature_extractor::FeatureExtractor;
use std::sync::Arc;
use std::time::Duration;
use tests::{sine_wave, write_wav, StubCompletion};

const SR: u32 = 22_050;

fn service(client: Arc<StubCompletion>) -> AnalysisService {
    AnalysisService::new(
        AudioLoader::new(50, Duration::from_secs(300)),
        client,
        GuardrailFilter::new(SafetyPolicy::builtin().unwrap()),
        "mistral-small",
        GenerationParams::default(),
    )
}

#[tokio::test]
async fn feature_values_reach_the_model_verbatim() {
    let client = Arc::new(StubCompletion::echo());
    let analysis = AudioAnalysis::from_features([
        (models::TEMPO, 120.0),
        (models::RMS_ENERGY, 0.8),
        (models::SPECTRAL_CENTROID, 2000.0),
    ]);

    let explanation = service(client.clone())
        .explain(&analysis, "sine_440.wav", None)
        .await
        .unwrap();

    for value in ["120.0", "0.8", "2000.0"] {
        assert!(explanation.text.contains(value), "missing {value}");
    }
    assert!(explanation.text.contains(prompt_builder::DEFAULT_QUESTION));
    assert_eq!(client.calls(), 1);
}

#[test]
fn three_second_sine_is_analysed() {
    let samples = sine_wave(440.0, 3.0, SR);
    let analysis = FeatureExtractor::default().extract(&samples, SR).unwrap();

    assert!((analysis.feature(models::DURATION).unwrap() - 3.0).abs() < 1e-3);
    let centroid = analysis.feature(models::SPECTRAL_CENTROID).unwrap();
    assert!((centroid - 440.0).abs() < 30.0, "centroid {centroid}");
    assert!(analysis.feature(models::TEMPO).unwrap().is_finite());
    assert!(analysis.spectrogram.n_frames() > 100);

    let prompt = prompt_builder::analysis_prompt(&analysis, Some("sine.wav"), None);
    assert!(prompt.contains(&format!("{:?}", centroid)));
}

#[tokio::test]
async fn wav_file_goes_through_the_whole_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sine_440.wav");
    write_wav(&path, &sine_wave(440.0, 3.0, SR), SR).unwrap();

    let client = Arc::new(StubCompletion::echo());
    let report = service(client.clone())
        .analyze_file(&path, Some("What note is this audio?"))
        .await
        .unwrap();

    assert_eq!(report.features.get(models::SAMPLE_RATE), Some(&(SR as f64)));
    let dominant = report.spectrogram.dominant_frequency_hz.unwrap();
    assert!((dominant - 440.0).abs() < 15.0);
    assert!(report.explanation.text.contains("What note is this audio?"));
    assert!(report.explanation.text.contains("- Source: sine_440.wav"));
    assert!(report.explanation.text.contains("- MFCC means: ["));
    assert_eq!(report.mfcc.n_coefficients(), 13);
    assert!(!report.truncated);
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn decode_errors_skip_the_remote() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wav");
    std::fs::write(&path, b"not a wav file").unwrap();

    let client = Arc::new(StubCompletion::echo());
    let err = service(client.clone()).analyze_file(&path, None).await.unwrap_err();
    assert!(matches!(err, AnalyzerError::Decode(_)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn batch_reports_partial_success() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.wav");
    write_wav(&good, &sine_wave(220.0, 1.0, SR), SR).unwrap();
    let missing = dir.path().join("missing.wav");

    let client = Arc::new(StubCompletion::echo());
    let batch = service(client.clone()).analyze_many(&[good, missing], None).await;

    assert_eq!((batch.total, batch.succeeded, batch.failed), (2, 1, 1));
    assert!(batch.any_succeeded());
    assert_eq!(client.calls(), 1);
}
