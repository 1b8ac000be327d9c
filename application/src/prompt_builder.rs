use crate::guardrail_service::SYSTEM_CONTEXT;
use domain::models::{self, AudioAnalysis};
use domain::session::{ConversationTurn, Role};

pub const DEFAULT_QUESTION: &str = "Please explain what a spectrogram shows in audio analysis.\n\
Focus on:\n\
1. What the visual representation means\n\
2. How frequency and time are displayed\n\
3. What different colors/intensities represent\n\
4. How this helps in understanding audio characteristics\n\n\
Keep the explanation clear and accessible while being technically accurate.";

/// Display label and unit for the features we know about, in presentation order.
const FEATURE_LABELS: &[(&str, &str, &str)] = &[
    (models::DURATION, "Duration", " seconds"),
    (models::SAMPLE_RATE, "Sample rate", " Hz"),
    (models::TEMPO, "Tempo", " BPM"),
    (models::RMS_ENERGY, "RMS energy", ""),
    (models::SPECTRAL_CENTROID, "Spectral centroid", " Hz"),
    (models::SPECTRAL_BANDWIDTH, "Spectral bandwidth", " Hz"),
    (models::SPECTRAL_ROLLOFF, "Spectral rolloff", " Hz"),
    (models::ZERO_CROSSING_RATE, "Zero-crossing rate", ""),
];

/// Assistant replies are clipped to this many characters in summary prompts.
const SUMMARY_REPLY_CHARS: usize = 200;

/// Feature values are written with `{:?}` so they round-trip exactly: the
/// model sees `120.0`, never `120` or `120.000`.
pub fn audio_context(analysis: &AudioAnalysis, source: Option<&str>) -> String {
    let mut lines = vec!["Audio Analysis Context:".to_string()];
    if let Some(source) = source {
        lines.push(format!("- Source: {}", source));
    }
    for (key, label, unit) in FEATURE_LABELS {
        if let Some(value) = analysis.feature(key) {
            lines.push(format!("- {}: {:?}{}", label, value, unit));
        }
    }
    for (key, value) in &analysis.features {
        if !FEATURE_LABELS.iter().any(|(known, _, _)| known == key) {
            lines.push(format!("- {}: {:?}", key, value));
        }
    }
    if let Some(freq) = analysis.spectrogram.dominant_frequency() {
        lines.push(format!("- Dominant frequency: {:?} Hz", freq));
    }
    if !analysis.mfcc.is_empty() {
        let means: Vec<String> = analysis.mfcc.mean.iter().map(|c| format!("{:.2}", c)).collect();
        lines.push(format!("- MFCC means: [{}]", means.join(", ")));
    }
    lines.join("\n")
}

/// Single-shot prompt: the audio context followed by the question, or the
/// stock spectrogram explanation request when no question is given.
pub fn analysis_prompt(
    analysis: &AudioAnalysis,
    source: Option<&str>,
    question: Option<&str>,
) -> String {
    let question = question
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(DEFAULT_QUESTION);
    format!("{}\n\nQuestion: {}", audio_context(analysis, source), question)
}

/// System message for a chat session, carrying the analysis when one is loaded.
pub fn chat_system_prompt(analysis: Option<(&AudioAnalysis, &str)>) -> String {
    match analysis {
        Some((analysis, source)) => format!(
            "{}\n\nThe user has loaded an audio file. Use these measurements when answering.\n{}",
            SYSTEM_CONTEXT,
            audio_context(analysis, Some(source))
        ),
        None => SYSTEM_CONTEXT.to_string(),
    }
}

pub fn summary_prompt(turns: &[ConversationTurn]) -> String {
    let mut lines = Vec::new();
    let mut exchange = 0;
    for turn in turns.iter().filter(|t| !t.synthesized) {
        match turn.role {
            Role::User => {
                exchange += 1;
                lines.push(format!("Exchange {}:", exchange));
                lines.push(format!("User: {}", turn.text));
            }
            Role::Assistant => {
                let clipped: String = turn.text.chars().take(SUMMARY_REPLY_CHARS).collect();
                let clipped_any = turn.text.chars().count() > SUMMARY_REPLY_CHARS;
                let ellipsis = if clipped_any { "..." } else { "" };
                lines.push(format!("Assistant: {}{}", clipped, ellipsis));
                lines.push(String::new());
            }
            Role::System => {}
        }
    }
    format!(
        "Please provide a brief summary of our conversation about audio analysis. \
Here's our conversation:\n\n{}\n\nFocus on the key topics discussed and main insights shared.",
        lines.join("\n").trim_end()
    )
}
