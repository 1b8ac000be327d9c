use application::analysis_service::{AnalysisReport, BatchReport};
use application::health_service::HealthReport;
use colored::Colorize;
use domain::models;
use domain::session::{ConversationTurn, Role};
use shared::utils::rule;

const FEATURE_ROWS: &[(&str, &str, &str)] = &[
    (models::DURATION, "Duration", "s"),
    (models::SAMPLE_RATE, "Sample rate", "Hz"),
    (models::TEMPO, "Tempo", "BPM"),
    (models::RMS_ENERGY, "RMS energy", ""),
    (models::SPECTRAL_CENTROID, "Spectral centroid", "Hz"),
    (models::SPECTRAL_BANDWIDTH, "Spectral bandwidth", "Hz"),
    (models::SPECTRAL_ROLLOFF, "Spectral rolloff", "Hz"),
    (models::ZERO_CROSSING_RATE, "Zero-crossing rate", ""),
];

pub fn print_report(report: &AnalysisReport) {
    println!("{}", rule('=').blue());
    println!("{} {}", "Audio analysis:".green().bold(), report.file.display());
    if report.truncated {
        println!("{}", "File exceeded the maximum duration and was truncated.".yellow());
    }
    println!("{}", rule('-').blue());

    for (key, label, unit) in FEATURE_ROWS {
        if let Some(value) = report.features.get(*key) {
            println!("  {:<20} {:>12.4} {}", label, value, unit);
        }
    }
    let spec = &report.spectrogram;
    println!(
        "  {:<20} {:>12} ({} bins, n_fft {}, hop {})",
        "Spectrogram frames", spec.frames, spec.bins, spec.n_fft, spec.hop_length
    );
    if let Some(freq) = spec.dominant_frequency_hz {
        println!("  {:<20} {:>12.1} Hz", "Dominant frequency", freq);
    }
    if !report.mfcc.is_empty() {
        let means: Vec<String> = report.mfcc.mean.iter().map(|c| format!("{:.1}", c)).collect();
        println!("  {:<20} {}", "MFCC means", means.join(" "));
    }

    println!("{}", rule('-').blue());
    if let Some(question) = &report.question {
        println!("{} {}", "Question:".cyan().bold(), question);
    }
    println!("{}\n", "Explanation:".cyan().bold());
    println!("{}", report.explanation.text);
    println!(
        "\n{}",
        format!(
            "model {} | {} attempt(s) | {}ms{}",
            report.explanation.model,
            report.explanation.attempts,
            report.explanation.latency_ms,
            if report.explanation.filtered { " | filtered" } else { "" }
        )
        .dimmed()
    );
}

pub fn print_batch_summary(batch: &BatchReport) {
    println!("{}", rule('=').blue());
    println!(
        "{} {}/{} successful",
        "Batch complete:".green().bold(),
        batch.succeeded,
        batch.total
    );
    for entry in batch.entries.iter().filter(|e| e.error.is_some()) {
        println!(
            "  {} {}: {}",
            "✗".red(),
            entry.file.display(),
            entry.error.as_deref().unwrap_or_default()
        );
    }
}

pub fn print_health(report: &HealthReport) {
    println!("{}", "Health check".bold());
    for component in &report.components {
        let mark = if component.healthy { "✓".green() } else { "✗".red() };
        println!("  {} {:<16} {}", mark, component.name, component.detail);
    }
    if report.healthy() {
        println!("{}", "All systems operational.".green());
    } else {
        println!("{}", "Some components are unhealthy.".red());
    }
}

pub fn print_turn(turn: &ConversationTurn) {
    match (turn.role, turn.synthesized) {
        (Role::User, _) => println!("{} {}", "You:".blue().bold(), turn.text),
        (_, true) => println!("{} {}", "System:".yellow().bold(), turn.text.yellow()),
        _ => println!("{} {}", "Assistant:".green().bold(), turn.text),
    }
}

pub fn print_chat_help() {
    println!("{}", "Commands:".bold());
    println!("  {:<10} show this help", "help");
    println!("  {:<10} reset the conversation", "clear");
    println!("  {:<10} summarise the conversation so far", "summary");
    println!("  {:<10} show the conversation", "history");
    println!("  {:<10} leave the chat", "quit");
    println!("Press Ctrl-C while waiting for a reply to cancel it.");
}
