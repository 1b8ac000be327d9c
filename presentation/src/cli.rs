use crate::clipboard::copy_to_clipboard;
use crate::render;
use anyhow::{anyhow, Context};
use application::analysis_service::AnalysisService;
use application::chat_service::{ChatSession, TurnOutcome};
use application::guardrail_service::GuardrailFilter;
use application::health_service::{self, HealthService};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input};
use domain::error::AnalyzerError;
use infrastructure::config::Settings;
use infrastructure::resilient_client::{CompletionService, ResilientClient};
use shared::confirmation::ask_confirmation;
use shared::types::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Parser)]
#[command(name = "audiolens")]
#[command(version, about = "Audio analysis with AI-powered explanations")]
pub struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Read configuration from this file instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Guardrail policy (TOML); overrides GUARDRAIL_POLICY
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyse one or more audio files (wav, mp3, flac, m4a) and explain them
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Ask a specific question instead of the default explanation
        #[arg(short, long)]
        question: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Copy the explanation to the clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Interactive chat about audio analysis
    Chat {
        /// Analyse this file first and discuss it
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Check configuration, the audio extractor and the API
    Health {
        #[arg(long)]
        json: bool,
    },
}

/// Everything a command needs, built once from settings.
struct Services {
    settings: Settings,
    client: Arc<dyn CompletionService>,
    guardrail: GuardrailFilter,
}

pub struct CliApp;

impl Default for CliApp {
    fn default() -> Self {
        Self::new()
    }
}

impl CliApp {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, cli: Cli) -> Result<()> {
        let services = match Self::services(cli.env_file.as_deref(), cli.policy.as_deref()) {
            Ok(services) => services,
            Err(e) => {
                if matches!(cli.command, Command::Health { .. }) {
                    Self::print_configuration_failure(&e);
                }
                return Err(e);
            }
        };
        match cli.command {
            Command::Analyze {
                files,
                question,
                json,
                copy,
            } => self.handle_analyze(&services, &files, question.as_deref(), json, copy).await,
            Command::Chat { audio } => self.handle_chat(&services, audio.as_deref()).await,
            Command::Health { json } => self.handle_health(&services, json).await,
        }
    }

    fn services(env_file: Option<&Path>, policy: Option<&Path>) -> Result<Services> {
        let settings = Settings::load(env_file)?;
        debug!("using model {} at {}", settings.model, settings.api_url);

        let policy_path = policy.or(settings.policy_path.as_deref());
        let guardrail = GuardrailFilter::from_settings(settings.enable_content_filter, policy_path)
            .map_err(|e| AnalyzerError::Configuration(format!("guardrail policy: {:#}", e)))?;
        let client: Arc<dyn CompletionService> =
            Arc::new(ResilientClient::from_settings(&settings)?);
        Ok(Services {
            settings,
            client,
            guardrail,
        })
    }

    async fn handle_analyze(
        &self,
        services: &Services,
        files: &[PathBuf],
        question: Option<&str>,
        json: bool,
        copy: bool,
    ) -> Result<()> {
        let service = AnalysisService::from_settings(
            &services.settings,
            services.client.clone(),
            services.guardrail.clone(),
        );

        if let [file] = files {
            if !json {
                eprintln!("{} {}", "Analysing".cyan(), file.display());
            }
            let report = service.analyze_file(file, question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render::print_report(&report);
            }
            if copy {
                Self::copy(&report.explanation.text);
            }
            return Ok(());
        }

        if !json {
            eprintln!("{} {} files", "Analysing".cyan(), files.len());
        }
        let batch = service.analyze_many(files, question).await;
        if json {
            println!("{}", serde_json::to_string_pretty(&batch)?);
        } else {
            for report in batch.entries.iter().filter_map(|e| e.report.as_ref()) {
                render::print_report(report);
            }
            render::print_batch_summary(&batch);
        }
        if copy {
            let joined = batch
                .entries
                .iter()
                .filter_map(|e| e.report.as_ref())
                .map(|r| format!("{}:\n{}", r.file.display(), r.explanation.text))
                .collect::<Vec<_>>()
                .join("\n\n");
            if !joined.is_empty() {
                Self::copy(&joined);
            }
        }
        if batch.any_succeeded() {
            Ok(())
        } else {
            Err(anyhow!("all {} analyses failed", batch.total))
        }
    }

    fn copy(text: &str) {
        if let Err(err) = copy_to_clipboard(text) {
            eprintln!("{} {}", "Clipboard copy failed:".red(), err);
        } else {
            eprintln!("{}", "Copied to clipboard.".green());
        }
    }

    async fn handle_chat(&self, services: &Services, audio: Option<&Path>) -> Result<()> {
        let mut session = ChatSession::from_settings(
            &services.settings,
            services.client.clone(),
            services.guardrail.clone(),
        );

        if let Some(path) = audio {
            let analysis_service = AnalysisService::from_settings(
                &services.settings,
                services.client.clone(),
                services.guardrail.clone(),
            );
            let (analysis, _) = analysis_service
                .extract(path)
                .with_context(|| format!("failed to analyse {}", path.display()))?;
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            println!("{} {}", "Loaded analysis of".green(), source);
            session = session.with_analysis(&analysis, source);
        }

        session.start()?;
        println!("{}", "Audio analysis chat. Type 'help' for commands, 'quit' to leave.".bold());

        loop {
            let input: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("You")
                .allow_empty(true)
                .interact_text()?;
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match input.to_lowercase().as_str() {
                "quit" | "exit" | "bye" => {
                    session.quit();
                    println!("{}", "Goodbye!".green());
                    break;
                }
                "help" => {
                    render::print_chat_help();
                    continue;
                }
                "history" => {
                    if session.history().is_empty() {
                        println!("{}", "No conversation yet.".yellow());
                    }
                    for turn in session.history().turns() {
                        render::print_turn(turn);
                    }
                    continue;
                }
                "clear" => {
                    if ask_confirmation("Clear the conversation history?", false)? {
                        let removed = session.clear()?;
                        println!("{}", format!("Cleared {} turns.", removed).green());
                    }
                    continue;
                }
                "summary" => {
                    println!("{}", "Summarising...".cyan());
                    match session.summary().await? {
                        None => println!("{}", "Nothing to summarise yet.".yellow()),
                        Some(Ok(text)) => println!("{} {}", "Summary:".green().bold(), text),
                        Some(Err(e)) => println!("{} {}", "Summary failed:".red(), e),
                    }
                    continue;
                }
                _ => {}
            }

            let cancel = CancellationToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };
            println!("{}", "Thinking...".dimmed());
            let outcome = session.send_cancellable(input, &cancel).await;
            watcher.abort();

            match outcome? {
                TurnOutcome::Reply { text, .. } => {
                    println!("{} {}", "Assistant:".green().bold(), text)
                }
                TurnOutcome::Rejected { reason } => {
                    println!("{} {}", "Blocked:".yellow().bold(), reason.yellow())
                }
                TurnOutcome::Failed { message, .. } => {
                    println!("{} {}", "Error:".red().bold(), message)
                }
                TurnOutcome::Cancelled => println!("{}", "Cancelled.".yellow()),
            }
        }
        Ok(())
    }

    async fn handle_health(&self, services: &Services, json: bool) -> Result<()> {
        let service = HealthService::new(services.client.clone(), services.settings.model.clone());
        let report = service.run(&services.settings).await;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            render::print_health(&report);
        }
        if report.healthy() {
            Ok(())
        } else {
            Err(anyhow!("health check failed"))
        }
    }

    /// Used by `health` when settings cannot even be loaded.
    fn print_configuration_failure(err: &anyhow::Error) {
        println!("{}", "Health check".bold());
        println!("  {} {:<16} {}", "✗".red(), "configuration", err);
        let extractor = health_service::extractor_status();
        let mark = if extractor.healthy { "✓".green() } else { "✗".red() };
        println!("  {} {:<16} {}", mark, extractor.name, extractor.detail);
    }
}
