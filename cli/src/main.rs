use clap::Parser;
use colored::Colorize;
use domain::error::AnalyzerError;
use presentation::cli::{Cli, CliApp};
use std::process::ExitCode;

/// Exit status for an error that escaped the command: configuration problems
/// get their own code so scripts can tell them apart.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AnalyzerError>() {
        Some(AnalyzerError::Configuration(_)) => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    shared::logging::init(cli.verbose);

    let app = CliApp::new();
    match app.run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_exit_with_two() {
        let err = anyhow::Error::new(AnalyzerError::Configuration("missing key".into()));
        assert_eq!(exit_code(&err), 2);
        let err =
            anyhow::Error::new(AnalyzerError::Decode("bad".into())).context("analysing x.wav");
        assert_eq!(exit_code(&err), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("all 2 analyses failed")), 1);
    }
}
