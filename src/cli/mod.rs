//! CLI module for ClipBridge
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::toml_config::AppConfig;
use crate::adapters::tracing_log;

pub mod args;
pub mod commands;

/// ClipBridge export tool
///
/// Compiles export settings into a directive sequence, checks it against the
/// source tracks and runs the conversion in an isolated execution context.
#[derive(Parser)]
#[command(name = "clipbridge")]
#[command(about = "ClipBridge - compile, check and run video exports")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (default: search clipbridge.toml)
    #[arg(long, global = true, env = "CLIPBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, overrides the configuration
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compile export settings into directive tokens
    Compile(args::CompileArgs),
    /// Parse directive tokens back into settings
    Parse(args::ParseArgs),
    /// Resolve and validate tracks without converting
    Check(args::CheckArgs),
    /// Run an export to a file
    Export(args::ExportArgs),
    /// Preview the cues of one subtitle track
    Subtitles(args::SubtitlesArgs),
    /// List the named encoder presets
    Presets(args::PresetsArgs),
}

impl Cli {
    /// Configuration file and environment, then command-line overrides
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_json {
            config.logging.json = true;
        }
        Ok(config)
    }
}

/// Load configuration, install logging and dispatch the command
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    tracing_log::init(&config.logging);
    info!("Starting ClipBridge {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Compile(args) => commands::compile(args, &config).await,
        Commands::Parse(args) => commands::parse(args),
        Commands::Check(args) => commands::check(args, &config).await,
        Commands::Export(args) => commands::export(args, &config).await,
        Commands::Subtitles(args) => commands::subtitles(args, &config).await,
        Commands::Presets(args) => commands::presets(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_accepts_hyphenated_tokens() {
        let cli = Cli::try_parse_from([
            "clipbridge", "parse", "-o", "out.mp4", "--", "-ss", "1.000", "-map", "0:v:0", "-c:v", "libx264",
        ])
        .unwrap();
        match cli.command {
            Commands::Parse(args) => {
                assert_eq!(args.output_name, "out.mp4");
                assert_eq!(args.tokens, ["-ss", "1.000", "-map", "0:v:0", "-c:v", "libx264"]);
            }
            _ => panic!("expected parse"),
        }
    }

    #[test]
    fn test_crf_conflicts_with_bitrate() {
        let result = Cli::try_parse_from([
            "clipbridge", "compile", "--synthetic", "-i", "a.mp4", "--crf", "20", "--bitrate", "900",
        ]);
        assert!(result.is_err());
    }
}
