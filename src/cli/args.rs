//! CLI argument definitions
//!
//! All Clap derive structs for `goaltrack` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Goal-completion tracking over splitting and merging units.
#[derive(Parser, Debug)]
#[command(name = "goaltrack", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "GOALTRACK_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(
        long,
        value_enum,
        default_value = "human",
        global = true,
        env = "GOALTRACK_LOG_FORMAT"
    )]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a scenario and report every contract.
    Run(RunArgs),

    /// Validate scenario files without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML scenario file.
    #[arg(short, long, env = "GOALTRACK_SCENARIO")]
    pub scenario: PathBuf,

    /// Append the JSONL event stream to this file (`-` for stderr).
    #[arg(long)]
    pub events_file: Option<PathBuf>,

    /// Write the final save document (YAML) to this file.
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Continue from a save document written by `--save`.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output format for the final report.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_all_options() {
        let cli = Cli::try_parse_from([
            "goaltrack",
            "run",
            "--scenario",
            "s.yaml",
            "--events-file",
            "e.jsonl",
            "--save",
            "out.yaml",
            "--resume",
            "in.yaml",
            "--metrics",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.scenario, PathBuf::from("s.yaml"));
        assert!(args.metrics);
        assert_eq!(args.format, OutputFormat::Human);
        assert!(args.resume.is_some());
    }

    #[test]
    fn test_run_requires_scenario() {
        let result = Cli::try_parse_from(["goaltrack", "run"]);
        if std::env::var_os("GOALTRACK_SCENARIO").is_none() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["goaltrack", "validate"]).is_err());
        assert!(Cli::try_parse_from(["goaltrack", "validate", "a.yaml", "b.yaml"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["goaltrack", "version", "-vv", "--color", "never"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.color, ColorChoice::Never);
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["goaltrack", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
