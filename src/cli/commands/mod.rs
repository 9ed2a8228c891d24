//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod run;
pub mod validate;
pub mod version;

use crate::cli::args::{Cli, Commands};
use crate::error::GoalTrackError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub fn dispatch(cli: Cli) -> Result<(), GoalTrackError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cli.quiet),
        Commands::Validate(args) => validate::run(&args, cli.quiet),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
