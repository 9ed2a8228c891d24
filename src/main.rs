//! `goaltrack` - goal-completion tracking engine

use clap::Parser;

use goaltrack::cli::args::Cli;
use goaltrack::cli::commands;
use goaltrack::error::ExitCode;
use goaltrack::observability::init_logging;

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    match commands::dispatch(cli) {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
