//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments
//! - Initializes logging
//! - Discovers and loads Config
//! - Dispatches to command handlers
//! - Handles all error output

use clap::Parser;

use relayproc_config::{CliArgs, Config};
use relayproc_utils::exit_codes::exit_code_for;
use relayproc_utils::logging::{init_tracing, process_span};
use relayproc_utils::{ExitCode, RelayprocError, UserFriendlyError, error::render_report};

use super::args::{Cli, Commands};
use super::commands;

/// Main CLI execution function.
///
/// Handles ALL output including errors and returns `Err(ExitCode)` for any
/// non-zero exit, including a child's own non-zero exit code. main.rs only
/// calls `std::process::exit(code.as_i32())`.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.verbose, cli.log_json) {
        eprintln!("warning: logging is unavailable: {err}");
    }

    let cli_args = match &cli.command {
        Commands::Run(args) | Commands::Plan(args) => args.cli_args(cli.config.clone()),
        Commands::Config { .. } => CliArgs {
            config_path: cli.config.clone(),
            ..CliArgs::default()
        },
    };

    // Discover and load configuration
    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", render_report(&err));
            return Err(ExitCode::CLI_ARGS);
        }
    };
    if let Some(path) = &config.config_path {
        tracing::debug!(path = %path.display(), "loaded configuration file");
    }

    let result = match &cli.command {
        Commands::Run(args) => {
            let command = args
                .command
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            let span = process_span(&command);
            let _entered = span.enter();
            commands::execute_run_command(args, &config)
        }
        Commands::Plan(args) => commands::execute_plan_command(args, &config),
        Commands::Config { json } => commands::execute_config_command(*json, &config),
    };

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(error) => {
            if let Some(err) = error.downcast_ref::<RelayprocError>() {
                eprintln!("{}", err.display_for_user());
                tracing::debug!(category = %err.category(), "command failed");
            } else {
                eprintln!("✗ Unexpected error: {error:#}");
            }
            Err(exit_code_for(&error))
        }
    }
}
