//! Logging and observability setup for relayproc
//!
//! The runner crate only emits `tracing` events; this module installs the
//! subscriber that renders them for the CLI.

use std::io::IsTerminal;
use tracing::{Level, span};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "RELAYPROC_LOG";

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and `NO_COLOR` is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Directives used when neither `RELAYPROC_LOG` nor `RUST_LOG` is set.
#[must_use]
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "relayproc=debug,relayproc_runner=debug,info"
    } else {
        "relayproc=info,relayproc_runner=info,warn"
    }
}

/// Build the filter from `RELAYPROC_LOG`, then `RUST_LOG`, then the defaults.
fn build_filter(verbose: bool) -> EnvFilter {
    let from_env = std::env::var(LOG_ENV_VAR)
        .ok()
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
        .and_then(|directives| EnvFilter::try_new(directives).ok());

    from_env
        .or_else(|| EnvFilter::try_new(default_directives(verbose)).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize the tracing subscriber.
///
/// Events go to stderr so they never interleave with a child's relayed stdout.
///
/// # Arguments
/// * `verbose` - Lower the default filter to `debug` and show event targets
/// * `json` - Emit one JSON object per event instead of compact text
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = build_filter(verbose);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        // Compact format: human-readable, minimal
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(verbose)
                    .with_thread_names(verbose)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span covering one child process, from launch to teardown.
#[must_use]
pub fn process_span(command: &str) -> tracing::Span {
    span!(Level::INFO, "process", command = %command)
}
