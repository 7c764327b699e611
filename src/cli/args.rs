//! CLI argument definitions and parsing structures
//!
//! This module defines the command-line interface structure using clap,
//! including the main `Cli` struct and the subcommand enum.

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use relayproc_config::CliArgs;

/// relayproc - run a program with deadlock-free, relayed standard streams
#[derive(Parser, Debug)]
#[command(name = "relayproc")]
#[command(about = "Run external programs with deadlock-free, relayed standard streams")]
#[command(long_about = r#"
relayproc launches a program and wires each of its standard streams according
to a policy. When more than one stream is interactive, each one is decoupled
from its OS pipe by an in-memory relay, so neither side can block the other.

EXAMPLES:
  # Pipe a large file through a filter; stdin and stdout are relayed
  relayproc run -- sort large.txt

  # Keep stdout interactive, send stderr to the structured logger
  relayproc run --stderr log -- make -j8

  # Merge stderr into stdout and append both to a file
  relayproc run --stdout append:build.log --stderr append:build.log --merge -- ./build.sh

  # Show how the streams would be wired, as JSON, without launching
  relayproc plan --stderr discard -- grep -r needle .

STREAM SPECS:
  interactive    the caller reads/writes the stream (default)
  discard        output is drained and dropped; stdin reads from the null device
  inherit        the child shares relayproc's own stream
  log            output lines are emitted as log events (stdout/stderr only)
  file:PATH      redirect to PATH, truncating
  append:PATH    redirect to PATH, appending (stdout/stderr only)

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is discovered by searching upward from CWD for .relayproc/config.toml
  Use --config to specify an explicit config file path
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log events as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a program and relay its standard streams
    ///
    /// Interactive streams are connected to relayproc's own stdin, stdout and
    /// stderr. relayproc exits with the program's exit code.
    ///
    /// EXAMPLES:
    ///   relayproc run -- cat notes.txt
    ///   relayproc run --stdin file:input.txt --stderr discard -- wc -l
    Run(ProcessArgs),

    /// Print the stream topology for a program as JSON without launching it
    ///
    /// EXAMPLES:
    ///   relayproc plan -- cat
    ///   relayproc plan --merge --always-relay -- sh -c 'echo hi'
    Plan(ProcessArgs),

    /// Show the effective configuration and where each value came from
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Process and stream options shared by `run` and `plan`
#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Stdin spec: interactive, discard, inherit or file:PATH
    #[arg(long, value_name = "SPEC")]
    pub stdin: Option<String>,

    /// Stdout spec: interactive, discard, inherit, log, file:PATH or append:PATH
    #[arg(long, value_name = "SPEC")]
    pub stdout: Option<String>,

    /// Stderr spec: interactive, discard, inherit, log, file:PATH or append:PATH
    #[arg(long, value_name = "SPEC")]
    pub stderr: Option<String>,

    /// Send stderr into the same channel as stdout
    #[arg(long)]
    pub merge: bool,

    /// Set an environment variable for the program (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Remove an environment variable for the program (repeatable)
    #[arg(long = "unset", value_name = "KEY")]
    pub unset: Vec<String>,

    /// Start the program with an empty environment
    #[arg(long)]
    pub clear_env: bool,

    /// Working directory for the program
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Relay every interactive stream, even when only one is interactive
    #[arg(long)]
    pub always_relay: bool,

    /// Program to run followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

impl ProcessArgs {
    /// Overrides for the configuration system; unset flags defer to the file.
    #[must_use]
    pub fn cli_args(&self, config_path: Option<PathBuf>) -> CliArgs {
        CliArgs {
            config_path,
            always_relay: self.always_relay.then_some(true),
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            merge: self.merge.then_some(true),
        }
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Build the clap command, e.g. for help rendering or completion generation.
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
