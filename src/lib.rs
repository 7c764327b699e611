//! relayproc - run external processes with deadlock-free, relayed standard streams
//!
//! relayproc can be used in two ways:
//! - **CLI**: `relayproc run -- PROGRAM [ARGS...]` launches a program and
//!   connects its interactive streams to the terminal
//! - **Library**: build a [`ManagedProcess`] with [`ProcessBuilder`] and read
//!   or write its streams from your own threads
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::io::Read;
//! use relayproc::{ProcessBuilder, StreamPolicy};
//!
//! let process = ProcessBuilder::command("ls")
//!     .arg("-l")
//!     .stderr(StreamPolicy::Logged)
//!     .create()?;
//!
//! let mut listing = String::new();
//! process.stdout().read_to_string(&mut listing)?;
//! let code = process.wait_for()?;
//! println!("ls exited with {code}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Stable Public API
//!
//! - [`ProcessBuilder`], [`ProcessConfiguration`] and [`ManagedProcess`]
//! - [`TextProcess`] for line-oriented access
//! - [`Config`] and [`ConfigBuilder`] - configuration management
//! - [`RelayprocError`] and [`ExitCode`]
//!
//! The member crates (`relayproc_runner`, `relayproc_config`,
//! `relayproc_utils`) are re-exported for everything else.

pub use relayproc_config::{CliArgs, Config, ConfigBuilder, ConfigSource};
pub use relayproc_runner::{
    ConfigurationError, EndpointKind, InputStream, LaunchError, ManagedProcess, OutputStream,
    ProcessBuilder, ProcessConfiguration, RelayError, RelaySettings, RunnerError, StdStream,
    StreamConfig, StreamPolicy, TerminationError, TextProcess, TopologyPlan, plan_topology,
};
pub use relayproc_utils::{ExitCode, RelayprocError, UserFriendlyError};

#[doc(hidden)]
pub use relayproc_config as config;
#[doc(hidden)]
pub use relayproc_runner as runner;
#[doc(hidden)]
pub use relayproc_utils as utils;

pub mod cli;
