//! Deadlock-free execution of external processes
//!
//! Launches a child process and exposes its stdin/stdout/stderr as ordinary
//! byte or text streams. When more than one stream is interactive, each one
//! is decoupled from its OS pipe by an unbounded relay buffer and a dedicated
//! worker thread, so the caller can never deadlock against the child.
//!
//! # Security Model
//!
//! Executables and arguments are passed argv-style as discrete `OsString`
//! elements. No shell is ever involved.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::{Read, Write};
//! use relayproc_runner::ProcessBuilder;
//!
//! let process = ProcessBuilder::command("tr").args(["a-z", "A-Z"]).create()?;
//! process.stdin().write_all(b"hello\n")?;
//! process.stdin().close()?;
//!
//! let mut upper = String::new();
//! process.stdout().read_to_string(&mut upper)?;
//! assert_eq!(process.wait_for()?, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod endpoint;
pub mod error;
mod launch;
mod platform;
pub mod process;
pub mod relay_buffer;
pub mod settings;
pub mod text;
pub mod topology;
pub mod types;
pub mod worker;

pub use builder::{ProcessBuilder, ProcessConfiguration};
pub use endpoint::{EndpointKind, InputStream, OutputStream};
pub use error::{
    ConfigurationError, LaunchError, RelayError, RelayStage, Resource, RunnerError,
    ShutdownKind, TeardownFailure, TerminationError,
};
pub use platform::exit_code;
pub use process::ManagedProcess;
pub use relay_buffer::{BufferReader, BufferWriter, RelayBuffer};
pub use settings::RelaySettings;
pub use text::{TextLines, TextProcess, TextReader, TextWriter};
pub use topology::{Route, TopologyPlan, plan_topology};
pub use types::{RedirectTarget, StdStream, StreamConfig, StreamPolicy};
pub use worker::{CHILD_LOG_TARGET, RelayMode, RelayWorker};
