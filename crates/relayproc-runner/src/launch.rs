use std::fs::{File, OpenOptions};
use std::io::{self, PipeReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::builder::ProcessConfiguration;
use crate::endpoint::{InputStream, OutputStream, RawOutput};
use crate::error::LaunchError;
use crate::process::{LaunchedProcess, ManagedProcess};
use crate::relay_buffer::RelayBuffer;
use crate::settings::RelaySettings;
use crate::topology::{Route, TopologyPlan, plan_topology};
use crate::types::{StdStream, StreamConfig, StreamPolicy};
use crate::worker::{ErrorAggregate, LogSink, Pump, RelayWorker};

/// Spawn the child for an already validated configuration and wire up its
/// endpoints and relay workers.
pub(crate) fn launch(config: ProcessConfiguration) -> Result<ManagedProcess, LaunchError> {
    let plan = plan_topology(&config);
    let merged = config.is_merged();
    let command_line = config.command_line();
    let program = config
        .executable()
        .map(|exe| exe.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut cmd = config.to_command();
    cmd.stdin(input_stdio(config.stream(StdStream::Stdin))?);
    let merged_reader = if merged {
        wire_merged(&mut cmd, config.stream(StdStream::Stdout))?
    } else {
        cmd.stdout(output_stdio(StdStream::Stdout, config.stream(StdStream::Stdout))?);
        cmd.stderr(output_stdio(StdStream::Stderr, config.stream(StdStream::Stderr))?);
        None
    };

    let spawned = cmd.spawn();
    // the command still owns the parent's copy of the merged pipe's write end
    drop(cmd);
    let mut child = spawned.map_err(|source| LaunchError::Spawn { program, source })?;
    let pid = child.id();

    let errors = ErrorAggregate::default();
    let wired = wire_streams(
        &mut child,
        pid,
        &plan,
        merged_reader,
        config.settings(),
        &errors,
    );
    let streams = match wired {
        Ok(streams) => streams,
        Err(err) => {
            if let Err(kill_err) = child.kill() {
                tracing::warn!(pid, error = %kill_err, "could not kill half-launched child");
            }
            if let Err(wait_err) = child.wait() {
                tracing::warn!(pid, error = %wait_err, "could not reap half-launched child");
            }
            return Err(err);
        }
    };

    tracing::info!(pid, command = %command_line, "started");
    tracing::debug!(
        pid,
        stdin = ?plan.stdin,
        stdout = ?plan.stdout,
        stderr = ?plan.stderr,
        workers = streams.workers.len(),
        "stream topology"
    );

    Ok(ManagedProcess::from_launch(LaunchedProcess {
        pid,
        command_line,
        plan,
        child,
        stdin: streams.stdin,
        stdout: streams.stdout,
        stderr: streams.stderr,
        workers: streams.workers,
        errors,
    }))
}

// ============================================================================
// Stdio for the native command
// ============================================================================

fn input_stdio(config: &StreamConfig) -> Result<Stdio, LaunchError> {
    Ok(match config.policy {
        StreamPolicy::Interactive => Stdio::piped(),
        StreamPolicy::Discarded | StreamPolicy::Logged => Stdio::null(),
        StreamPolicy::Inherited => Stdio::inherit(),
        StreamPolicy::FileRedirect => Stdio::from(open_redirect(StdStream::Stdin, config)?),
    })
}

fn output_stdio(stream: StdStream, config: &StreamConfig) -> Result<Stdio, LaunchError> {
    Ok(match config.policy {
        StreamPolicy::Interactive | StreamPolicy::Discarded | StreamPolicy::Logged => {
            Stdio::piped()
        }
        StreamPolicy::Inherited => Stdio::inherit(),
        StreamPolicy::FileRedirect => Stdio::from(open_redirect(stream, config)?),
    })
}

/// Point stdout and stderr at one shared channel. Returns the read end when
/// the parent needs to service it.
fn wire_merged(cmd: &mut Command, config: &StreamConfig) -> Result<Option<PipeReader>, LaunchError> {
    match config.policy {
        StreamPolicy::Interactive | StreamPolicy::Discarded | StreamPolicy::Logged => {
            let (reader, writer) = io::pipe().map_err(|source| LaunchError::Pipe { source })?;
            let second = writer
                .try_clone()
                .map_err(|source| LaunchError::Pipe { source })?;
            cmd.stdout(writer);
            cmd.stderr(second);
            Ok(Some(reader))
        }
        StreamPolicy::Inherited => {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
            Ok(None)
        }
        StreamPolicy::FileRedirect => {
            let file = open_redirect(StdStream::Stdout, config)?;
            let second = file.try_clone().map_err(|source| LaunchError::Redirect {
                stream: StdStream::Stderr,
                path: redirect_path(config),
                source,
            })?;
            cmd.stdout(file);
            cmd.stderr(second);
            Ok(None)
        }
    }
}

fn open_redirect(stream: StdStream, config: &StreamConfig) -> Result<File, LaunchError> {
    let Some(target) = &config.target else {
        return Err(LaunchError::Redirect {
            stream,
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no redirect target"),
        });
    };

    let opened = if stream.is_output() {
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(target.append)
            .truncate(!target.append)
            .open(&target.path)
    } else {
        File::open(&target.path)
    };

    opened.map_err(|source| LaunchError::Redirect {
        stream,
        path: target.path.clone(),
        source,
    })
}

fn redirect_path(config: &StreamConfig) -> PathBuf {
    config
        .target
        .as_ref()
        .map(|target| target.path.clone())
        .unwrap_or_default()
}

// ============================================================================
// Endpoints and workers
// ============================================================================

struct WiredStreams {
    stdin: InputStream,
    stdout: OutputStream,
    stderr: OutputStream,
    workers: Vec<RelayWorker>,
}

fn wire_streams(
    child: &mut Child,
    pid: u32,
    plan: &TopologyPlan,
    merged_reader: Option<PipeReader>,
    settings: &RelaySettings,
    errors: &ErrorAggregate,
) -> Result<WiredStreams, LaunchError> {
    let mut workers = Vec::new();
    let mut spawn = |stream: StdStream, pump: Pump, buffer: Option<RelayBuffer>| {
        RelayWorker::spawn(stream, pump, buffer, pid, settings, errors.clone())
            .map(|worker| workers.push(worker))
            .map_err(|source| LaunchError::Worker { stream, source })
    };

    let stdin = match plan.stdin {
        Route::Direct => InputStream::pipe(require(child.stdin.take(), StdStream::Stdin)?),
        Route::Relayed => {
            let pipe = require(child.stdin.take(), StdStream::Stdin)?;
            let (buffer, writer, reader) = RelayBuffer::split();
            spawn(
                StdStream::Stdin,
                Pump::Flush {
                    source: reader,
                    sink: pipe,
                },
                Some(buffer),
            )?;
            InputStream::relay(writer)
        }
        _ => InputStream::null(),
    };

    let stdout_source = match merged_reader {
        Some(reader) => Some(RawOutput::Merged(reader)),
        None => child.stdout.take().map(RawOutput::Stdout),
    };
    let stdout = wire_output(StdStream::Stdout, plan.stdout, stdout_source, pid, settings, &mut spawn)?;

    let stderr = match plan.stderr {
        Route::Alias => stdout.clone(),
        route => {
            let source = child.stderr.take().map(RawOutput::Stderr);
            wire_output(StdStream::Stderr, route, source, pid, settings, &mut spawn)?
        }
    };

    Ok(WiredStreams {
        stdin,
        stdout,
        stderr,
        workers,
    })
}

fn wire_output(
    stream: StdStream,
    route: Route,
    source: Option<RawOutput>,
    pid: u32,
    settings: &RelaySettings,
    spawn: &mut impl FnMut(StdStream, Pump, Option<RelayBuffer>) -> Result<(), LaunchError>,
) -> Result<OutputStream, LaunchError> {
    Ok(match route {
        Route::Direct => OutputStream::pipe(require(source, stream)?),
        Route::Relayed => {
            let (buffer, writer, reader) = RelayBuffer::split();
            spawn(
                stream,
                Pump::Fill {
                    source: require(source, stream)?,
                    sink: writer,
                },
                Some(buffer),
            )?;
            OutputStream::relay(reader)
        }
        Route::Discard => {
            spawn(
                stream,
                Pump::Discard {
                    source: require(source, stream)?,
                },
                None,
            )?;
            OutputStream::null()
        }
        Route::Log => {
            spawn(
                stream,
                Pump::Log {
                    source: require(source, stream)?,
                    sink: LogSink::new(settings, pid, stream),
                },
                None,
            )?;
            OutputStream::null()
        }
        Route::Os | Route::Alias => OutputStream::null(),
    })
}

fn require<T>(pipe: Option<T>, stream: StdStream) -> Result<T, LaunchError> {
    pipe.ok_or(LaunchError::MissingPipe { stream })
}
