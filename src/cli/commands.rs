//! Command implementations for the relayproc CLI

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use relayproc_config::Config;
use relayproc_runner::{
    EndpointKind, InputStream, OutputStream, ProcessBuilder, ProcessConfiguration, StdStream,
    StreamConfig, TopologyPlan, plan_topology,
};
use relayproc_utils::{ExitCode, RelayprocError};

use super::args::ProcessArgs;

/// Validated process configuration for `run` and `plan`.
///
/// Stream policies and relay settings come from `config`, which already
/// carries the CLI stream overrides.
pub(crate) fn build_process(
    args: &ProcessArgs,
    config: &Config,
) -> Result<ProcessConfiguration, RelayprocError> {
    let (program, program_args) = args
        .command
        .split_first()
        .map_or((None, &[][..]), |(program, rest)| (Some(program), rest));

    let mut builder = ProcessBuilder::new();
    if let Some(program) = program {
        builder = builder.executable(program);
    }
    builder = builder.args(program_args);

    if args.clear_env {
        builder = builder.env_clear();
    }
    for key in &args.unset {
        builder = builder.env_remove(key);
    }
    for (key, value) in &args.env {
        builder = builder.env(key, value);
    }
    if let Some(dir) = &args.cwd {
        builder = builder.current_dir(dir);
    }

    let builder = config.apply(builder)?;
    Ok(builder.build()?)
}

// ============================================================================
// relayproc plan
// ============================================================================

#[derive(Debug, Serialize)]
struct PlanOutput {
    command: String,
    merged: bool,
    streams: BTreeMap<StdStream, StreamConfig>,
    topology: TopologyPlan,
    worker_count: usize,
}

/// Print the topology that `run` would set up, as pretty JSON.
pub(crate) fn execute_plan_command(args: &ProcessArgs, config: &Config) -> Result<ExitCode> {
    let process = build_process(args, config)?;
    let topology = plan_topology(&process);

    let streams = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr]
        .into_iter()
        .map(|stream| (stream, process.stream(stream).clone()))
        .collect();

    let output = PlanOutput {
        command: process.command_line(),
        merged: process.is_merged(),
        streams,
        topology,
        worker_count: topology.worker_count(),
    };

    let json = serde_json::to_string_pretty(&output).context("Failed to serialize plan")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// relayproc run
// ============================================================================

/// Launch the program, connect its interactive streams to our own, and wait.
///
/// Returns the program's exit code on success.
pub(crate) fn execute_run_command(args: &ProcessArgs, config: &Config) -> Result<ExitCode> {
    let process = build_process(args, config)?
        .create()
        .map_err(RelayprocError::from)?;
    let pid = process.pid();

    // stdin is fed from a detached thread: it may stay blocked on our own
    // stdin long after the child has exited
    let stdin = process.stdin();
    if stdin.kind() != EndpointKind::Null {
        let spawned = thread::Builder::new()
            .name(format!("relayproc-stdin-{pid}"))
            .spawn(move || forward_stdin(stdin));
        if let Err(err) = spawned {
            tracing::warn!(pid, error = %err, "could not start stdin forwarder");
        }
    }

    let mut outputs = Vec::new();
    outputs.push(spawn_output(process.stdout(), StdStream::Stdout, pid)?);
    if !process.is_merged() {
        outputs.push(spawn_output(process.stderr(), StdStream::Stderr, pid)?);
    }

    // a direct pipe is released at teardown, so forwarders finish first
    for handle in outputs.into_iter().flatten() {
        if handle.join().is_err() {
            tracing::warn!(pid, "output forwarder panicked");
        }
    }

    let code = process.wait_for().map_err(RelayprocError::from)?;
    Ok(ExitCode::from_i32(code))
}

fn forward_stdin(mut child_stdin: InputStream) {
    let mut parent = io::stdin().lock();
    if let Err(err) = io::copy(&mut parent, &mut child_stdin) {
        tracing::debug!(error = %err, "stopped forwarding stdin");
    }
    if let Err(err) = child_stdin.close() {
        tracing::debug!(error = %err, "failed to close child stdin");
    }
}

fn spawn_output(
    stream: OutputStream,
    which: StdStream,
    pid: u32,
) -> Result<Option<JoinHandle<()>>> {
    if stream.kind() == EndpointKind::Null {
        return Ok(None);
    }
    let handle = thread::Builder::new()
        .name(format!("relayproc-{which}-{pid}"))
        .spawn(move || forward_output(stream, which))
        .with_context(|| format!("Failed to start {which} forwarder"))?;
    Ok(Some(handle))
}

fn forward_output(mut stream: OutputStream, which: StdStream) {
    let result = match which {
        StdStream::Stderr => copy_flushing(&mut stream, &mut io::stderr()),
        _ => copy_flushing(&mut stream, &mut io::stdout()),
    };
    if let Err(err) = result {
        tracing::debug!(stream = %which, error = %err, "stopped forwarding output");
    }
    // a closed reader lets the child see a broken pipe instead of blocking
    stream.close();
}

/// Copy chunk by chunk, flushing after each read so interactive output is not
/// held back by our own buffering.
fn copy_flushing(reader: &mut impl Read, writer: &mut impl Write) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
    Ok(total)
}

// ============================================================================
// relayproc config
// ============================================================================

#[derive(Debug, Serialize)]
struct ConfigEntry {
    value: String,
    source: String,
}

/// Print the effective configuration with per-key sources.
pub(crate) fn execute_config_command(json: bool, config: &Config) -> Result<ExitCode> {
    let effective: BTreeMap<String, ConfigEntry> = config
        .effective_config()
        .into_iter()
        .map(|(key, (value, source))| (key, ConfigEntry { value, source }))
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&effective)
            .context("Failed to serialize configuration")?;
        println!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    match &config.config_path {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none)"),
    }
    for (key, entry) in &effective {
        println!("  {key} = {} [{}]", entry.value, entry.source);
    }
    Ok(ExitCode::SUCCESS)
}
