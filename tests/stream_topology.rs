//! Per-policy behavior of the standard streams of a launched child.

#![cfg(unix)]

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, OnceLock};

use relayproc::runner::{CHILD_LOG_TARGET, Route};
use relayproc::{EndpointKind, ProcessBuilder, RelaySettings, StdStream, StreamPolicy};
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

fn sh(script: &str) -> ProcessBuilder {
    ProcessBuilder::command("/bin/sh").args(["-c", script])
}

/// One child output line as it reached the subscriber.
#[derive(Debug, Default)]
struct ChildLine {
    message: String,
    pid: Option<u64>,
    stream: Option<String>,
}

impl Visit for ChildLine {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "pid" {
            self.pid = Some(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "stream" {
            self.stream = Some(value.to_string());
        }
    }
}

#[derive(Clone, Default)]
struct ChildLineLayer(Arc<Mutex<Vec<ChildLine>>>);

impl<S: tracing::Subscriber> Layer<S> for ChildLineLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != CHILD_LOG_TARGET {
            return;
        }
        let mut line = ChildLine::default();
        event.record(&mut line);
        self.0.lock().unwrap().push(line);
    }
}

/// Relay workers log from their own threads, so the collector is global.
fn child_lines() -> Arc<Mutex<Vec<ChildLine>>> {
    static LINES: OnceLock<Arc<Mutex<Vec<ChildLine>>>> = OnceLock::new();
    Arc::clone(LINES.get_or_init(|| {
        let layer = ChildLineLayer::default();
        let lines = Arc::clone(&layer.0);
        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layer))
            .expect("no other subscriber in this test binary");
        lines
    }))
}

#[test]
fn test_discarded_stdout_and_redirected_stderr() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("stderr.log");

    let process = sh("echo to-stdout; printf 'first\\nsecond\\n' >&2")
        .stdout(StreamPolicy::Discarded)
        .write_stderr_to(&log, false)
        .create()
        .unwrap();

    assert_eq!(process.wait_for().unwrap(), 0);
    assert_eq!(fs::read_to_string(&log).unwrap(), "first\nsecond\n");

    let mut drained = Vec::new();
    assert_eq!(process.stdout().read_to_end(&mut drained).unwrap(), 0);
    assert_eq!(process.stdout().kind(), EndpointKind::Null);
}

#[test]
fn test_single_interactive_stream_gets_the_raw_pipe() {
    let process = sh("echo direct")
        .stdin(StreamPolicy::Discarded)
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();

    assert_eq!(process.plan().stdout, Route::Direct);
    assert_eq!(process.stdout().kind(), EndpointKind::Pipe);
    assert_eq!(process.worker_streams(), vec![StdStream::Stderr]);

    let mut out = String::new();
    process.stdout().read_to_string(&mut out).unwrap();
    assert_eq!(out, "direct\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_always_relay_relays_a_lone_interactive_stream() {
    let settings = RelaySettings {
        always_relay: true,
        ..RelaySettings::default()
    };
    let process = sh("echo relayed")
        .stdin(StreamPolicy::Discarded)
        .stderr(StreamPolicy::Discarded)
        .settings(settings)
        .create()
        .unwrap();

    assert_eq!(process.stdout().kind(), EndpointKind::Relay);

    let mut out = String::new();
    process.stdout().read_to_string(&mut out).unwrap();
    assert_eq!(out, "relayed\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_two_interactive_streams_are_both_relayed() {
    let process = sh("cat; echo done >&2")
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();

    assert_eq!(process.stdin().kind(), EndpointKind::Relay);
    assert_eq!(process.stdout().kind(), EndpointKind::Relay);

    let mut stdin = process.stdin();
    stdin.write_all(b"through the relay\n").unwrap();
    stdin.close().unwrap();

    let mut out = String::new();
    process.stdout().read_to_string(&mut out).unwrap();
    assert_eq!(out, "through the relay\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_merged_streams_share_one_channel() {
    let process = sh("echo out; echo err >&2")
        .stdin(StreamPolicy::Discarded)
        .merge_streams(true)
        .create()
        .unwrap();

    assert!(process.is_merged());
    assert_eq!(process.plan().stderr, Route::Alias);
    assert!(process.stdout().ptr_eq(&process.stderr()));

    let mut out = String::new();
    process.stderr().read_to_string(&mut out).unwrap();
    assert_eq!(out, "out\nerr\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_discarded_flood_never_blocks_the_child() {
    // several pipe capacities of output nobody reads
    let process = sh("i=0; while [ $i -lt 4000 ]; do echo \
        xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx; \
        i=$((i+1)); done; echo finished >&2")
        .stdin(StreamPolicy::Discarded)
        .stdout(StreamPolicy::Discarded)
        .create()
        .unwrap();

    let mut err = String::new();
    process.stderr().read_to_string(&mut err).unwrap();
    assert_eq!(err, "finished\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_logged_output_is_emitted_as_child_events() {
    let lines = child_lines();
    let process = sh("echo one; echo two; echo done >&2")
        .stdin(StreamPolicy::Discarded)
        .stdout(StreamPolicy::Logged)
        .create()
        .unwrap();

    assert_eq!(process.plan().stdout, Route::Log);
    assert_eq!(process.stdout().kind(), EndpointKind::Null);

    let mut err = String::new();
    process.stderr().read_to_string(&mut err).unwrap();
    assert_eq!(err, "done\n");
    assert_eq!(process.wait_for().unwrap(), 0);

    // the worker is joined by wait_for, so every line has been emitted
    let pid = u64::from(process.pid());
    let lines = lines.lock().unwrap();
    let ours: Vec<&ChildLine> = lines.iter().filter(|line| line.pid == Some(pid)).collect();
    let messages: Vec<&str> = ours.iter().map(|line| line.message.as_str()).collect();
    assert_eq!(messages, vec!["one", "two"]);
    assert!(ours.iter().all(|line| line.stream.as_deref() == Some("stdout")));
}

#[test]
fn test_append_redirect_keeps_existing_content() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.log");
    fs::write(&out, "first\n").unwrap();

    let process = sh("echo second")
        .stdin(StreamPolicy::Discarded)
        .write_stdout_to(&out, true)
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();

    assert_eq!(process.plan().stdout, Route::Os);
    assert_eq!(process.wait_for().unwrap(), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "first\nsecond\n");
}

#[test]
fn test_truncating_redirect_replaces_content() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.log");
    fs::write(&out, "stale content that must disappear\n").unwrap();

    let process = sh("echo fresh")
        .stdin(StreamPolicy::Discarded)
        .write_stdout_to(&out, false)
        .create()
        .unwrap();

    assert_eq!(process.wait_for().unwrap(), 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), "fresh\n");
}

#[test]
fn test_stdin_read_from_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, "from a file\n").unwrap();

    let process = ProcessBuilder::command("cat")
        .read_stdin_from(&input)
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();

    assert_eq!(process.stdin().kind(), EndpointKind::Null);

    let mut out = String::new();
    process.stdout().read_to_string(&mut out).unwrap();
    assert_eq!(out, "from a file\n");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_missing_stdin_file_is_a_launch_error() {
    let dir = TempDir::new().unwrap();
    let err = ProcessBuilder::command("cat")
        .read_stdin_from(dir.path().join("absent.txt"))
        .create()
        .unwrap_err();

    assert!(matches!(
        err,
        relayproc::RunnerError::Launch(relayproc::LaunchError::Redirect { .. })
    ));
}

#[test]
fn test_writes_after_close_fail() {
    let process = ProcessBuilder::command("cat").create().unwrap();
    let mut stdin = process.stdin();
    stdin.close().unwrap();
    assert!(stdin.is_closed());
    assert!(stdin.write_all(b"late").is_err());
    assert_eq!(process.wait_for().unwrap(), 0);
}
