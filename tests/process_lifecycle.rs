//! Lifecycle tests for ManagedProcess: graceful and forced shutdown,
//! idempotence, concurrent teardown and close hooks.
//!
//! All tests drive real children through `/bin/sh`, so they are unix-only.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use relayproc::runner::ShutdownKind;
use relayproc::{EndpointKind, LaunchError, ProcessBuilder, RunnerError, StreamPolicy};

const SIGKILL_EXIT: i32 = 128 + 9;

fn sh(script: &str) -> ProcessBuilder {
    ProcessBuilder::command("/bin/sh").args(["-c", script])
}

/// Exit code of a forced shutdown, whether or not teardown reported errors.
fn killed_code(outcome: Result<i32, relayproc::TerminationError>) -> Option<i32> {
    match outcome {
        Ok(code) => Some(code),
        Err(err) => {
            assert_eq!(err.kind, ShutdownKind::Forced);
            err.exit_code
        }
    }
}

#[test]
fn test_echo_round_trip_with_three_interactive_streams() {
    let process = sh("read line; echo \"$line\"; echo diagnostic >&2")
        .create()
        .unwrap();
    assert_eq!(process.plan().interactive_count, 3);

    let mut stdin = process.stdin();
    stdin.write_all(b"ping\n").unwrap();

    let mut stdout = BufReader::new(process.stdout());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ping\n");

    let mut diagnostics = String::new();
    process.stderr().read_to_string(&mut diagnostics).unwrap();
    assert_eq!(diagnostics, "diagnostic\n");

    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_large_payload_through_cat_does_not_deadlock() {
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let process = ProcessBuilder::command("cat").create().unwrap();

    // the relay buffer absorbs everything while cat is still blocked on its
    // own stdout
    let mut stdin = process.stdin();
    stdin.write_all(&payload).unwrap();
    stdin.close().unwrap();

    let mut echoed = Vec::with_capacity(payload.len());
    process.stdout().read_to_end(&mut echoed).unwrap();

    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload, "cat output differs from its input");
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_reader_running_during_wait_for_gets_all_output() {
    for _ in 0..50 {
        let process = sh("printf 'hello\\n'")
            .stderr(StreamPolicy::Discarded)
            .create()
            .unwrap();
        assert_eq!(process.stdout().kind(), EndpointKind::Relay);

        let (output, code) = thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut output = Vec::new();
                process.stdout().read_to_end(&mut output).unwrap();
                output
            });
            let code = process.wait_for().unwrap();
            (reader.join().unwrap(), code)
        });

        assert_eq!(code, 0);
        assert_eq!(output, b"hello\n");
    }
}

#[test]
fn test_output_left_unread_stays_readable_after_wait_for() {
    let process = sh("printf 'late\\n'")
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();
    assert_eq!(process.wait_for().unwrap(), 0);

    let mut output = String::new();
    process.stdout().read_to_string(&mut output).unwrap();
    assert_eq!(output, "late\n");
    assert!(process.stdout().is_closed());
}

#[test]
fn test_wait_for_is_idempotent() {
    let process = sh("exit 3").create().unwrap();
    assert_eq!(process.wait_for().unwrap(), 3);
    assert_eq!(process.wait_for().unwrap(), 3);
    assert_eq!(process.try_exit_code(), Some(3));
}

#[test]
fn test_close_after_wait_for_is_a_no_op() {
    let process = sh("exit 0").create().unwrap();
    assert_eq!(process.wait_for().unwrap(), 0);
    process.close().unwrap();
    assert_eq!(process.wait_for().unwrap(), 0);
}

#[test]
fn test_close_kills_a_running_child_promptly() {
    let process = ProcessBuilder::command("sleep").arg("30").create().unwrap();
    let started = Instant::now();

    let _ = process.close();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(process.try_exit_code(), Some(SIGKILL_EXIT));
    // a later wait_for returns the cached forced outcome
    assert_eq!(killed_code(process.wait_for()), Some(SIGKILL_EXIT));
}

#[test]
fn test_close_unblocks_a_concurrent_wait_for() {
    let process = ProcessBuilder::command("sleep").arg("30").create().unwrap();

    let waited = thread::scope(|scope| {
        let waiter = scope.spawn(|| process.wait_for());
        thread::sleep(Duration::from_millis(200));
        let _ = process.close();
        waiter.join().unwrap()
    });

    assert_eq!(killed_code(waited), Some(SIGKILL_EXIT));
}

#[test]
fn test_before_close_hook_runs_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let process = sh("exit 0").create().unwrap();

    let counter = Arc::clone(&calls);
    process.before_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    process.wait_for().unwrap();
    process.close().unwrap();
    process.wait_for().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_before_close_hooks_chain_in_registration_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let process = ProcessBuilder::command("sleep").arg("30").create().unwrap();

    for label in ["first", "second"] {
        let order = Arc::clone(&order);
        process.before_close(move |_| order.lock().unwrap().push(label));
    }
    let _ = process.close();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn test_dropping_a_running_process_kills_it() {
    let process = ProcessBuilder::command("sleep")
        .arg("30")
        .stdin(StreamPolicy::Discarded)
        .stdout(StreamPolicy::Discarded)
        .stderr(StreamPolicy::Discarded)
        .create()
        .unwrap();
    let pid = process.pid();
    drop(process);

    // reaped on drop, so signal 0 finds nothing (ESRCH)
    let pid = Pid::from_raw(i32::try_from(pid).unwrap());
    assert!(kill(pid, None).is_err(), "child {pid} survived drop");
}

#[test]
fn test_missing_program_is_a_launch_error() {
    let err = ProcessBuilder::command("/nonexistent/relayproc-missing-program")
        .create()
        .unwrap_err();

    match err {
        RunnerError::Launch(LaunchError::Spawn { program, .. }) => {
            assert!(program.contains("relayproc-missing-program"));
        }
        other => panic!("expected a spawn failure, got {other:?}"),
    }
}

#[test]
fn test_invalid_configuration_launches_nothing() {
    let err = ProcessBuilder::new().arg("orphan").create().unwrap_err();
    assert!(matches!(err, RunnerError::Configuration(_)));
}
