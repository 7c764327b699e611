use std::fmt;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};

use crate::endpoint::{InputStream, OutputStream};
use crate::error::{Resource, ShutdownKind, TeardownFailure, TerminationError};
use crate::platform;
use crate::topology::{Route, TopologyPlan};
use crate::types::StdStream;
use crate::worker::{ErrorAggregate, RelayWorker};

/// Fixed teardown order: output is drained before its endpoint is released
/// and stdin goes last.
const TEARDOWN_ORDER: [StdStream; 3] = [StdStream::Stdout, StdStream::Stderr, StdStream::Stdin];

type CloseHook = Box<dyn FnOnce(&ManagedProcess) + Send>;

#[derive(Debug, Clone)]
enum Lifecycle {
    Running,
    /// `wait_for()` is blocked on the child
    Waiting,
    /// a teardown is in progress
    Terminating,
    Closed(Result<i32, TerminationError>),
}

/// Everything the launcher hands over.
pub(crate) struct LaunchedProcess {
    pub(crate) pid: u32,
    pub(crate) command_line: String,
    pub(crate) plan: TopologyPlan,
    pub(crate) child: Child,
    pub(crate) stdin: InputStream,
    pub(crate) stdout: OutputStream,
    pub(crate) stderr: OutputStream,
    pub(crate) workers: Vec<RelayWorker>,
    pub(crate) errors: ErrorAggregate,
}

// ============================================================================
// ManagedProcess
// ============================================================================

/// A running child process with deadlock-free access to its standard streams.
///
/// Exactly one teardown happens: either graceful ([`wait_for`](Self::wait_for))
/// or forced ([`close`](Self::close)). Both are idempotent and safe to call
/// concurrently from different threads; later calls return the cached
/// outcome. Dropping a process that was never shut down kills it.
pub struct ManagedProcess {
    pid: u32,
    command_line: String,
    plan: TopologyPlan,
    child: Mutex<Child>,
    status: OnceLock<ExitStatus>,
    stdin: InputStream,
    stdout: OutputStream,
    stderr: OutputStream,
    workers: Mutex<Vec<RelayWorker>>,
    errors: ErrorAggregate,
    /// failures reported by close hooks, raised with the teardown outcome
    recorded: Mutex<Vec<TeardownFailure>>,
    lifecycle: Mutex<Lifecycle>,
    lifecycle_changed: Condvar,
    before_close: Mutex<Option<CloseHook>>,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("pid", &self.pid)
            .field("command_line", &self.command_line)
            .field("plan", &self.plan)
            .field("lifecycle", &*lock(&self.lifecycle))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl ManagedProcess {
    pub(crate) fn from_launch(launched: LaunchedProcess) -> Self {
        Self {
            pid: launched.pid,
            command_line: launched.command_line,
            plan: launched.plan,
            child: Mutex::new(launched.child),
            status: OnceLock::new(),
            stdin: launched.stdin,
            stdout: launched.stdout,
            stderr: launched.stderr,
            workers: Mutex::new(launched.workers),
            errors: launched.errors,
            recorded: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Running),
            lifecycle_changed: Condvar::new(),
            before_close: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The stream topology chosen at launch.
    #[must_use]
    pub fn plan(&self) -> &TopologyPlan {
        &self.plan
    }

    /// Whether stderr shares stdout's endpoint.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.plan.stderr == Route::Alias
    }

    /// Handle on the child's stdin. Every call returns the same endpoint.
    #[must_use]
    pub fn stdin(&self) -> InputStream {
        self.stdin.clone()
    }

    #[must_use]
    pub fn stdout(&self) -> OutputStream {
        self.stdout.clone()
    }

    /// Same endpoint as [`stdout`](Self::stdout) when streams are merged.
    #[must_use]
    pub fn stderr(&self) -> OutputStream {
        self.stderr.clone()
    }

    /// Streams currently serviced by a relay worker.
    #[must_use]
    pub fn worker_streams(&self) -> Vec<StdStream> {
        lock(&self.workers).iter().map(RelayWorker::stream).collect()
    }

    /// Relay failures captured since the last teardown step collected them.
    #[must_use]
    pub fn pending_errors(&self) -> usize {
        self.errors.len()
    }

    /// Add a failure to the outcome of the teardown that is about to run.
    ///
    /// Meant for [`before_close`](Self::before_close) hooks.
    pub(crate) fn record_failure(&self, failure: TeardownFailure) {
        lock(&self.recorded).push(failure);
    }

    /// Exit code if the child has already exited. Never blocks.
    #[must_use]
    pub fn try_exit_code(&self) -> Option<i32> {
        if let Some(status) = self.status.get() {
            return Some(platform::exit_code(*status));
        }
        let mut child = self.child.try_lock().ok()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(platform::exit_code(*self.status.get_or_init(|| status))),
            _ => None,
        }
    }

    /// Register a callback that runs once, right before teardown starts,
    /// while the child is still alive.
    ///
    /// Registering a second hook chains it after the first.
    pub fn before_close(&self, hook: impl FnOnce(&ManagedProcess) + Send + 'static) {
        let mut slot = lock(&self.before_close);
        *slot = Some(match slot.take() {
            Some(previous) => Box::new(move |process: &ManagedProcess| {
                previous(process);
                hook(process);
            }),
            None => Box::new(hook),
        });
    }

    /// Graceful shutdown: close stdin, wait for the child to exit, then
    /// release every stream, buffer and worker in order.
    ///
    /// # Errors
    ///
    /// Returns a [`TerminationError`] aggregating every teardown failure and
    /// every relay failure captured while the process ran. The exit code is
    /// carried inside the error when it was obtained.
    pub fn wait_for(&self) -> Result<i32, TerminationError> {
        if let Some(outcome) = self.enter(Lifecycle::Waiting) {
            return outcome;
        }

        self.run_before_close();
        let mut failures = Vec::new();
        if let Err(err) = self.stdin.close() {
            failures.push(TeardownFailure::resource(
                Resource::Stream(StdStream::Stdin),
                "close",
                err,
            ));
        }

        let waited = self.wait_for_exit();

        // close() may have taken over while we were blocked
        if let Some(outcome) = self.enter(Lifecycle::Terminating) {
            return outcome;
        }

        let exit_code = match waited {
            Ok(status) => Some(platform::exit_code(status)),
            Err(err) => {
                failures.push(TeardownFailure::resource(Resource::Process, "wait for", err));
                None
            }
        };

        let mut workers = std::mem::take(&mut *lock(&self.workers));
        for stream in TEARDOWN_ORDER {
            if stream == StdStream::Stderr && self.is_merged() {
                continue;
            }
            // stdin is closed before its worker drains so the flush sees EOF;
            // outputs drain first so a reader still gets every queued byte
            if stream == StdStream::Stdin {
                self.close_endpoint(stream, &mut failures);
            }
            if let Some(worker) = take_worker(&mut workers, stream)
                && let Err(err) = worker.drain()
            {
                failures.push(err.into());
            }
            match stream {
                StdStream::Stdout => self.stdout.close_when_drained(),
                StdStream::Stderr => self.stderr.close_when_drained(),
                StdStream::Stdin => {}
            }
        }

        let outcome = self.finish(ShutdownKind::Graceful, exit_code, failures);
        if let Ok(code) = outcome {
            tracing::info!(pid = self.pid, exit_code = code, "gracefully shut down, exit={code}");
        }
        outcome
    }

    /// Forced shutdown: kill the child and release everything without
    /// waiting for relay threads.
    ///
    /// A `wait_for()` blocked in another thread returns this call's outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`TerminationError`] aggregating every failure.
    pub fn close(&self) -> Result<(), TerminationError> {
        if let Some(outcome) = self.enter(Lifecycle::Terminating) {
            return outcome.map(|_| ());
        }

        self.run_before_close();
        let mut failures = Vec::new();

        if let Err(err) = self.kill() {
            failures.push(TeardownFailure::resource(Resource::Process, "kill", err));
        }
        let exit_code = match self.reap() {
            Ok(status) => Some(platform::exit_code(status)),
            Err(err) => {
                failures.push(TeardownFailure::resource(Resource::Process, "reap", err));
                None
            }
        };

        let mut workers = std::mem::take(&mut *lock(&self.workers));
        for worker in &workers {
            worker.signal_abort();
        }
        for stream in TEARDOWN_ORDER {
            if stream == StdStream::Stderr && self.is_merged() {
                continue;
            }
            self.close_endpoint(stream, &mut failures);
            if let Some(worker) = take_worker(&mut workers, stream) {
                worker.abort();
            }
        }

        let outcome = self.finish(ShutdownKind::Forced, exit_code, failures);
        tracing::info!(pid = self.pid, exit_code = ?exit_code, "forcefully killed");
        outcome.map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Move to `next` if allowed, otherwise wait for another thread's
    /// teardown and return its cached outcome.
    ///
    /// `Waiting` is entered only from `Running`. `Terminating` is entered from
    /// `Running` by `close()` and from `Waiting` by whoever gets there first.
    fn enter(&self, next: Lifecycle) -> Option<Result<i32, TerminationError>> {
        let mut state = lock(&self.lifecycle);
        loop {
            let allowed = match (&*state, &next) {
                (Lifecycle::Closed(outcome), _) => return Some(outcome.clone()),
                (Lifecycle::Running, _) => true,
                (Lifecycle::Waiting, Lifecycle::Terminating) => true,
                _ => false,
            };
            if allowed {
                *state = next;
                return None;
            }
            state = self
                .lifecycle_changed
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    fn finish(
        &self,
        kind: ShutdownKind,
        exit_code: Option<i32>,
        mut steps: Vec<TeardownFailure>,
    ) -> Result<i32, TerminationError> {
        let mut failures = std::mem::take(&mut *lock(&self.recorded));
        failures.append(&mut steps);
        failures.extend(self.errors.take().into_iter().map(TeardownFailure::from));

        let outcome = if failures.is_empty() {
            Ok(exit_code.unwrap_or(-1))
        } else {
            for failure in &failures {
                tracing::warn!(pid = self.pid, %kind, error = %failure, "teardown step failed");
            }
            Err(TerminationError {
                kind,
                pid: self.pid,
                exit_code,
                failures,
            })
        };

        *lock(&self.lifecycle) = Lifecycle::Closed(outcome.clone());
        self.lifecycle_changed.notify_all();
        outcome
    }

    fn run_before_close(&self) {
        let hook = lock(&self.before_close).take();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    fn close_endpoint(&self, stream: StdStream, failures: &mut Vec<TeardownFailure>) {
        match stream {
            StdStream::Stdin => {
                if let Err(err) = self.stdin.close() {
                    failures.push(TeardownFailure::resource(Resource::Stream(stream), "close", err));
                }
            }
            StdStream::Stdout => self.stdout.close(),
            StdStream::Stderr => self.stderr.close(),
        }
    }

    // ------------------------------------------------------------------------
    // Native process
    // ------------------------------------------------------------------------

    /// Block until the child exits without holding the child lock, so a
    /// concurrent `close()` can still kill it.
    #[cfg(unix)]
    fn wait_for_exit(&self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status.get() {
            return Ok(*status);
        }
        match platform::wait_exited(self.pid) {
            Ok(()) => {}
            // reaped by try_exit_code() or close() in the meantime
            Err(err) if platform::already_reaped(&err) => {}
            Err(err) => return Err(err),
        }
        self.reap()
    }

    #[cfg(not(unix))]
    fn wait_for_exit(&self) -> io::Result<ExitStatus> {
        self.reap()
    }

    fn reap(&self) -> io::Result<ExitStatus> {
        let mut child = lock(&self.child);
        if let Some(status) = self.status.get() {
            return Ok(*status);
        }
        let status = child.wait()?;
        Ok(*self.status.get_or_init(|| status))
    }

    #[cfg(unix)]
    fn kill(&self) -> io::Result<()> {
        // only held briefly on unix: waiters sleep in waitid without it
        let mut child = lock(&self.child);
        if self.status.get().is_some() {
            return Ok(());
        }
        child.kill()
    }

    #[cfg(not(unix))]
    fn kill(&self) -> io::Result<()> {
        if self.status.get().is_some() {
            return Ok(());
        }
        match self.child.try_lock() {
            Ok(mut child) => child.kill(),
            Err(std::sync::TryLockError::Poisoned(poison)) => poison.into_inner().kill(),
            // a waiter is blocked in wait() holding the handle
            Err(std::sync::TryLockError::WouldBlock) => platform::kill_pid(self.pid),
        }
    }
}

fn take_worker(workers: &mut Vec<RelayWorker>, stream: StdStream) -> Option<RelayWorker> {
    let index = workers.iter().position(|worker| worker.stream() == stream)?;
    Some(workers.swap_remove(index))
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        let open = matches!(
            *lock(&self.lifecycle),
            Lifecycle::Running | Lifecycle::Waiting
        );
        if open && let Err(err) = self.close() {
            tracing::warn!(pid = self.pid, error = %err, "cleanup of dropped process failed");
        }
    }
}
