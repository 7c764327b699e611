//! Background threads that move bytes between an OS pipe and its consumer
//!
//! Each worker owns one copy loop and a [`RelayMode`] that only ever moves
//! forward: `Active → Draining → Aborting`. Failures and panics are pushed to
//! the process-wide [`ErrorAggregate`] instead of being lost with the thread.

use std::io::{self, ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::process::ChildStdin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::Level;

use crate::endpoint::RawOutput;
use crate::error::{RelayError, RelayStage};
use crate::platform;
use crate::relay_buffer::{BufferReader, BufferWriter, RelayBuffer};
use crate::settings::RelaySettings;
use crate::types::StdStream;

/// Target of the events emitted for logged child output.
pub const CHILD_LOG_TARGET: &str = "relayproc::child";

// ============================================================================
// RelayMode
// ============================================================================

/// Lifecycle state of a relay worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RelayMode {
    /// Copy loop running.
    Active = 0,
    /// Finish what is already buffered, accept nothing new.
    Draining = 1,
    /// Stop at the next opportunity, dropping in-flight data.
    Aborting = 2,
}

impl RelayMode {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Aborting,
        }
    }
}

#[derive(Debug)]
struct ModeCell(AtomicU8);

impl ModeCell {
    fn new() -> Self {
        Self(AtomicU8::new(RelayMode::Active as u8))
    }

    fn get(&self) -> RelayMode {
        RelayMode::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `mode`; requests to move backwards are ignored.
    fn advance(&self, mode: RelayMode) -> RelayMode {
        RelayMode::from_u8(self.0.fetch_max(mode as u8, Ordering::AcqRel))
    }

    fn is_aborting(&self) -> bool {
        self.get() == RelayMode::Aborting
    }
}

// ============================================================================
// ErrorAggregate
// ============================================================================

/// Relay failures captured in the background, shared by every worker of one
/// process and drained at the next `wait_for()`/`close()`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorAggregate {
    errors: Arc<Mutex<Vec<RelayError>>>,
}

impl ErrorAggregate {
    fn lock(&self) -> MutexGuard<'_, Vec<RelayError>> {
        self.errors
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn push(&self, error: RelayError) {
        tracing::debug!(stream = %error.stream, error = %error, "relay worker failed");
        self.lock().push(error);
    }

    pub(crate) fn take(&self) -> Vec<RelayError> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

// ============================================================================
// Pumps - the copy loops
// ============================================================================

/// Source, sink and direction of one worker.
pub(crate) enum Pump {
    /// Child output into a relay buffer the caller reads.
    Fill { source: RawOutput, sink: BufferWriter },
    /// Caller-written relay buffer into the child's stdin.
    Flush {
        source: BufferReader,
        sink: ChildStdin,
    },
    /// Child output read and dropped so the child never blocks.
    Discard { source: RawOutput },
    /// Child output read and emitted as log events.
    Log { source: RawOutput, sink: LogSink },
}

impl Pump {
    fn run(
        self,
        stream: StdStream,
        mode: &ModeCell,
        chunk_bytes: usize,
    ) -> Result<(), RelayError> {
        let mut chunk = vec![0u8; chunk_bytes];
        match self {
            Self::Fill { mut source, mut sink } => loop {
                let n = read_chunk(&mut source, &mut chunk, stream)?;
                if n == 0 || mode.is_aborting() {
                    return Ok(());
                }
                match sink.write_all(&chunk[..n]) {
                    Ok(()) => {}
                    // buffer closed by teardown or consumer gone
                    Err(err) if err.kind() == ErrorKind::BrokenPipe => return Ok(()),
                    Err(err) => return Err(RelayError::new(stream, RelayStage::Write, err)),
                }
            },
            Self::Flush { mut source, mut sink } => {
                loop {
                    let n = read_chunk(&mut source, &mut chunk, stream)?;
                    if n == 0 || mode.is_aborting() {
                        break;
                    }
                    match sink.write_all(&chunk[..n]) {
                        Ok(()) => {}
                        // child stopped reading stdin
                        Err(err) if err.kind() == ErrorKind::BrokenPipe => return Ok(()),
                        Err(err) => return Err(RelayError::new(stream, RelayStage::Write, err)),
                    }
                }
                match sink.flush() {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                    Err(err) => Err(RelayError::new(stream, RelayStage::Close, err)),
                }
            }
            Self::Discard { mut source } => loop {
                let n = read_chunk(&mut source, &mut chunk, stream)?;
                if n == 0 || mode.is_aborting() {
                    return Ok(());
                }
            },
            Self::Log { mut source, mut sink } => loop {
                let n = read_chunk(&mut source, &mut chunk, stream)?;
                if n == 0 {
                    sink.finish();
                    return Ok(());
                }
                if mode.is_aborting() {
                    return Ok(());
                }
                sink.push(&chunk[..n], n < chunk.len());
            },
        }
    }
}

fn read_chunk(
    source: &mut impl Read,
    chunk: &mut [u8],
    stream: StdStream,
) -> Result<usize, RelayError> {
    loop {
        match source.read(chunk) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(RelayError::new(stream, RelayStage::Read, err)),
        }
    }
}

// ============================================================================
// LineBatcher / LogSink
// ============================================================================

/// Accumulates raw output and releases it as whole lines.
///
/// Complete lines are released once `threshold` bytes are pending or when the
/// source had nothing more to give right now. A single line longer than the
/// threshold is released as-is.
#[derive(Debug)]
pub(crate) struct LineBatcher {
    pending: Vec<u8>,
    threshold: usize,
}

impl LineBatcher {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            pending: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    /// Add bytes; returns the lines that are ready to be emitted.
    pub(crate) fn push(&mut self, bytes: &[u8], short_read: bool) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        if !short_read && self.pending.len() < self.threshold {
            return Vec::new();
        }
        match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(last) => {
                let rest = self.pending.split_off(last + 1);
                let batch = std::mem::replace(&mut self.pending, rest);
                split_lines(&batch)
            }
            None if self.pending.len() >= self.threshold => self.finish(),
            None => Vec::new(),
        }
    }

    /// Release everything still pending, including a trailing partial line.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let batch = std::mem::take(&mut self.pending);
        split_lines(&batch)
    }
}

fn split_lines(batch: &[u8]) -> Vec<String> {
    if batch.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(batch)
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Emits batched child output as `tracing` events.
pub(crate) struct LogSink {
    batcher: LineBatcher,
    level: Level,
    pid: u32,
    stream: StdStream,
}

impl LogSink {
    pub(crate) fn new(settings: &RelaySettings, pid: u32, stream: StdStream) -> Self {
        Self {
            batcher: LineBatcher::new(settings.effective_batch_bytes()),
            level: settings.log_level.parse().unwrap_or(Level::INFO),
            pid,
            stream,
        }
    }

    fn push(&mut self, bytes: &[u8], short_read: bool) {
        let lines = self.batcher.push(bytes, short_read);
        self.emit(lines);
    }

    fn finish(&mut self) {
        let lines = self.batcher.finish();
        self.emit(lines);
    }

    fn emit(&self, lines: Vec<String>) {
        let (pid, stream) = (self.pid, self.stream.as_str());
        for line in lines {
            match self.level {
                Level::TRACE => tracing::trace!(target: CHILD_LOG_TARGET, pid, stream, "{line}"),
                Level::DEBUG => tracing::debug!(target: CHILD_LOG_TARGET, pid, stream, "{line}"),
                Level::WARN => tracing::warn!(target: CHILD_LOG_TARGET, pid, stream, "{line}"),
                Level::ERROR => tracing::error!(target: CHILD_LOG_TARGET, pid, stream, "{line}"),
                _ => tracing::info!(target: CHILD_LOG_TARGET, pid, stream, "{line}"),
            }
        }
    }
}

// ============================================================================
// RelayWorker
// ============================================================================

/// Handle on one running relay thread.
#[derive(Debug)]
pub struct RelayWorker {
    stream: StdStream,
    mode: Arc<ModeCell>,
    /// Buffer between this worker and the caller, for relayed streams
    buffer: Option<RelayBuffer>,
    handle: Option<JoinHandle<()>>,
}

impl RelayWorker {
    /// Start the worker thread.
    pub(crate) fn spawn(
        stream: StdStream,
        pump: Pump,
        buffer: Option<RelayBuffer>,
        pid: u32,
        settings: &RelaySettings,
        errors: ErrorAggregate,
    ) -> io::Result<Self> {
        let mode = Arc::new(ModeCell::new());
        let thread_mode = Arc::clone(&mode);
        let chunk_bytes = settings.effective_chunk_bytes();
        let lower_priority = settings.lower_worker_priority;

        let handle = thread::Builder::new()
            .name(format!("{}-{pid}-{stream}", settings.thread_name_prefix))
            .spawn(move || {
                if lower_priority {
                    platform::lower_current_thread_priority();
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    pump.run(stream, &thread_mode, chunk_bytes)
                }));
                match outcome {
                    Ok(Ok(())) => {
                        tracing::trace!(pid, %stream, "relay worker finished");
                    }
                    Ok(Err(err)) => errors.push(err),
                    Err(payload) => {
                        errors.push(RelayError::panicked(stream, panic_message(&*payload)));
                    }
                }
            })?;

        Ok(Self {
            stream,
            mode,
            buffer,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn stream(&self) -> StdStream {
        self.stream
    }

    /// Graceful stop: let the copy loop run to end-of-stream, join it, then
    /// close the buffer for writing.
    ///
    /// Only valid once the worker's source is bound to end: the child has
    /// exited, or the stdin endpoint feeding the buffer was closed.
    pub(crate) fn drain(mut self) -> Result<(), RelayError> {
        self.mode.advance(RelayMode::Draining);
        let joined = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|payload| RelayError::panicked(self.stream, panic_message(&*payload))),
            None => Ok(()),
        };
        if let Some(buffer) = &self.buffer {
            buffer.close();
        }
        joined
    }

    /// Tell the copy loop to stop at its next check.
    pub(crate) fn signal_abort(&self) {
        self.mode.advance(RelayMode::Aborting);
    }

    /// Forced stop: abort the buffer and let the thread run out on its own.
    pub(crate) fn abort(mut self) {
        self.signal_abort();
        if let Some(buffer) = &self.buffer {
            buffer.abort();
        }
        // detached
        drop(self.handle.take());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
