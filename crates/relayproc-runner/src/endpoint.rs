//! Caller-facing views of the child's standard streams
//!
//! An endpoint is fixed at launch and shared: every accessor call returns a
//! handle to the same underlying object. Closing an endpoint never blocks;
//! when a caller is blocked inside a read or write, the OS handle is released
//! as soon as that call returns.

use std::io::{self, PipeReader, Read, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::relay_buffer::{BufferReader, BufferWriter};

/// What backs an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// The raw OS pipe to or from the child.
    Pipe,
    /// A relay buffer serviced by a background worker.
    Relay,
    /// Nothing: reads return end-of-stream and writes are dropped.
    Null,
}

/// Readable end of a child's output pipe.
#[derive(Debug)]
pub(crate) enum RawOutput {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
    /// stdout and stderr share one anonymous pipe
    Merged(PipeReader),
}

impl Read for RawOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(pipe) => pipe.read(buf),
            Self::Stderr(pipe) => pipe.read(buf),
            Self::Merged(pipe) => pipe.read(buf),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed")
}

// ============================================================================
// InputStream - the child's stdin as seen by the caller
// ============================================================================

#[derive(Debug)]
enum InputInner {
    Pipe(Mutex<Option<ChildStdin>>),
    Relay(Mutex<Option<BufferWriter>>),
    Null,
}

#[derive(Debug)]
struct InputShared {
    inner: InputInner,
    closed: AtomicBool,
}

/// Writable handle on the child's stdin.
///
/// Cloning yields another handle on the same endpoint.
#[derive(Debug, Clone)]
pub struct InputStream {
    shared: Arc<InputShared>,
}

impl InputStream {
    fn from_inner(inner: InputInner) -> Self {
        Self {
            shared: Arc::new(InputShared {
                inner,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn pipe(pipe: ChildStdin) -> Self {
        Self::from_inner(InputInner::Pipe(Mutex::new(Some(pipe))))
    }

    pub(crate) fn relay(writer: BufferWriter) -> Self {
        Self::from_inner(InputInner::Relay(Mutex::new(Some(writer))))
    }

    pub(crate) fn null() -> Self {
        Self::from_inner(InputInner::Null)
    }

    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        match self.shared.inner {
            InputInner::Pipe(_) => EndpointKind::Pipe,
            InputInner::Relay(_) => EndpointKind::Relay,
            InputInner::Null => EndpointKind::Null,
        }
    }

    /// Whether both handles refer to the same endpoint.
    #[must_use]
    pub fn ptr_eq(&self, other: &InputStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the endpoint so the child observes end-of-input.
    ///
    /// Idempotent. Never waits for a writer that is blocked in the OS.
    ///
    /// # Errors
    ///
    /// Returns the error from flushing the underlying handle.
    pub fn close(&self) -> io::Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.shared.inner {
            InputInner::Pipe(slot) => match slot.try_lock() {
                Ok(mut guard) => close_slot(&mut *guard),
                Err(std::sync::TryLockError::Poisoned(poison)) => {
                    close_slot(&mut *poison.into_inner())
                }
                Err(std::sync::TryLockError::WouldBlock) => Ok(()),
            },
            InputInner::Relay(slot) => close_slot(&mut *lock(slot)),
            InputInner::Null => Ok(()),
        }
    }

    fn with_writer<R>(
        &self,
        f: impl FnOnce(&mut dyn Write) -> io::Result<R>,
        null: R,
    ) -> io::Result<R> {
        if self.is_closed() {
            return Err(closed_error());
        }
        match &self.shared.inner {
            InputInner::Pipe(slot) => {
                let mut guard = lock(slot);
                let result = match guard.as_mut() {
                    Some(pipe) => f(pipe),
                    None => Err(closed_error()),
                };
                // close() could not take the handle while we were writing
                if self.is_closed() {
                    guard.take();
                }
                result
            }
            InputInner::Relay(slot) => match lock(slot).as_mut() {
                Some(writer) => f(writer),
                None => Err(closed_error()),
            },
            InputInner::Null => Ok(null),
        }
    }
}

fn close_slot<W: Write>(slot: &mut Option<W>) -> io::Result<()> {
    match slot.take() {
        Some(mut handle) => handle.flush(),
        None => Ok(()),
    }
}

impl Write for InputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_writer(|w| w.write(buf), buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_writer(|w| w.flush(), ())
    }
}

// ============================================================================
// OutputStream - the child's stdout or stderr as seen by the caller
// ============================================================================

#[derive(Debug)]
enum OutputInner {
    Pipe(Mutex<Option<RawOutput>>),
    Relay(Mutex<Option<BufferReader>>),
    Null,
}

#[derive(Debug)]
struct OutputShared {
    inner: OutputInner,
    closed: AtomicBool,
    /// producer finished; release at end-of-stream
    draining: AtomicBool,
}

/// Readable handle on the child's stdout or stderr.
///
/// When streams are merged, stdout and stderr hand out the same endpoint.
#[derive(Debug, Clone)]
pub struct OutputStream {
    shared: Arc<OutputShared>,
}

impl OutputStream {
    fn from_inner(inner: OutputInner) -> Self {
        Self {
            shared: Arc::new(OutputShared {
                inner,
                closed: AtomicBool::new(false),
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn pipe(pipe: RawOutput) -> Self {
        Self::from_inner(OutputInner::Pipe(Mutex::new(Some(pipe))))
    }

    pub(crate) fn relay(reader: BufferReader) -> Self {
        Self::from_inner(OutputInner::Relay(Mutex::new(Some(reader))))
    }

    pub(crate) fn null() -> Self {
        Self::from_inner(OutputInner::Null)
    }

    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        match self.shared.inner {
            OutputInner::Pipe(_) => EndpointKind::Pipe,
            OutputInner::Relay(_) => EndpointKind::Relay,
            OutputInner::Null => EndpointKind::Null,
        }
    }

    /// Whether both handles refer to the same endpoint.
    #[must_use]
    pub fn ptr_eq(&self, other: &OutputStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Release the underlying handle. Further reads report end-of-stream.
    ///
    /// Idempotent and non-blocking.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.shared.inner {
            OutputInner::Pipe(slot) => release(slot),
            OutputInner::Relay(slot) => release(slot),
            OutputInner::Null => {}
        }
    }

    /// Release once the remaining output has been read.
    ///
    /// For a relayed endpoint whose worker has finished, queued bytes stay
    /// readable and the buffer is let go at end-of-stream. Other endpoints
    /// close at once.
    pub(crate) fn close_when_drained(&self) {
        let OutputInner::Relay(slot) = &self.shared.inner else {
            self.close();
            return;
        };
        self.shared.draining.store(true, Ordering::Release);
        let drained = match slot.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .is_none_or(|reader| reader.buffer().is_empty()),
            // a reader is active and will see end-of-stream itself
            Err(_) => false,
        };
        if drained {
            self.close();
        }
    }
}

fn release<T>(slot: &Mutex<Option<T>>) {
    match slot.try_lock() {
        Ok(mut guard) => drop(guard.take()),
        Err(std::sync::TryLockError::Poisoned(poison)) => drop(poison.into_inner().take()),
        // the blocked reader drops it once its read returns
        Err(std::sync::TryLockError::WouldBlock) => {}
    }
}

fn read_slot<T: Read>(
    slot: &Mutex<Option<T>>,
    shared: &OutputShared,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut guard = lock(slot);
    let result = match guard.as_mut() {
        Some(source) => source.read(buf),
        None => Ok(0),
    };
    if shared.draining.load(Ordering::Acquire) && matches!(result, Ok(0)) && !buf.is_empty() {
        shared.closed.store(true, Ordering::Release);
    }
    // bytes already copied out are delivered; the handle goes with this call
    if shared.closed.load(Ordering::Acquire) {
        guard.take();
        return match result {
            Ok(read) if read > 0 => Ok(read),
            _ => Ok(0),
        };
    }
    result
}

impl Read for OutputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        match &self.shared.inner {
            OutputInner::Pipe(slot) => read_slot(slot, &self.shared, buf),
            OutputInner::Relay(slot) => read_slot(slot, &self.shared, buf),
            OutputInner::Null => Ok(0),
        }
    }
}
