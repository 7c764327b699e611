//! Buffered UTF-8 views over a [`ManagedProcess`]

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::endpoint::{InputStream, OutputStream};
use crate::error::{Resource, TeardownFailure, TerminationError};
use crate::process::ManagedProcess;
use crate::types::StdStream;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Line-oriented reader over a child's stdout or stderr.
///
/// Clones share one buffer, so a line is never delivered twice.
#[derive(Debug, Clone)]
pub struct TextReader {
    inner: Arc<Mutex<BufReader<OutputStream>>>,
}

impl TextReader {
    fn new(stream: OutputStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufReader::new(stream))),
        }
    }

    /// Append the next line, including its terminator, to `buf`.
    ///
    /// # Errors
    ///
    /// Fails on an I/O error or when the bytes are not valid UTF-8.
    pub fn read_line(&self, buf: &mut String) -> io::Result<usize> {
        lock(&self.inner).read_line(buf)
    }

    /// Read everything until end-of-stream.
    ///
    /// # Errors
    ///
    /// Fails on an I/O error or invalid UTF-8.
    pub fn read_to_string(&self) -> io::Result<String> {
        let mut out = String::new();
        lock(&self.inner).read_to_string(&mut out)?;
        Ok(out)
    }

    /// Iterate over lines without their terminators.
    #[must_use]
    pub fn lines(&self) -> TextLines {
        TextLines {
            reader: self.clone(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &TextReader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Iterator returned by [`TextReader::lines`].
#[derive(Debug)]
pub struct TextLines {
    reader: TextReader,
}

impl Iterator for TextLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Buffered writer over a child's stdin.
#[derive(Debug, Clone)]
pub struct TextWriter {
    inner: Arc<Mutex<BufWriter<InputStream>>>,
}

impl TextWriter {
    fn new(stream: InputStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufWriter::new(stream))),
        }
    }

    /// Write `line` followed by a newline. Buffered until the next flush.
    ///
    /// # Errors
    ///
    /// Propagates write errors from the stdin endpoint.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = lock(&self.inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    /// Write `text` as-is.
    ///
    /// # Errors
    ///
    /// Propagates write errors from the stdin endpoint.
    pub fn write_str(&self, text: &str) -> io::Result<()> {
        lock(&self.inner).write_all(text.as_bytes())
    }

    /// Push buffered text through to the child.
    ///
    /// # Errors
    ///
    /// Propagates write errors from the stdin endpoint.
    pub fn flush_buffered(&self) -> io::Result<()> {
        lock(&self.inner).flush()
    }
}

impl Write for TextWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffered()
    }
}

/// Text-level wrapper around a [`ManagedProcess`].
///
/// Readers and the writer are created on first use. Buffered stdin text is
/// flushed before either shutdown path runs.
#[derive(Debug)]
pub struct TextProcess {
    process: ManagedProcess,
    stdin: Arc<OnceLock<TextWriter>>,
    stdout: OnceLock<TextReader>,
    stderr: OnceLock<TextReader>,
}

impl TextProcess {
    #[must_use]
    pub fn new(process: ManagedProcess) -> Self {
        let stdin: Arc<OnceLock<TextWriter>> = Arc::new(OnceLock::new());
        let pending = Arc::clone(&stdin);
        process.before_close(move |process| flush_writer(&pending, process));

        Self {
            process,
            stdin,
            stdout: OnceLock::new(),
            stderr: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    #[must_use]
    pub fn stdin(&self) -> TextWriter {
        self.stdin
            .get_or_init(|| TextWriter::new(self.process.stdin()))
            .clone()
    }

    #[must_use]
    pub fn stdout(&self) -> TextReader {
        self.stdout
            .get_or_init(|| TextReader::new(self.process.stdout()))
            .clone()
    }

    /// The stdout reader itself when streams are merged.
    #[must_use]
    pub fn stderr(&self) -> TextReader {
        if self.process.is_merged() {
            return self.stdout();
        }
        self.stderr
            .get_or_init(|| TextReader::new(self.process.stderr()))
            .clone()
    }

    /// Flush buffered stdin text, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// See [`ManagedProcess::wait_for`]. A failed flush is one of the
    /// reported failures.
    pub fn wait_for(&self) -> Result<i32, TerminationError> {
        self.process.wait_for()
    }

    /// Flush buffered stdin text, then kill the child.
    ///
    /// # Errors
    ///
    /// See [`ManagedProcess::close`]. A failed flush is one of the reported
    /// failures.
    pub fn close(&self) -> Result<(), TerminationError> {
        self.process.close()
    }
}

impl From<ManagedProcess> for TextProcess {
    fn from(process: ManagedProcess) -> Self {
        Self::new(process)
    }
}

/// Runs as a close hook, so the flush happens exactly once per process.
fn flush_writer(slot: &OnceLock<TextWriter>, process: &ManagedProcess) {
    if let Some(writer) = slot.get()
        && let Err(err) = writer.flush_buffered()
    {
        tracing::debug!(pid = process.pid(), error = %err, "could not flush buffered stdin text");
        process.record_failure(TeardownFailure::resource(
            Resource::Stream(StdStream::Stdin),
            "flush",
            err,
        ));
    }
}
