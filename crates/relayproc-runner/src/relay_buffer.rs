//! Unbounded single-producer/single-consumer byte queue
//!
//! A `RelayBuffer` decouples a relay thread that services an OS pipe from the
//! caller that consumes (or produces) the bytes. Writes never block on the
//! consumer; reads block until bytes arrive or the producer side is closed.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<u8>,
    /// No further writes are accepted; readers drain then see EOF.
    write_closed: bool,
    /// The consumer is gone; queued bytes were dropped.
    read_closed: bool,
    total_bytes_written: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writer_taken: AtomicBool,
    reader_taken: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Control handle for an unbounded byte queue.
///
/// The producer half ([`BufferWriter`]) and the consumer half
/// ([`BufferReader`]) can each be taken exactly once. The handle itself stays
/// with the owner of the buffer and is used to close or abort it.
#[derive(Debug, Clone, Default)]
pub struct RelayBuffer {
    shared: Arc<Shared>,
}

impl RelayBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the producer half. Returns `None` on every call after the first.
    pub fn take_writer(&self) -> Option<BufferWriter> {
        if self.shared.writer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(BufferWriter {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Take the consumer half. Returns `None` on every call after the first.
    pub fn take_reader(&self) -> Option<BufferReader> {
        if self.shared.reader_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(BufferReader {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Create a buffer and hand out both halves at once.
    pub(crate) fn split() -> (RelayBuffer, BufferWriter, BufferReader) {
        let buffer = RelayBuffer::new();
        buffer.shared.writer_taken.store(true, Ordering::Release);
        buffer.shared.reader_taken.store(true, Ordering::Release);
        let writer = BufferWriter {
            shared: Arc::clone(&buffer.shared),
        };
        let reader = BufferReader {
            shared: Arc::clone(&buffer.shared),
        };
        (buffer, writer, reader)
    }

    /// Reject further writes. Bytes already queued remain readable.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.write_closed = true;
        drop(state);
        self.shared.readable.notify_all();
    }

    /// Close both sides and drop whatever is still queued.
    pub fn abort(&self) {
        let mut state = self.shared.lock();
        state.write_closed = true;
        state.read_closed = true;
        state.queue.clear();
        drop(state);
        self.shared.readable.notify_all();
    }

    /// Number of bytes currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether writes are rejected.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let state = self.shared.lock();
        state.write_closed || state.read_closed
    }

    /// Total number of bytes ever accepted.
    #[must_use]
    pub fn total_bytes_written(&self) -> u64 {
        self.shared.lock().total_bytes_written
    }

    /// Whether two handles refer to the same queue.
    #[must_use]
    pub fn ptr_eq(&self, other: &RelayBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Producer half of a [`RelayBuffer`]. Dropping it closes the buffer for writing.
#[derive(Debug)]
pub struct BufferWriter {
    shared: Arc<Shared>,
}

impl BufferWriter {
    /// Handle to the buffer this writer feeds.
    #[must_use]
    pub fn buffer(&self) -> RelayBuffer {
        RelayBuffer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if state.read_closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay buffer consumer is closed",
            ));
        }
        if state.write_closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay buffer is closed for writing",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        state.queue.extend(buf);
        state.total_bytes_written += buf.len() as u64;
        drop(state);
        self.shared.readable.notify_one();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.write_closed = true;
        drop(state);
        self.shared.readable.notify_all();
    }
}

/// Consumer half of a [`RelayBuffer`]. Dropping it makes further writes fail
/// with `BrokenPipe`.
#[derive(Debug)]
pub struct BufferReader {
    shared: Arc<Shared>,
}

impl BufferReader {
    /// Handle to the buffer this reader drains.
    #[must_use]
    pub fn buffer(&self) -> RelayBuffer {
        RelayBuffer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        loop {
            if state.read_closed {
                return Ok(0);
            }
            if !state.queue.is_empty() {
                break;
            }
            if state.write_closed {
                return Ok(0);
            }
            state = self
                .shared
                .readable
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
        }

        let n = buf.len().min(state.queue.len());
        let (front, back) = state.queue.as_slices();
        if n <= front.len() {
            buf[..n].copy_from_slice(&front[..n]);
        } else {
            let split = front.len();
            buf[..split].copy_from_slice(front);
            buf[split..n].copy_from_slice(&back[..n - split]);
        }
        state.queue.drain(..n);
        Ok(n)
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.read_closed = true;
        state.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_halves_can_only_be_taken_once() {
        let buffer = RelayBuffer::new();
        assert!(buffer.take_writer().is_some());
        assert!(buffer.take_writer().is_none());
        assert!(buffer.take_reader().is_some());
        assert!(buffer.take_reader().is_none());
    }

    #[test]
    fn test_split_marks_both_halves_taken() {
        let (buffer, _writer, _reader) = RelayBuffer::split();
        assert!(buffer.take_writer().is_none());
        assert!(buffer.take_reader().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.total_bytes_written(), 11);

        let mut first = [0u8; 4];
        assert_eq!(reader.read(&mut first).unwrap(), 4);
        assert_eq!(&first, b"hell");

        drop(writer);
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "o world");
    }

    #[test]
    fn test_close_drains_then_eof() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        writer.write_all(b"queued").unwrap();
        buffer.close();
        assert!(buffer.is_closed());

        let err = writer.write(b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"queued");
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_abort_drops_queued_bytes() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        writer.write_all(b"never delivered").unwrap();
        buffer.abort();

        assert!(buffer.is_empty());
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
        assert_eq!(
            writer.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_dropping_reader_breaks_writer() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let reader = buffer.take_reader().unwrap();

        writer.write_all(b"pending").unwrap();
        drop(reader);

        assert!(buffer.is_empty());
        assert_eq!(
            writer.write(b"more").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_blocked_reader_wakes_on_write() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        let consumer = thread::spawn(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        });

        thread::sleep(Duration::from_millis(20));
        writer.write_all(b"late arrival").unwrap();
        drop(writer);

        assert_eq!(consumer.join().unwrap(), b"late arrival");
    }

    #[test]
    fn test_blocked_reader_wakes_on_abort() {
        let buffer = RelayBuffer::new();
        let _writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        let consumer = thread::spawn(move || reader.read(&mut [0u8; 16]).unwrap());
        thread::sleep(Duration::from_millis(20));
        buffer.abort();

        assert_eq!(consumer.join().unwrap(), 0);
    }

    #[test]
    fn test_read_across_ring_wraparound() {
        let buffer = RelayBuffer::new();
        let mut writer = buffer.take_writer().unwrap();
        let mut reader = buffer.take_reader().unwrap();

        let mut scratch = [0u8; 3];
        for round in 0u8..50 {
            writer.write_all(&[round, round, round, round]).unwrap();
            reader.read_exact(&mut scratch).unwrap();
            assert_eq!(scratch, [round, round, round]);
            reader.read_exact(&mut scratch[..1]).unwrap();
            assert_eq!(scratch[0], round);
        }
    }

    proptest! {
        /// Bytes come out in the order they went in, with nothing lost or
        /// duplicated, regardless of how writes and reads are chunked.
        #[test]
        fn prop_fifo_preserved_across_threads(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..32),
            read_size in 1usize..48,
        ) {
            let buffer = RelayBuffer::new();
            let mut writer = buffer.take_writer().unwrap();
            let mut reader = buffer.take_reader().unwrap();
            let expected: Vec<u8> = chunks.iter().flatten().copied().collect();

            let producer = thread::spawn(move || {
                for chunk in chunks {
                    writer.write_all(&chunk).unwrap();
                }
            });

            let mut received = Vec::new();
            let mut scratch = vec![0u8; read_size];
            loop {
                let n = reader.read(&mut scratch).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&scratch[..n]);
            }
            producer.join().unwrap();

            prop_assert_eq!(received, expected);
        }
    }
}
