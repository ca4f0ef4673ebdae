//! Mock I/O helpers for exercising failure paths.
//!
//! This module provides inputs that cannot be rewound, sinks that fail after a
//! byte budget or cancel an operation on first flush, shard storage that
//! refuses a chosen shard, and temp files with a given extension for
//! path-based tests.

use crate::cancel::CancellationContext;
use crate::shard::{MemoryStorage, ShardMedium, ShardStorage};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

/// A reader whose `Seek` implementation always fails, like a pipe or socket.
pub struct UnseekableReader<R> {
    inner: R,
}

impl<R: Read> UnseekableReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for UnseekableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Seek for UnseekableReader<R> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not seekable",
        ))
    }
}

/// A writer that accepts `budget` bytes and then fails every write.
#[derive(Debug, Default)]
pub struct FailingWriter {
    accepted: Vec<u8>,
    budget: usize,
}

impl FailingWriter {
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self {
            accepted: Vec::new(),
            budget,
        }
    }

    /// Bytes written before the failure.
    #[must_use]
    pub fn accepted(&self) -> &[u8] {
        &self.accepted
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.budget - self.accepted.len();
        if room == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        let n = room.min(buf.len());
        self.accepted.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink that cancels `ctx` the first time it is flushed.
///
/// Lets a test stop an operation right after its first batch of output has
/// been committed.
#[derive(Debug)]
pub struct CancelOnFlush {
    written: Vec<u8>,
    ctx: CancellationContext,
}

impl CancelOnFlush {
    #[must_use]
    pub const fn new(ctx: CancellationContext) -> Self {
        Self {
            written: Vec::new(),
            ctx,
        }
    }

    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl Write for CancelOnFlush {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ctx.cancel();
        Ok(())
    }
}

/// In-memory shard storage that refuses to allocate shard `fail_at`.
///
/// The number of shards still alive is tracked so tests can check that
/// everything allocated before the failure was released.
#[derive(Debug)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_at: usize,
    live: Arc<AtomicUsize>,
}

impl FailingStorage {
    #[must_use]
    pub fn new(fail_at: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_at,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shards allocated and not yet dropped.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl ShardStorage for FailingStorage {
    fn allocate(&mut self, index: usize) -> io::Result<Box<dyn ShardMedium>> {
        if index == self.fail_at {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
        }
        let medium = self.inner.allocate(index)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedMedium {
            inner: medium,
            live: Arc::clone(&self.live),
        }))
    }

    fn describe(&self) -> String {
        format!("failing at shard {}", self.fail_at)
    }
}

struct TrackedMedium {
    inner: Box<dyn ShardMedium>,
    live: Arc<AtomicUsize>,
}

impl Read for TrackedMedium {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TrackedMedium {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for TrackedMedium {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Drop for TrackedMedium {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Write `contents` to a new temp file ending in `.{extension}`.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created or written.
pub fn temp_file_with(contents: &[u8], extension: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}
