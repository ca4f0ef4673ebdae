//! Disk-backed (or in-memory) intermediate storage for transposed rows.
//!
//! A shard is an append-only sequence of CSV records that is written block by
//! block and read back once, front to back. The engine only needs
//! [`ShardMedium`] (`Read + Write + Seek`), so any backend that can hand out
//! such handles works: temp files ([`TempDirStorage`]), memory buffers
//! ([`MemoryStorage`]) or a caller-supplied blob store.
//!
//! Storage lifetime is tied to ownership. Dropping a medium releases it, and
//! dropping a [`TempDirStorage`] removes its directory, so every exit path of
//! an operation (success, error, deadline) reclaims all shard space.
//!
//! # Record format
//!
//! | record | fields |
//! |---|---|
//! | data | `block_index, v0, v1, …` (one value per original row of the block) |
//! | placeholder | a single blank field |

pub mod reassemble;
pub mod writer;

pub use reassemble::{ReassemblyStats, Reassembler};
pub use writer::ShardSet;

use csv::StringRecord;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;
use tempfile::TempDir;

/// Sentinel field written for a placeholder row.
pub const PLACEHOLDER: &str = " ";

/// Backing handle for one shard.
pub trait ShardMedium: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> ShardMedium for T {}

/// Allocator of shard handles for a single operation.
pub trait ShardStorage {
    /// Create empty backing storage for shard `index`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised by the backend.
    fn allocate(&mut self, index: usize) -> io::Result<Box<dyn ShardMedium>>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

impl<S: ShardStorage + ?Sized> ShardStorage for &mut S {
    fn allocate(&mut self, index: usize) -> io::Result<Box<dyn ShardMedium>> {
        (**self).allocate(index)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Shards as named temp files inside a per-operation directory.
///
/// The directory name is randomised, so concurrent operations never collide.
/// Files are removed when their handle drops and the directory when the
/// storage drops.
#[derive(Debug)]
pub struct TempDirStorage {
    dir: TempDir,
}

impl TempDirStorage {
    /// Create the operation directory under `parent`, or the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the directory.
    pub fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("matrix_invert_");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl ShardStorage for TempDirStorage {
    fn allocate(&mut self, index: usize) -> io::Result<Box<dyn ShardMedium>> {
        let file = tempfile::Builder::new()
            .prefix(&format!("invert_{index}_"))
            .suffix(".tmp")
            .tempfile_in(self.dir.path())?;
        Ok(Box::new(file))
    }

    fn describe(&self) -> String {
        format!("temp dir {}", self.dir.path().display())
    }
}

/// Shards held in memory; useful for tests and small inputs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    allocated: usize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shards handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }
}

impl ShardStorage for MemoryStorage {
    fn allocate(&mut self, _index: usize) -> io::Result<Box<dyn ShardMedium>> {
        self.allocated += 1;
        Ok(Box::new(Cursor::new(Vec::<u8>::new())))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A decoded shard record. Data values are `record.iter().skip(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardRecord {
    Data { block: u64 },
    Placeholder,
}

impl ShardRecord {
    /// Classify a raw record; `Err` describes why it is malformed.
    pub(crate) fn decode(record: &StringRecord) -> Result<Self, String> {
        match record.get(0) {
            None => Err("empty record".to_string()),
            Some(tag) if record.len() == 1 && tag.trim().is_empty() => Ok(Self::Placeholder),
            Some(tag) if record.len() == 1 => {
                Err(format!("data record without values (tag '{tag}')"))
            }
            Some(tag) => tag
                .parse()
                .map(|block| Self::Data { block })
                .map_err(|_| format!("bad block tag '{tag}'")),
        }
    }
}
