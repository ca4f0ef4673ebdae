//! # Matrixbeam
//!
//! **Out-of-core matrix transformations** over CSV streams. Matrixbeam reads a
//! matrix that may be far larger than available memory and produces its
//! transpose using bounded working memory and disk-backed intermediate
//! storage, under a wall-clock deadline. The cheap single-pass operations
//! (echo, flatten, sum and product) are provided alongside.
//!
//! ## Key Features
//!
//! - **Bounded memory** - one block of input rows plus one shard's slots at a time
//! - **Early shape validation** - ragged input fails before any output is written
//! - **Deadlines and cancellation** - checked at every block, shard and record boundary
//! - **Pluggable shard storage** - temp files by default, memory or your own backend
//! - **Guaranteed cleanup** - shard storage is released on success, error and timeout
//! - **Compressed I/O** - gzip, zstd, bzip2 and xz (all optional via feature flags)
//!
//! ## Quick Start
//!
//! ```
//! use matrixbeam::{TransposeConfig, transpose};
//! use std::io::Cursor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = Cursor::new(b"1,2,3\n4,5,6\n".to_vec());
//! let mut output = Vec::new();
//! let report = transpose(input, &mut output, &TransposeConfig::default())?;
//!
//! assert_eq!(output, b"1,4\n2,5\n3,6\n");
//! assert_eq!(report.columns, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Blocks
//!
//! Input rows are grouped into blocks of [`TransposeConfig::block_size`] rows
//! ([`BlockAccumulator`]) and each block is transposed in memory
//! ([`transpose_block`]).
//!
//! ### Shards
//!
//! The columns of the input are split into contiguous ranges by a
//! [`ColumnPartitionPlan`]. Every range is owned by one shard, an append-only
//! record file obtained from a [`ShardStorage`]. Each transposed block row is
//! appended to the shard owning its column.
//!
//! ### Reassembly
//!
//! After the last block, every shard is read back once. Values of the same
//! column from successive blocks are concatenated into a complete output row,
//! and rows are emitted in column order.
//!
//! ### Cancellation
//!
//! A [`CancellationContext`] carries the deadline for one operation. Every
//! stage checks it at its iteration boundaries and fails with
//! [`MatrixError::DeadlineExceeded`] once it expires.
//!
//! ## Custom storage
//!
//! ```
//! use matrixbeam::{CancellationContext, MemoryStorage, TransposeConfig, Transposer};
//! use std::io::Cursor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let transposer = Transposer::new(TransposeConfig { block_size: 2, ..Default::default() })?;
//! let mut storage = MemoryStorage::new();
//! let mut output = Vec::new();
//! transposer.transpose_with_storage(
//!     Cursor::new(b"1,2\n3,4\n5,6\n".to_vec()),
//!     &mut output,
//!     &mut storage,
//!     &CancellationContext::unbounded(),
//! )?;
//! assert_eq!(output, b"1,3,5\n2,4,6\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `compression-gzip` (default) - gzip via `flate2`
//! - `compression-zstd` (default) - zstd
//! - `compression-bzip2` (default) - bzip2
//! - `compression-xz` (default) - xz via `xz2`

pub mod block;
pub mod cancel;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod shard;
pub mod stream_ops;
pub mod testing;
pub mod transpose;

pub use block::{Block, BlockAccumulator, Row, transpose_block};
pub use cancel::{CancellationContext, Stage};
pub use config::{PartitionStrategy, StreamConfig, TransposeConfig};
pub use error::{ErrorClass, MatrixError, Result};
pub use io::{RowSink, RowSource};
pub use metrics::MetricsCollector;
pub use partition::{ColumnPartitionPlan, ColumnRange};
pub use shard::{MemoryStorage, ShardMedium, ShardStorage, TempDirStorage};
pub use stream_ops::{StreamReport, echo_matrix, flatten_matrix, product_matrix, sum_matrix};
pub use transpose::{TransposeReport, Transposer, transpose};
