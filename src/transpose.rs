//! Out-of-core transpose.
//!
//! The engine never holds more than one block of input rows plus the slots of
//! a single shard in memory:
//!
//! 1. **Probe**: read the first row to learn `C`, then rewind the input.
//! 2. **Plan**: split `[0, C)` over the configured number of shards.
//! 3. **Write**: read `block_size` rows at a time, transpose the block in
//!    memory and append its rows to the shards owning their columns.
//! 4. **Reassemble**: read each shard back, concatenating per-column values
//!    across blocks, and stream the finished rows to the output in column order.
//!
//! Shape errors are raised while rows stream in, which is always before the
//! first output byte. Shard storage is released on every exit path.

use crate::block::{BlockAccumulator, transpose_block};
use crate::cancel::{CancellationContext, Stage};
use crate::config::TransposeConfig;
use crate::error::{MatrixError, Result};
use crate::io::{RowSink, RowSource, probe_width};
use crate::metrics::MetricsCollector;
use crate::partition::ColumnPartitionPlan;
use crate::shard::{ShardSet, ShardStorage, TempDirStorage};
use std::io::{Read, Seek, Write};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Outcome of a successful transpose.
#[derive(Debug, Clone)]
pub struct TransposeReport {
    /// Column count of the input, i.e. rows of the output.
    pub columns: usize,
    /// Rows of the input, i.e. columns of the output.
    pub rows_read: u64,
    pub blocks: u64,
    pub rows_emitted: u64,
    /// Placeholder records written (legacy partitioning only).
    pub placeholders: u64,
    pub metrics: MetricsCollector,
}

/// Transposes CSV matrices with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Transposer {
    config: TransposeConfig,
}

impl Transposer {
    /// # Errors
    ///
    /// Returns `InvalidConfig` when `config` does not validate.
    pub fn new(config: TransposeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &TransposeConfig {
        &self.config
    }

    /// A context carrying the configured timeout, started now.
    #[must_use]
    pub fn context(&self) -> CancellationContext {
        CancellationContext::from_timeout(self.config.timeout)
    }

    /// Transpose `input` into `output`, spilling shards to a fresh temp
    /// directory under `spill_dir` (or the system temp dir).
    ///
    /// The directory and everything in it is removed before this returns.
    ///
    /// # Errors
    ///
    /// See [`transpose_with_storage`](Self::transpose_with_storage); creating
    /// the directory itself fails with `ShardAllocation` for shard 0.
    pub fn transpose<R, W>(
        &self,
        input: R,
        output: W,
        ctx: &CancellationContext,
    ) -> Result<TransposeReport>
    where
        R: Read + Seek,
        W: Write,
    {
        let mut storage = TempDirStorage::new(self.config.spill_dir.as_deref())
            .map_err(|source| MatrixError::ShardAllocation { shard: 0, source })?;
        debug!(dir = %storage.path().display(), "created spill directory");
        self.transpose_with_storage(input, output, &mut storage, ctx)
    }

    /// Transpose `input` into `output` using `storage` for the shards.
    ///
    /// # Errors
    ///
    /// - `EmptyInput`, `Parse`, `Input`, `InconsistentShape` or
    ///   `UnseekableInput` for bad input (nothing written yet)
    /// - `ShardAllocation` when shard storage cannot be created or written
    /// - `Reassembly` or `Output` during emission
    /// - `DeadlineExceeded` when `ctx` expires or is cancelled
    #[instrument(skip_all, fields(block_size = self.config.block_size, shards = self.config.shard_count))]
    pub fn transpose_with_storage<R, W, S>(
        &self,
        mut input: R,
        output: W,
        storage: &mut S,
        ctx: &CancellationContext,
    ) -> Result<TransposeReport>
    where
        R: Read + Seek,
        W: Write,
        S: ShardStorage + ?Sized,
    {
        let config = &self.config;
        let metrics = MetricsCollector::new();
        metrics.record_start();

        let columns = probe_width(&mut input, config.delimiter)?.ok_or(MatrixError::EmptyInput)?;
        let plan = ColumnPartitionPlan::new(columns, config.shard_count, config.partition)?;
        debug!(columns, ranges = ?plan.ranges(), "partition plan ready");

        let write_started = Instant::now();
        let mut shards = ShardSet::create(storage, plan, config.delimiter, config.shard_buffer_capacity)?;
        let mut source = RowSource::new(input, config.delimiter).with_width(columns);
        let mut blocks = BlockAccumulator::new(config.block_size);

        loop {
            ctx.check(Stage::ReadBlock, 0)?;
            let Some(row) = source.next_row()? else {
                break;
            };
            if let Some(block) = blocks.push(row) {
                shards.write_block(&transpose_block(block), ctx)?;
            }
        }
        if let Some(block) = blocks.finish() {
            shards.write_block(&transpose_block(block), ctx)?;
        }
        let rows_read = source.rows_read();
        let blocks_written = shards.blocks_written();
        let placeholders = shards.placeholders_written();
        metrics.set_counter("shard_records", shards.records_written());
        metrics.record_stage("write", write_started.elapsed());
        debug!(rows_read, blocks = blocks_written, "write phase done");

        let reassemble_started = Instant::now();
        let reassembler = shards.finish()?;
        let mut sink =
            RowSink::new(output, config.delimiter).with_flush_every(config.output_flush_rows);
        let stats = reassembler.emit(&mut sink, ctx)?;
        sink.into_inner()?;
        metrics.record_stage("reassemble", reassemble_started.elapsed());

        metrics.set_counter("rows_read", rows_read);
        metrics.set_counter("columns", columns as u64);
        metrics.set_counter("blocks_written", blocks_written);
        metrics.set_counter("placeholders_written", placeholders);
        metrics.set_counter("placeholders_skipped", stats.placeholders_skipped);
        metrics.set_counter("rows_emitted", stats.rows_emitted);
        metrics.record_end();

        info!(
            rows = rows_read,
            columns,
            blocks = blocks_written,
            placeholders,
            elapsed_ms = ctx.elapsed().as_millis(),
            "matrix transposed"
        );
        Ok(TransposeReport {
            columns,
            rows_read,
            blocks: blocks_written,
            rows_emitted: stats.rows_emitted,
            placeholders,
            metrics,
        })
    }
}

/// Transpose with `config`, a deadline from `config.timeout` and temp-dir shards.
///
/// # Errors
///
/// See [`Transposer::transpose_with_storage`].
pub fn transpose<R: Read + Seek, W: Write>(
    input: R,
    output: W,
    config: &TransposeConfig,
) -> Result<TransposeReport> {
    let transposer = Transposer::new(config.clone())?;
    let ctx = transposer.context();
    transposer.transpose(input, output, &ctx)
}
