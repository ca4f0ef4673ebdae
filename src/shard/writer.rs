//! Write phase: distribute block-transposed rows to their shards.

use super::{PLACEHOLDER, Reassembler, ShardMedium, ShardStorage};
use crate::block::Row;
use crate::cancel::{CancellationContext, Stage};
use crate::error::{MatrixError, Result};
use crate::partition::ColumnPartitionPlan;
use csv::WriterBuilder;
use std::io::{Seek, SeekFrom};
use tracing::{debug, trace};

/// The N shard writers of one operation plus the plan that routes columns to them.
///
/// Every shard receives exactly `range.width()` records per block: one data
/// record per real column in its range, then placeholders for the rest. That
/// keeps slot positions aligned across blocks for the reassembler.
pub struct ShardSet {
    plan: ColumnPartitionPlan,
    writers: Vec<csv::Writer<Box<dyn ShardMedium>>>,
    delimiter: u8,
    block_rows: Vec<usize>,
    records_written: u64,
    placeholders_written: u64,
}

impl ShardSet {
    /// Allocate one shard per range of `plan`.
    ///
    /// Shards created before a failure are dropped (and so released) before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `ShardAllocation` naming the shard that could not be created.
    pub fn create<S: ShardStorage + ?Sized>(
        storage: &mut S,
        plan: ColumnPartitionPlan,
        delimiter: u8,
        buffer_capacity: usize,
    ) -> Result<Self> {
        let mut writers = Vec::with_capacity(plan.shard_count());
        for shard in 0..plan.shard_count() {
            let medium = storage
                .allocate(shard)
                .map_err(|source| MatrixError::ShardAllocation { shard, source })?;
            writers.push(
                WriterBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .delimiter(delimiter)
                    .buffer_capacity(buffer_capacity.max(1))
                    .from_writer(medium),
            );
        }
        debug!(
            shards = writers.len(),
            storage = %storage.describe(),
            "allocated shard storage"
        );
        Ok(Self {
            plan,
            writers,
            delimiter,
            block_rows: Vec::new(),
            records_written: 0,
            placeholders_written: 0,
        })
    }

    #[must_use]
    pub const fn plan(&self) -> &ColumnPartitionPlan {
        &self.plan
    }

    #[must_use]
    pub fn blocks_written(&self) -> u64 {
        self.block_rows.len() as u64
    }

    #[must_use]
    pub const fn placeholders_written(&self) -> u64 {
        self.placeholders_written
    }

    #[must_use]
    pub const fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Append one block-transposed matrix (`columns × block_rows`) to the shards.
    ///
    /// Shard `i` with range `[start, end)` receives rows `start..min(end, C)`
    /// followed by placeholders up to the range's nominal width. Each shard is
    /// flushed afterwards to bound the memory held in write buffers.
    ///
    /// # Errors
    ///
    /// `ShardAllocation` when a write or flush fails, `DeadlineExceeded` at a
    /// check-point between shards.
    pub fn write_block(&mut self, transposed: &[Row], ctx: &CancellationContext) -> Result<()> {
        let columns = transposed.len();
        let rows_in_block = transposed.first().map_or(0, Vec::len);
        let block = self.block_rows.len() as u64;
        let tag = block.to_string();

        for (shard, range) in self.plan.ranges().iter().enumerate() {
            ctx.check(Stage::WriteShard, 0)?;
            let writer = &mut self.writers[shard];
            let fail = |e: csv::Error| MatrixError::ShardAllocation {
                shard,
                source: e.into(),
            };

            for column in &transposed[range.available(columns)] {
                let record = std::iter::once(tag.as_str()).chain(column.iter().map(String::as_str));
                writer.write_record(record).map_err(fail)?;
                self.records_written += 1;
            }
            let padding = range.shortfall(columns);
            for _ in 0..padding {
                writer.write_record([PLACEHOLDER]).map_err(fail)?;
            }
            self.placeholders_written += padding as u64;
            self.records_written += padding as u64;

            writer
                .flush()
                .map_err(|source| MatrixError::ShardAllocation { shard, source })?;
        }

        trace!(block, rows_in_block, columns, "block distributed to shards");
        self.block_rows.push(rows_in_block);
        Ok(())
    }

    /// Close the write phase and rewind every shard for reading.
    ///
    /// # Errors
    ///
    /// `ShardAllocation` when the final flush fails, `Reassembly` when a shard
    /// cannot be rewound.
    pub fn finish(self) -> Result<Reassembler> {
        let mut media = Vec::with_capacity(self.writers.len());
        for (shard, writer) in self.writers.into_iter().enumerate() {
            let mut medium = writer
                .into_inner()
                .map_err(|e| MatrixError::ShardAllocation {
                    shard,
                    source: e.into_error(),
                })?;
            medium
                .seek(SeekFrom::Start(0))
                .map_err(|e| MatrixError::Reassembly {
                    shard,
                    rows_emitted: 0,
                    message: format!("cannot rewind shard: {e}"),
                })?;
            media.push(medium);
        }
        debug!(
            blocks = self.block_rows.len(),
            records = self.records_written,
            placeholders = self.placeholders_written,
            "write phase complete"
        );
        Ok(Reassembler::new(
            self.plan,
            media,
            self.block_rows,
            self.delimiter,
        ))
    }
}
