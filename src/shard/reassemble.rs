//! Read phase: turn shard content back into rows of the transposed matrix.
//!
//! Shard `i` holds `width × blocks` records. The record at position `p`
//! belongs to slot `p % width` (column `start + slot` of the input) and to
//! block `p / width`. Concatenating a slot's values across blocks yields one
//! complete output row, because blocks were written in input order.

use super::{ShardMedium, ShardRecord};
use crate::block::Row;
use crate::cancel::{CancellationContext, Stage};
use crate::error::{MatrixError, Result};
use crate::io::RowSink;
use crate::partition::ColumnPartitionPlan;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::io::Write;
use tracing::{debug, instrument};

/// Counters collected while reassembling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblyStats {
    pub shards_read: usize,
    pub records_read: u64,
    pub placeholders_skipped: u64,
    pub rows_emitted: u64,
}

/// Rewound shards ready to be read back in shard order.
pub struct Reassembler {
    plan: ColumnPartitionPlan,
    shards: Vec<Box<dyn ShardMedium>>,
    block_rows: Vec<usize>,
    delimiter: u8,
}

impl Reassembler {
    pub(crate) fn new(
        plan: ColumnPartitionPlan,
        shards: Vec<Box<dyn ShardMedium>>,
        block_rows: Vec<usize>,
        delimiter: u8,
    ) -> Self {
        Self {
            plan,
            shards,
            block_rows,
            delimiter,
        }
    }

    /// Rows of the original input, i.e. the width of every output row.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.block_rows.iter().sum()
    }

    /// Stream the transposed matrix into `sink`, one shard at a time.
    ///
    /// Only one shard's slots are resident at once. The sink is flushed after
    /// each shard and the shard's storage is released as soon as it has been
    /// consumed.
    ///
    /// # Errors
    ///
    /// `Reassembly` when a shard cannot be read or its content does not match
    /// what was written, `Output` when the sink fails, `DeadlineExceeded` at a
    /// check-point. All of them report the rows already emitted.
    #[instrument(skip_all, fields(shards = self.shards.len()))]
    pub fn emit<W: Write>(
        self,
        sink: &mut RowSink<W>,
        ctx: &CancellationContext,
    ) -> Result<ReassemblyStats> {
        let total_rows = self.total_rows();
        let Self {
            plan,
            shards,
            block_rows,
            delimiter,
        } = self;
        let columns = plan.total_columns();
        let blocks = block_rows.len();
        let mut stats = ReassemblyStats::default();

        for (shard, (medium, range)) in shards.into_iter().zip(plan.ranges()).enumerate() {
            ctx.check(Stage::Reassemble, sink.rows_flushed())?;
            let width = range.width();
            if width == 0 {
                continue;
            }
            let live = range.available(columns).len();
            let corrupt = |message: String| MatrixError::Reassembly {
                shard,
                rows_emitted: sink.rows_flushed(),
                message,
            };

            let mut reader = ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(delimiter)
                .from_reader(medium);
            let mut record = StringRecord::new();
            let mut slots: Vec<Row> = (0..live).map(|_| Vec::with_capacity(total_rows)).collect();
            let expected = width * blocks;
            let mut position = 0usize;

            loop {
                ctx.check(Stage::Reassemble, sink.rows_flushed())?;
                let more = reader
                    .read_record(&mut record)
                    .map_err(|e| corrupt(format!("read failed: {e}")))?;
                if !more {
                    break;
                }
                if position >= expected {
                    return Err(corrupt(format!(
                        "unexpected record {} (expected {expected})",
                        position + 1
                    )));
                }
                let block = position / width;
                let slot = position % width;

                match ShardRecord::decode(&record).map_err(corrupt)? {
                    ShardRecord::Placeholder if slot >= live => stats.placeholders_skipped += 1,
                    ShardRecord::Placeholder => {
                        return Err(corrupt(format!(
                            "placeholder in data slot {slot} of block {block}"
                        )));
                    }
                    ShardRecord::Data { .. } if slot >= live => {
                        return Err(corrupt(format!(
                            "data in padding slot {slot} of block {block}"
                        )));
                    }
                    ShardRecord::Data { block: tag } => {
                        if tag != block as u64 {
                            return Err(corrupt(format!(
                                "record {} tagged block {tag}, expected {block}",
                                position + 1
                            )));
                        }
                        let values = record.len() - 1;
                        if values != block_rows[block] {
                            return Err(corrupt(format!(
                                "block {block} slot {slot} has {values} values, expected {}",
                                block_rows[block]
                            )));
                        }
                        slots[slot].extend(record.iter().skip(1).map(str::to_owned));
                    }
                }
                position += 1;
                stats.records_read += 1;
            }

            if position != expected {
                return Err(corrupt(format!(
                    "truncated: {position} of {expected} records present"
                )));
            }
            drop(reader);

            for slot in &slots {
                sink.write_row(slot)?;
                stats.rows_emitted += 1;
            }
            sink.flush()?;
            stats.shards_read += 1;
            debug!(shard, rows = slots.len(), "shard reassembled");
        }

        Ok(stats)
    }
}
