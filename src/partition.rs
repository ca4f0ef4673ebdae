//! Static assignment of column ranges to shards.
//!
//! The plan is computed once per operation from the column count of the
//! first row and never changes afterwards.

use crate::config::PartitionStrategy;
use crate::error::{MatrixError, Result};
use std::ops::Range;

/// Half-open column range `[start, end)` owned by one shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnRange {
    pub start: usize,
    pub end: usize,
}

impl ColumnRange {
    /// Nominal width, i.e. row-slots this shard receives per block.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.end - self.start
    }

    /// Portion of the range backed by real columns when a block has `columns` of them.
    #[must_use]
    pub fn available(&self, columns: usize) -> Range<usize> {
        let end = self.end.min(columns);
        let start = self.start.min(end);
        start..end
    }

    /// Slots that must be padded with placeholders for a block of `columns` columns.
    #[must_use]
    pub fn shortfall(&self, columns: usize) -> usize {
        self.width() - self.available(columns).len()
    }
}

/// Ordered, disjoint column ranges, one per shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnPartitionPlan {
    total_columns: usize,
    ranges: Vec<ColumnRange>,
}

impl ColumnPartitionPlan {
    /// Split `[0, total_columns)` over `shard_count` shards.
    ///
    /// With [`PartitionStrategy::Balanced`] the ranges are exhaustive and never
    /// overshoot. With [`PartitionStrategy::Legacy`] every shard gets the
    /// rounded-up width, so the last ranges may extend past `total_columns`
    /// (or lie entirely beyond it).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when either argument is zero.
    pub fn new(total_columns: usize, shard_count: usize, strategy: PartitionStrategy) -> Result<Self> {
        if total_columns == 0 {
            return Err(MatrixError::InvalidConfig(
                "a partition plan needs at least one column".into(),
            ));
        }
        if shard_count == 0 {
            return Err(MatrixError::InvalidConfig("shard_count must be at least 1".into()));
        }

        let base = total_columns / shard_count;
        let rem = total_columns % shard_count;
        let mut ranges = Vec::with_capacity(shard_count);
        let mut start = 0usize;
        for idx in 0..shard_count {
            let width = match strategy {
                PartitionStrategy::Balanced => base + usize::from(idx < rem),
                PartitionStrategy::Legacy => base + usize::from(rem > 0),
            };
            ranges.push(ColumnRange {
                start,
                end: start + width,
            });
            start += width;
        }
        Ok(Self {
            total_columns,
            ranges,
        })
    }

    #[must_use]
    pub const fn total_columns(&self) -> usize {
        self.total_columns
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn ranges(&self) -> &[ColumnRange] {
        &self.ranges
    }

    #[must_use]
    pub fn range(&self, shard: usize) -> Option<ColumnRange> {
        self.ranges.get(shard).copied()
    }

    /// Shard owning `column`, if any.
    #[must_use]
    pub fn shard_of(&self, column: usize) -> Option<usize> {
        if column >= self.total_columns {
            return None;
        }
        self.ranges
            .iter()
            .position(|r| (r.start..r.end).contains(&column))
    }

    /// `true` when some range reaches past the real column count.
    #[must_use]
    pub fn overshoots(&self) -> bool {
        self.ranges
            .last()
            .is_some_and(|r| r.end > self.total_columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widths(plan: &ColumnPartitionPlan) -> Vec<usize> {
        plan.ranges().iter().map(ColumnRange::width).collect()
    }

    #[test]
    fn balanced_front_loads_remainder() {
        let plan = ColumnPartitionPlan::new(10, 3, PartitionStrategy::Balanced).unwrap();
        assert_eq!(widths(&plan), vec![4, 3, 3]);
        assert_eq!(plan.ranges()[2].end, 10);
        assert!(!plan.overshoots());
    }

    #[test]
    fn balanced_with_fewer_columns_than_shards() {
        let plan = ColumnPartitionPlan::new(2, 3, PartitionStrategy::Balanced).unwrap();
        assert_eq!(widths(&plan), vec![1, 1, 0]);
        assert_eq!(plan.ranges()[2], ColumnRange { start: 2, end: 2 });
    }

    #[test]
    fn legacy_overshoots() {
        let plan = ColumnPartitionPlan::new(5, 3, PartitionStrategy::Legacy).unwrap();
        assert_eq!(widths(&plan), vec![2, 2, 2]);
        assert!(plan.overshoots());
        let last = plan.ranges()[2];
        assert_eq!(last.available(5), 4..5);
        assert_eq!(last.shortfall(5), 1);
    }

    #[test]
    fn legacy_range_entirely_past_the_end() {
        let plan = ColumnPartitionPlan::new(4, 3, PartitionStrategy::Legacy).unwrap();
        let last = plan.ranges()[2];
        assert_eq!(last, ColumnRange { start: 4, end: 6 });
        assert!(last.available(4).is_empty());
        assert_eq!(last.shortfall(4), 2);
    }

    #[test]
    fn shard_lookup() {
        let plan = ColumnPartitionPlan::new(7, 3, PartitionStrategy::Balanced).unwrap();
        assert_eq!(plan.shard_of(0), Some(0));
        assert_eq!(plan.shard_of(2), Some(0));
        assert_eq!(plan.shard_of(3), Some(1));
        assert_eq!(plan.shard_of(6), Some(2));
        assert_eq!(plan.shard_of(7), None);
    }

    #[test]
    fn zero_inputs_rejected() {
        assert!(ColumnPartitionPlan::new(0, 3, PartitionStrategy::Balanced).is_err());
        assert!(ColumnPartitionPlan::new(3, 0, PartitionStrategy::Balanced).is_err());
    }
}
