//! Fixed-size row blocks and their in-memory transpose.

/// One record: an ordered sequence of field strings.
pub type Row = Vec<String>;

/// Up to `block_size` consecutive rows.
pub type Block = Vec<Row>;

/// Buffers rows until a block is full.
///
/// Peak memory is bounded by `block_size × column_count` fields.
#[derive(Debug)]
pub struct BlockAccumulator {
    block_size: usize,
    rows: Block,
    blocks_emitted: u64,
}

impl BlockAccumulator {
    /// `block_size` is clamped to at least one row.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            rows: Vec::with_capacity(block_size),
            blocks_emitted: 0,
        }
    }

    /// Add a row; returns the completed block once `block_size` rows are held.
    pub fn push(&mut self, row: Row) -> Option<Block> {
        self.rows.push(row);
        if self.rows.len() == self.block_size {
            self.take()
        } else {
            None
        }
    }

    /// Drain the partial block left at end of input.
    pub fn finish(&mut self) -> Option<Block> {
        self.take()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn blocks_emitted(&self) -> u64 {
        self.blocks_emitted
    }

    fn take(&mut self) -> Option<Block> {
        if self.rows.is_empty() {
            return None;
        }
        self.blocks_emitted += 1;
        Some(std::mem::replace(
            &mut self.rows,
            Vec::with_capacity(self.block_size),
        ))
    }
}

/// Transpose an `R × C` block into `C × R`.
///
/// Output row `j` holds column `j` of the block, top to bottom. The block
/// must be rectangular; rows are moved, not cloned.
///
/// ```text
///                        [1,11]                              [6,16]
///   [1,2,3,4,5]          [2,12]     [6,7,8,9,10]             [7,17]
///   [11,12,13,14,15] --> [3,13]     [16,17,18,19,20]   -->   [8,18]
///                        [4,14]                              [9,19]
///                        [5,15]                              [10,20]
/// ```
#[must_use]
pub fn transpose_block(block: Block) -> Vec<Row> {
    let Some(first) = block.first() else {
        return Vec::new();
    };
    let rows = block.len();
    let cols = first.len();

    let mut out: Vec<Row> = (0..cols).map(|_| Vec::with_capacity(rows)).collect();
    for row in block {
        debug_assert_eq!(row.len(), cols, "block must be rectangular");
        for (j, value) in row.into_iter().enumerate() {
            out[j].push(value);
        }
    }
    out
}
