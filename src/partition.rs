use crate::domain::Cell;
use crate::store::CheckpointStore;

/// Cells taken from the source at the cursor for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSlice {
    /// Index of the first cell of the slice in the source.
    pub start: usize,
    /// Length of the unfiltered slice. The cursor moves by this much on success.
    pub span: usize,
    /// Cells from the slice that the store does not hold yet.
    pub pending: Vec<Cell>,
}

impl BatchSlice {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn already_done(&self) -> usize {
        self.span - self.pending.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioner {
    cursor: usize,
    total: usize,
}

impl Partitioner {
    pub fn new(total: usize) -> Self {
        Self { cursor: 0, total }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.total
    }

    pub fn next_batch(
        &self,
        cells: &[Cell],
        store: &CheckpointStore,
        batch_size: usize,
    ) -> BatchSlice {
        let start = self.cursor.min(cells.len());
        let end = start.saturating_add(batch_size.max(1)).min(cells.len());
        let slice = &cells[start..end];
        BatchSlice {
            start,
            span: slice.len(),
            pending: slice
                .iter()
                .filter(|cell| !store.has(&cell.id))
                .cloned()
                .collect(),
        }
    }

    pub fn advance(&mut self, span: usize) {
        self.cursor = self.cursor.saturating_add(span).min(self.total);
    }
}
