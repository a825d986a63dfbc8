//! Batch iterator: incrementally enlarging graph search.
//!
//! Each call to [`BatchIterator::next`] widens the search window by the
//! requested batch size, re-runs the graph search, and yields the next
//! ranked slice of neighbors that earlier batches have not returned. The
//! iterator keeps an internal copy of the query, so the caller's buffer may
//! go away after construction.

use crate::error::{Error, Result};
use crate::index::search_buffer::SearchBuffer;
use crate::index::Neighbor;
use crate::store::VectorData;

use super::index::VamanaIndex;

/// Extra buffer capacity carried beyond the yielded prefix, so the next
/// batch has ranked candidates ready.
pub const ITERATOR_EXTRA_CAPACITY: usize = 100;

/// Iterator over a query's neighbors in ranked batches.
pub struct BatchIterator<'a, D> {
    index: &'a VamanaIndex<D>,
    query: Vec<f32>,
    results: Vec<Neighbor>,
    yielded: usize,
    batch_number: usize,
    done: bool,
}

impl<'a, D: VectorData> BatchIterator<'a, D> {
    pub(crate) fn new(index: &'a VamanaIndex<D>, query: &[f32]) -> Self {
        Self {
            index,
            query: query.to_vec(),
            results: Vec::new(),
            yielded: 0,
            batch_number: 0,
            done: false,
        }
    }

    /// Neighbors yielded by the most recent [`BatchIterator::next`] call,
    /// with natural distances.
    #[must_use]
    pub fn results(&self) -> &[Neighbor] {
        &self.results
    }

    /// Size of the current batch.
    #[must_use]
    pub fn size(&self) -> usize {
        self.results.len()
    }

    /// Number of completed batches.
    #[must_use]
    pub const fn batch_number(&self) -> usize {
        self.batch_number
    }

    /// True once the reachable corpus is exhausted; later calls yield
    /// empty batches.
    #[must_use]
    pub const fn done(&self) -> bool {
        self.done
    }

    /// Fetches the next `batch_size` neighbors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size == 0`.
    pub fn next(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".into()));
        }
        self.batch_number += 1;
        if self.done {
            self.results.clear();
            return Ok(());
        }

        let window = self.yielded + batch_size;
        let mut buffer = SearchBuffer::new(window, ITERATOR_EXTRA_CAPACITY);
        self.index.search_into_buffer(&self.query, &mut buffer);

        let available = buffer.size().min(window);
        let fresh: Vec<Neighbor> = buffer.results()[self.yielded.min(available)..available].to_vec();
        self.results = self.index.naturalize(fresh);
        self.yielded += self.results.len();
        if self.results.len() < batch_size || self.yielded >= self.index.size() {
            self.done = true;
        }
        Ok(())
    }
}
