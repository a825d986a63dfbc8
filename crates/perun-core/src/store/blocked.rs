//! Block-allocated growable vector storage for the dynamic indexes.
//!
//! Vectors live in fixed-capacity blocks so that growth appends a block
//! instead of reallocating the whole buffer; existing rows never move until
//! an explicit [`GrowableData::compact`].

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::store::{
    fix_query, padded_dimension, prefetch_slice, Element, GrowableData, VectorData,
};

/// Number of vector slots per allocation block.
pub const BLOCK_SLOTS: usize = 4096;

/// Growable vector storage backed by fixed-size blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedStore<T> {
    dim: usize,
    padded_dim: usize,
    len: usize,
    blocks: Vec<Vec<T>>,
}

impl<T: Element> BlockedStore<T> {
    /// Creates an empty store of logical dimension `dim`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `dim == 0`.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument("dimension must be positive".into()));
        }
        Ok(Self {
            dim,
            padded_dim: padded_dimension(dim),
            len: 0,
            blocks: Vec::new(),
        })
    }

    /// Builds a store from a batch of f32 vectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on an empty batch and
    /// [`Error::DimensionMismatch`] on ragged input.
    pub fn from_vectors<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(Error::InvalidArgument(
                "cannot build a store from zero vectors".into(),
            ));
        };
        let mut store = Self::new(first.as_ref().len())?;
        store.resize(vectors.len());
        for (i, v) in vectors.iter().enumerate() {
            store.set(i, v.as_ref())?;
        }
        Ok(store)
    }

    /// Borrowed view of the logical D elements of vector `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> &[T] {
        let offset = (i % BLOCK_SLOTS) * self.padded_dim;
        &self.blocks[i / BLOCK_SLOTS][offset..offset + self.dim]
    }

    /// Returns true if the store holds no vectors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn write_row(&mut self, i: usize, v: &[f32]) {
        let padded = self.padded_dim;
        let offset = (i % BLOCK_SLOTS) * padded;
        let block = &mut self.blocks[i / BLOCK_SLOTS];
        for (j, &x) in v.iter().enumerate() {
            block[offset + j] = T::from_f32(x);
        }
    }

    fn copy_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let padded = self.padded_dim;
        let (fb, fo) = (from / BLOCK_SLOTS, (from % BLOCK_SLOTS) * padded);
        let (tb, to_off) = (to / BLOCK_SLOTS, (to % BLOCK_SLOTS) * padded);
        if fb == tb {
            self.blocks[fb].copy_within(fo..fo + padded, to_off);
        } else {
            // Rows live in distinct blocks; split the borrow.
            let (lo, hi) = if fb < tb {
                let (a, b) = self.blocks.split_at_mut(tb);
                (&a[fb], &mut b[0])
            } else {
                let (a, b) = self.blocks.split_at_mut(fb);
                (&b[0], &mut a[tb])
            };
            hi[to_off..to_off + padded].copy_from_slice(&lo[fo..fo + padded]);
        }
    }
}

impl<T: Element> VectorData for BlockedStore<T> {
    type Query = QueryKernel;

    #[inline]
    fn size(&self) -> usize {
        self.len
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dim
    }

    #[inline]
    fn prefetch(&self, i: usize) {
        if i < self.len {
            prefetch_slice(
                &self.blocks[i / BLOCK_SLOTS],
                (i % BLOCK_SLOTS) * self.padded_dim,
            );
        }
    }

    fn reconstruct(&self, i: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dim);
        for (o, &c) in out.iter_mut().zip(self.get(i)) {
            *o = c.to_f32();
        }
    }

    fn make_query(&self, metric: DistanceMetric, query: &[f32]) -> QueryKernel {
        fix_query(metric, query)
    }

    #[inline]
    fn query_distance(&self, query: &QueryKernel, i: usize) -> f32 {
        T::ordered_query_distance(query.metric(), query.prepared(), self.get(i))
    }
}

impl<T: Element> GrowableData for BlockedStore<T> {
    fn set(&mut self, i: usize, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(Error::dimensions(self.dim, v.len()));
        }
        if i >= self.len {
            return Err(Error::InvalidArgument(format!(
                "slot {i} out of range for store of {} vectors",
                self.len
            )));
        }
        self.write_row(i, v);
        Ok(())
    }

    fn resize(&mut self, n: usize) {
        let blocks_needed = n.div_ceil(BLOCK_SLOTS);
        let block_len = BLOCK_SLOTS * self.padded_dim;
        while self.blocks.len() < blocks_needed {
            self.blocks.push(vec![T::ZERO; block_len]);
        }
        self.blocks.truncate(blocks_needed);
        self.len = n;
    }

    fn compact(&mut self, new_to_old: &[u32]) {
        for (new_idx, &old_idx) in new_to_old.iter().enumerate() {
            debug_assert!((old_idx as usize) < self.len);
            debug_assert!(old_idx as usize >= new_idx);
            self.copy_row(old_idx as usize, new_idx);
        }
        self.resize(new_to_old.len());
    }
}
