//! Contiguous uncompressed vector storage.

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::store::{
    check_dimensions, fix_query, padded_dimension, prefetch_slice, Element, ElementType,
    GrowableData, VectorData,
};

/// Contiguous storage of N vectors with O(1) row access.
///
/// Rows are padded to a lane multiple so every row starts aligned for SIMD
/// loads; the padding elements are zero and excluded from the logical view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseStore<T> {
    dim: usize,
    padded_dim: usize,
    len: usize,
    data: Vec<T>,
}

impl<T: Element> DenseStore<T> {
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
            data: Vec::new(),
        })
    }

    /// Builds a store from a batch of f32 vectors, narrowing element-wise.
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
        let dim = first.as_ref().len();
        check_dimensions(dim, vectors)?;

        let mut store = Self::new(dim)?;
        store.resize(vectors.len());
        for (i, v) in vectors.iter().enumerate() {
            store.write_row(i, v.as_ref());
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
        let offset = i * self.padded_dim;
        &self.data[offset..offset + self.dim]
    }

    /// Element type tag of this store.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        T::KIND
    }

    /// Returns true if the store holds no vectors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn write_row(&mut self, i: usize, v: &[f32]) {
        let offset = i * self.padded_dim;
        for (j, &x) in v.iter().enumerate() {
            self.data[offset + j] = T::from_f32(x);
        }
    }
}

impl<T: Element> VectorData for DenseStore<T> {
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
        prefetch_slice(&self.data, i * self.padded_dim);
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

impl<T: Element> GrowableData for DenseStore<T> {
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
        self.data.resize(n * self.padded_dim, T::ZERO);
        self.len = n;
    }

    fn compact(&mut self, new_to_old: &[u32]) {
        let padded = self.padded_dim;
        for (new_idx, &old_idx) in new_to_old.iter().enumerate() {
            let old_idx = old_idx as usize;
            debug_assert!(old_idx < self.len);
            // Live slots are moved front-to-back; a slot never moves forward,
            // so copy_within sources stay intact.
            debug_assert!(old_idx >= new_idx);
            if old_idx != new_idx {
                let src = old_idx * padded;
                let dst = new_idx * padded;
                self.data.copy_within(src..src + padded, dst);
            }
        }
        self.resize(new_to_old.len());
    }
}
