//! Work-dispatch plane: thread pool and the parallel-partition primitive.
//!
//! Every parallel pass in the engine (graph build, compression, search
//! batches, clustering) funnels through [`ThreadPool::parallel_for`], which
//! divides `[0, n)` into one contiguous equal-share range per worker and
//! blocks until all ranges complete. There is no work stealing between
//! ranges; a pass that needs load balancing should shuffle its work order
//! instead.
//!
//! The [`ThreadPool::Sequential`] variant fulfils the same contract on the
//! calling thread, which keeps tests deterministic.

use std::ops::Range;

use crate::error::{Error, Result};

/// A fork-join worker pool.
pub enum ThreadPool {
    /// Runs every range on the calling thread.
    Sequential,
    /// Dispatches ranges onto a dedicated rayon pool.
    Pooled(rayon::ThreadPool),
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "ThreadPool::Sequential"),
            Self::Pooled(pool) => write!(f, "ThreadPool::Pooled({})", pool.current_num_threads()),
        }
    }
}

impl ThreadPool {
    /// Creates a pool with `num_threads` workers.
    ///
    /// `num_threads <= 1` yields the sequential pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the underlying pool cannot be spawned.
    pub fn new(num_threads: usize) -> Result<Self> {
        if num_threads <= 1 {
            return Ok(Self::Sequential);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("perun-worker-{i}"))
            .build()
            .map_err(|e| Error::Runtime(format!("failed to spawn thread pool: {e}")))?;
        Ok(Self::Pooled(pool))
    }

    /// The single-threaded pool.
    #[must_use]
    pub const fn sequential() -> Self {
        Self::Sequential
    }

    /// Number of workers dispatched per `parallel_for`.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Pooled(pool) => pool.current_num_threads(),
        }
    }

    /// Runs `f(range, worker_id)` over an equal-share static partition of
    /// `[0, n)` and blocks until every range has completed.
    ///
    /// A panic inside any worker propagates to the caller after the join.
    pub fn parallel_for<F>(&self, n: usize, f: F)
    where
        F: Fn(Range<usize>, usize) + Sync,
    {
        if n == 0 {
            return;
        }
        match self {
            Self::Sequential => f(0..n, 0),
            Self::Pooled(pool) => {
                let workers = pool.current_num_threads().max(1);
                let chunk = n.div_ceil(workers);
                pool.scope(|scope| {
                    for tid in 0..workers {
                        let start = tid * chunk;
                        if start >= n {
                            break;
                        }
                        let end = (start + chunk).min(n);
                        let f = &f;
                        scope.spawn(move |_| f(start..end, tid));
                    }
                });
            }
        }
    }

    /// Fold form of [`ThreadPool::parallel_for`]: each worker produces a
    /// partial value for its range, and the partials are combined in range
    /// order on the calling thread.
    pub fn parallel_map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>, usize) -> T + Sync,
    {
        if n == 0 {
            return Vec::new();
        }
        match self {
            Self::Sequential => vec![f(0..n, 0)],
            Self::Pooled(pool) => {
                let workers = pool.current_num_threads().max(1);
                let chunk = n.div_ceil(workers);
                let mut slots: Vec<Option<T>> = Vec::new();
                slots.resize_with(workers, || None);
                pool.scope(|scope| {
                    for (tid, slot) in slots.iter_mut().enumerate() {
                        let start = tid * chunk;
                        if start >= n {
                            break;
                        }
                        let end = (start + chunk).min(n);
                        let f = &f;
                        scope.spawn(move |_| *slot = Some(f(start..end, tid)));
                    }
                });
                slots.into_iter().flatten().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sequential_covers_range_once() {
        let pool = ThreadPool::sequential();
        let touched = AtomicUsize::new(0);
        pool.parallel_for(100, |range, tid| {
            assert_eq!(tid, 0);
            touched.fetch_add(range.len(), Ordering::Relaxed);
        });
        assert_eq!(touched.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_pooled_partition_is_disjoint_and_complete() {
        let pool = ThreadPool::new(4).unwrap();
        let marks: Vec<AtomicUsize> = (0..103).map(|_| AtomicUsize::new(0)).collect();
        pool.parallel_for(103, |range, _tid| {
            for i in range {
                marks[i].fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(marks.iter().all(|m| m.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_small_n_does_not_overrun() {
        let pool = ThreadPool::new(8).unwrap();
        let touched = AtomicUsize::new(0);
        pool.parallel_for(3, |range, _| {
            touched.fetch_add(range.len(), Ordering::Relaxed);
        });
        assert_eq!(touched.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_parallel_map_combines_in_order() {
        let pool = ThreadPool::new(4).unwrap();
        let partials = pool.parallel_map(1000, |range, _| range.sum::<usize>());
        let total: usize = partials.into_iter().sum();
        assert_eq!(total, 1000 * 999 / 2);
    }

    #[test]
    fn test_zero_items_is_a_no_op() {
        let pool = ThreadPool::new(2).unwrap();
        pool.parallel_for(0, |_, _| panic!("must not run"));
    }
}
