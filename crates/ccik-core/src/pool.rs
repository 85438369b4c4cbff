//! Shape-indexed scratch allocator for solver matrices.
//!
//! A [`MatrixPool`] hands out [`MatrixHandle`]s to zeroed `DMatrix<f64>`
//! buffers. Storage is never freed: [`MatrixPool::release_all`] only rewinds
//! the per-shape cursors, so the next sequence of `get` calls reissues the
//! same buffers in the same order without reallocating.

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::error::PoolError;

/// Opaque reference to a matrix owned by a [`MatrixPool`].
///
/// Only valid until the next [`MatrixPool::release_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixHandle(usize);

impl MatrixHandle {
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct ShapeBucket {
    slots: Vec<usize>,
    cursor: usize,
}

/// Arena of scratch matrices keyed by `(rows, cols)`.
#[derive(Debug, Default)]
pub struct MatrixPool {
    storage: Vec<DMatrix<f64>>,
    buckets: HashMap<(usize, usize), ShapeBucket>,
}

impl MatrixPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a zeroed `rows x cols` matrix, reusing released storage when
    /// a buffer of that shape is available.
    pub fn get(&mut self, rows: usize, cols: usize) -> MatrixHandle {
        let bucket = self.buckets.entry((rows, cols)).or_default();
        let index = if let Some(&index) = bucket.slots.get(bucket.cursor) {
            self.storage[index].fill(0.0);
            index
        } else {
            let index = self.storage.len();
            self.storage.push(DMatrix::zeros(rows, cols));
            bucket.slots.push(index);
            index
        };
        bucket.cursor += 1;
        MatrixHandle(index)
    }

    /// Return every issued matrix to its bucket.
    pub fn release_all(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.cursor = 0;
        }
    }

    /// # Panics
    ///
    /// Panics if `handle` was not issued by this pool.
    pub fn matrix(&self, handle: MatrixHandle) -> &DMatrix<f64> {
        &self.storage[handle.0]
    }

    /// # Panics
    ///
    /// Panics if `handle` was not issued by this pool.
    pub fn matrix_mut(&mut self, handle: MatrixHandle) -> &mut DMatrix<f64> {
        &mut self.storage[handle.0]
    }

    /// Borrow several distinct matrices mutably at once.
    pub fn disjoint_mut<const N: usize>(
        &mut self,
        handles: [MatrixHandle; N],
    ) -> Result<[&mut DMatrix<f64>; N], PoolError> {
        for (i, handle) in handles.iter().enumerate() {
            if handle.0 >= self.storage.len() {
                return Err(PoolError::UnknownHandle(handle.0));
            }
            if handles[..i].contains(handle) {
                return Err(PoolError::DuplicateHandle(handle.0));
            }
        }
        let indices = handles.map(MatrixHandle::index);
        self.storage
            .get_disjoint_mut(indices)
            .map_err(|_| PoolError::DuplicateHandle(indices[0]))
    }

    /// Total number of matrices ever allocated.
    pub fn allocated(&self) -> usize {
        self.storage.len()
    }

    /// Number of matrices issued since the last release.
    pub fn in_use(&self) -> usize {
        self.buckets.values().map(|b| b.cursor).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
