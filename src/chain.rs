//! Chains, i.e. formal weighted sums of cells of one dimension.

use nalgebra as na;
use std::collections::{btree_map, BTreeMap};

/// A vector of coefficients corresponding to
/// the set of `k`-dimensional cells of a complex.
///
/// Coefficients are indexed by the level-local index of each cell
/// (see [`SimplicialComplex::cell_to_index`][crate::SimplicialComplex::cell_to_index]),
/// so a chain is only meaningful together with the complex that produced it.
///
/// Values are either stored densely (one entry per cell)
/// or sparsely (only nonzero entries).
/// The two representations hold the same information
/// and can be converted between with [`make_dense`][Self::make_dense]
/// and [`make_sparse`][Self::make_sparse],
/// but arithmetic never converts implicitly;
/// mixing representations is an error.
///
/// Chains can be constructed directly or using the following methods
/// on [`SimplicialComplex`][crate::SimplicialComplex]:
/// - [`new_chain`][crate::SimplicialComplex::new_chain]
/// - [`new_sparse_chain`][crate::SimplicialComplex::new_sparse_chain]
/// - [`volume_chain`][crate::SimplicialComplex::volume_chain]
#[derive(Clone, PartialEq)]
pub struct Chain {
    dim: usize,
    values: ChainValues,
}

#[derive(Clone, Debug, PartialEq)]
enum ChainValues {
    Dense(na::DVector<f64>),
    Sparse {
        len: usize,
        // explicit zeros are never stored
        entries: BTreeMap<usize, f64>,
    },
}

/// Error in arithmetic between chains.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// The chains are of different dimensions.
    #[error("chain dimension mismatch: {left} and {right}")]
    DimensionMismatch {
        /// Dimension of the left operand.
        left: usize,
        /// Dimension of the right operand.
        right: usize,
    },
    /// One chain is dense and the other sparse.
    #[error("cannot combine a dense chain with a sparse one without converting first")]
    RepresentationMismatch,
    /// The chains have a different number of coefficients,
    /// i.e. they come from different complexes.
    #[error("chain length mismatch: {left} and {right}")]
    LengthMismatch {
        /// Length of the left operand.
        left: usize,
        /// Length of the right operand.
        right: usize,
    },
    /// A coefficient index is past the end of the chain.
    #[error("index {index} out of range for a chain of length {len}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the chain.
        len: usize,
    },
}

impl Chain {
    /// Create a dense chain of zeros with `len` coefficients.
    ///
    /// `len` may be zero, e.g. for a dimension with no cells.
    #[inline]
    pub fn zeros(dim: usize, len: usize) -> Self {
        Self::from_dense(dim, na::DVector::zeros(len))
    }

    /// Create a sparse chain of zeros with `len` coefficients.
    #[inline]
    pub fn sparse_zeros(dim: usize, len: usize) -> Self {
        Self {
            dim,
            values: ChainValues::Sparse {
                len,
                entries: BTreeMap::new(),
            },
        }
    }

    /// Create a dense chain from a vector of coefficients.
    #[inline]
    pub fn from_dense(dim: usize, values: na::DVector<f64>) -> Self {
        Self {
            dim,
            values: ChainValues::Dense(values),
        }
    }

    /// Create a sparse chain of length `len` from `(index, value)` pairs.
    ///
    /// Repeated indices are summed.
    pub fn from_entries(
        dim: usize,
        len: usize,
        entries: impl IntoIterator<Item = (usize, f64)>,
    ) -> Result<Self, ChainError> {
        let mut chain = Self::sparse_zeros(dim, len);
        for (index, value) in entries {
            if index >= len {
                return Err(ChainError::IndexOutOfRange { index, len });
            }
            let prev = chain.get(index);
            chain.set(index, prev + value);
        }
        Ok(chain)
    }

    /// The dimension of the cells this chain is defined on.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The number of coefficients, i.e. the number of `dim`-cells in the complex.
    #[inline]
    pub fn len(&self) -> usize {
        match &self.values {
            ChainValues::Dense(v) => v.len(),
            ChainValues::Sparse { len, .. } => *len,
        }
    }

    /// Whether the chain has no coefficients at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every coefficient is zero.
    pub fn is_zero(&self) -> bool {
        match &self.values {
            ChainValues::Dense(v) => v.iter().all(|c| *c == 0.0),
            ChainValues::Sparse { entries, .. } => entries.is_empty(),
        }
    }

    /// Number of nonzero coefficients.
    pub fn nnz(&self) -> usize {
        match &self.values {
            ChainValues::Dense(v) => v.iter().filter(|c| **c != 0.0).count(),
            ChainValues::Sparse { entries, .. } => entries.len(),
        }
    }

    /// Whether the chain uses dense storage.
    #[inline]
    pub fn is_dense(&self) -> bool {
        matches!(self.values, ChainValues::Dense(_))
    }

    /// Whether the chain uses sparse storage.
    #[inline]
    pub fn is_sparse(&self) -> bool {
        matches!(self.values, ChainValues::Sparse { .. })
    }

    /// Get the coefficient of the cell with the given index.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn get(&self, index: usize) -> f64 {
        self.assert_in_range(index);
        match &self.values {
            ChainValues::Dense(v) => v[index],
            ChainValues::Sparse { entries, .. } => entries.get(&index).copied().unwrap_or(0.0),
        }
    }

    /// Set the coefficient of the cell with the given index.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn set(&mut self, index: usize, value: f64) {
        self.assert_in_range(index);
        match &mut self.values {
            ChainValues::Dense(v) => v[index] = value,
            ChainValues::Sparse { entries, .. } => {
                if value == 0.0 {
                    entries.remove(&index);
                } else {
                    entries.insert(index, value);
                }
            }
        }
    }

    #[inline]
    fn assert_in_range(&self, index: usize) {
        let len = self.len();
        assert!(
            index < len,
            "index {index} out of range for a chain of length {len}"
        );
    }

    /// Switch to dense storage. Does nothing if already dense.
    pub fn make_dense(&mut self) {
        if let ChainValues::Sparse { len, entries } = &self.values {
            let mut dense = na::DVector::zeros(*len);
            for (&i, &v) in entries {
                dense[i] = v;
            }
            self.values = ChainValues::Dense(dense);
        }
    }

    /// Switch to sparse storage, dropping zero coefficients.
    /// Does nothing if already sparse.
    pub fn make_sparse(&mut self) {
        if let ChainValues::Dense(v) = &self.values {
            let entries = v
                .iter()
                .enumerate()
                .filter(|(_, c)| **c != 0.0)
                .map(|(i, c)| (i, *c))
                .collect();
            self.values = ChainValues::Sparse {
                len: v.len(),
                entries,
            };
        }
    }

    /// Consume the chain and return it in dense storage.
    #[inline]
    pub fn into_dense(mut self) -> Self {
        self.make_dense();
        self
    }

    /// Consume the chain and return it in sparse storage.
    #[inline]
    pub fn into_sparse(mut self) -> Self {
        self.make_sparse();
        self
    }

    /// Copy the coefficients into a dense `nalgebra` vector
    /// regardless of the storage used.
    pub fn to_dense_vector(&self) -> na::DVector<f64> {
        match &self.values {
            ChainValues::Dense(v) => v.clone(),
            ChainValues::Sparse { .. } => self.clone().into_dense().to_dense_vector(),
        }
    }

    /// Iterate over `(index, coefficient)` pairs.
    ///
    /// Sparse chains yield only their nonzero entries in index order,
    /// dense chains yield every index.
    /// The iterator borrows the chain and can be recreated any number of times.
    pub fn iter(&self) -> ChainIter<'_> {
        match &self.values {
            ChainValues::Dense(v) => ChainIter::Dense(v.as_slice().iter().enumerate()),
            ChainValues::Sparse { entries, .. } => ChainIter::Sparse(entries.iter()),
        }
    }

    fn check_compatible(&self, other: &Chain) -> Result<(), ChainError> {
        if self.dim != other.dim {
            return Err(ChainError::DimensionMismatch {
                left: self.dim,
                right: other.dim,
            });
        }
        if self.is_dense() != other.is_dense() {
            return Err(ChainError::RepresentationMismatch);
        }
        if self.len() != other.len() {
            return Err(ChainError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(())
    }

    /// Add two chains of the same dimension and representation.
    pub fn try_add(&self, other: &Chain) -> Result<Chain, ChainError> {
        self.combine(other, 1.0)
    }

    /// Subtract `other` from `self`.
    /// The chains must have the same dimension and representation.
    pub fn try_sub(&self, other: &Chain) -> Result<Chain, ChainError> {
        self.combine(other, -1.0)
    }

    /// `self + factor * other`
    fn combine(&self, other: &Chain, factor: f64) -> Result<Chain, ChainError> {
        self.check_compatible(other)?;
        let values = match (&self.values, &other.values) {
            (ChainValues::Dense(l), ChainValues::Dense(r)) => ChainValues::Dense(l + r * factor),
            (
                ChainValues::Sparse { len, entries: l },
                ChainValues::Sparse { entries: r, .. },
            ) => {
                let mut entries = l.clone();
                for (&i, &v) in r {
                    let sum = entries.get(&i).copied().unwrap_or(0.0) + factor * v;
                    if sum == 0.0 {
                        entries.remove(&i);
                    } else {
                        entries.insert(i, sum);
                    }
                }
                ChainValues::Sparse { len: *len, entries }
            }
            // ruled out by `check_compatible`
            _ => return Err(ChainError::RepresentationMismatch),
        };
        Ok(Chain {
            dim: self.dim,
            values,
        })
    }

    /// Multiply every coefficient by `factor`.
    pub fn scale(&self, factor: f64) -> Chain {
        self.map_values(|v| factor * v)
    }

    /// Take the absolute value of every coefficient.
    pub fn abs(&self) -> Chain {
        self.map_values(f64::abs)
    }

    fn map_values(&self, f: impl Fn(f64) -> f64) -> Chain {
        let values = match &self.values {
            ChainValues::Dense(v) => ChainValues::Dense(v.map(&f)),
            ChainValues::Sparse { len, entries } => ChainValues::Sparse {
                len: *len,
                entries: entries
                    .iter()
                    .map(|(&i, &v)| (i, f(v)))
                    .filter(|(_, v)| *v != 0.0)
                    .collect(),
            },
        };
        Chain {
            dim: self.dim,
            values,
        }
    }

    /// Inner product of two chains of the same dimension and representation.
    pub fn dot(&self, other: &Chain) -> Result<f64, ChainError> {
        self.check_compatible(other)?;
        match (&self.values, &other.values) {
            (ChainValues::Dense(l), ChainValues::Dense(r)) => Ok(l.dot(r)),
            (ChainValues::Sparse { entries: l, .. }, ChainValues::Sparse { entries: r, .. }) => {
                // iterate over the shorter one and look up in the other
                let (short, long) = if l.len() <= r.len() { (l, r) } else { (r, l) };
                Ok(short
                    .iter()
                    .filter_map(|(i, v)| long.get(i).map(|w| v * w))
                    .sum())
            }
            _ => Err(ChainError::RepresentationMismatch),
        }
    }
}

/// Iterator over the coefficients of a [`Chain`],
/// created with [`Chain::iter`].
pub enum ChainIter<'a> {
    #[doc(hidden)]
    Dense(std::iter::Enumerate<std::slice::Iter<'a, f64>>),
    #[doc(hidden)]
    Sparse(btree_map::Iter<'a, usize, f64>),
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ChainIter::Dense(it) => it.next().map(|(i, v)| (i, *v)),
            ChainIter::Sparse(it) => it.next().map(|(i, v)| (*i, *v)),
        }
    }
}

//
// std trait impls for math ops and such
//

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.values {
            ChainValues::Dense(v) => {
                write!(f, "dense {}-chain, values {:?}", self.dim, v.as_slice())
            }
            ChainValues::Sparse { len, entries } => {
                write!(f, "sparse {}-chain of length {len}, entries {entries:?}", self.dim)
            }
        }
    }
}

impl std::ops::Neg for Chain {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.scale(-1.0)
    }
}

impl std::ops::Neg for &Chain {
    type Output = Chain;

    fn neg(self) -> Self::Output {
        self.scale(-1.0)
    }
}

impl std::ops::Mul<Chain> for f64 {
    type Output = Chain;

    fn mul(self, rhs: Chain) -> Self::Output {
        rhs.scale(self)
    }
}

impl std::ops::Mul<&Chain> for f64 {
    type Output = Chain;

    fn mul(self, rhs: &Chain) -> Self::Output {
        rhs.scale(self)
    }
}
