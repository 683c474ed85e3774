//! Bounding chains from sparse least squares.
//!
//! The boundary equation `B x = p` is solved in the least squares sense
//! with conjugate gradients on the normal equations (CGLS),
//! which only needs products with `B` and `Bᵀ`:
//!
//! ```text
//! x = 0, r = p, s = Bᵀ r, d = s, γ = |s|²
//!
//! for k in 0..max_iterations:
//!     q = B d
//!     α = γ / |q|²
//!     x = x + α d
//!     r = r - α q
//!     s = Bᵀ r
//!     if |s| <= tolerance * |Bᵀ p|:
//!         converged; break
//!     γ' = |s|²
//!     d = s + (γ' / γ) d
//!     γ = γ'
//! ```
//!
//! Bounding chains that come from actual cells have integer coefficients,
//! so the solution is rounded and checked exactly against `p`.
//! Starting from zero, CGLS converges to the minimum-norm solution,
//! which on complexes with nontrivial cycles one dimension up
//! (e.g. closed surfaces) may be fractional even when an integer solution exists.
//! Such inputs are reported as [`NotABoundary`][BoundingChain::NotABoundary];
//! use coefficient flow for those.

use nalgebra as na;
use nalgebra_sparse as nas;

use super::{check_chain_len, BoundingChain, BoundingChainSolver, SolveError};
use crate::{chain::Chain, complex::SimplicialComplex};

/// Tunables of [`LeastSquaresSolver`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeastSquaresOptions {
    /// Maximum number of CGLS iterations.
    /// If `None`, ten times the number of unknowns, but at least 100.
    pub max_iterations: Option<usize>,
    /// Convergence threshold on the normal equation residual `|Bᵀ(p - Bx)|`
    /// relative to `|Bᵀ p|`.
    pub tolerance: f64,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            tolerance: 1e-10,
        }
    }
}

/// Solver that finds bounding chains with sparse least squares
/// and integer rounding.
///
/// Works for chains of any dimension below the complex's dimension.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeastSquaresSolver {
    /// Tunables of the iteration.
    pub options: LeastSquaresOptions,
}

impl LeastSquaresSolver {
    /// Create a solver with the given options.
    #[inline]
    pub fn new(options: LeastSquaresOptions) -> Self {
        Self { options }
    }

    /// Find a chain whose boundary is `boundary`.
    ///
    /// The result has the same representation as the input.
    pub fn solve(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        let chain_dim = boundary.dim();
        let complex_dim = complex.dimension();
        if !complex_dim.is_some_and(|d| chain_dim < d) {
            return Err(SolveError::NotABoundaryCandidate {
                chain_dim,
                complex_dim,
            });
        }
        check_chain_len(complex, boundary)?;

        let matrix = complex.boundary_matrix(chain_dim);
        let target = boundary.to_dense_vector();
        let solution = self.least_squares(&matrix, &target);

        let rounded = solution.map(f64::round);
        let image = &*matrix * &rounded;
        if image != target {
            log::debug!("rounded least squares solution doesn't reproduce the boundary");
            return Ok(BoundingChain::NotABoundary);
        }

        let chain = Chain::from_dense(chain_dim + 1, rounded);
        log::debug!("found bounding chain with {} nonzero cells", chain.nnz());
        Ok(BoundingChain::Found(if boundary.is_sparse() {
            chain.into_sparse()
        } else {
            chain
        }))
    }

    /// Minimize `|Ax - b|` with CGLS starting from zero.
    fn least_squares(&self, a: &nas::CsrMatrix<f64>, b: &na::DVector<f64>) -> na::DVector<f64> {
        let a_t = a.transpose();
        let mut x = na::DVector::zeros(a.ncols());
        let mut residual = b.clone();
        let mut normal_residual = &a_t * &residual;
        let mut direction = normal_residual.clone();
        let mut gamma = normal_residual.norm_squared();
        if gamma == 0.0 {
            // b is orthogonal to the range of A, x = 0 is optimal
            return x;
        }
        let threshold = self.options.tolerance * gamma.sqrt();
        let max_iterations = self
            .options
            .max_iterations
            .unwrap_or_else(|| usize::max(10 * a.ncols(), 100));

        for iteration in 0..max_iterations {
            let q = a * &direction;
            let q_norm_sq = q.norm_squared();
            if q_norm_sq == 0.0 {
                break;
            }
            let alpha = gamma / q_norm_sq;
            x.axpy(alpha, &direction, 1.0);
            residual.axpy(-alpha, &q, 1.0);
            normal_residual = &a_t * &residual;

            let gamma_new = normal_residual.norm_squared();
            log::trace!("CGLS iteration {iteration}: |Aᵀr| = {}", gamma_new.sqrt());
            if gamma_new.sqrt() <= threshold {
                log::debug!("CGLS converged after {} iterations", iteration + 1);
                return x;
            }
            direction = &normal_residual + &direction * (gamma_new / gamma);
            gamma = gamma_new;
        }

        log::warn!("CGLS did not converge in {max_iterations} iterations");
        x
    }
}

impl BoundingChainSolver for LeastSquaresSolver {
    fn bounding_chain(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        self.solve(complex, boundary)
    }
}
