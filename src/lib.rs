//! Bounding chains on simplicial complexes.
//!
//! Given a chain of `d-1`-dimensional cells on a [`SimplicialComplex`],
//! the solvers in [`solver`] find a `d`-chain whose boundary it is,
//! or report that none exists.
//! Two paths on a triangulated surface are homologous
//! exactly when their difference has a bounding chain.
//!
//! ```
//! use homchain::{na, BoundingChain, Cell, CoefficientFlow, SimplicialComplex};
//!
//! let points = vec![
//!     na::dvector![0.0, 0.0],
//!     na::dvector![1.0, 0.0],
//!     na::dvector![0.0, 1.0],
//! ];
//! let complex = SimplicialComplex::new(points, [[0, 1, 2]])?;
//!
//! // edges are [0, 1], [0, 2], [1, 2] in index order
//! let mut boundary = complex.new_chain(1);
//! boundary.set(0, 1.0);
//! boundary.set(1, -1.0);
//! boundary.set(2, 1.0);
//!
//! let found = CoefficientFlow.solve_embedded(&complex, &boundary)?;
//! let triangle = Cell::try_from([0, 1, 2])?;
//! let chain = found.chain().expect("the boundary of a triangle is a boundary");
//! assert_eq!(chain.get(complex.cell_to_index(&triangle)?), 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod cell;
#[doc(inline)]
pub use cell::{Cell, CellError};

pub mod complex;
#[doc(inline)]
pub use complex::{
    quotient::{Quotient, VIRTUAL_POINT},
    ComplexError, Incidence, Point, SimplicialComplex,
};

pub mod chain;
#[doc(inline)]
pub use chain::{Chain, ChainError};

pub mod solver;
#[doc(inline)]
pub use solver::{
    homologous, BoundingChain, BoundingChainSolver, CoefficientFlow, ConcurrentCoefficientFlow,
    ConcurrentFlowOptions, LeastSquaresOptions, LeastSquaresSolver, SolveError,
};

// nalgebra re-exports for convenience

pub use nalgebra as na;
pub use nalgebra_sparse as nas;
