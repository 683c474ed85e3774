//! Finding chains whose boundary is a given chain.
//!
//! Three solvers are provided:
//! - [`LeastSquaresSolver`] solves the boundary equation `B x = p`
//!   with sparse least squares and recovers integer coefficients.
//!   Works on any complex but needs the global boundary matrix.
//! - [`CoefficientFlow`] propagates coefficients cell by cell
//!   from a seed, using the fact that in a complex where every face
//!   has at most two cofaces, the coefficient of one coface
//!   determines the other.
//! - [`ConcurrentCoefficientFlow`] is the same propagation
//!   spread over a pool of worker threads.
//!
//! "Not a boundary" is an expected answer rather than an error,
//! so solvers return a [`BoundingChain`] describing the outcome
//! and reserve [`SolveError`] for inputs the solver can't work with.

mod concurrent_flow;
pub use concurrent_flow::{ConcurrentCoefficientFlow, ConcurrentFlowOptions};
mod flow;
pub use flow::CoefficientFlow;
mod least_squares;
pub use least_squares::{LeastSquaresOptions, LeastSquaresSolver};

//

use nalgebra as na;

use itertools::izip;

use crate::{
    cell::Cell,
    chain::{Chain, ChainError},
    complex::{ComplexError, SimplicialComplex},
};

/// The outcome of a bounding chain computation.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundingChain {
    /// A chain one dimension up whose boundary is exactly the input.
    Found(Chain),
    /// No integer chain has the input as its boundary.
    NotABoundary,
    /// Coefficient propagation hit a contradiction at the given cell:
    /// either two forced values for a cell disagree
    /// or a face's boundary coefficient can't be matched.
    /// The input isn't a boundary, or the seed was wrong.
    Inconsistent {
        /// Dimension of the cell where the contradiction was found.
        dim: usize,
        /// Level-local index of that cell.
        index: usize,
    },
}

impl BoundingChain {
    /// Whether a bounding chain was found.
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Get the bounding chain if one was found.
    #[inline]
    pub fn chain(&self) -> Option<&Chain> {
        match self {
            Self::Found(chain) => Some(chain),
            _ => None,
        }
    }

    /// Take the bounding chain if one was found.
    #[inline]
    pub fn into_chain(self) -> Option<Chain> {
        match self {
            Self::Found(chain) => Some(chain),
            _ => None,
        }
    }
}

/// Error in setting up a bounding chain computation.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum SolveError {
    /// The chain has no dimension above it in the complex.
    #[error("a {chain_dim}-chain can't be a boundary in a complex of dimension {complex_dim:?}")]
    NotABoundaryCandidate {
        /// Dimension of the input chain.
        chain_dim: usize,
        /// Dimension of the complex, `None` if it's empty.
        complex_dim: Option<usize>,
    },
    /// Coefficient flow only works on chains one dimension
    /// below the complex's top dimension.
    #[error("coefficient flow needs a chain of dimension one less than the complex, got a {chain_dim}-chain in a complex of dimension {complex_dim:?}")]
    OutOfContext {
        /// Dimension of the input chain.
        chain_dim: usize,
        /// Dimension of the complex, `None` if it's empty.
        complex_dim: Option<usize>,
    },
    /// Automatic seeding needs a face on the boundary of the complex,
    /// and closed complexes have none.
    #[error("the complex has no free faces to seed coefficient flow from")]
    NoFreeFace,
    /// The chain doesn't have one coefficient per cell of its dimension.
    #[error("expected a {dim}-chain of length {expected}, got length {found}")]
    ChainLengthMismatch {
        /// Dimension of the chain.
        dim: usize,
        /// Number of cells of that dimension in the complex.
        expected: usize,
        /// Length of the chain.
        found: usize,
    },
    /// A face has more than two cofaces,
    /// so the coefficient of one doesn't determine the others.
    #[error("the {dim}-cell with index {index} has more than two cofaces")]
    NonManifoldFace {
        /// Dimension of the face.
        dim: usize,
        /// Level-local index of the face.
        index: usize,
    },
    /// Coefficient flow needs finite boundary and seed coefficients.
    #[error("the coefficient of the {dim}-cell with index {index} is not finite")]
    NonFiniteCoefficient {
        /// Dimension of the cell.
        dim: usize,
        /// Level-local index of the cell.
        index: usize,
    },
    /// The seed cell given to coefficient flow isn't top-dimensional.
    #[error("seed cell must be of dimension {expected}, got {found}")]
    SeedDimensionMismatch {
        /// Dimension of the complex.
        expected: usize,
        /// Dimension of the seed cell.
        found: usize,
    },
    /// Lookup of a cell failed.
    #[error(transparent)]
    Complex(#[from] ComplexError),
    /// Chain arithmetic failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Common interface of all bounding chain solvers.
pub trait BoundingChainSolver {
    /// Find a chain whose boundary is `boundary`.
    fn bounding_chain(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError>;
}

/// Check whether two chains are homologous,
/// i.e. whether their difference is a boundary.
///
/// Both chains must use the same representation.
pub fn homologous<S: BoundingChainSolver + ?Sized>(
    solver: &S,
    complex: &SimplicialComplex,
    a: &Chain,
    b: &Chain,
) -> Result<bool, SolveError> {
    let difference = a.try_sub(b)?;
    if difference.is_zero() {
        return Ok(true);
    }
    Ok(solver.bounding_chain(complex, &difference)?.is_found())
}

//
// shared machinery of the coefficient flow solvers
//

/// A unit of work in coefficient flow:
/// `cell` has been assigned `coefficient`,
/// and `face` on its boundary with inclusion index `orientation`
/// needs its constraint checked.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FlowItem {
    pub cell: usize,
    pub face: usize,
    pub orientation: i8,
    pub coefficient: f64,
}

/// What the boundary equation says at one face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum FaceConstraint {
    /// The face is free and its boundary coefficient is matched.
    Satisfied,
    /// The face is free and its boundary coefficient isn't matched.
    Violated,
    /// The face's other coface must have this coefficient.
    Forces { cell: usize, coefficient: f64 },
}

/// A validated coefficient flow input:
/// a complex of dimension `dim` and a `dim - 1`-chain on it.
pub(crate) struct FlowProblem<'a> {
    pub complex: &'a SimplicialComplex,
    /// dimension of the cells being solved for
    pub dim: usize,
    boundary: na::DVector<f64>,
    chain_is_sparse: bool,
}

impl<'a> FlowProblem<'a> {
    pub fn new(complex: &'a SimplicialComplex, boundary: &Chain) -> Result<Self, SolveError> {
        let chain_dim = boundary.dim();
        let complex_dim = complex.dimension();
        let dim = chain_dim + 1;
        if complex_dim != Some(dim) {
            return Err(SolveError::OutOfContext {
                chain_dim,
                complex_dim,
            });
        }
        check_chain_len(complex, boundary)?;
        if let Some((index, _)) = boundary.iter().find(|(_, value)| !value.is_finite()) {
            return Err(SolveError::NonFiniteCoefficient {
                dim: chain_dim,
                index,
            });
        }
        Ok(Self {
            complex,
            dim,
            boundary: boundary.to_dense_vector(),
            chain_is_sparse: boundary.is_sparse(),
        })
    }

    /// Number of cells being solved for.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.complex.level_size(self.dim)
    }

    /// Number of faces whose constraints need checking.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.boundary.len()
    }

    /// Find the level-local index of a user-given seed cell
    /// and check its coefficient.
    pub fn seed(&self, seed: &Cell, coefficient: f64) -> Result<usize, SolveError> {
        if seed.dim() != self.dim {
            return Err(SolveError::SeedDimensionMismatch {
                expected: self.dim,
                found: seed.dim(),
            });
        }
        let index = self.complex.cell_to_index(seed)?;
        if !coefficient.is_finite() {
            return Err(SolveError::NonFiniteCoefficient {
                dim: self.dim,
                index,
            });
        }
        Ok(index)
    }

    /// Seeds derived from the free faces of the complex in index order:
    /// the only coface of a free face must contribute
    /// the whole boundary coefficient there.
    ///
    /// Every connected part with a free face gets at least one seed.
    pub fn free_face_seeds(&self) -> impl '_ + Iterator<Item = (usize, f64)> {
        let face_dim = self.dim - 1;
        self.complex.free_faces().ones().map(move |face| {
            let (cells, orientations) = self.complex.coface_row(face_dim, face);
            (cells[0], orientations[0] as f64 * self.boundary[face])
        })
    }

    /// Work items for every face of a cell that was just assigned.
    pub fn items_for(&self, cell: usize, coefficient: f64) -> impl 'a + Iterator<Item = FlowItem> {
        let complex = self.complex;
        let (faces, orientations) = complex.boundary_row(self.dim, cell);
        izip!(faces, orientations).map(move |(&face, &orientation)| FlowItem {
            cell,
            face,
            orientation,
            coefficient,
        })
    }

    /// Evaluate the boundary equation at `item.face`
    /// given the coefficient of `item.cell`.
    pub fn constraint(&self, item: &FlowItem) -> Result<FaceConstraint, SolveError> {
        let face_dim = self.dim - 1;
        let (cells, orientations) = self.complex.coface_row(face_dim, item.face);
        let mut other = None;
        for (&cell, &orientation) in izip!(cells, orientations) {
            if cell != item.cell && other.replace((cell, orientation)).is_some() {
                return Err(SolveError::NonManifoldFace {
                    dim: face_dim,
                    index: item.face,
                });
            }
        }

        let target = self.boundary[item.face];
        let contribution = item.orientation as f64 * item.coefficient;
        Ok(match other {
            None if contribution == target => FaceConstraint::Satisfied,
            None => FaceConstraint::Violated,
            Some((cell, orientation)) => FaceConstraint::Forces {
                cell,
                coefficient: orientation as f64 * (target - contribution),
            },
        })
    }

    /// Find a face where the boundary is nonzero but which was never reached.
    /// Propagation only checks faces it reaches,
    /// so these would otherwise go silently unmatched.
    pub fn unreached_support(&self, reached: impl Fn(usize) -> bool) -> Option<usize> {
        self.boundary
            .iter()
            .enumerate()
            .find(|(face, value)| **value != 0.0 && !reached(*face))
            .map(|(face, _)| face)
    }

    /// Collect assigned coefficients into a chain
    /// with the same representation as the input.
    pub fn finish(&self, coefficients: impl Iterator<Item = (usize, f64)>) -> BoundingChain {
        let mut chain = Chain::sparse_zeros(self.dim, self.cell_count());
        for (index, value) in coefficients {
            chain.set(index, value);
        }
        if !self.chain_is_sparse {
            chain.make_dense();
        }
        BoundingChain::Found(chain)
    }
}

fn check_chain_len(complex: &SimplicialComplex, chain: &Chain) -> Result<(), SolveError> {
    let expected = complex.level_size(chain.dim());
    if chain.len() != expected {
        return Err(SolveError::ChainLengthMismatch {
            dim: chain.dim(),
            expected,
            found: chain.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::{bowtie, single_triangle, split_square, tiny_complex_2d};

    fn cell<const N: usize>(vertices: [usize; N]) -> Cell {
        Cell::try_from(vertices).unwrap()
    }

    /// The boundary of the given 2-cells as a sparse chain.
    fn boundary_of(complex: &SimplicialComplex, cells: &[([usize; 3], f64)]) -> Chain {
        let cells: Vec<(Cell, f64)> = cells.iter().map(|(c, v)| (cell(*c), *v)).collect();
        let chain = complex
            .chain_from_cells(2, cells.iter().map(|(c, v)| (c, *v)))
            .unwrap();
        complex.boundary(&chain).unwrap()
    }

    fn solvers() -> Vec<Box<dyn BoundingChainSolver>> {
        vec![
            Box::new(LeastSquaresSolver::default()),
            Box::new(CoefficientFlow),
            Box::new(ConcurrentCoefficientFlow::default()),
        ]
    }

    /// Every solver finds a chain whose boundary is the input.
    #[test]
    fn solvers_agree_on_boundaries() {
        let complex = tiny_complex_2d();
        let p = boundary_of(&complex, &[([0, 1, 3], 1.0), ([1, 3, 4], 1.0), ([3, 4, 6], -2.0)]);
        for solver in solvers() {
            let found = solver.bounding_chain(&complex, &p).unwrap();
            let chain = found.into_chain().expect("should be a boundary");
            assert_eq!(chain.dim(), 2);
            assert_eq!(complex.boundary(&chain).unwrap(), p);
        }
    }

    #[test]
    fn triangle_scenario() {
        let complex = single_triangle();
        // edges in order [0,1], [0,2], [1,2]
        let p = Chain::from_dense(1, na::DVector::from_column_slice(&[1.0, -1.0, 1.0]));
        let expected = Chain::from_dense(2, na::DVector::from_column_slice(&[1.0]));
        for solver in solvers() {
            assert_eq!(
                solver.bounding_chain(&complex, &p),
                Ok(BoundingChain::Found(expected.clone()))
            );
        }
    }

    #[test]
    fn homologous_paths() {
        let complex = split_square();
        // edges in order [0,1], [0,2], [0,3], [1,2], [2,3]
        let edge = |c: [usize; 2]| complex.cell_to_index(&cell(c)).unwrap();
        let path = |edges: &[([usize; 2], f64)]| {
            Chain::from_entries(1, 5, edges.iter().map(|(e, v)| (edge(*e), *v))).unwrap()
        };

        // 0 -> 1 -> 2 and 0 -> 2 directly go around the lower triangle
        let around = path(&[([0, 1], 1.0), ([1, 2], 1.0)]);
        let diagonal = path(&[([0, 2], 1.0)]);
        // 0 -> 3 ends somewhere else entirely
        let elsewhere = path(&[([0, 3], 1.0)]);

        for solver in solvers() {
            assert_eq!(homologous(&*solver, &complex, &around, &diagonal), Ok(true));
            assert_eq!(homologous(&*solver, &complex, &around, &around), Ok(true));
            assert_eq!(homologous(&*solver, &complex, &around, &elsewhere), Ok(false));
        }

        let dense = diagonal.clone().into_dense();
        assert_eq!(
            homologous(&CoefficientFlow, &complex, &around, &dense),
            Err(SolveError::Chain(ChainError::RepresentationMismatch))
        );
    }

    /// Parts of a complex that share no faces are all solved,
    /// whichever part the boundary lies in.
    #[test]
    fn solvers_agree_on_disjoint_parts() {
        let complex = bowtie();
        let far = boundary_of(&complex, &[([2, 3, 4], 1.0)]);
        let expected = complex
            .chain_from_cells(2, [(&cell([2, 3, 4]), 1.0)])
            .unwrap();
        let near = boundary_of(&complex, &[([0, 1, 2], 1.0)]);
        for solver in solvers() {
            assert_eq!(
                solver.bounding_chain(&complex, &far),
                Ok(BoundingChain::Found(expected.clone()))
            );
            // the difference bounds [2, 3, 4] - [0, 1, 2]
            assert_eq!(homologous(&*solver, &complex, &far, &near), Ok(true));
        }
    }

    #[test]
    fn constraints_at_faces() {
        let complex = split_square();
        let p = boundary_of(&complex, &[([0, 1, 2], 1.0)]);
        let problem = FlowProblem::new(&complex, &p).unwrap();
        let lower = complex.cell_to_index(&cell([0, 1, 2])).unwrap();
        let upper = complex.cell_to_index(&cell([0, 2, 3])).unwrap();
        let diagonal = complex.cell_to_index(&cell([0, 2])).unwrap();
        let bottom = complex.cell_to_index(&cell([0, 1])).unwrap();

        let items: Vec<FlowItem> = problem.items_for(lower, 1.0).collect();
        assert_eq!(items.len(), 3);

        let at_diagonal = items.iter().find(|it| it.face == diagonal).unwrap();
        assert_eq!(
            problem.constraint(at_diagonal),
            Ok(FaceConstraint::Forces {
                cell: upper,
                coefficient: 0.0
            })
        );
        let at_bottom = items.iter().find(|it| it.face == bottom).unwrap();
        assert_eq!(problem.constraint(at_bottom), Ok(FaceConstraint::Satisfied));

        let wrong: Vec<FlowItem> = problem.items_for(lower, -1.0).collect();
        let at_bottom = wrong.iter().find(|it| it.face == bottom).unwrap();
        assert_eq!(problem.constraint(at_bottom), Ok(FaceConstraint::Violated));
    }

    #[test]
    fn flow_input_is_validated() {
        let complex = single_triangle();
        assert!(matches!(
            FlowProblem::new(&complex, &complex.new_chain(0)),
            Err(SolveError::OutOfContext {
                chain_dim: 0,
                complex_dim: Some(2)
            })
        ));
        assert!(matches!(
            FlowProblem::new(&complex, &Chain::zeros(1, 4)),
            Err(SolveError::ChainLengthMismatch {
                dim: 1,
                expected: 3,
                found: 4
            })
        ));
        let problem = FlowProblem::new(&complex, &complex.new_chain(1)).unwrap();
        assert_eq!(
            problem.seed(&cell([0, 1]), 1.0),
            Err(SolveError::SeedDimensionMismatch {
                expected: 2,
                found: 1
            })
        );
        assert!(matches!(
            problem.seed(&cell([0, 1, 3]), 1.0),
            Err(SolveError::Complex(ComplexError::UnknownCell(_)))
        ));
        assert_eq!(
            problem.seed(&cell([0, 1, 2]), f64::NAN),
            Err(SolveError::NonFiniteCoefficient { dim: 2, index: 0 })
        );

        let mut infinite = complex.new_sparse_chain(1);
        infinite.set(1, f64::NEG_INFINITY);
        assert!(matches!(
            FlowProblem::new(&complex, &infinite),
            Err(SolveError::NonFiniteCoefficient { dim: 1, index: 1 })
        ));
    }
}
