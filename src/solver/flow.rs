//! Sequential coefficient flow.

use fixedbitset as fb;
use std::collections::VecDeque;

use super::{BoundingChain, BoundingChainSolver, FaceConstraint, FlowProblem, SolveError};
use crate::{cell::Cell, chain::Chain, complex::SimplicialComplex};

/// Solver that finds bounding chains of `dim - 1`-chains
/// in a complex of dimension `dim` by propagating coefficients
/// from a seed cell across shared faces.
///
/// Each face is shared by at most two cells,
/// so once one cell's coefficient is known,
/// the boundary coefficient at a face forces the other's.
/// Propagation is breadth-first and visits every face at most once.
/// Cells are never reassigned;
/// a forced value that disagrees with an existing one
/// ends the computation with [`BoundingChain::Inconsistent`].
///
/// Faces with more than two cofaces are detected
/// and reported as [`SolveError::NonManifoldFace`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CoefficientFlow;

impl CoefficientFlow {
    /// Propagate from `seed` with the coefficient `seed_coefficient`.
    ///
    /// Parts of the complex not connected to the seed through shared faces
    /// get zero coefficients. If the boundary is nonzero anywhere there,
    /// the result is [`BoundingChain::Inconsistent`] at the first such face.
    pub fn solve(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
        seed: &Cell,
        seed_coefficient: f64,
    ) -> Result<BoundingChain, SolveError> {
        let problem = FlowProblem::new(complex, boundary)?;
        let seed = problem.seed(seed, seed_coefficient)?;
        flow(&problem, (seed, seed_coefficient), std::iter::empty())
    }

    /// Propagate from seeds derived from the free faces of the complex.
    ///
    /// Propagation starts at the first free face.
    /// Whenever it runs out of work, it restarts from the next free face
    /// whose cell hasn't been reached yet,
    /// so every connected part with a free face gets solved.
    /// Fails with [`SolveError::NoFreeFace`] on closed complexes.
    pub fn solve_embedded(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        let problem = FlowProblem::new(complex, boundary)?;
        let mut seeds = problem.free_face_seeds();
        let first = seeds.next().ok_or(SolveError::NoFreeFace)?;
        flow(&problem, first, seeds)
    }
}

impl BoundingChainSolver for CoefficientFlow {
    fn bounding_chain(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        self.solve_embedded(complex, boundary)
    }
}

/// Propagate from `seed`, then from each of `more_seeds`
/// whose cell is still unassigned when the queue runs dry.
fn flow(
    problem: &FlowProblem<'_>,
    seed: (usize, f64),
    mut more_seeds: impl Iterator<Item = (usize, f64)>,
) -> Result<BoundingChain, SolveError> {
    let mut coefficients: Vec<Option<f64>> = vec![None; problem.cell_count()];
    let mut processed = fb::FixedBitSet::with_capacity(problem.face_count());
    let mut queue = VecDeque::new();

    let mut next_seed = Some(seed);
    while let Some((seed, seed_coefficient)) = next_seed {
        log::debug!("seeding coefficient flow at cell {seed} = {seed_coefficient}");
        coefficients[seed] = Some(seed_coefficient);
        queue.extend(problem.items_for(seed, seed_coefficient));

        while let Some(item) = queue.pop_front() {
            if processed.put(item.face) {
                continue;
            }
            log::trace!(
                "face {} from cell {} = {}",
                item.face,
                item.cell,
                item.coefficient
            );
            match problem.constraint(&item)? {
                FaceConstraint::Satisfied => {}
                FaceConstraint::Violated => {
                    log::debug!("boundary coefficient unmatched at free face {}", item.face);
                    return Ok(BoundingChain::Inconsistent {
                        dim: problem.dim - 1,
                        index: item.face,
                    });
                }
                FaceConstraint::Forces { cell, coefficient } => {
                    let assigned = coefficients[cell];
                    match assigned {
                        None => {
                            coefficients[cell] = Some(coefficient);
                            queue.extend(
                                problem
                                    .items_for(cell, coefficient)
                                    .filter(|it| !processed.contains(it.face)),
                            );
                        }
                        Some(existing) if existing == coefficient => {}
                        Some(existing) => {
                            log::debug!(
                                "cell {cell} forced to {coefficient}, already has {existing}"
                            );
                            return Ok(BoundingChain::Inconsistent {
                                dim: problem.dim,
                                index: cell,
                            });
                        }
                    }
                }
            }
        }

        next_seed = more_seeds.find(|&(cell, _)| coefficients[cell].is_none());
    }

    if let Some(face) = problem.unreached_support(|face| processed.contains(face)) {
        log::debug!("boundary is nonzero at face {face} not connected to any seed");
        return Ok(BoundingChain::Inconsistent {
            dim: problem.dim - 1,
            index: face,
        });
    }

    Ok(problem.finish(
        coefficients
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|c| (i, c))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::Chain,
        complex::{bowtie, single_triangle, split_square, tiny_complex_2d, tiny_complex_3d, Point},
        solver::LeastSquaresSolver,
    };

    fn cell<const N: usize>(vertices: [usize; N]) -> Cell {
        Cell::try_from(vertices).unwrap()
    }

    #[test]
    fn triangle_from_explicit_seed() {
        let complex = single_triangle();
        let tri = cell([0, 1, 2]);
        let chain = complex.chain_from_cells(2, [(&tri, 1.0)]).unwrap();
        let boundary = complex.boundary(&chain).unwrap();

        assert_eq!(
            CoefficientFlow.solve(&complex, &boundary, &tri, 1.0),
            Ok(BoundingChain::Found(chain))
        );
        // a wrong seed value contradicts the free faces
        assert!(matches!(
            CoefficientFlow.solve(&complex, &boundary, &tri, 2.0),
            Ok(BoundingChain::Inconsistent { dim: 1, .. })
        ));
    }

    #[test]
    fn hexagon_agrees_with_least_squares() {
        let complex = tiny_complex_2d();
        let chain = complex
            .chain_from_cells(
                2,
                [
                    (&cell([0, 2, 3]), 1.0),
                    (&cell([2, 3, 5]), 1.0),
                    (&cell([3, 5, 6]), 1.0),
                    (&cell([1, 3, 4]), -1.0),
                ],
            )
            .unwrap();
        let boundary = complex.boundary(&chain).unwrap();

        let by_flow = CoefficientFlow.solve_embedded(&complex, &boundary).unwrap();
        let by_lsq = LeastSquaresSolver::default()
            .solve(&complex, &boundary)
            .unwrap();
        for found in [by_flow, by_lsq] {
            let found = found.into_chain().unwrap();
            assert_eq!(complex.boundary(&found).unwrap(), boundary);
            // the hexagon is a disk, so the bounding chain is unique
            assert_eq!(found, chain);
        }
    }

    /// Propagation through an interior face whose value is already known
    /// checks it instead of overwriting it.
    #[test]
    fn closing_loop_is_checked() {
        let complex = tiny_complex_2d();
        let mut boundary = complex.new_sparse_chain(1);
        // corrupt an interior edge so that going around the center vertex
        // doesn't come back to the same value
        let spoke = complex.cell_to_index(&cell([3, 6])).unwrap();
        boundary.set(spoke, 1.0);

        let result = CoefficientFlow.solve_embedded(&complex, &boundary).unwrap();
        assert!(matches!(result, BoundingChain::Inconsistent { .. }));
    }

    #[test]
    fn zero_boundary_gives_zero_chain() {
        let complex = split_square();
        let zero = complex.new_chain(1);
        let found = CoefficientFlow.solve_embedded(&complex, &zero).unwrap();
        assert_eq!(found, BoundingChain::Found(complex.new_chain(2)));
    }

    #[test]
    fn explicit_seed_only_reaches_its_own_part() {
        let complex = bowtie();
        let far = complex
            .chain_from_cells(2, [(&cell([2, 3, 4]), 1.0)])
            .unwrap();
        let boundary = complex.boundary(&far).unwrap();

        // seeding from the other triangle never reaches the boundary
        let result = CoefficientFlow
            .solve(&complex, &boundary, &cell([0, 1, 2]), 0.0)
            .unwrap();
        assert!(matches!(result, BoundingChain::Inconsistent { dim: 1, .. }));

        // seeding from the right one does
        let result = CoefficientFlow
            .solve(&complex, &boundary, &cell([2, 3, 4]), 1.0)
            .unwrap();
        assert_eq!(result, BoundingChain::Found(far));
    }

    /// Automatic seeding restarts in every part that the first seed didn't reach.
    #[test]
    fn free_faces_seed_every_part() {
        let complex = bowtie();
        let both = complex
            .chain_from_cells(2, [(&cell([0, 1, 2]), -1.0), (&cell([2, 3, 4]), 2.0)])
            .unwrap();
        let one_side = complex
            .chain_from_cells(2, [(&cell([2, 3, 4]), 1.0)])
            .unwrap();
        for chain in [both, one_side] {
            let boundary = complex.boundary(&chain).unwrap();
            assert_eq!(
                CoefficientFlow.solve_embedded(&complex, &boundary),
                Ok(BoundingChain::Found(chain))
            );
        }
    }

    #[test]
    fn non_finite_coefficients_are_rejected() {
        let complex = single_triangle();
        let mut boundary = complex.new_chain(1);
        boundary.set(2, f64::NAN);
        assert_eq!(
            CoefficientFlow.solve_embedded(&complex, &boundary),
            Err(SolveError::NonFiniteCoefficient { dim: 1, index: 2 })
        );

        let zero = complex.new_chain(1);
        assert_eq!(
            CoefficientFlow.solve(&complex, &zero, &cell([0, 1, 2]), f64::INFINITY),
            Err(SolveError::NonFiniteCoefficient { dim: 2, index: 0 })
        );
    }

    #[test]
    fn non_manifold_faces_are_rejected() {
        // three triangles sharing the edge [0, 1]
        let points: Vec<Point> = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]
        .iter()
        .map(|c| Point::from_column_slice(c))
        .collect();
        let complex =
            SimplicialComplex::new(points, [[0, 1, 2], [0, 1, 3], [0, 1, 4]]).unwrap();
        let shared = complex.cell_to_index(&cell([0, 1])).unwrap();
        let boundary = complex.new_chain(1);
        assert_eq!(
            CoefficientFlow.solve(&complex, &boundary, &cell([0, 1, 2]), 0.0),
            Err(SolveError::NonManifoldFace {
                dim: 1,
                index: shared
            })
        );
    }

    #[test]
    fn wrong_dimensions_are_out_of_context() {
        let complex = tiny_complex_3d();
        // a 1-chain in a 3-complex
        assert!(matches!(
            CoefficientFlow.solve_embedded(&complex, &complex.new_chain(1)),
            Err(SolveError::OutOfContext {
                chain_dim: 1,
                complex_dim: Some(3)
            })
        ));

        // a lone edge can't be bounded by anything
        let points = vec![Point::zeros(1), Point::from_element(1, 1.0)];
        let edge_complex = SimplicialComplex::new(points, [[0, 1]]).unwrap();
        let edge = Chain::from_entries(1, 1, [(0, 1.0)]).unwrap();
        assert!(matches!(
            CoefficientFlow.solve_embedded(&edge_complex, &edge),
            Err(SolveError::OutOfContext { .. })
        ));
    }

    #[test]
    fn closed_surfaces_need_a_seed() {
        // boundary of a tetrahedron, a closed surface
        let complex = tiny_complex_3d();
        let points = complex.points().to_vec();
        let shell = SimplicialComplex::new(points, [[0, 1, 2], [0, 1, 4], [0, 2, 4], [1, 2, 4]])
            .unwrap();
        let zero = shell.new_chain(1);
        assert_eq!(
            CoefficientFlow.solve_embedded(&shell, &zero),
            Err(SolveError::NoFreeFace)
        );

        // with an explicit seed, the whole surface is a valid answer for a zero boundary
        let found = CoefficientFlow
            .solve(&shell, &zero, &cell([0, 1, 2]), 1.0)
            .unwrap()
            .into_chain()
            .unwrap();
        assert_eq!(found.nnz(), 4);
        assert!(shell.boundary(&found).unwrap().is_zero());
    }

    #[test]
    fn three_dimensional_flow() {
        let complex = tiny_complex_3d();
        let tets = complex
            .chain_from_cells(3, [(&cell([0, 1, 2, 4]), 2.0), (&cell([1, 2, 3, 4]), -1.0)])
            .unwrap();
        let boundary = complex.boundary(&tets).unwrap();
        let found = CoefficientFlow.solve_embedded(&complex, &boundary).unwrap();
        assert_eq!(found, BoundingChain::Found(tets));
    }
}
