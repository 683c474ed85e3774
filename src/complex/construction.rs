use nalgebra as na;
use nalgebra_sparse as nas;

use itertools::{iproduct, Itertools};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use super::{ComplexError, Level, Point, SimplicialComplex};
use crate::cell::{exclusion_sign, Cell};

/// Construct a complex from raw points and cells of any dimension.
pub(super) fn build_complex(
    points: Vec<Point>,
    cells: impl Iterator<Item = Vec<usize>>,
) -> Result<SimplicialComplex, ComplexError> {
    let point_dim = points.first().map_or(0, |p| p.len());
    if let Some((index, p)) = points.iter().enumerate().find(|(_, p)| p.len() != point_dim) {
        return Err(ComplexError::PointDimensionMismatch {
            index,
            expected: point_dim,
            found: p.len(),
        });
    }

    // flat vertex index lists for every dimension of cell,
    // first the ones given as parameters,
    // later extended with the faces of the level above
    let mut level_indices: Vec<Vec<usize>> = Vec::new();
    for vertices in cells {
        // sorted by construction.
        // this gives a consistent way to identify a simplex with its vertices
        let cell = Cell::new(vertices)?;
        let out_of_range = cell.vertices().iter().copied().find(|v| *v >= points.len());
        if let Some(vertex) = out_of_range {
            return Err(ComplexError::VertexOutOfRange {
                cell,
                vertex,
                point_count: points.len(),
            });
        }
        let dim = cell.dim();
        if level_indices.len() <= dim {
            level_indices.resize_with(dim + 1, Vec::new);
        }
        level_indices[dim].extend_from_slice(cell.vertices());
    }

    // lower levels are inferred from boundaries of the ones above,
    // going top-down so that each level is complete
    // before its faces are generated
    for dim in (0..level_indices.len()).rev() {
        let simplex_size = dim + 1;
        let (lower, upper) = level_indices.split_at_mut(dim);
        let level = &mut upper[0];
        *level = level
            .chunks_exact(simplex_size)
            .sorted_unstable()
            .dedup()
            .flatten()
            .copied()
            .collect();

        let Some(lower) = lower.last_mut() else {
            break;
        };
        lower.reserve(level.len());
        for simplex in level.chunks_exact(simplex_size) {
            // every combination of vertices with one left out
            // is a simplex on the boundary
            for exclude_idx in 0..simplex_size {
                lower.extend(
                    simplex
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != exclude_idx)
                        .map(|(_, v)| *v),
                );
            }
        }
    }

    let mut levels: Vec<Level> = level_indices
        .into_iter()
        .enumerate()
        .map(|(dim, indices)| new_level(dim + 1, indices))
        .collect();

    for dim in 1..levels.len() {
        let (lower, upper) = levels.split_at_mut(dim);
        let upper = &mut upper[0];
        upper.boundary_map = build_boundary_map(upper, &lower[dim - 1]);
    }

    log::debug!(
        "built complex with level sizes {:?}",
        levels.iter().map(Level::len).collect_vec()
    );

    Ok(SimplicialComplex {
        points: Arc::from(points),
        point_dim,
        levels,
        coboundary_maps: OnceLock::new(),
        boundary_matrices: OnceLock::new(),
        free_faces: OnceLock::new(),
    })
}

/// Wrap sorted, deduplicated vertex indices into a level
/// with an index map and an empty boundary map.
fn new_level(simplex_size: usize, indices: Vec<usize>) -> Level {
    let index_map: HashMap<Vec<usize>, usize> = indices
        .chunks_exact(simplex_size)
        .enumerate()
        .map(|(simplex_idx, simplex)| (simplex.to_vec(), simplex_idx))
        .collect();
    let len = index_map.len();
    Level {
        simplex_size,
        indices,
        index_map,
        // filled in later for levels above 0
        boundary_map: nas::CsrMatrix::zeros(len, 0),
        volumes: OnceLock::new(),
    }
}

/// Build the matrix mapping cells of `upper` to their faces in `lower`.
fn build_boundary_map(upper: &Level, lower: &Level) -> nas::CsrMatrix<i8> {
    let mut boundary_coo = nas::CooMatrix::new(upper.len(), lower.len());
    // buffer to hold the face currently being processed
    let mut face: Vec<usize> = Vec::with_capacity(lower.simplex_size);
    for (simplex_idx, simplex) in upper.indices.chunks_exact(upper.simplex_size).enumerate() {
        for exclude_idx in 0..upper.simplex_size {
            face.clear();
            face.extend(
                simplex
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != exclude_idx)
                    .map(|(_, v)| *v),
            );
            let face_idx = *lower
                .index_map
                .get(face.as_slice())
                .expect("Face missing from the level below. This is a bug in homchain");
            boundary_coo.push(simplex_idx, face_idx, exclusion_sign(exclude_idx));
        }
    }
    nas::CsrMatrix::from(&boundary_coo)
}

/// Compute the unsigned volumes of every simplex in a level.
///
/// The volume is computed as the determinant of a matrix
/// vol = sqrt(det(V^T V)) / p!
/// where the columns of V are the edges from the first vertex to the others
/// (see the PyDEC paper section 10.1).
/// Vertices have volume 1.
pub(super) fn compute_volumes(points: &[Point], point_dim: usize, level: &Level) -> Vec<f64> {
    if level.simplex_size == 1 {
        return vec![1.0; level.len()];
    }

    let edge_count = level.simplex_size - 1;
    // the term `p!` in the volume formula
    let edge_count_factorial: usize = (1..=edge_count).product();
    // reusing allocations for the square matrix V^T V
    // and the edge vectors which are the columns of V
    let mut det_mat = na::DMatrix::zeros(edge_count, edge_count);
    let mut edges: Vec<Point> = vec![Point::zeros(point_dim); edge_count];

    level
        .indices
        .chunks_exact(level.simplex_size)
        .map(|indices| {
            for (edge_idx, edge) in edges.iter_mut().enumerate() {
                *edge = &points[indices[edge_idx + 1]] - &points[indices[0]];
            }
            for (row, col) in iproduct!(0..edge_count, 0..edge_count) {
                det_mat[(row, col)] = edges[row].dot(&edges[col]);
            }
            // degenerate simplices can give a tiny negative determinant
            f64::sqrt(det_mat.determinant().max(0.0)) / edge_count_factorial as f64
        })
        .collect()
}

//
// test complexes
//

#[cfg(test)]
fn points_2d(coords: &[[f64; 2]]) -> Vec<Point> {
    coords.iter().map(|c| Point::from_column_slice(c)).collect()
}

/// A small hexagon-shaped 2D complex for testing basic functionality.
/// Shaped somewhat like this:
///    ____
///   /\  /\
///  /__\/__\
///  \  /\  /
///   \/__\/
///
/// with vertices ordered left to right, top to bottom.
#[cfg(test)]
pub(crate) fn tiny_complex_2d() -> SimplicialComplex {
    let points = points_2d(&[
        [-0.5, 1.0],
        [0.5, 1.0],
        [-1.0, 0.0],
        [0.0, 0.0],
        [1.0, 0.0],
        [-0.5, -1.0],
        [0.5, -1.0],
    ]);
    let triangles = [
        [0, 2, 3],
        [0, 1, 3],
        [1, 3, 4],
        [2, 3, 5],
        [3, 5, 6],
        [3, 4, 6],
    ];
    SimplicialComplex::new(points, triangles).unwrap()
}

/// A small 3D complex for testing basic functionality.
/// Four tetrahedra arranged into a diamond shape,
/// split like this down the x,y plane:
///
///    /\
///   /__\
///   \  /
///    \/
///
/// and with a single point both up and down the z-axis.
#[cfg(test)]
pub(crate) fn tiny_complex_3d() -> SimplicialComplex {
    let points = [
        [0.0, 1.0, 0.0],
        [-0.5, 0.0, 0.0],
        [0.5, 0.0, 0.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, 0.0, 1.0],
    ]
    .iter()
    .map(|c| Point::from_column_slice(c))
    .collect();
    let tets = [[0, 1, 2, 4], [0, 1, 2, 5], [1, 2, 3, 4], [1, 2, 3, 5]];
    SimplicialComplex::new(points, tets).unwrap()
}

/// The triangle [0, 1, 2] on its own.
#[cfg(test)]
pub(crate) fn single_triangle() -> SimplicialComplex {
    let points = points_2d(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    SimplicialComplex::new(points, [[0, 1, 2]]).unwrap()
}

/// A unit square split into two triangles along the diagonal [0, 2].
#[cfg(test)]
pub(crate) fn split_square() -> SimplicialComplex {
    let points = points_2d(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
    SimplicialComplex::new(points, [[0, 1, 2], [0, 2, 3]]).unwrap()
}

/// A triangle with an extra edge hanging off one corner.
#[cfg(test)]
pub(crate) fn triangle_with_tail() -> SimplicialComplex {
    let points = points_2d(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [2.0, 2.0]]);
    let cells: Vec<Vec<usize>> = vec![vec![0, 1, 2], vec![2, 3]];
    SimplicialComplex::new(points, cells).unwrap()
}

/// Two triangles touching only at vertex 2,
/// so no edge connects one to the other.
#[cfg(test)]
pub(crate) fn bowtie() -> SimplicialComplex {
    let points = points_2d(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [2.0, 1.0], [2.0, 2.0]]);
    SimplicialComplex::new(points, [[0, 1, 2], [2, 3, 4]]).unwrap()
}

// Tests here are concerned with the complex structure being constructed correctly.
// Queries on the finished structure are tested in the parent module.
#[cfg(test)]
mod tests {
    use super::*;
    use itertools::izip;

    /// Lower-dimensional cells and boundaries
    /// are generated correctly for a simple 2d complex.
    #[test]
    fn tiny_2d_complex_is_correct() {
        let complex = tiny_complex_2d();
        assert_eq!(complex.dimension(), Some(2));

        assert_eq!(complex.levels[0].indices, (0..7).collect_vec());

        #[rustfmt::skip]
        let expected_1_cells = vec![
            0,1, 0,2, 0,3,
            1,3, 1,4,
            2,3, 2,5,
            3,4, 3,5, 3,6,
            4,6, 5,6,
        ];
        assert_eq!(
            expected_1_cells, complex.levels[1].indices,
            "incorrect 1-cells"
        );

        // top-level cells are sorted too
        #[rustfmt::skip]
        let expected_2_cells = vec![
            0,1,3,
            0,2,3,
            1,3,4,
            2,3,5,
            3,4,6,
            3,5,6,
        ];
        assert_eq!(
            expected_2_cells, complex.levels[2].indices,
            "incorrect 2-cells"
        );

        #[rustfmt::skip]
        let expected_2_boundaries = vec![
            (0, 1), (2, -1), (3, 1),
            (1, 1), (2, -1), (5, 1),
            (3, 1), (4, -1), (7, 1),
            (5, 1), (6, -1), (8, 1),
            (7, 1), (9, -1), (10, 1),
            (8, 1), (9, -1), (11, 1),
        ];
        let actual_2_boundaries: Vec<(usize, i8)> = complex.levels[2]
            .boundary_map
            .row_iter()
            .flat_map(|row| {
                izip!(
                    row.col_indices().iter().copied(),
                    row.values().iter().copied()
                )
                .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(
            expected_2_boundaries, actual_2_boundaries,
            "incorrect 2-cell boundaries"
        );

        // edges go from the lower vertex index to the higher one
        for (row, simplex) in izip!(
            complex.levels[1].boundary_map.row_iter(),
            complex.level_indices(1)
        ) {
            assert_eq!(row.col_indices(), simplex);
            assert_eq!(row.values(), &[-1, 1]);
        }
    }

    #[test]
    fn tiny_3d_complex_is_correct() {
        let complex = tiny_complex_3d();
        let sizes = (0..=3).map(|d| complex.level_size(d)).collect_vec();
        assert_eq!(sizes, vec![6, 13, 12, 4]);

        #[rustfmt::skip]
        let expected_2_cells = vec![
            0,1,2, 0,1,4, 0,1,5, 0,2,4, 0,2,5,
            1,2,3, 1,2,4, 1,2,5,
            1,3,4, 1,3,5, 2,3,4, 2,3,5,
        ];
        assert_eq!(expected_2_cells, complex.levels[2].indices);
    }

    /// Cells of different dimensions can be mixed,
    /// and ones that are already faces of bigger cells are merged.
    #[test]
    fn mixed_dimensions_are_closed() {
        let complex = triangle_with_tail();
        assert_eq!(complex.dimension(), Some(2));
        assert_eq!(complex.level_size(0), 4);
        assert_eq!(complex.level_size(1), 4);
        assert_eq!(complex.level_size(2), 1);

        let points = points_2d(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]]);
        let cells: Vec<Vec<usize>> = vec![vec![2, 1, 0], vec![1, 0], vec![1], vec![0, 2, 1]];
        let complex = SimplicialComplex::new(points, cells).unwrap();
        assert_eq!(complex.level_size(2), 1);
        assert_eq!(complex.level_size(1), 3);
        // the unused point isn't a vertex
        assert_eq!(complex.level_size(0), 3);
        assert_eq!(complex.points().len(), 4);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let points = points_2d(&[[0.0, 0.0], [1.0, 0.0]]);

        let err = SimplicialComplex::new(points.clone(), [vec![0, 0]]).unwrap_err();
        assert_eq!(
            err,
            ComplexError::InvalidCell(crate::cell::CellError::RepeatedVertex(0))
        );

        let err = SimplicialComplex::new(points.clone(), [vec![0, 2]]).unwrap_err();
        assert!(matches!(
            err,
            ComplexError::VertexOutOfRange {
                vertex: 2,
                point_count: 2,
                ..
            }
        ));

        let mut bad_points = points;
        bad_points.push(Point::zeros(3));
        let err = SimplicialComplex::new(bad_points, [vec![0, 1]]).unwrap_err();
        assert_eq!(
            err,
            ComplexError::PointDimensionMismatch {
                index: 2,
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn empty_complex() {
        let complex = SimplicialComplex::new(Vec::new(), Vec::<Vec<usize>>::new()).unwrap();
        assert!(complex.is_empty());
        assert_eq!(complex.dimension(), None);
        assert_eq!(complex.level_size(0), 0);
        assert_eq!(complex.free_faces().count_ones(..), 0);
        assert_eq!(complex.boundary_matrix(0).nrows(), 0);
    }
}
