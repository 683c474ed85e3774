//! The core combinatorial structure, the simplicial complex.

/// Low-level complex construction and corresponding tests.
mod construction;
pub mod quotient;
#[cfg(test)]
pub(crate) use construction::{
    bowtie, single_triangle, split_square, tiny_complex_2d, tiny_complex_3d, triangle_with_tail,
};

//

use fixedbitset as fb;
use nalgebra as na;
use nalgebra_sparse as nas;

use itertools::izip;
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use crate::{
    cell::{self, Cell, CellError},
    chain::{Chain, ChainError},
};

/// A point in space. All points of a complex have the same number of coordinates.
pub type Point = na::DVector<f64>;

/// A complex made of simplices
/// (points, line segments, triangles, tetrahedra etc)
/// closed under taking faces.
///
/// Cells of each dimension `d` are numbered with a dense level-local index
/// in `0..level_size(d)`, assigned in lexicographic order of their vertices.
/// These indices are what [`Chain`] coefficients refer to.
///
/// The complex is immutable after construction.
/// Derived structures (the coface index, boundary matrices, volumes)
/// are computed on first use and cached;
/// each cache is initialized exactly once even under concurrent access,
/// so a complex can be shared between threads freely.
#[derive(Clone, Debug)]
pub struct SimplicialComplex {
    /// Points stored in an Arc so that they can be shared with quotients.
    /// Mutation after creation is not supported.
    points: Arc<[Point]>,
    point_dim: usize,
    /// Storage for each dimension of simplex in the complex.
    /// Empty if the complex has no cells.
    levels: Vec<Level>,
    /// For each dimension `d`, a matrix whose rows correspond to `d`-cells,
    /// columns to `d+1`-cells, and values to the inclusion index.
    /// Rows of this are the coface lists.
    coboundary_maps: OnceLock<Vec<nas::CsrMatrix<i8>>>,
    /// Float versions of `coboundary_maps` for linear algebra.
    boundary_matrices: OnceLock<Vec<nas::CsrMatrix<f64>>>,
    /// `dim-1`-cells with exactly one coface.
    free_faces: OnceLock<fb::FixedBitSet>,
}

#[derive(Clone, Debug)]
struct Level {
    /// points per simplex in the storage Vec
    simplex_size: usize,
    /// indices stored in a flat Vec to avoid generics for dimension
    indices: Vec<usize>,
    /// map from the vertex indices of a simplex to its index in this level
    index_map: HashMap<Vec<usize>, usize>,
    /// matrix where the rows correspond to cells of this level,
    /// the columns to cells one level down,
    /// and the values of -1 or 1 to the relative orientation of the boundary.
    boundary_map: nas::CsrMatrix<i8>,
    /// unsigned volumes, computed on first access
    volumes: OnceLock<Vec<f64>>,
}

impl Level {
    /// Get the number of simplices in the level.
    #[inline]
    fn len(&self) -> usize {
        self.indices.len() / self.simplex_size
    }

    /// Get the slice of vertex indices corresponding to a single simplex.
    #[inline]
    fn simplex_indices(&self, simplex_idx: usize) -> &[usize] {
        let start_idx = simplex_idx * self.simplex_size;
        &self.indices[start_idx..start_idx + self.simplex_size]
    }
}

/// A cell adjacent to another one in the next level up or down,
/// with the inclusion index of the lower cell in the upper one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Incidence {
    /// Level-local index of the adjacent cell.
    pub index: usize,
    /// +1 or -1 depending on relative orientation.
    pub orientation: i8,
}

/// Error in building or querying a [`SimplicialComplex`].
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ComplexError {
    /// A cell given to the constructor isn't a valid simplex.
    #[error("invalid cell")]
    InvalidCell(#[from] CellError),
    /// A cell refers to a point that doesn't exist.
    #[error("cell {cell} refers to vertex {vertex} but there are only {point_count} points")]
    VertexOutOfRange {
        /// The offending cell.
        cell: Cell,
        /// The offending vertex index.
        vertex: usize,
        /// Number of points given.
        point_count: usize,
    },
    /// Points have different numbers of coordinates.
    #[error("point {index} has {found} coordinates, expected {expected}")]
    PointDimensionMismatch {
        /// Index of the offending point.
        index: usize,
        /// Number of coordinates of the first point.
        expected: usize,
        /// Number of coordinates of the offending point.
        found: usize,
    },
    /// Lookup of a cell that was never inserted.
    #[error("cell {0} is not in the complex")]
    UnknownCell(Cell),
    /// Lookup of a level-local index that doesn't exist.
    #[error("there is no {dim}-cell with index {index}")]
    UnknownIndex {
        /// Dimension of the requested cell.
        dim: usize,
        /// The requested index.
        index: usize,
    },
}

impl SimplicialComplex {
    /// Construct a complex from points and cells.
    ///
    /// Each cell is a list of indices into `points` in any order.
    /// Cells may be of any dimension;
    /// every face of every cell is added automatically,
    /// and duplicates are merged.
    /// The dimension of the complex is that of the largest cell.
    ///
    /// An empty list of cells gives an empty complex
    /// whose [`dimension`][Self::dimension] is `None`.
    pub fn new<C>(
        points: Vec<Point>,
        cells: impl IntoIterator<Item = C>,
    ) -> Result<Self, ComplexError>
    where
        C: Into<Vec<usize>>,
    {
        construction::build_complex(points, cells.into_iter().map(Into::into))
    }

    /// The dimension of the highest-dimensional cell,
    /// or `None` if the complex has no cells.
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }

    /// Whether the complex has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get a slice of all points the complex was built from.
    ///
    /// Points that aren't vertices of any cell are kept here,
    /// but do not appear in the 0-level.
    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Get a point by its index.
    #[inline]
    pub fn point(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    /// Number of coordinates per point.
    #[inline]
    pub fn point_dimension(&self) -> usize {
        self.point_dim
    }

    /// Get the number of `dim`-cells in the complex.
    ///
    /// This is zero for dimensions above the complex's dimension.
    #[inline]
    pub fn level_size(&self, dim: usize) -> usize {
        self.levels.get(dim).map_or(0, Level::len)
    }

    /// Get all `dim`-cells in index order.
    pub fn level(&self, dim: usize) -> Vec<Cell> {
        self.level_indices(dim).map(Cell::from_sorted).collect()
    }

    /// Access the vertex indices for the given dimension of cell
    /// as a chunked iterator where each element is a `dim + 1`-length slice
    /// containing the indices of one cell.
    #[inline]
    pub fn level_indices(&self, dim: usize) -> std::slice::ChunksExact<'_, usize> {
        match self.levels.get(dim) {
            Some(level) => level.indices.chunks_exact(level.simplex_size),
            None => (&[] as &[usize]).chunks_exact(dim + 1),
        }
    }

    /// Vertex indices of a cell known to exist.
    #[inline]
    pub(crate) fn simplex_indices(&self, dim: usize, index: usize) -> &[usize] {
        self.levels[dim].simplex_indices(index)
    }

    /// Whether the given cell is part of the complex.
    pub fn contains(&self, cell: &Cell) -> bool {
        self.cell_to_index(cell).is_ok()
    }

    /// Find the level-local index of a cell.
    pub fn cell_to_index(&self, cell: &Cell) -> Result<usize, ComplexError> {
        self.levels
            .get(cell.dim())
            .and_then(|level| level.index_map.get(cell.vertices()))
            .copied()
            .ok_or_else(|| ComplexError::UnknownCell(cell.clone()))
    }

    /// Find the cell with the given level-local index.
    pub fn index_to_cell(&self, dim: usize, index: usize) -> Result<Cell, ComplexError> {
        self.check_index(dim, index)?;
        Ok(Cell::from_sorted(self.simplex_indices(dim, index)))
    }

    fn check_index(&self, dim: usize, index: usize) -> Result<(), ComplexError> {
        if index < self.level_size(dim) {
            Ok(())
        } else {
            Err(ComplexError::UnknownIndex { dim, index })
        }
    }

    /// The signed inclusion index of `face` in the boundary of `cell`:
    /// +1 or -1 if `face` is a codimension 1 face of `cell`, 0 otherwise.
    ///
    /// This is purely combinatorial
    /// and doesn't require either cell to be part of the complex.
    #[inline]
    pub fn boundary_inclusion_index(&self, face: &Cell, cell: &Cell) -> i8 {
        cell::boundary_inclusion_index(face.vertices(), cell.vertices())
    }

    /// The signed inclusion index of the `face_dim`-cell with index `face`
    /// in the boundary of the `cell_dim`-cell with index `cell`.
    pub fn boundary_inclusion_index_by_index(
        &self,
        face_dim: usize,
        face: usize,
        cell_dim: usize,
        cell: usize,
    ) -> Result<i8, ComplexError> {
        self.check_index(face_dim, face)?;
        self.check_index(cell_dim, cell)?;
        if face_dim + 1 != cell_dim {
            return Ok(0);
        }
        let (faces, orientations) = self.boundary_row(cell_dim, cell);
        Ok(faces
            .binary_search(&face)
            .map_or(0, |pos| orientations[pos]))
    }

    /// Get the codimension 1 faces of a cell with their inclusion indices.
    pub fn cell_boundary(&self, cell: &Cell) -> Result<Vec<(i8, Cell)>, ComplexError> {
        self.cell_to_index(cell)?;
        Ok(cell.faces().collect())
    }

    /// Iterate over the codimension 1 faces of the `dim`-cell with index `index`,
    /// in order of their level-local index.
    pub fn boundary_incidences(
        &self,
        dim: usize,
        index: usize,
    ) -> Result<impl '_ + Iterator<Item = Incidence>, ComplexError> {
        self.check_index(dim, index)?;
        Ok(incidences(self.boundary_row(dim, index)))
    }

    /// Get the cells one dimension up that have `cell` as a face.
    ///
    /// The first call to this or any other coface method
    /// builds the coface index for the whole complex.
    pub fn cofaces(&self, cell: &Cell) -> Result<Vec<Cell>, ComplexError> {
        Ok(self
            .cofaces_with_orientation(cell)?
            .into_iter()
            .map(|(_, c)| c)
            .collect())
    }

    /// Get the cofaces of `cell` together with the inclusion index of `cell` in each.
    pub fn cofaces_with_orientation(&self, cell: &Cell) -> Result<Vec<(i8, Cell)>, ComplexError> {
        let dim = cell.dim();
        let index = self.cell_to_index(cell)?;
        Ok(incidences(self.coface_row(dim, index))
            .map(|inc| {
                let coface = Cell::from_sorted(self.simplex_indices(dim + 1, inc.index));
                (inc.orientation, coface)
            })
            .collect())
    }

    /// Iterate over the level-local indices of the cofaces
    /// of the `dim`-cell with index `index`.
    pub fn coface_indices(
        &self,
        dim: usize,
        index: usize,
    ) -> Result<impl '_ + Iterator<Item = usize>, ComplexError> {
        Ok(self.coface_incidences(dim, index)?.map(|inc| inc.index))
    }

    /// Iterate over the cofaces of the `dim`-cell with index `index`
    /// together with the inclusion index of the cell in each.
    pub fn coface_incidences(
        &self,
        dim: usize,
        index: usize,
    ) -> Result<impl '_ + Iterator<Item = Incidence>, ComplexError> {
        self.check_index(dim, index)?;
        Ok(incidences(self.coface_row(dim, index)))
    }

    /// Faces and orientations of a cell known to exist.
    #[inline]
    pub(crate) fn boundary_row(&self, dim: usize, index: usize) -> (&[usize], &[i8]) {
        csr_row(&self.levels[dim].boundary_map, index)
    }

    /// Cofaces and orientations of a cell known to exist.
    #[inline]
    pub(crate) fn coface_row(&self, dim: usize, index: usize) -> (&[usize], &[i8]) {
        csr_row(&self.coboundary_maps()[dim], index)
    }

    /// Build the coface index with a single top-down pass
    /// recording each cell as a coface of every cell on its boundary.
    fn coboundary_maps(&self) -> &[nas::CsrMatrix<i8>] {
        self.coboundary_maps.get_or_init(|| {
            log::debug!("building coface index for {} levels", self.levels.len());
            let mut maps = Vec::with_capacity(self.levels.len());
            for (dim, lower) in self.levels.iter().enumerate() {
                let Some(upper) = self.levels.get(dim + 1) else {
                    // top-level cells have no cofaces.
                    // set the column count anyway so that row indexing works
                    maps.push(nas::CsrMatrix::zeros(lower.len(), 0));
                    break;
                };
                let mut coo = nas::CooMatrix::new(lower.len(), upper.len());
                for (upper_idx, row) in upper.boundary_map.row_iter().enumerate() {
                    for (&lower_idx, &orientation) in izip!(row.col_indices(), row.values()) {
                        coo.push(lower_idx, upper_idx, orientation);
                    }
                }
                maps.push(nas::CsrMatrix::from(&coo));
            }
            maps
        })
    }

    /// Get the boundary matrix of dimension `dim`:
    /// a `level_size(dim) x level_size(dim + 1)` matrix
    /// whose `(i, j)` entry is the inclusion index
    /// of the `i`-th `dim`-cell in the `j`-th `dim + 1`-cell.
    ///
    /// Multiplying a `dim + 1`-chain's coefficient vector with this
    /// gives the coefficients of its boundary.
    ///
    /// The first call builds the matrices of all dimensions.
    /// Dimensions at or above the complex's dimension
    /// give a matrix with zero columns instead of failing.
    pub fn boundary_matrix(&self, dim: usize) -> Cow<'_, nas::CsrMatrix<f64>> {
        let matrices = self.boundary_matrices.get_or_init(|| {
            log::debug!("building boundary matrices");
            self.coboundary_maps()
                .iter()
                .map(|orientation_mat| {
                    // same matrix but with orientations converted to floats
                    // for easy multiplication
                    nas::CsrMatrix::try_from_pattern_and_values(
                        orientation_mat.pattern().clone(),
                        orientation_mat.values().iter().map(|o| *o as f64).collect(),
                    )
                    .expect("Error in boundary matrix construction. This is a bug in homchain")
                })
                .collect()
        });
        match matrices.get(dim) {
            Some(mat) => Cow::Borrowed(mat),
            None => Cow::Owned(nas::CsrMatrix::zeros(
                self.level_size(dim),
                self.level_size(dim + 1),
            )),
        }
    }

    /// Get the set of `dim-1`-cells on the geometric boundary of the complex,
    /// i.e. those with exactly one coface.
    ///
    /// Empty for complexes of dimension 0 or empty complexes.
    pub fn free_faces(&self) -> &fb::FixedBitSet {
        self.free_faces.get_or_init(|| {
            let Some(face_dim) = self.dimension().and_then(|d| d.checked_sub(1)) else {
                return fb::FixedBitSet::default();
            };
            let coboundary_map = &self.coboundary_maps()[face_dim];
            let mut free = fb::FixedBitSet::with_capacity(coboundary_map.nrows());
            for (row_idx, cofaces) in coboundary_map.row_iter().enumerate() {
                if cofaces.nnz() == 1 {
                    free.insert(row_idx);
                }
            }
            free
        })
    }

    /// Create a dense chain with a value of zero
    /// for each `dim`-cell in the complex.
    #[inline]
    pub fn new_chain(&self, dim: usize) -> Chain {
        Chain::zeros(dim, self.level_size(dim))
    }

    /// Create a sparse chain with a value of zero
    /// for each `dim`-cell in the complex.
    #[inline]
    pub fn new_sparse_chain(&self, dim: usize) -> Chain {
        Chain::sparse_zeros(dim, self.level_size(dim))
    }

    /// Create a sparse `dim`-chain from `(cell, coefficient)` pairs.
    /// Repeated cells are summed.
    pub fn chain_from_cells<'a>(
        &self,
        dim: usize,
        cells: impl IntoIterator<Item = (&'a Cell, f64)>,
    ) -> Result<Chain, ComplexError> {
        let mut chain = self.new_sparse_chain(dim);
        for (cell, value) in cells {
            if cell.dim() != dim {
                return Err(ComplexError::UnknownCell(cell.clone()));
            }
            let index = self.cell_to_index(cell)?;
            chain.set(index, chain.get(index) + value);
        }
        Ok(chain)
    }

    /// Compute the boundary of a chain,
    /// i.e. apply [`boundary_matrix`][Self::boundary_matrix] to it.
    ///
    /// The result has the same representation as the input.
    /// The boundary of a 0-chain is an empty chain.
    pub fn boundary(&self, chain: &Chain) -> Result<Chain, ChainError> {
        let dim = chain.dim();
        self.check_chain_len(chain)?;
        let Some(face_dim) = dim.checked_sub(1) else {
            return Ok(Chain::zeros(0, 0));
        };
        let matrix = self.boundary_matrix(face_dim);
        let values = &*matrix * &chain.to_dense_vector();
        let boundary = Chain::from_dense(face_dim, values);
        Ok(if chain.is_sparse() {
            boundary.into_sparse()
        } else {
            boundary
        })
    }

    fn check_chain_len(&self, chain: &Chain) -> Result<(), ChainError> {
        let expected = self.level_size(chain.dim());
        if chain.len() != expected {
            return Err(ChainError::LengthMismatch {
                left: chain.len(),
                right: expected,
            });
        }
        Ok(())
    }

    fn level_volumes(&self, dim: usize) -> &[f64] {
        match self.levels.get(dim) {
            Some(level) => level
                .volumes
                .get_or_init(|| construction::compute_volumes(&self.points, self.point_dim, level)),
            None => &[],
        }
    }

    /// Get the unsigned volume of a cell
    /// (length for edges, area for triangles etc, 1 for vertices).
    pub fn cell_volume(&self, cell: &Cell) -> Result<f64, ComplexError> {
        let index = self.cell_to_index(cell)?;
        Ok(self.level_volumes(cell.dim())[index])
    }

    /// Get a dense `dim`-chain where each coefficient
    /// is the unsigned volume of the corresponding cell.
    pub fn volume_chain(&self, dim: usize) -> Chain {
        Chain::from_dense(
            dim,
            na::DVector::from_column_slice(self.level_volumes(dim)),
        )
    }

    /// Sum of cell volumes weighted by the chain's coefficients.
    pub fn chain_volume(&self, chain: &Chain) -> Result<f64, ChainError> {
        self.check_chain_len(chain)?;
        let volumes = self.level_volumes(chain.dim());
        Ok(chain.iter().map(|(i, c)| c * volumes[i]).sum())
    }

    /// Collapse every point for which `collapse` returns true
    /// into a single virtual point with index 0.
    ///
    /// Cells with two or more collapsed vertices degenerate and are dropped.
    /// This is a shorthand for building a [`Quotient`][quotient::Quotient]
    /// when the translation of chains isn't needed.
    pub fn quotient(
        &self,
        collapse: impl Fn(&Point) -> bool,
    ) -> Result<SimplicialComplex, ComplexError> {
        quotient::translate(self, collapse, None).map(|(_, complex)| complex)
    }
}

/// Get the column indices and values of a CSR matrix row.
#[inline]
fn csr_row<T>(mat: &nas::CsrMatrix<T>, row: usize) -> (&[usize], &[T]) {
    let offsets = mat.row_offsets();
    let range = offsets[row]..offsets[row + 1];
    (&mat.col_indices()[range.clone()], &mat.values()[range])
}

#[inline]
fn incidences<'a>(
    (indices, orientations): (&'a [usize], &'a [i8]),
) -> impl 'a + Iterator<Item = Incidence> {
    izip!(indices, orientations).map(|(&index, &orientation)| Incidence { index, orientation })
}
