//! Cells of a simplicial complex, i.e. simplices identified by their vertex indices.

/// A simplex given by the indices of its vertices
/// (a point, line segment, triangle, tetrahedron etc).
///
/// By convention, vertices are kept in ascending order.
/// This gives every simplex exactly one representation,
/// so two cells are equal exactly when their vertex sets are equal,
/// and it fixes the orientation used for boundaries
/// (see [`boundary_inclusion_index`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell(Vec<usize>);

/// Error in constructing a [`Cell`] from a list of vertices.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum CellError {
    /// A cell needs at least one vertex.
    #[error("a cell must have at least one vertex")]
    Empty,
    /// The same vertex was given more than once.
    #[error("vertex {0} appears more than once in the cell")]
    RepeatedVertex(usize),
}

impl Cell {
    /// Create a cell from a list of vertex indices in any order.
    pub fn new(vertices: impl Into<Vec<usize>>) -> Result<Self, CellError> {
        let mut vertices = vertices.into();
        if vertices.is_empty() {
            return Err(CellError::Empty);
        }
        vertices.sort_unstable();
        if let Some(w) = vertices.windows(2).find(|w| w[0] == w[1]) {
            return Err(CellError::RepeatedVertex(w[0]));
        }
        Ok(Self(vertices))
    }

    /// Wrap a vertex slice that is already known to be sorted and free of repeats,
    /// e.g. one taken from a complex's storage.
    #[inline]
    pub(crate) fn from_sorted(vertices: &[usize]) -> Self {
        debug_assert!(vertices.windows(2).all(|w| w[0] < w[1]));
        Self(vertices.to_vec())
    }

    /// The vertex indices of this cell in ascending order.
    #[inline]
    pub fn vertices(&self) -> &[usize] {
        &self.0
    }

    /// The dimension of the cell, one less than its number of vertices.
    #[inline]
    pub fn dim(&self) -> usize {
        self.0.len() - 1
    }

    /// Iterate over the codimension 1 faces of this cell
    /// together with their inclusion index in it.
    ///
    /// 0-cells have no faces.
    pub fn faces(&self) -> impl '_ + Iterator<Item = (i8, Cell)> {
        let count = if self.0.len() > 1 { self.0.len() } else { 0 };
        (0..count).map(move |exclude_idx| {
            let face: Vec<usize> = self
                .0
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != exclude_idx)
                .map(|(_, v)| *v)
                .collect();
            (exclusion_sign(exclude_idx), Cell(face))
        })
    }

    /// Whether `face` is a codimension 1 face of this cell.
    #[inline]
    pub fn has_face(&self, face: &Cell) -> bool {
        boundary_inclusion_index(face.vertices(), self.vertices()) != 0
    }
}

impl AsRef<[usize]> for Cell {
    fn as_ref(&self) -> &[usize] {
        &self.0
    }
}

impl TryFrom<Vec<usize>> for Cell {
    type Error = CellError;

    fn try_from(vertices: Vec<usize>) -> Result<Self, Self::Error> {
        Self::new(vertices)
    }
}

impl<const N: usize> TryFrom<[usize; N]> for Cell {
    type Error = CellError;

    fn try_from(vertices: [usize; N]) -> Result<Self, Self::Error> {
        Self::new(vertices.to_vec())
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Orientation of the face obtained by dropping the vertex at `exclude_idx`.
///
/// Boundary orientations alternate between forward and backward
/// when defined in this order.
/// See Discrete Differential Forms for Computational Modeling by Desbrun et al. (2006)
/// <https://dl.acm.org/doi/pdf/10.1145/1185657.1185665>
#[inline]
pub(crate) fn exclusion_sign(exclude_idx: usize) -> i8 {
    if exclude_idx % 2 == 0 {
        1
    } else {
        -1
    }
}

/// Compute the signed inclusion index of `face` in the boundary of `cell`.
///
/// Both slices must be sorted in ascending order.
/// The vertex lists are walked in lock-step;
/// if `face` is `cell` with the vertex at position `p` removed,
/// the result is `(-1)^p`. If `face` isn't a codimension 1 face of `cell`,
/// the result is 0.
pub fn boundary_inclusion_index(face: &[usize], cell: &[usize]) -> i8 {
    if face.len() + 1 != cell.len() {
        return 0;
    }

    let mut face_iter = face.iter().peekable();
    let mut missing = None;
    for (pos, vert) in cell.iter().enumerate() {
        match face_iter.peek() {
            Some(&&face_vert) if face_vert == *vert => {
                face_iter.next();
            }
            _ => {
                if missing.is_some() {
                    return 0;
                }
                missing = Some(pos);
            }
        }
    }

    match missing {
        Some(pos) if face_iter.next().is_none() => exclusion_sign(pos),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_canonical() {
        let a = Cell::new(vec![2, 0, 1]).unwrap();
        let b = Cell::try_from([1, 2, 0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.vertices(), &[0, 1, 2]);
        assert_eq!(a.dim(), 2);

        assert_eq!(Cell::new(Vec::new()), Err(CellError::Empty));
        assert_eq!(Cell::new(vec![3, 1, 3]), Err(CellError::RepeatedVertex(3)));
    }

    #[test]
    fn triangle_faces_alternate() {
        let tri = Cell::try_from([0, 1, 2]).unwrap();
        let faces: Vec<(i8, Vec<usize>)> = tri
            .faces()
            .map(|(o, f)| (o, f.vertices().to_vec()))
            .collect();
        assert_eq!(
            faces,
            vec![(1, vec![1, 2]), (-1, vec![0, 2]), (1, vec![0, 1])]
        );
        for (o, f) in tri.faces() {
            assert_eq!(boundary_inclusion_index(f.vertices(), tri.vertices()), o);
            assert!(tri.has_face(&f));
        }

        let vertex = Cell::try_from([4]).unwrap();
        assert_eq!(vertex.faces().count(), 0);
    }

    #[test]
    fn inclusion_index_of_non_faces_is_zero() {
        // wrong vertex
        assert_eq!(boundary_inclusion_index(&[0, 3], &[0, 1, 2]), 0);
        // wrong dimension
        assert_eq!(boundary_inclusion_index(&[0], &[0, 1, 2]), 0);
        assert_eq!(boundary_inclusion_index(&[0, 1, 2], &[0, 1, 2]), 0);
        // edges of a tetrahedron's face
        assert_eq!(boundary_inclusion_index(&[1, 2, 3], &[0, 1, 2, 3]), 1);
        assert_eq!(boundary_inclusion_index(&[0, 2, 3], &[0, 1, 2, 3]), -1);
        assert_eq!(boundary_inclusion_index(&[0, 1, 3], &[0, 1, 2, 3]), 1);
        assert_eq!(boundary_inclusion_index(&[0, 1, 2], &[0, 1, 2, 3]), -1);
        // 1-simplex boundary is end minus start
        assert_eq!(boundary_inclusion_index(&[5], &[2, 5]), 1);
        assert_eq!(boundary_inclusion_index(&[2], &[2, 5]), -1);
    }
}
