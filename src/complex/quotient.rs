//! Quotient complexes, where a set of points is identified into a single point.
//!
//! Collapsing the points on a region of the boundary
//! turns chains with boundary inside that region into cycles,
//! which lets bounding chains be found relative to the region.

use fixedbitset as fb;
use std::sync::Arc;

use super::{ComplexError, Point, SimplicialComplex};
use crate::{
    cell::Cell,
    chain::{Chain, ChainError},
};

/// Index of the point that collapsed points are mapped to in a quotient complex.
pub const VIRTUAL_POINT: usize = 0;

/// A complex together with its quotient by a set of points,
/// and the maps to translate cells and chains between the two.
///
/// Points of the base complex are either collapsed into [`VIRTUAL_POINT`]
/// or renumbered consecutively from 1 in their original order.
/// Base cells with two or more collapsed vertices degenerate
/// and have no counterpart in the quotient.
#[derive(Clone, Debug)]
pub struct Quotient {
    base: Arc<SimplicialComplex>,
    quotient: Arc<SimplicialComplex>,
    maps: PointMaps,
}

/// Translation of point indices between a base and a quotient complex.
#[derive(Clone, Debug)]
pub(crate) struct PointMaps {
    /// quotient index for every base point, VIRTUAL_POINT for collapsed ones
    to_quotient: Vec<usize>,
    /// base index of every non-virtual quotient point, offset by one
    to_base: Vec<usize>,
    collapsed: fb::FixedBitSet,
}

impl PointMaps {
    /// Translate a sorted base cell to quotient vertices,
    /// or `None` if more than one vertex collapses.
    ///
    /// The result is sorted, since kept points keep their relative order
    /// and the virtual point comes first.
    fn quotient_vertices(&self, cell: &[usize]) -> Option<Vec<usize>> {
        let mut collapsed = false;
        let mut vertices = Vec::with_capacity(cell.len());
        vertices.push(VIRTUAL_POINT);
        for &v in cell {
            match self.to_quotient[v] {
                VIRTUAL_POINT if collapsed => return None,
                VIRTUAL_POINT => collapsed = true,
                qv => vertices.push(qv),
            }
        }
        if !collapsed {
            vertices.remove(0);
        }
        Some(vertices)
    }

    /// Translate sorted quotient vertices back to the base,
    /// or `None` if the cell touches the virtual point.
    fn base_vertices(&self, cell: &[usize]) -> Option<Vec<usize>> {
        cell.iter()
            .map(|&qv| qv.checked_sub(1).and_then(|i| self.to_base.get(i).copied()))
            .collect()
    }

    /// Sign applied to a base cell's coefficient when pushing it forward:
    /// `(-1)^i` where `i` is the position of its collapsed vertex, if any.
    fn orientation_factor(&self, cell: &[usize]) -> f64 {
        match cell.iter().position(|v| self.collapsed.contains(*v)) {
            Some(pos) if pos % 2 == 1 => -1.0,
            _ => 1.0,
        }
    }
}

/// Build the quotient complex of `base` by the points where `collapse` is true.
///
/// The virtual point is placed at `virtual_point` if given,
/// otherwise at the centroid of the collapsed points
/// (or the origin if nothing collapses).
pub(crate) fn translate(
    base: &SimplicialComplex,
    collapse: impl Fn(&Point) -> bool,
    virtual_point: Option<Point>,
) -> Result<(PointMaps, SimplicialComplex), ComplexError> {
    let point_count = base.points().len();
    let mut to_quotient = Vec::with_capacity(point_count);
    let mut to_base = Vec::new();
    let mut collapsed = fb::FixedBitSet::with_capacity(point_count);
    let mut collapsed_sum = Point::zeros(base.point_dimension());

    for (base_idx, p) in base.points().iter().enumerate() {
        if collapse(p) {
            to_quotient.push(VIRTUAL_POINT);
            collapsed.insert(base_idx);
            collapsed_sum += p;
        } else {
            to_base.push(base_idx);
            to_quotient.push(to_base.len());
        }
    }
    let collapsed_count = collapsed.count_ones(..);
    let virtual_point = virtual_point.unwrap_or_else(|| {
        if collapsed_count > 0 {
            collapsed_sum / collapsed_count as f64
        } else {
            collapsed_sum
        }
    });
    log::debug!(
        "collapsing {collapsed_count} of {point_count} points into a virtual point at {:?}",
        virtual_point.as_slice()
    );

    let maps = PointMaps {
        to_quotient,
        to_base,
        collapsed,
    };

    let points: Vec<Point> = std::iter::once(virtual_point)
        .chain(maps.to_base.iter().map(|&i| base.points()[i].clone()))
        .collect();
    let max_dim = base.dimension().map_or(0, |d| d + 1);
    let cells: Vec<Vec<usize>> = (0..max_dim)
        .flat_map(|dim| base.level_indices(dim))
        .filter_map(|cell| maps.quotient_vertices(cell))
        .collect();
    let quotient = SimplicialComplex::new(points, cells)?;

    Ok((maps, quotient))
}

impl Quotient {
    /// Build the quotient of `base` by the points where `collapse` is true,
    /// placing the virtual point at the centroid of the collapsed points.
    pub fn new(
        base: Arc<SimplicialComplex>,
        collapse: impl Fn(&Point) -> bool,
    ) -> Result<Self, ComplexError> {
        Self::build(base, collapse, None)
    }

    /// Build the quotient of `base` by the points where `collapse` is true,
    /// placing the virtual point at `base_point`.
    ///
    /// `base_point` must have the same number of coordinates as the base complex's points.
    pub fn with_base_point(
        base: Arc<SimplicialComplex>,
        collapse: impl Fn(&Point) -> bool,
        base_point: Point,
    ) -> Result<Self, ComplexError> {
        Self::build(base, collapse, Some(base_point))
    }

    fn build(
        base: Arc<SimplicialComplex>,
        collapse: impl Fn(&Point) -> bool,
        virtual_point: Option<Point>,
    ) -> Result<Self, ComplexError> {
        let (maps, quotient) = translate(&base, collapse, virtual_point)?;
        Ok(Self {
            base,
            quotient: Arc::new(quotient),
            maps,
        })
    }

    /// The complex that was collapsed.
    #[inline]
    pub fn base_complex(&self) -> &Arc<SimplicialComplex> {
        &self.base
    }

    /// The collapsed complex.
    #[inline]
    pub fn quotient_complex(&self) -> &Arc<SimplicialComplex> {
        &self.quotient
    }

    /// Whether the base point with the given index is collapsed.
    #[inline]
    pub fn is_collapsed(&self, base_point: usize) -> bool {
        self.maps.collapsed.contains(base_point)
    }

    /// Translate a base cell to the quotient.
    ///
    /// Returns `None` if two or more of its vertices collapse.
    pub fn quotient_face(&self, cell: &Cell) -> Option<Cell> {
        if cell.vertices().iter().any(|v| *v >= self.maps.to_quotient.len()) {
            return None;
        }
        self.maps
            .quotient_vertices(cell.vertices())
            .map(|v| Cell::from_sorted(&v))
    }

    /// Translate a quotient cell back to the base.
    ///
    /// Returns `None` if the cell contains the virtual point,
    /// since those have no unique preimage.
    pub fn unquotient_face(&self, cell: &Cell) -> Option<Cell> {
        self.maps
            .base_vertices(cell.vertices())
            .map(|v| Cell::from_sorted(&v))
    }

    /// Level-local index of a cell in the base complex.
    #[inline]
    pub fn base_index(&self, cell: &Cell) -> Result<usize, ComplexError> {
        self.base.cell_to_index(cell)
    }

    /// Level-local index of a cell in the quotient complex.
    #[inline]
    pub fn quotient_index(&self, cell: &Cell) -> Result<usize, ComplexError> {
        self.quotient.cell_to_index(cell)
    }

    /// Push a chain on the base complex forward to the quotient.
    ///
    /// Each coefficient is multiplied by `(-1)^i`,
    /// `i` being the position of the cell's collapsed vertex if it has one,
    /// and accumulated on the image cell.
    /// Coefficients of degenerate cells are dropped.
    /// The result has the same representation as the input.
    pub fn quotient_chain(&self, chain: &Chain) -> Result<Chain, ChainError> {
        let dim = chain.dim();
        check_len(chain, self.base.level_size(dim))?;

        let mut pushed = self.quotient.new_chain(dim);
        for (base_idx, value) in chain.iter() {
            let cell = self.base.simplex_indices(dim, base_idx);
            let Some(q_cell) = self.maps.quotient_vertices(cell) else {
                continue;
            };
            let q_idx = self
                .quotient
                .cell_to_index(&Cell::from_sorted(&q_cell))
                .expect("Quotient cell missing. This is a bug in homchain");
            let factor = self.maps.orientation_factor(cell);
            pushed.set(q_idx, pushed.get(q_idx) + factor * value);
        }

        Ok(match_representation(pushed, chain))
    }

    /// Pull a chain on the quotient complex back to the base.
    ///
    /// Coefficients of cells containing the virtual point are dropped;
    /// the rest are copied to their preimage without any sign change.
    pub fn unquotient_chain(&self, chain: &Chain) -> Result<Chain, ChainError> {
        let dim = chain.dim();
        check_len(chain, self.quotient.level_size(dim))?;

        let mut pulled = self.base.new_chain(dim);
        for (q_idx, value) in chain.iter() {
            let q_cell = self.quotient.simplex_indices(dim, q_idx);
            let Some(cell) = self.maps.base_vertices(q_cell) else {
                continue;
            };
            let base_idx = self
                .base
                .cell_to_index(&Cell::from_sorted(&cell))
                .expect("Base cell missing. This is a bug in homchain");
            pulled.set(base_idx, value);
        }

        Ok(match_representation(pulled, chain))
    }
}

fn check_len(chain: &Chain, expected: usize) -> Result<(), ChainError> {
    if chain.len() != expected {
        return Err(ChainError::LengthMismatch {
            left: chain.len(),
            right: expected,
        });
    }
    Ok(())
}

fn match_representation(result: Chain, like: &Chain) -> Chain {
    if like.is_sparse() {
        result.into_sparse()
    } else {
        result
    }
}
