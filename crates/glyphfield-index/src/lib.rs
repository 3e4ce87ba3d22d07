//! Spatial indexing for agent proximity queries.
//!
//! The interaction engine rebuilds an index from agent positions once per
//! tick and asks for neighbors inside the merge threshold. Implementations
//! must visit every qualifying point exactly once; visit order is
//! unspecified.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighbor indices.
pub trait NeighborIndex {
    /// Rebuild internal structures from the current point set. An empty
    /// slice clears the index. Non-finite points are stored but never
    /// bucketed, so they match no query.
    fn rebuild(&mut self, positions: &[(f32, f32)]);

    /// Visit every point (other than `origin_idx` itself) whose squared
    /// distance from `origin_idx` is at most `radius_sq`, passing the index
    /// and squared distance. An out-of-range origin visits nothing.
    fn neighbors_within(
        &self,
        origin_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

/// Uniform grid index: points are bucketed into square cells and queries
/// scan only the cell block covering the search radius.
#[derive(Debug, Clone)]
pub struct UniformGridIndex {
    cell_size: f32,
    buckets: HashMap<(i32, i32), Vec<usize>>,
    points: Vec<(f32, f32)>,
}

impl UniformGridIndex {
    /// Default cell edge length, sized for merge-threshold queries.
    pub const DEFAULT_CELL_SIZE: f32 = 50.0;

    /// Create a grid with the provided cell edge length.
    pub fn new(cell_size: f32) -> Result<Self, IndexError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        Ok(Self {
            cell_size,
            buckets: HashMap::new(),
            points: Vec::new(),
        })
    }

    /// Edge length of each bucket cell.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self {
            cell_size: Self::DEFAULT_CELL_SIZE,
            buckets: HashMap::new(),
            points: Vec::new(),
        }
    }
}

impl NeighborIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) {
        self.buckets.clear();
        self.points.clear();
        self.points.extend_from_slice(positions);
        for (idx, &(x, y)) in positions.iter().enumerate() {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            self.buckets.entry(self.cell_of(x, y)).or_default().push(idx);
        }
    }

    fn neighbors_within(
        &self,
        origin_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&(ox, oy)) = self.points.get(origin_idx) else {
            return;
        };
        if radius_sq < 0.0 || !ox.is_finite() || !oy.is_finite() {
            return;
        }

        // Scan the cell block that covers the search radius; one cell ring
        // is enough only when the radius fits inside a cell.
        let span = (radius_sq.sqrt() / self.cell_size).ceil().max(1.0) as i32;
        let (cx, cy) = self.cell_of(ox, oy);
        for dy in -span..=span {
            for dx in -span..=span {
                let Some(bucket) = self.buckets.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &candidate in bucket {
                    if candidate == origin_idx {
                        continue;
                    }
                    let (px, py) = self.points[candidate];
                    let dist_sq = (px - ox).powi(2) + (py - oy).powi(2);
                    if dist_sq <= radius_sq {
                        visitor(candidate, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}
