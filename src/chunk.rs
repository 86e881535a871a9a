//! Chunk planning for remote queries.
//!
//! The hosted table rejects oversized queries, so work is split either into
//! spatial tiles (range predicates) or into bounded slices of a coordinate
//! list (one equality term per coordinate).

use std::ops::Range;

use crate::error::ChunkError;
use crate::models::BoundingBox;

/// One rectangular query region, `(i, j)` indexes lon then lat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub i: usize,
    pub j: usize,
    pub bounds: BoundingBox,
}

/// Tiling of a total bounding box
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub num_x: usize,
    pub num_y: usize,
    pub tiles: Vec<Tile>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles at or after `(start_x, start_y)` in plan order, for resuming a dump
    pub fn resume_from(&self, start_x: usize, start_y: usize) -> impl Iterator<Item = &Tile> {
        self.tiles
            .iter()
            .skip_while(move |t| (t.i, t.j) < (start_x, start_y))
    }
}

/// Number of tiles along one axis: `ceil(extent / tile + 1)`
fn axis_count(extent: f64, tile_size: f64) -> usize {
    (extent / tile_size + 1.0).ceil().max(1.0) as usize
}

/// Interval `k` along an axis, upper edge clipped to `max`.
///
/// Returns `None` for zero-width intervals past the first one: they add no
/// coverage and would only issue an empty query.
fn axis_interval(min: f64, max: f64, tile_size: f64, k: usize) -> Option<(f64, f64)> {
    let lo = min + k as f64 * tile_size;
    let hi = (min + (k + 1) as f64 * tile_size).min(max);
    if k > 0 && lo >= max {
        return None;
    }
    Some((lo, hi))
}

/// Split `total` into tiles of `tile_size` degrees.
///
/// Iterates lon index `i` outer and lat index `j` inner. Edge tiles are
/// clipped to the total bounds and may be narrower than `tile_size`. A
/// degenerate (zero width or height) box still yields one tile.
pub fn plan_tiles(total: &BoundingBox, tile_size: f64) -> Result<TilePlan, ChunkError> {
    if !(tile_size.is_finite() && tile_size > 0.0) {
        return Err(ChunkError::InvalidTileSize(tile_size));
    }
    if !total.is_finite() {
        return Err(ChunkError::NonFiniteBounds);
    }

    let num_x = axis_count(total.width().max(0.0), tile_size);
    let num_y = axis_count(total.height().max(0.0), tile_size);

    let xs: Vec<(usize, (f64, f64))> = (0..num_x)
        .filter_map(|i| axis_interval(total.min_lon, total.max_lon, tile_size, i).map(|iv| (i, iv)))
        .collect();
    let ys: Vec<(usize, (f64, f64))> = (0..num_y)
        .filter_map(|j| axis_interval(total.min_lat, total.max_lat, tile_size, j).map(|iv| (j, iv)))
        .collect();

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    for &(i, (min_lon, max_lon)) in &xs {
        for &(j, (min_lat, max_lat)) in &ys {
            tiles.push(Tile {
                i,
                j,
                bounds: BoundingBox::new(min_lon, min_lat, max_lon, max_lat),
            });
        }
    }

    Ok(TilePlan {
        num_x,
        num_y,
        tiles,
    })
}

/// Split `0..total` into `ceil(total / batch_size)` contiguous ranges of at most `batch_size`
pub fn plan_batches(total: usize, batch_size: usize) -> Result<Vec<Range<usize>>, ChunkError> {
    if batch_size == 0 {
        return Err(ChunkError::ZeroBatchSize);
    }
    Ok((0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect())
}
