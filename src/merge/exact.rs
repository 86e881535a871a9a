//! Exact `(lon, lat)` lookup against a sorted feature table.

use tracing::info;

use crate::models::{cmp_coords, FeatureRow, FeatureTable};

/// Feature rows sorted by `(lon, lat)` for binary-search lookup.
///
/// Keys must match exactly; there is no nearest-neighbour fallback.
#[derive(Debug, Clone)]
pub struct SortedIndex {
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl SortedIndex {
    /// Sort the table and drop repeated coordinates, keeping the first.
    pub fn build(mut table: FeatureTable) -> Self {
        table.sort_by_coords();
        table.dedup_coords();
        info!("Built coordinate index over {} rows", table.len());
        Self {
            columns: table.columns,
            rows: table.rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row with exactly these coordinates
    pub fn lookup(&self, lon: f64, lat: f64) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by(|r| cmp_coords(r.coords(), (lon, lat)))
            .ok()
            .map(|i| &self.rows[i])
    }
}
