//! Result merging: chunk concatenation plus spatial and exact-match joins.

mod exact;
mod spatial;

pub use exact::SortedIndex;
pub use spatial::{spatial_join, EntityIndex, JoinPredicate};

use std::collections::BTreeMap;

use tracing::info;

use crate::models::{FeatureRow, FeatureTable};

/// Concatenate per-chunk results into one table.
///
/// With `dedup`, rows repeated across chunk boundaries are dropped (first wins).
/// With `sort`, the result is ordered by `(lon, lat)`.
pub fn merge_chunks<I>(tables: I, dedup: bool, sort: bool) -> FeatureTable
where
    I: IntoIterator<Item = FeatureTable>,
{
    let mut merged = FeatureTable::concat(tables);
    if dedup {
        let removed = merged.dedup_coords();
        if removed > 0 {
            info!("Removed {} duplicate rows across chunk boundaries", removed);
        }
    }
    if sort {
        merged.sort_by_coords();
    }
    merged
}

/// Feature rows grouped by the entity they joined to.
///
/// Groups are ordered by key and rows within a group by `(lon, lat)`.
#[derive(Debug, Clone, Default)]
pub struct JoinedTable {
    pub columns: Vec<String>,
    pub groups: BTreeMap<String, Vec<FeatureRow>>,
}

impl JoinedTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            groups: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, key: &str, row: FeatureRow) {
        self.groups.entry(key.to_string()).or_default().push(row);
    }

    /// Sort every group by `(lon, lat)`
    pub fn sort_groups(&mut self) {
        for rows in self.groups.values_mut() {
            rows.sort_by(|a, b| crate::models::cmp_coords(a.coords(), b.coords()));
        }
    }

    pub fn row_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Every joined row with its key, in group order
    pub fn rows(&self) -> impl Iterator<Item = (&str, &FeatureRow)> {
        self.groups
            .iter()
            .flat_map(|(k, rows)| rows.iter().map(move |r| (k.as_str(), r)))
    }
}
