//! In-memory feature source backed by an already loaded table.

use std::cell::Cell;

use hashbrown::HashSet;

use super::{ChunkQuery, FeatureSource, Predicate};
use crate::error::QueryError;
use crate::models::FeatureTable;

/// Answers chunk queries from rows held in memory.
///
/// Used to resolve coordinates against local query dumps without touching the
/// hosted service, and as a stand-in client in tests.
pub struct MemorySource {
    table: FeatureTable,
    queries: Cell<usize>,
}

impl MemorySource {
    pub fn new(table: FeatureTable) -> Self {
        Self {
            table,
            queries: Cell::new(0),
        }
    }

    /// Number of chunk queries answered so far
    pub fn queries(&self) -> usize {
        self.queries.get()
    }
}

impl FeatureSource for MemorySource {
    async fn fetch(&self, query: &ChunkQuery) -> Result<FeatureTable, QueryError> {
        self.queries.set(self.queries.get() + 1);

        let mut out = FeatureTable::new(self.table.columns.clone());
        match &query.predicate {
            Predicate::Points(points) => {
                let wanted: HashSet<(u64, u64)> = points
                    .iter()
                    .map(|(x, y)| (x.to_bits(), y.to_bits()))
                    .collect();
                out.rows.extend(
                    self.table
                        .rows
                        .iter()
                        .filter(|r| wanted.contains(&(r.lon.to_bits(), r.lat.to_bits())))
                        .cloned(),
                );
            }
            predicate => {
                out.rows.extend(
                    self.table
                        .rows
                        .iter()
                        .filter(|r| predicate.matches(r.lon, r.lat))
                        .cloned(),
                );
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, FeatureRow};

    fn table() -> FeatureTable {
        let mut t = FeatureTable::new(vec!["X_0".into()]);
        for (i, (x, y)) in [(0.005, 0.005), (0.015, 0.005), (0.5, 0.5)].iter().enumerate() {
            t.rows.push(FeatureRow::new(*x, *y, vec![Some(i as f64)]));
        }
        t
    }

    #[tokio::test]
    async fn test_range_query() {
        let source = MemorySource::new(table());
        let q = ChunkQuery::new(
            "t",
            Predicate::Range {
                bounds: BoundingBox::new(0.0, 0.0, 0.1, 0.1),
                inclusive: false,
            },
            "tile (1, 1)",
        );
        let result = source.fetch(&q).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.columns, vec!["X_0".to_string()]);
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test]
    async fn test_points_query_and_empty_result() {
        let source = MemorySource::new(table());
        let q = ChunkQuery::new("t", Predicate::Points(vec![(0.5, 0.5)]), "batch 1");
        let result = source.fetch(&q).await.unwrap();
        assert_eq!(result.rows[0].values, vec![Some(2.0)]);

        let q = ChunkQuery::new("t", Predicate::Points(vec![(9.0, 9.0)]), "batch 2");
        assert!(source.fetch(&q).await.unwrap().is_empty());
    }
}
