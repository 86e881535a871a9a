//! Per-entity averaging of joined feature rows.

use std::collections::BTreeMap;

use tracing::info;

/// Mean feature vector for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: String,
    pub values: Vec<f64>,
    /// Number of joined rows averaged
    pub count: usize,
}

/// One row per entity key, ordered by key
#[derive(Debug, Clone, Default)]
pub struct AggregateTable {
    pub columns: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AggregateRow> {
        self.rows.iter().find(|r| r.key == key)
    }
}

/// Select the feature columns: every column whose name contains `marker`.
///
/// Returns the selected names with their positions in `columns`.
pub fn select_features(columns: &[String], marker: &str) -> (Vec<String>, Vec<usize>) {
    columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.contains(marker))
        .map(|(i, c)| (c.clone(), i))
        .unzip()
}

/// Column-wise mean per key over the marker-named columns.
///
/// Missing values count as zero. Keys without rows never appear in the output.
pub fn aggregate<'a, I>(columns: &[String], marker: &str, rows: I) -> AggregateTable
where
    I: IntoIterator<Item = (&'a str, &'a [Option<f64>])>,
{
    let (names, positions) = select_features(columns, marker);
    let width = names.len();

    let mut sums: BTreeMap<&'a str, (Vec<f64>, usize)> = BTreeMap::new();
    for (key, values) in rows {
        let (acc, count) = sums
            .entry(key)
            .or_insert_with(|| (vec![0.0; width], 0));
        for (slot, &pos) in acc.iter_mut().zip(&positions) {
            *slot += values.get(pos).copied().flatten().unwrap_or(0.0);
        }
        *count += 1;
    }

    let rows: Vec<AggregateRow> = sums
        .into_iter()
        .map(|(key, (acc, count))| AggregateRow {
            key: key.to_string(),
            values: acc.into_iter().map(|s| s / count as f64).collect(),
            count,
        })
        .collect();

    info!("Averaged {} feature columns for {} entities", width, rows.len());

    AggregateTable {
        columns: names,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("X_{}", i)).collect()
    }

    #[test]
    fn test_mean_of_two_rows() {
        let a = [Some(1.0), Some(2.0), Some(3.0)];
        let b = [Some(3.0), Some(4.0), Some(5.0)];
        let out = aggregate(&cols(3), "X_", vec![("v1", &a[..]), ("v1", &b[..])]);

        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].values, vec![2.0, 3.0, 4.0]);
        assert_eq!(out.rows[0].count, 2);
    }

    #[test]
    fn test_missing_values_count_as_zero() {
        let missing = [None, None, None];
        let full = [Some(4.0), Some(4.0), Some(4.0)];
        let out = aggregate(&cols(3), "X_", vec![("v1", &missing[..]), ("v1", &full[..])]);
        assert_eq!(out.rows[0].values, vec![2.0, 2.0, 2.0]);

        let partial = [Some(2.0), None, Some(6.0)];
        let out = aggregate(&cols(3), "X_", vec![("v1", &partial[..])]);
        assert_eq!(out.rows[0].values, vec![2.0, 0.0, 6.0]);
    }

    #[test]
    fn test_only_marker_columns_are_averaged() {
        let columns = vec!["lon".to_string(), "X_0".to_string(), "queried".to_string()];
        let row = [Some(77.0), Some(5.0), Some(1.0)];
        let out = aggregate(&columns, "X_", vec![("v1", &row[..])]);
        assert_eq!(out.columns, vec!["X_0".to_string()]);
        assert_eq!(out.rows[0].values, vec![5.0]);
    }

    #[test]
    fn test_groups_by_key_in_order() {
        let r1 = [Some(1.0)];
        let r2 = [Some(3.0)];
        let out = aggregate(&cols(1), "X_", vec![("b", &r1[..]), ("a", &r2[..]), ("b", &r2[..])]);
        let keys: Vec<&str> = out.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(out.get("b").unwrap().values, vec![2.0]);
        assert!(out.get("c").is_none());
    }
}
