//! Feature rows returned by the hosted MOSAIKS table.

use std::cmp::Ordering;

use hashbrown::{HashMap, HashSet};

/// Total order on `(lon, lat)` pairs, lon first
pub fn cmp_coords(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
}

/// One grid sample: coordinate plus its feature vector.
///
/// Values are `None` where the source had no value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub lon: f64,
    pub lat: f64,
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn new(lon: f64, lat: f64, values: Vec<Option<f64>>) -> Self {
        Self { lon, lat, values }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lon, self.lat)
    }
}

/// A tabular query result: named feature columns plus rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Append another table's rows, aligning its columns to ours by name.
    ///
    /// The first non-empty table fixes the column set. Columns missing from
    /// `other` become missing values, extra columns in `other` are dropped.
    pub fn append(&mut self, other: FeatureTable) {
        if other.rows.is_empty() {
            if self.columns.is_empty() {
                self.columns = other.columns;
            }
            return;
        }
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        if self.columns == other.columns {
            self.rows.extend(other.rows);
            return;
        }

        let positions: HashMap<&str, usize> = other
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| positions.get(c.as_str()).copied())
            .collect();

        for row in other.rows {
            let values = mapping
                .iter()
                .map(|idx| idx.and_then(|i| row.values.get(i).copied().flatten()))
                .collect();
            self.rows.push(FeatureRow::new(row.lon, row.lat, values));
        }
    }

    /// Concatenate tables in order
    pub fn concat<I: IntoIterator<Item = FeatureTable>>(tables: I) -> Self {
        let mut out = FeatureTable::default();
        for table in tables {
            out.append(table);
        }
        out
    }

    /// Sort rows by `(lon, lat)`; stable, so duplicates keep their order
    pub fn sort_by_coords(&mut self) {
        self.rows.sort_by(|a, b| cmp_coords(a.coords(), b.coords()));
    }

    /// Drop rows whose `(lon, lat)` was already seen, keeping the first.
    ///
    /// Returns the number of rows removed.
    pub fn dedup_coords(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen: HashSet<(u64, u64)> = HashSet::with_capacity(before);
        self.rows
            .retain(|r| seen.insert((r.lon.to_bits(), r.lat.to_bits())));
        before - self.rows.len()
    }
}
