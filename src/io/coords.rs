//! Coordinate sheets: raw `(Lon, Lat)` rows that get feature columns filled in.
//!
//! Columns other than the coordinates, the `queried` checkpoint and the feature
//! columns are carried through untouched.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use hashbrown::HashMap;
use tracing::info;
use xxhash_rust::xxh64::Xxh64;

use super::open_input;
use super::table::{feature_columns, parse_value};

/// Name of the checkpoint column (0 = pending, 1 = filled in)
pub const QUERIED_COLUMN: &str = "queried";

/// Feature column name for index `i`
pub fn feature_name(marker: &str, i: usize) -> String {
    format!("{}{}", marker, i)
}

/// An editable coordinate sheet
#[derive(Debug, Clone)]
pub struct CoordSheet {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
    lon_idx: usize,
    lat_idx: usize,
    key_idx: Option<usize>,
    queried_idx: Option<usize>,
    feature_idx: Vec<usize>,
}

impl CoordSheet {
    /// Load a sheet. `key_column` names the row identifier; when `None` the
    /// coordinate pair `(lon, lat)` is the key.
    pub fn load(
        path: &Path,
        lon_column: &str,
        lat_column: &str,
        key_column: Option<&str>,
        marker: &str,
    ) -> Result<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(open_input(path)?);
        let header_record = csv_reader.headers()?.clone();
        let headers: Vec<String> = header_record.iter().map(String::from).collect();

        let find = |name: &str| headers.iter().position(|h| h == name);
        let lon_idx = find(lon_column).with_context(|| format!("Column '{}' not found", lon_column))?;
        let lat_idx = find(lat_column).with_context(|| format!("Column '{}' not found", lat_column))?;
        let key_idx = match key_column {
            Some(k) => Some(find(k).with_context(|| format!("Column '{}' not found", k))?),
            None => None,
        };
        let queried_idx = find(QUERIED_COLUMN);

        let mut exclude = vec![lon_idx, lat_idx];
        exclude.extend(key_idx);
        exclude.extend(queried_idx);
        let feature_idx = feature_columns(&header_record, marker, &exclude);

        let records = csv_reader
            .records()
            .map(|r| r.map(|rec: StringRecord| rec.iter().map(String::from).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()
            .with_context(|| format!("Failed to read {}", path.display()))?;

        info!("Loaded {} coordinate rows from {}", records.len(), path.display());

        Ok(Self {
            headers,
            records,
            lon_idx,
            lat_idx,
            key_idx,
            queried_idx,
            feature_idx,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn feature_columns(&self) -> Vec<&str> {
        self.feature_idx.iter().map(|&i| self.headers[i].as_str()).collect()
    }

    /// Add the `queried` column (all 0) if it is missing. Returns true if added.
    pub fn ensure_queried_column(&mut self) -> bool {
        if self.queried_idx.is_some() {
            return false;
        }
        self.headers.push(QUERIED_COLUMN.to_string());
        for record in &mut self.records {
            record.push("0".to_string());
        }
        self.queried_idx = Some(self.headers.len() - 1);
        true
    }

    /// Add `<marker>0 .. <marker>{width-1}` columns seeded with 0.0, skipping
    /// names already present. Returns the number of columns added.
    pub fn ensure_feature_columns(&mut self, marker: &str, width: usize) -> usize {
        let mut added = 0;
        for i in 0..width {
            let name = feature_name(marker, i);
            if self.headers.iter().any(|h| *h == name) {
                continue;
            }
            self.headers.push(name);
            for record in &mut self.records {
                record.push("0.0".to_string());
            }
            self.feature_idx.push(self.headers.len() - 1);
            added += 1;
        }
        added
    }

    /// xxh64 over every row's key and coordinate cells.
    ///
    /// Filling in features leaves it unchanged, so it identifies the set of
    /// coordinates a run state was built for.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        for record in &self.records {
            if let Some(k) = self.key_idx {
                hasher.update(record[k].as_bytes());
            }
            hasher.update(record[self.lon_idx].as_bytes());
            hasher.update(b",");
            hasher.update(record[self.lat_idx].as_bytes());
            hasher.update(b"\n");
        }
        hasher.digest()
    }

    /// Coordinates of row `row`
    pub fn coords(&self, row: usize) -> Result<(f64, f64)> {
        let record = &self.records[row];
        let lon = parse_value(&record[self.lon_idx])?
            .with_context(|| format!("Row {} has no longitude", row + 1))?;
        let lat = parse_value(&record[self.lat_idx])?
            .with_context(|| format!("Row {} has no latitude", row + 1))?;
        Ok((lon, lat))
    }

    /// Identifier of row `row`
    pub fn key(&self, row: usize) -> Result<String> {
        match self.key_idx {
            Some(i) => Ok(self.records[row][i].clone()),
            None => {
                let (lon, lat) = self.coords(row)?;
                Ok(format!("({}, {})", lon, lat))
            }
        }
    }

    /// Whether the row is already checkpointed as filled in
    pub fn is_queried(&self, row: usize) -> bool {
        self.queried_idx
            .and_then(|i| self.records[row].get(i))
            .map(|v| matches!(v.trim(), "1" | "1.0" | "true" | "True"))
            .unwrap_or(false)
    }

    /// Feature values currently stored in row `row`
    pub fn features(&self, row: usize) -> Result<Vec<Option<f64>>> {
        self.feature_idx
            .iter()
            .map(|&i| parse_value(self.records[row].get(i).map(String::as_str).unwrap_or("")))
            .collect()
    }

    /// Sheet positions for the named columns, `None` where the sheet lacks one
    pub fn column_positions(&self, columns: &[String]) -> Vec<Option<usize>> {
        let index: HashMap<&str, usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();
        columns.iter().map(|c| index.get(c.as_str()).copied()).collect()
    }

    /// Write `values` at `positions` (from [`Self::column_positions`]) and mark
    /// the row queried.
    pub fn fill(&mut self, row: usize, positions: &[Option<usize>], values: &[Option<f64>]) {
        self.ensure_queried_column();
        let record = &mut self.records[row];
        for (pos, value) in positions.iter().zip(values) {
            if let Some(idx) = pos {
                record[*idx] = value.map(|v| v.to_string()).unwrap_or_default();
            }
        }
        if let Some(q) = self.queried_idx {
            record[q] = "1".to_string();
        }
    }

    /// Write the sheet back out
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        info!("Saved {} coordinate rows to {}", self.records.len(), path.display());
        Ok(())
    }
}
