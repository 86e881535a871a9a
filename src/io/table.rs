//! CSV reading and writing for feature tables and pipeline outputs.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info};

use super::open_input;
use crate::aggregate::AggregateTable;
use crate::merge::JoinedTable;
use crate::models::{Entity, FeatureRow, FeatureTable};

/// Parse one cell; blanks and NaN-like markers are missing values
pub(crate) fn parse_value(raw: &str) -> Result<Option<f64>> {
    let s = raw.trim();
    if s.is_empty() || matches!(s, "NA" | "N/A" | "null" | "NULL" | "None") {
        return Ok(None);
    }
    let v: f64 = s.parse().with_context(|| format!("Invalid number '{}'", s))?;
    Ok(if v.is_nan() { None } else { Some(v) })
}

fn format_value(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Indices of columns whose name contains `marker`, skipping `exclude`
pub(crate) fn feature_columns(headers: &StringRecord, marker: &str, exclude: &[usize]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(i, h)| !exclude.contains(i) && h.contains(marker))
        .map(|(i, _)| i)
        .collect()
}

/// Read a `lon, lat, <features...>` table.
///
/// Feature columns are the ones whose header contains `marker`. Other columns
/// are ignored. An empty body is an empty table.
pub fn read_feature_table<R: Read>(reader: R, marker: &str) -> Result<FeatureTable> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(FeatureTable::default());
    }

    let lon_idx = find_column(&headers, "lon").context("Column 'lon' not found")?;
    let lat_idx = find_column(&headers, "lat").context("Column 'lat' not found")?;
    let feature_idx = feature_columns(&headers, marker, &[lon_idx, lat_idx]);

    let mut table = FeatureTable::new(feature_idx.iter().map(|&i| headers[i].to_string()).collect());

    for (line, result) in csv_reader.records().enumerate() {
        let record = result?;
        let lon = parse_value(&record[lon_idx])?
            .with_context(|| format!("Row {} has no lon", line + 1))?;
        let lat = parse_value(&record[lat_idx])?
            .with_context(|| format!("Row {} has no lat", line + 1))?;
        let values = feature_idx
            .iter()
            .map(|&i| parse_value(record.get(i).unwrap_or("")))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Row {} has an invalid feature value", line + 1))?;
        table.rows.push(FeatureRow::new(lon, lat, values));
    }

    Ok(table)
}

/// Read a feature table from disk (`.csv` or `.csv.gz`)
pub fn read_feature_file(path: &Path, marker: &str) -> Result<FeatureTable> {
    let table = read_feature_table(open_input(path)?, marker)
        .with_context(|| format!("Failed to read feature table {}", path.display()))?;
    info!("Loaded {} feature rows from {}", table.len(), path.display());
    Ok(table)
}

/// Rows of a keyed sheet: key column plus feature columns
pub struct KeyedFeatures {
    pub columns: Vec<String>,
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

/// Read any sheet with a key column and marker-named feature columns
pub fn read_keyed_features(path: &Path, key_column: &str, marker: &str) -> Result<KeyedFeatures> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_input(path)?);
    let headers = csv_reader.headers()?.clone();
    let key_idx = headers
        .iter()
        .position(|h| h == key_column)
        .with_context(|| format!("Column '{}' not found in {}", key_column, path.display()))?;
    let feature_idx = feature_columns(&headers, marker, &[key_idx]);

    let mut rows = Vec::new();
    for (line, result) in csv_reader.records().enumerate() {
        let record = result?;
        let values = feature_idx
            .iter()
            .map(|&i| parse_value(record.get(i).unwrap_or("")))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Row {} of {} is invalid", line + 1, path.display()))?;
        rows.push((record[key_idx].to_string(), values));
    }

    Ok(KeyedFeatures {
        columns: feature_idx.iter().map(|&i| headers[i].to_string()).collect(),
        rows,
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn table_header(table: &FeatureTable) -> Vec<String> {
    let mut header = vec!["lon".to_string(), "lat".to_string()];
    header.extend(table.columns.iter().cloned());
    header
}

fn row_record(row: &FeatureRow) -> Vec<String> {
    let mut record = Vec::with_capacity(row.values.len() + 2);
    record.push(row.lon.to_string());
    record.push(row.lat.to_string());
    record.extend(row.values.iter().map(|v| format_value(*v)));
    record
}

/// Write a feature table, replacing the file
pub fn write_feature_table(path: &Path, table: &FeatureTable) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(table_header(table))?;
    for row in &table.rows {
        writer.write_record(row_record(row))?;
    }
    writer.flush()?;
    debug!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Append a feature table to a dump file.
///
/// The header is written only when the file is new or empty. Appends are not
/// atomic: a crash mid-write can leave a truncated last line.
pub fn append_feature_table(path: &Path, table: &FeatureTable) -> Result<()> {
    ensure_parent(path)?;
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if is_new && table.columns.is_empty() && table.is_empty() {
        return Ok(());
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for append", path.display()))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    if is_new {
        writer.write_record(table_header(table))?;
    }
    for row in &table.rows {
        writer.write_record(row_record(row))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the spatial join result, one row per matched point, indexed by key
pub fn write_joined(path: &Path, key_name: &str, joined: &JoinedTable) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![key_name.to_string(), "lon".to_string(), "lat".to_string()];
    header.extend(joined.columns.iter().cloned());
    writer.write_record(&header)?;

    for (key, rows) in &joined.groups {
        for row in rows {
            let mut record = vec![key.clone()];
            record.extend(row_record(row));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    info!(
        "Wrote {} joined rows for {} entities to {}",
        joined.row_count(),
        joined.groups.len(),
        path.display()
    );
    Ok(())
}

/// Write per-entity averages
pub fn write_aggregates(path: &Path, key_name: &str, table: &AggregateTable) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![key_name.to_string()];
    header.extend(table.columns.iter().cloned());
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.key.clone());
        record.extend(row.values.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("Averaged features saved to {}", path.display());
    Ok(())
}

/// Write the centroid merge: entity key, box extent and snapped centroid,
/// followed by the feature row found at that centroid
pub fn write_centroid_merge(
    path: &Path,
    key_name: &str,
    columns: &[String],
    rows: &[(&Entity, (f64, f64), &FeatureRow)],
) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header: Vec<String> = [key_name, "min_lat", "max_lat", "min_lon", "max_lon", "centroid_x", "centroid_y"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;

    for (entity, (cx, cy), row) in rows {
        let (min_lat, max_lat, min_lon, max_lon) = entity.bbox.lat_lon_extent();
        let mut record = vec![entity.key.clone()];
        record.extend([min_lat, max_lat, min_lon, max_lon, *cx, *cy].iter().map(|v| v.to_string()));
        record.extend(row.values.iter().map(|v| format_value(*v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("Wrote {} centroid rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write unresolved keys, one per line
pub fn write_unresolved<S: AsRef<str>>(path: &Path, keys: &[S]) -> Result<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let body = keys.iter().map(|k| k.as_ref()).collect::<Vec<_>>().join("\n");
    out.write_all(body.as_bytes())?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_feature_table() {
        let csv = "lon,lat,X_0,X_1,extra\n77.125,28.605,1.5,,a\n77.135,28.605,NaN,2,b\n";
        let table = read_feature_table(csv.as_bytes(), "X_").unwrap();
        assert_eq!(table.columns, vec!["X_0".to_string(), "X_1".to_string()]);
        assert_eq!(table.rows[0].values, vec![Some(1.5), None]);
        assert_eq!(table.rows[1].values, vec![None, Some(2.0)]);
        assert_eq!(table.rows[1].coords(), (77.135, 28.605));
    }

    #[test]
    fn test_empty_body_is_empty_table() {
        let table = read_feature_table("".as_bytes(), "X_").unwrap();
        assert!(table.is_empty());
        let table = read_feature_table("lon,lat,X_0\n".as_bytes(), "X_").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.width(), 1);
    }

    #[test]
    fn test_missing_lon_is_error() {
        assert!(read_feature_table("x,lat\n1,2\n".as_bytes(), "X_").is_err());
    }

    #[test]
    fn test_write_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/dump.csv");

        let mut first = FeatureTable::new(vec!["X_0".into()]);
        first.rows.push(FeatureRow::new(1.0, 2.0, vec![Some(3.0)]));
        let mut second = first.clone();
        second.rows[0] = FeatureRow::new(4.0, 5.0, vec![None]);

        append_feature_table(&path, &FeatureTable::default()).unwrap();
        append_feature_table(&path, &first).unwrap();
        append_feature_table(&path, &second).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "lon,lat,X_0\n1,2,3\n4,5,\n");

        let back = read_feature_file(&path, "X_").unwrap();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn test_write_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_queried.txt");
        write_unresolved(&path, &["a", "b"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb");
    }

    #[test]
    fn test_read_keyed_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.csv");
        fs::write(&path, "v_shp_id,lon,lat,X_0,X_1\nv1,1,2,1,2\nv1,1,3,3,\n").unwrap();
        let keyed = read_keyed_features(&path, "v_shp_id", "X_").unwrap();
        assert_eq!(keyed.columns, vec!["X_0".to_string(), "X_1".to_string()]);
        assert_eq!(keyed.rows[1], ("v1".to_string(), vec![Some(3.0), None]));
    }

    #[test]
    fn test_write_centroid_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.csv");
        let entity = crate::geometry::entity_from_literal("s1", "[(0, 0), (1, 0), (1, 2)]").unwrap();
        let row = FeatureRow::new(0.665, 0.665, vec![Some(1.5), None]);
        let columns = vec!["X_0".to_string(), "X_1".to_string()];

        write_centroid_merge(&path, "shrid2", &columns, &[(&entity, (0.665, 0.665), &row)]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "shrid2,min_lat,max_lat,min_lon,max_lon,centroid_x,centroid_y,X_0,X_1\ns1,0,2,0,1,0.665,0.665,1.5,\n"
        );
    }
}
