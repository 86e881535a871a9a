//! Fill a coordinate sheet with the feature rows found at its exact
//! `(lon, lat)` pairs.
//!
//! Progress is checkpointed twice: in the run state, and in the sheet's
//! `queried` column. A failed query saves both before the run stops.

use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::HashSet;
use tracing::{info, warn};

use super::ChunkRunner;
use crate::chunk::plan_batches;
use crate::config::Config;
use crate::error::UnresolvedKey;
use crate::io::{write_unresolved, CoordSheet};
use crate::merge::SortedIndex;
use crate::source::{ChunkQuery, FeatureSource, Predicate};
use crate::state::{KeyStatus, RunState};

#[derive(Debug, Default)]
pub struct ExactOutput {
    pub chunks: usize,
    pub resolved: usize,
    /// Rows already filled in by an earlier run
    pub skipped: usize,
    pub unresolved: Vec<UnresolvedKey>,
}

struct PendingRow {
    row: usize,
    key: String,
    lon: f64,
    lat: f64,
}

/// Map each sheet feature column to its position in `columns`
fn align(sheet_columns: &[String], columns: &[String]) -> Vec<Option<usize>> {
    sheet_columns
        .iter()
        .map(|c| columns.iter().position(|t| t == c))
        .collect()
}

fn save_progress(
    config: &Config,
    sheet: &CoordSheet,
    sheet_out: &Path,
    state: &RunState,
    unresolved: &[UnresolvedKey],
) -> Result<()> {
    state.flush()?;
    sheet.save(sheet_out)?;
    let keys: Vec<&str> = unresolved.iter().map(|u| u.key.as_str()).collect();
    write_unresolved(&config.output.path("not_queried.txt"), &keys)
}

/// Resolve every pending row of `sheet`, then save it to `sheet_out`.
pub async fn run<S: FeatureSource>(
    config: &Config,
    sheet: &mut CoordSheet,
    sheet_out: &Path,
    state: &RunState,
    source: &S,
) -> Result<ExactOutput> {
    let marker = &config.features.marker;
    sheet.ensure_queried_column();
    let added = sheet.ensure_feature_columns(marker, config.features.width);
    if added > 0 {
        info!("Added {} feature columns to the coordinate sheet", added);
    }

    let sheet_columns: Vec<String> = sheet.feature_columns().into_iter().map(String::from).collect();
    let positions = sheet.column_positions(&sheet_columns);

    let mut output = ExactOutput::default();
    let mut pending = Vec::new();
    for row in 0..sheet.len() {
        if sheet.is_queried(row) {
            output.skipped += 1;
            continue;
        }
        let key = sheet.key(row)?;
        match state.get(&key)? {
            Some(record) if record.status == KeyStatus::Resolved => {
                sheet.fill(row, &positions, &record.values);
                output.skipped += 1;
            }
            _ => {
                let (lon, lat) = sheet.coords(row)?;
                pending.push(PendingRow { row, key, lon, lat });
            }
        }
    }
    info!(
        "{} rows already resolved, {} pending",
        output.skipped,
        pending.len()
    );

    let batches = plan_batches(pending.len(), config.chunking.exact_batch_size)?;
    output.chunks = batches.len();
    let mut runner = ChunkRunner::new(config, batches.len())?;

    for (n, range) in batches.iter().enumerate() {
        let batch = &pending[range.clone()];
        let mut seen = HashSet::new();
        let points: Vec<(f64, f64)> = batch
            .iter()
            .map(|p| (p.lon, p.lat))
            .filter(|(x, y)| seen.insert((x.to_bits(), y.to_bits())))
            .collect();
        let query = ChunkQuery::new(
            &config.dataset.table,
            Predicate::Points(points),
            format!("batch {} (rows {}..{})", n + 1, range.start, range.end),
        );

        let table = match runner.run(source, &query).await {
            Ok(table) => table,
            Err(e) => {
                runner.abandon();
                for p in batch {
                    state.mark_failed(&p.key)?;
                }
                // Report the failed batch alongside the keys that had no match
                output.unresolved.extend(batch.iter().map(|p| UnresolvedKey {
                    key: p.key.clone(),
                    lon: p.lon,
                    lat: p.lat,
                }));
                save_progress(config, sheet, sheet_out, state, &output.unresolved)?;
                return Err(e).with_context(|| format!("Query for {} failed", query));
            }
        };

        let index = SortedIndex::build(table);
        let mapping = align(&sheet_columns, index.columns());
        for p in batch {
            match index.lookup(p.lon, p.lat) {
                Some(found) => {
                    let values: Vec<Option<f64>> = mapping
                        .iter()
                        .map(|m| m.and_then(|i| found.values.get(i).copied().flatten()))
                        .collect();
                    sheet.fill(p.row, &positions, &values);
                    state.mark_resolved(&p.key, &values)?;
                    output.resolved += 1;
                }
                None => {
                    state.mark_failed(&p.key)?;
                    output.unresolved.push(UnresolvedKey {
                        key: p.key.clone(),
                        lon: p.lon,
                        lat: p.lat,
                    });
                }
            }
        }
        state.flush()?;
    }
    runner.finish();

    if !output.unresolved.is_empty() {
        warn!("{} coordinates had no exact match", output.unresolved.len());
    }
    save_progress(config, sheet, sheet_out, state, &output.unresolved)?;
    info!(
        "Resolved {} coordinates, {} unresolved",
        output.resolved,
        output.unresolved.len()
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureRow, FeatureTable};
    use crate::source::MemorySource;
    use crate::QueryError;
    use std::fs;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.output.dir = dir.join("out");
        config.features.width = 2;
        config.chunking.exact_batch_size = 2;
        config.chunking.throttle_secs = 0;
        config.dataset.retry_delay_secs = 0;
        config
    }

    fn features() -> FeatureTable {
        let mut t = FeatureTable::new(vec!["X_0".into(), "X_1".into()]);
        t.rows.push(FeatureRow::new(77.125, 28.605, vec![Some(1.0), Some(2.0)]));
        t.rows.push(FeatureRow::new(77.135, 28.605, vec![Some(3.0), None]));
        t.rows.push(FeatureRow::new(77.145, 28.605, vec![Some(5.0), Some(6.0)]));
        t
    }

    fn write_sheet(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("coords.csv");
        fs::write(
            &path,
            "Lon,Lat\n77.125,28.605\n77.135,28.605\n77.145,28.605\n1.005,1.005\n",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_fills_sheet_and_reports_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = write_sheet(dir.path());
        let state = RunState::open(&dir.path().join("state")).unwrap();
        let source = MemorySource::new(features());

        let mut sheet = CoordSheet::load(&path, "Lon", "Lat", None, "X_").unwrap();
        let out = run(&config, &mut sheet, &path, &state, &source).await.unwrap();

        assert_eq!(out.chunks, 2);
        assert_eq!(out.resolved, 3);
        assert_eq!(out.unresolved.len(), 1);
        assert_eq!(out.unresolved[0].key, "(1.005, 1.005)");

        let saved = CoordSheet::load(&path, "Lon", "Lat", None, "X_").unwrap();
        assert!(saved.is_queried(0));
        assert_eq!(saved.features(1).unwrap(), vec![Some(3.0), None]);
        assert!(!saved.is_queried(3));
        assert_eq!(
            fs::read_to_string(config.output.path("not_queried.txt")).unwrap(),
            "(1.005, 1.005)"
        );

        // A second run only retries the unresolved row
        let mut sheet = saved;
        let out = run(&config, &mut sheet, &path, &state, &source).await.unwrap();
        assert_eq!(out.skipped, 3);
        assert_eq!(out.chunks, 1);
        assert_eq!(source.queries(), 3);
    }

    #[tokio::test]
    async fn test_resolved_state_fills_unqueried_row() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = dir.path().join("coords.csv");
        fs::write(&path, "Lon,Lat\n77.125,28.605\n77.135,28.605\n").unwrap();

        let state = RunState::open(&dir.path().join("state")).unwrap();
        state.mark_resolved("(77.125, 28.605)", &[Some(9.0), Some(8.0)]).unwrap();
        let source = MemorySource::new(features());

        let mut sheet = CoordSheet::load(&path, "Lon", "Lat", None, "X_").unwrap();
        let out = run(&config, &mut sheet, &path, &state, &source).await.unwrap();

        assert_eq!(out.skipped, 1);
        assert_eq!(out.resolved, 1);
        assert_eq!(source.queries(), 1);

        let saved = CoordSheet::load(&path, "Lon", "Lat", None, "X_").unwrap();
        assert!(saved.is_queried(0));
        // Values come from the run state, not from the source's (1, 2)
        assert_eq!(saved.features(0).unwrap(), vec![Some(9.0), Some(8.0)]);
        assert_eq!(saved.features(1).unwrap(), vec![Some(3.0), None]);
    }

    struct Broken;

    impl FeatureSource for Broken {
        async fn fetch(&self, query: &ChunkQuery) -> Result<FeatureTable, QueryError> {
            Err(QueryError::Failed {
                id: query.label.clone(),
                message: "service unavailable".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_query_failure_saves_progress() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = write_sheet(dir.path());
        let state = RunState::open(&dir.path().join("state")).unwrap();

        let mut sheet = CoordSheet::load(&path, "Lon", "Lat", None, "X_").unwrap();
        let result = run(&config, &mut sheet, &path, &state, &Broken).await;
        assert!(result.is_err());

        assert_eq!(state.status("(77.125, 28.605)").unwrap(), KeyStatus::Failed);
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.starts_with("Lon,Lat,queried,X_0,X_1\n"));
        let report = fs::read_to_string(config.output.path("not_queried.txt")).unwrap();
        assert_eq!(report, "(77.125, 28.605)\n(77.135, 28.605)");
    }
}
