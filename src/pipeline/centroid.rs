//! Query each entity's snapped centroid and merge the matching feature row
//! back onto the entity.

use anyhow::{Context, Result};
use hashbrown::HashSet;
use tracing::{info, warn};

use super::ChunkRunner;
use crate::chunk::plan_batches;
use crate::config::Config;
use crate::error::UnresolvedKey;
use crate::geometry::snapped_centroid;
use crate::io::{write_centroid_merge, write_feature_table, write_unresolved};
use crate::merge::{merge_chunks, SortedIndex};
use crate::models::Entity;
use crate::source::{ChunkQuery, FeatureSource, Predicate};

pub struct CentroidOutput {
    pub chunks: usize,
    pub matched: usize,
    pub unresolved: Vec<UnresolvedKey>,
}

pub async fn run<S: FeatureSource>(
    config: &Config,
    entities: &[Entity],
    source: &S,
) -> Result<CentroidOutput> {
    let mut targets: Vec<(&Entity, (f64, f64))> = Vec::with_capacity(entities.len());
    for entity in entities {
        match snapped_centroid(entity) {
            Some(c) => targets.push((entity, c)),
            None => warn!("Entity '{}' has no centroid, skipping", entity.key),
        }
    }

    // Neighbouring small entities often snap to the same cell
    let mut seen = HashSet::new();
    let points: Vec<(f64, f64)> = targets
        .iter()
        .map(|&(_, c)| c)
        .filter(|(x, y)| seen.insert((x.to_bits(), y.to_bits())))
        .collect();
    info!(
        "{} entities snap to {} distinct grid points",
        targets.len(),
        points.len()
    );

    let batches = plan_batches(points.len(), config.chunking.centroid_batch_size)?;
    let mut runner = ChunkRunner::new(config, batches.len())?;
    let mut tables = Vec::with_capacity(batches.len());
    for (n, range) in batches.iter().enumerate() {
        let query = ChunkQuery::new(
            &config.dataset.table,
            Predicate::Points(points[range.clone()].to_vec()),
            format!("batch {} (rows {}..{})", n + 1, range.start, range.end),
        );
        match runner.run(source, &query).await {
            Ok(table) => tables.push(table),
            Err(e) => {
                runner.abandon();
                return Err(e).with_context(|| format!("Query for {} failed", query));
            }
        }
    }
    runner.finish();

    let raw = merge_chunks(tables, true, true);
    write_feature_table(&config.output.path("raw.csv"), &raw)?;

    let index = SortedIndex::build(raw);
    let mut merged = Vec::with_capacity(targets.len());
    let mut unresolved = Vec::new();
    for &(entity, (x, y)) in &targets {
        match index.lookup(x, y) {
            Some(row) => merged.push((entity, (x, y), row)),
            None => unresolved.push(UnresolvedKey {
                key: entity.key.clone(),
                lon: x,
                lat: y,
            }),
        }
    }

    write_centroid_merge(
        &config.output.path("merged.csv"),
        &config.input.key_column,
        index.columns(),
        &merged,
    )?;

    if !unresolved.is_empty() {
        warn!("{} entities had no feature row at their centroid", unresolved.len());
    }
    let keys: Vec<&str> = unresolved.iter().map(|u| u.key.as_str()).collect();
    write_unresolved(&config.output.path("not_queried.txt"), &keys)?;

    Ok(CentroidOutput {
        chunks: batches.len(),
        matched: merged.len(),
        unresolved,
    })
}
