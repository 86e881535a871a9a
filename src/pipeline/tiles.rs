//! Tile the entities' total bounds, join the returned points to entities and
//! average per entity.

use anyhow::{Context, Result};
use tracing::info;

use super::ChunkRunner;
use crate::aggregate::{aggregate, AggregateTable};
use crate::chunk::plan_tiles;
use crate::config::Config;
use crate::geometry::total_bounds;
use crate::io::{write_aggregates, write_feature_table, write_joined};
use crate::merge::{merge_chunks, spatial_join, JoinedTable};
use crate::models::{BoundingBox, Entity, FeatureTable};
use crate::source::{ChunkQuery, FeatureSource, Predicate};

pub struct TilesOutput {
    pub chunks: usize,
    pub raw: FeatureTable,
    pub joined: JoinedTable,
    pub averages: AggregateTable,
}

/// Query every tile of `bounds` and merge the results.
///
/// Rows repeated across tile edges are dropped when `join.dedup` is set.
pub async fn fetch_tiles<S: FeatureSource>(
    config: &Config,
    source: &S,
    bounds: &BoundingBox,
) -> Result<(usize, FeatureTable)> {
    let plan = plan_tiles(bounds, config.chunking.tile_size)?;
    info!(
        "Planned {} x {} grid ({} tiles) over {:?}",
        plan.num_x,
        plan.num_y,
        plan.len(),
        bounds
    );

    let mut runner = ChunkRunner::new(config, plan.len())?;
    let mut tables = Vec::with_capacity(plan.len());
    for tile in &plan.tiles {
        let query = ChunkQuery::new(
            &config.dataset.table,
            Predicate::Range {
                bounds: tile.bounds,
                inclusive: config.chunking.inclusive_edges,
            },
            format!("tile ({}, {})", tile.i, tile.j),
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

    Ok((plan.len(), merge_chunks(tables, config.join.dedup, true)))
}

/// Run the tile pipeline and write the raw dump, the joined table and the averages
pub async fn run<S: FeatureSource>(
    config: &Config,
    entities: &[Entity],
    source: &S,
) -> Result<TilesOutput> {
    let bounds = total_bounds(entities).context("No entities to query")?;
    let (chunks, raw) = fetch_tiles(config, source, &bounds).await?;
    write_feature_table(&config.output.path("raw.csv"), &raw)?;

    let joined = spatial_join(entities, &raw, config.join.predicate);
    let key_name = &config.input.key_column;
    write_joined(&config.output.path("merged.csv"), key_name, &joined)?;

    let averages = aggregate(
        &joined.columns,
        &config.features.marker,
        joined.rows().map(|(key, row)| (key, row.values.as_slice())),
    );
    write_aggregates(&config.output.path("average.csv"), key_name, &averages)?;

    Ok(TilesOutput {
        chunks,
        raw,
        joined,
        averages,
    })
}
