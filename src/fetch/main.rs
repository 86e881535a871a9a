//! MOSAIKS feature retrieval.
//!
//! Plans chunked queries against the hosted feature table, merges the
//! results and writes per-entity outputs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mosaiks::config::{Config, Mode};
use mosaiks::geometry::total_bounds;
use mosaiks::io::{load_entities, CoordSheet};
use mosaiks::pipeline::{centroid, combine, dump, exact, prepare, tiles};
use mosaiks::source::{FeatureSource, MemorySource, RedivisClient};
use mosaiks::state::RunState;

#[derive(Parser, Debug)]
#[command(name = "fetch")]
#[command(about = "Retrieve MOSAIKS features for polygons and coordinates")]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (overrides the config)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured pipeline
    Run {
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Entity sheet or shapefile
        #[arg(long)]
        entities: Option<PathBuf>,

        /// Coordinate sheet (exact mode)
        #[arg(long)]
        coords: Option<PathBuf>,
    },

    /// Dump every feature row inside the entities' padded bounds
    Dump {
        #[arg(long)]
        entities: Option<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,

        /// Resume from this tile
        #[arg(long, default_value = "0")]
        start_x: usize,

        #[arg(long, default_value = "0")]
        start_y: usize,
    },

    /// Combine dump files into one sorted, deduplicated CSV
    Combine {
        /// Dump files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Add the queried and feature columns to a coordinate sheet
    Prepare {
        path: PathBuf,

        /// Write here instead of in place
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }

    match args.command {
        Command::Run {
            mode,
            entities,
            coords,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if entities.is_some() {
                config.input.entities = entities;
            }
            if coords.is_some() {
                config.input.coords = coords;
            }
            info!("MOSAIKS fetch ({:?} mode)", config.mode);

            if config.dataset.local_dumps.is_empty() {
                let source = remote_source(&config)?;
                run_pipeline(&config, &source).await
            } else {
                let table = combine::load_dumps(&config.dataset.local_dumps, &config.features.marker)?;
                let source = MemorySource::new(table);
                run_pipeline(&config, &source).await
            }
        }
        Command::Dump {
            entities,
            out,
            start_x,
            start_y,
        } => {
            if entities.is_some() {
                config.input.entities = entities;
            }
            let entities = load_configured_entities(&config)?;
            let bounds = total_bounds(&entities).context("No entities to query")?;
            let source = remote_source(&config)?;
            dump::run(&config, &bounds, &source, &out, (start_x, start_y)).await?;
            Ok(())
        }
        Command::Combine { inputs, out } => {
            combine::run(&inputs, &config.features.marker, &out)?;
            Ok(())
        }
        Command::Prepare { path, out } => {
            prepare::run(
                &path,
                &config.input.lon_column,
                &config.input.lat_column,
                &config.features.marker,
                config.features.width,
                out.as_deref(),
            )?;
            Ok(())
        }
    }
}

fn remote_source(config: &Config) -> Result<RedivisClient> {
    let dataset = &config.dataset;
    let token = dataset.token();
    if token.is_none() {
        info!("{} is not set; querying without a token", dataset.token_env);
    }
    RedivisClient::new(
        &dataset.endpoint,
        dataset.dataset_reference(),
        token,
        &config.features.marker,
        Duration::from_millis(dataset.poll_interval_ms),
        Duration::from_secs(dataset.timeout_secs),
    )
    .context("Failed to create query client")
}

fn load_configured_entities(config: &Config) -> Result<Vec<mosaiks::Entity>> {
    let path = config
        .input
        .entities
        .as_deref()
        .context("No entity file configured (input.entities or --entities)")?;
    load_entities(path, &config.input.key_column, &config.input.polygon_column)
}

async fn run_pipeline<S: FeatureSource>(config: &Config, source: &S) -> Result<()> {
    match config.mode {
        Mode::Tiles => {
            let entities = load_configured_entities(config)?;
            let out = tiles::run(config, &entities, source).await?;
            info!(
                "Done: {} chunks, {} rows, {} entities averaged",
                out.chunks,
                out.raw.len(),
                out.averages.len()
            );
        }
        Mode::Centroid => {
            let entities = load_configured_entities(config)?;
            let out = centroid::run(config, &entities, source).await?;
            info!(
                "Done: {} chunks, {} matched, {} unresolved",
                out.chunks,
                out.matched,
                out.unresolved.len()
            );
        }
        Mode::Exact => {
            let path = config
                .input
                .coords
                .as_deref()
                .context("No coordinate sheet configured (input.coords or --coords)")?;
            run_exact(config, path, source).await?;
        }
    }
    Ok(())
}

async fn run_exact<S: FeatureSource>(config: &Config, path: &Path, source: &S) -> Result<()> {
    let state = RunState::open(&config.state.dir)?;
    let mut sheet = CoordSheet::load(
        path,
        &config.input.lon_column,
        &config.input.lat_column,
        config.input.coord_key_column.as_deref(),
        &config.features.marker,
    )?;
    state.check_input(&path.display().to_string(), sheet.fingerprint())?;

    let out = exact::run(config, &mut sheet, path, &state, source).await?;
    let counts = state.counts()?;
    info!(
        "Done: {} resolved this run, {} skipped, {} unresolved ({} resolved overall)",
        out.resolved,
        out.skipped,
        out.unresolved.len(),
        counts.resolved
    );
    Ok(())
}
