//! Average merged MOSAIKS features per entity.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mosaiks::pipeline::average;

#[derive(Parser, Debug)]
#[command(name = "average")]
#[command(about = "Average feature columns of a merged table by entity key")]
struct Args {
    /// Merged CSV (one row per joined point)
    #[arg(short, long)]
    file: PathBuf,

    /// Entity key column
    #[arg(long, default_value = "v_shp_id")]
    key: String,

    /// Feature column marker
    #[arg(long, default_value = "X_")]
    marker: String,

    /// Output prefix; writes `<prefix>average.csv`
    #[arg(long, default_value = "mosaiks_")]
    prefix: String,

    /// Output directory
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let out = args.output_dir.join(format!("{}average.csv", args.prefix));

    let averages = average::run(&args.file, &args.key, &args.marker, &out)?;
    info!("Averaged {} entities into {}", averages.len(), out.display());
    Ok(())
}
