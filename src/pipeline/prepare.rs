//! Prepare a coordinate sheet for exact-match runs.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::io::CoordSheet;

/// Add the `queried` column and `<marker>0..<marker>{width-1}` feature
/// columns where missing, saving to `out` (in place when `None`).
pub fn run(
    path: &Path,
    lon_column: &str,
    lat_column: &str,
    marker: &str,
    width: usize,
    out: Option<&Path>,
) -> Result<CoordSheet> {
    let mut sheet = CoordSheet::load(path, lon_column, lat_column, None, marker)?;
    let queried = sheet.ensure_queried_column();
    let added = sheet.ensure_feature_columns(marker, width);
    info!(
        "Added {} feature columns{}",
        added,
        if queried { " and the queried column" } else { "" }
    );
    sheet.save(out.unwrap_or(path))?;
    Ok(sheet)
}
