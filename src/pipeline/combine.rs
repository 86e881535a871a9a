//! Combine dump files into one sorted, deduplicated table.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::io::{collect_table_files, read_feature_file, write_feature_table};
use crate::merge::merge_chunks;
use crate::models::FeatureTable;

/// Read every dump under `inputs` (files, or directories of `.csv`/`.csv.gz`)
/// and merge them, sorted by `(lon, lat)` with repeats removed.
pub fn load_dumps(inputs: &[PathBuf], marker: &str) -> Result<FeatureTable> {
    let files = collect_table_files(inputs)?;
    if files.is_empty() {
        anyhow::bail!("No dump files found");
    }
    info!("Combining {} dump files", files.len());

    let tables = files
        .iter()
        .map(|f| read_feature_file(f, marker))
        .collect::<Result<Vec<_>>>()?;
    Ok(merge_chunks(tables, true, true))
}

pub fn run(inputs: &[PathBuf], marker: &str, out: &Path) -> Result<FeatureTable> {
    let combined = load_dumps(inputs, marker)?;
    write_feature_table(out, &combined)?;
    info!("Combined {} rows into {}", combined.len(), out.display());
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_combine_sorts_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let dumps = dir.path().join("dumps");
        fs::create_dir(&dumps).unwrap();
        fs::write(dumps.join("a.csv"), "lon,lat,X_0\n2,1,5\n1,1,4\n").unwrap();
        fs::write(dumps.join("b.csv"), "lon,lat,X_0\n1,1,4\n0,3,\n").unwrap();

        let out = dir.path().join("combined.csv");
        let combined = run(&[dumps], "X_", &out).unwrap();
        assert_eq!(combined.len(), 3);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "lon,lat,X_0\n0,3,\n1,1,4\n2,1,5\n"
        );
    }

    #[test]
    fn test_no_inputs_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dumps(&[dir.path().to_path_buf()], "X_").is_err());
    }
}
