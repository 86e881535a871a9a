//! File formats: entity sheets and shapefiles, feature tables, coordinate
//! sheets and the unresolved-key report.

pub mod coords;
pub mod entities;
pub mod table;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use walkdir::WalkDir;

pub use coords::CoordSheet;
pub use entities::{load_entities, load_entity_csv, load_entity_shapefile};
pub use table::{
    append_feature_table, read_feature_file, read_feature_table, read_keyed_features,
    write_aggregates, write_centroid_merge, write_feature_table, write_joined, write_unresolved,
};

/// Open a file for reading, transparently decompressing `.gz`
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

fn is_table_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.ends_with(".csv") || name.ends_with(".csv.gz")
}

/// Expand inputs into table files: files are kept as given, directories
/// contribute every `.csv` / `.csv.gz` below them in name order.
pub fn collect_table_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_table_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            files.append(&mut found);
        } else if input.exists() {
            files.push(input.clone());
        } else {
            anyhow::bail!("Input {} does not exist", input.display());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_collect_table_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("chunks");
        std::fs::create_dir(&nested).unwrap();
        for name in ["b.csv", "a.csv", "notes.txt"] {
            File::create(nested.join(name)).unwrap();
        }
        let single = dir.path().join("extra.csv.gz");
        File::create(&single).unwrap();

        let files = collect_table_files(&[nested.clone(), single.clone()]).unwrap();
        assert_eq!(files, vec![nested.join("a.csv"), nested.join("b.csv"), single]);

        assert!(collect_table_files(&[dir.path().join("missing.csv")]).is_err());
    }

    #[test]
    fn test_open_gzip_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv.gz");
        let mut enc = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(b"lon,lat\n1,2\n").unwrap();
        enc.finish().unwrap();

        let mut text = String::new();
        open_input(&path).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "lon,lat\n1,2\n");
    }
}
