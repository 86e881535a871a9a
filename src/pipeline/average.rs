//! Average a merged table by its key column.

use std::path::Path;

use anyhow::Result;

use crate::aggregate::{aggregate, AggregateTable};
use crate::io::{read_keyed_features, write_aggregates};

pub fn run(input: &Path, key_column: &str, marker: &str, out: &Path) -> Result<AggregateTable> {
    let keyed = read_keyed_features(input, key_column, marker)?;
    let averages = aggregate(
        &keyed.columns,
        marker,
        keyed.rows.iter().map(|(k, v)| (k.as_str(), v.as_slice())),
    );
    write_aggregates(out, key_column, &averages)?;
    Ok(averages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_average_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("merged.csv");
        fs::write(
            &input,
            "v_shp_id,lon,lat,X_0,X_1,X_2\nv1,1,1,1,2,3\nv1,2,1,3,4,5\nv2,5,5,,,\nv2,6,5,4,4,4\n",
        )
        .unwrap();
        let out = dir.path().join("mosaiks_average.csv");

        let averages = run(&input, "v_shp_id", "X_", &out).unwrap();
        assert_eq!(averages.len(), 2);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "v_shp_id,X_0,X_1,X_2\nv1,2,3,4\nv2,2,2,2\n"
        );
    }
}
