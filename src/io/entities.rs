//! Entity loading from polygon sheets and shapefiles.

use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use hashbrown::HashSet;
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Reader, Shape};
use tracing::{info, warn};

use super::open_input;
use crate::geometry::entity_from_literal;
use crate::models::Entity;

fn check_unique(entities: &[Entity]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entities.len());
    for e in entities {
        if !seen.insert(e.key.as_str()) {
            anyhow::bail!("Duplicate entity key '{}'", e.key);
        }
    }
    Ok(())
}

/// Load entities from a CSV sheet with a key column and a polygon literal column.
///
/// Any malformed polygon aborts the load.
pub fn load_entity_csv(path: &Path, key_column: &str, polygon_column: &str) -> Result<Vec<Entity>> {
    info!("Loading entities from {}", path.display());

    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_input(path)?);
    let headers = csv_reader.headers()?.clone();

    let key_idx = headers
        .iter()
        .position(|h| h == key_column)
        .with_context(|| format!("Column '{}' not found", key_column))?;
    let polygon_idx = headers
        .iter()
        .position(|h| h == polygon_column)
        .with_context(|| format!("Column '{}' not found", polygon_column))?;

    let mut entities = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        let key = record[key_idx].trim();
        let entity = entity_from_literal(key, &record[polygon_idx])?;
        entities.push(entity);
    }

    check_unique(&entities)?;
    info!("Loaded {} entities", entities.len());
    Ok(entities)
}

fn field_to_key(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
        FieldValue::Numeric(Some(n)) => Some(n.to_string()),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Double(d) => Some(d.to_string()),
        FieldValue::Float(Some(f)) => Some(f.to_string()),
        _ => None,
    }
}

fn ring_coords(points: &[shapefile::Point]) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    if coords.first() != coords.last() {
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
    }
    LineString::new(coords)
}

/// Convert shapefile rings: each outer ring opens a polygon, inner rings
/// attach to the most recent one.
fn shape_to_geometry(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for ring in polygon.rings() {
        match ring {
            PolygonRing::Outer(points) => polygons.push((ring_coords(points), Vec::new())),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(ring_coords(points)),
                None => polygons.push((ring_coords(points), Vec::new())),
            },
        }
    }
    MultiPolygon::new(
        polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

/// Load entities from a polygon shapefile keyed by an attribute field
pub fn load_entity_shapefile(path: &Path, key_field: &str) -> Result<Vec<Entity>> {
    info!("Loading entities from shapefile {}", path.display());

    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut entities = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record): (Shape, Record) = result.context("Error reading shape+record")?;
        let key = record
            .get(key_field)
            .and_then(field_to_key)
            .with_context(|| format!("Missing or invalid key field '{}'", key_field))?;

        let geometry = match shape {
            Shape::Polygon(p) => shape_to_geometry(&p),
            Shape::NullShape => {
                warn!("Entity '{}' has no geometry, skipping", key);
                continue;
            }
            other => anyhow::bail!(
                "Entity '{}' has unsupported shape type {:?}",
                key,
                other.shapetype()
            ),
        };

        match Entity::new(key.clone(), geometry) {
            Some(entity) => entities.push(entity),
            None => warn!("Entity '{}' has an empty polygon, skipping", key),
        }
    }

    check_unique(&entities)?;
    info!("Loaded {} entities", entities.len());
    Ok(entities)
}

/// Load entities from either a `.shp` file or a polygon CSV sheet
pub fn load_entities(path: &Path, key_column: &str, polygon_column: &str) -> Result<Vec<Entity>> {
    let is_shapefile = path
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("shp"));
    if is_shapefile {
        load_entity_shapefile(path, key_column)
    } else {
        load_entity_csv(path, key_column, polygon_column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use std::fs;

    #[test]
    fn test_load_entity_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrids.csv");
        fs::write(
            &path,
            "shrid2,polygon_coordinates\n\
             s1,\"[(0, 0), (1, 0), (1, 1), (0, 1)]\"\n\
             s2,\"[(2, 2), (3, 2), (3, 3)]\"\n",
        )
        .unwrap();

        let entities = load_entities(&path, "shrid2", "polygon_coordinates").unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[1].key, "s2");
        assert_eq!(entities[1].bbox.max_lat, 3.0);
    }

    #[test]
    fn test_malformed_polygon_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(
            &path,
            "shrid2,polygon_coordinates\ns1,\"[(0, 0), (1, 0), (1, 1)]\"\ns2,\"open('x')\"\n",
        )
        .unwrap();

        let err = load_entity_csv(&path, "shrid2", "polygon_coordinates").unwrap_err();
        assert!(err.downcast_ref::<GeometryError>().is_some());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(
            &path,
            "shrid2,polygon_coordinates\ns1,\"[(0, 0), (1, 0), (1, 1)]\"\ns1,\"[(0, 0), (2, 0), (2, 2)]\"\n",
        )
        .unwrap();
        assert!(load_entity_csv(&path, "shrid2", "polygon_coordinates").is_err());
    }

    #[test]
    fn test_shape_rings_to_geometry() {
        use shapefile::Point;
        let outer = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 4.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 0.0),
        ];
        let hole = vec![
            Point::new(1.0, 1.0),
            Point::new(2.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(1.0, 1.0),
        ];
        let polygon = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(outer),
            PolygonRing::Inner(hole),
        ]);
        let mp = shape_to_geometry(&polygon);
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_field_to_key() {
        assert_eq!(field_to_key(&FieldValue::Numeric(Some(123.0))).as_deref(), Some("123"));
        assert_eq!(field_to_key(&FieldValue::Numeric(Some(12.5))).as_deref(), Some("12.5"));
        assert_eq!(
            field_to_key(&FieldValue::Character(Some(" 11-123 ".into()))).as_deref(),
            Some("11-123")
        );
        assert_eq!(field_to_key(&FieldValue::Integer(42)).as_deref(), Some("42"));
        assert_eq!(field_to_key(&FieldValue::Character(None)), None);
        assert_eq!(field_to_key(&FieldValue::Numeric(None)), None);
        assert_eq!(field_to_key(&FieldValue::Logical(Some(true))), None);
    }
}
