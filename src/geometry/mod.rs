//! Geometry normalization: polygon literals, bounding boxes and centroid snapping.

mod literal;

pub use literal::{parse_polygon, parse_ring};

use crate::error::GeometryError;
use crate::models::{BoundingBox, Entity};

/// Resolution of the MOSAIKS sampling grid, in degrees
pub const GRID_RESOLUTION: f64 = 0.01;

fn truncate(value: f64, decimals: i32) -> f64 {
    let multiplier = 10f64.powi(decimals);
    (value * multiplier).trunc() / multiplier
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let multiplier = 10f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

/// Snap a coordinate to the centre of its 0.01° grid cell.
///
/// Truncates toward zero at 2 decimals, offsets by half a cell away from zero
/// and rounds to 3 decimals: `77.1234 -> 77.125`, `-3.456 -> -3.455`.
pub fn snap_to_grid(value: f64) -> f64 {
    let offset = GRID_RESOLUTION / 2.0;
    let base = truncate(value, 2);
    let snapped = if value.is_sign_negative() {
        base - offset
    } else {
        base + offset
    };
    round_to(snapped, 3)
}

/// Snapped `(lon, lat)` centroid for an entity
pub fn snapped_centroid(entity: &Entity) -> Option<(f64, f64)> {
    entity
        .centroid
        .map(|(x, y)| (snap_to_grid(x), snap_to_grid(y)))
}

/// Parse a polygon literal and derive the entity record
pub fn entity_from_literal(key: &str, literal: &str) -> Result<Entity, GeometryError> {
    let geometry = parse_polygon(key, literal)?;
    Entity::new(key, geometry).ok_or_else(|| GeometryError::Empty(key.to_string()))
}

/// Total extent of all entity boxes
pub fn total_bounds(entities: &[Entity]) -> Option<BoundingBox> {
    BoundingBox::union_all(entities.iter().map(|e| &e.bbox))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_positive() {
        assert_eq!(snap_to_grid(77.1234), 77.125);
        assert_eq!(snap_to_grid(28.6), 28.605);
        assert_eq!(snap_to_grid(28.0), 28.005);
    }

    #[test]
    fn test_snap_negative_stays_in_cell() {
        assert_eq!(snap_to_grid(-3.456), -3.455);
        assert_eq!(snap_to_grid(-0.001), -0.005);
    }

    #[test]
    fn test_snap_idempotent() {
        for v in [
            77.1234, 28.6, 0.0, 0.0049, 12.999, -3.456, -179.99, 89.995, 8.125, 80.0051,
        ] {
            let once = snap_to_grid(v);
            assert_eq!(snap_to_grid(once), once, "snap not idempotent for {}", v);
        }
    }

    #[test]
    fn test_entity_from_literal() {
        let e = entity_from_literal(
            "s1",
            "[(77.1, 28.4), (77.146, 28.4), (77.146, 28.512), (77.1, 28.512)]",
        )
        .unwrap();
        assert_eq!(e.bbox, BoundingBox::new(77.1, 28.4, 77.146, 28.512));
        let (x, y) = snapped_centroid(&e).unwrap();
        assert_eq!((x, y), (77.125, 28.455));
    }

    #[test]
    fn test_total_bounds() {
        let a = entity_from_literal("a", "[(0, 0), (1, 0), (1, 1)]").unwrap();
        let b = entity_from_literal("b", "[(2, 2), (3, 2), (3, 4)]").unwrap();
        assert_eq!(
            total_bounds(&[a, b]),
            Some(BoundingBox::new(0.0, 0.0, 3.0, 4.0))
        );
        assert_eq!(total_bounds(&[]), None);
    }
}
