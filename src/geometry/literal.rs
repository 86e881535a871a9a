//! Decoder for polygon coordinate literals stored in entity sheets.
//!
//! Sheets store rings as a Python-style literal such as
//! `[(77.1, 28.6), (77.2, 28.6), (77.2, 28.7)]`. The text is decoded as data
//! only: brackets and parentheses are both accepted as sequence delimiters and
//! everything else must be a number, otherwise the literal is rejected.

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::error::GeometryError;

/// Decode a ring literal into `(lon, lat)` vertices
pub fn parse_ring(key: &str, literal: &str) -> Result<Vec<(f64, f64)>, GeometryError> {
    let normalized: String = literal
        .trim()
        .chars()
        .map(|c| match c {
            '(' => '[',
            ')' => ']',
            other => other,
        })
        .collect();

    if normalized.is_empty() {
        return Err(GeometryError::Empty(key.to_string()));
    }

    let pairs: Vec<[f64; 2]> = serde_json::from_str(&normalized)
        .map_err(|e| GeometryError::malformed(key, format!("not a list of (lon, lat) pairs: {}", e)))?;

    if pairs.len() < 3 {
        return Err(GeometryError::malformed(
            key,
            format!("a polygon needs at least 3 vertices, got {}", pairs.len()),
        ));
    }

    if let Some(bad) = pairs.iter().find(|[x, y]| !x.is_finite() || !y.is_finite()) {
        return Err(GeometryError::malformed(
            key,
            format!("non-finite vertex ({}, {})", bad[0], bad[1]),
        ));
    }

    Ok(pairs.into_iter().map(|[x, y]| (x, y)).collect())
}

/// Decode a ring literal into a single-polygon geometry, closing the ring
pub fn parse_polygon(key: &str, literal: &str) -> Result<MultiPolygon<f64>, GeometryError> {
    let mut ring: Vec<Coord<f64>> = parse_ring(key, literal)?
        .into_iter()
        .map(|(x, y)| Coord { x, y })
        .collect();

    // Close the ring if needed
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }

    Ok(MultiPolygon::new(vec![Polygon::new(
        LineString::new(ring),
        vec![],
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tuple_literal() {
        let ring = parse_ring("a", "[(77.1, 28.6), (77.2, 28.6), (77.2, 28.7)]").unwrap();
        assert_eq!(ring, vec![(77.1, 28.6), (77.2, 28.6), (77.2, 28.7)]);
    }

    #[test]
    fn test_parse_nested_list_literal() {
        let ring = parse_ring("a", " [[1, 2], [3, 4], [5, -6.5]] ").unwrap();
        assert_eq!(ring, vec![(1.0, 2.0), (3.0, 4.0), (5.0, -6.5)]);
    }

    #[test]
    fn test_polygon_is_closed() {
        let mp = parse_polygon("a", "[(0, 0), (1, 0), (1, 1)]").unwrap();
        let exterior = mp.0[0].exterior();
        assert_eq!(exterior.0.len(), 4);
        assert_eq!(exterior.0.first(), exterior.0.last());
    }

    #[test]
    fn test_rejects_code() {
        let err = parse_ring("evil", "__import__('os').system('ls')").unwrap_err();
        assert!(matches!(err, GeometryError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_short_and_ragged() {
        assert!(parse_ring("a", "[(0, 0), (1, 1)]").is_err());
        assert!(parse_ring("a", "[(0, 0, 3), (1, 1), (2, 2)]").is_err());
        assert!(parse_ring("a", "[(0, 'x'), (1, 1), (2, 2)]").is_err());
        assert!(matches!(parse_ring("a", "  "), Err(GeometryError::Empty(_))));
    }
}
