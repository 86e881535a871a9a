//! Entity (village / shrid) records with derived geometry.

use geo::{BoundingRect, Centroid, MultiPolygon};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in lon/lat degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Extent of a geometry, `None` when it has no coordinates
    pub fn of(geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry
            .bounding_rect()
            .map(|rect| Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }

    /// Smallest box covering every box in the iterator
    pub fn union_all<'a, I>(boxes: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        boxes.into_iter().fold(None, |acc, b| {
            Some(match acc {
                None => *b,
                Some(a) => Self::new(
                    a.min_lon.min(b.min_lon),
                    a.min_lat.min(b.min_lat),
                    a.max_lon.max(b.max_lon),
                    a.max_lat.max(b.max_lat),
                ),
            })
        })
    }

    /// Grow the box by `pad` degrees on every side
    pub fn padded(&self, pad: f64) -> Self {
        Self::new(
            self.min_lon - pad,
            self.min_lat - pad,
            self.max_lon + pad,
            self.max_lat + pad,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Strict containment: points on the edge are outside.
    pub fn contains_strict(&self, lon: f64, lat: f64) -> bool {
        lon > self.min_lon && lon < self.max_lon && lat > self.min_lat && lat < self.max_lat
    }

    /// Closed containment, edges included.
    pub fn contains_closed(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// `(min_lat, max_lat, min_lon, max_lon)`, the column order used in entity sheets
    pub fn lat_lon_extent(&self) -> (f64, f64, f64, f64) {
        (self.min_lat, self.max_lat, self.min_lon, self.max_lon)
    }

    pub fn is_finite(&self) -> bool {
        self.min_lon.is_finite()
            && self.min_lat.is_finite()
            && self.max_lon.is_finite()
            && self.max_lat.is_finite()
    }
}

/// A spatial unit identified by a unique key
#[derive(Debug, Clone)]
pub struct Entity {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    pub bbox: BoundingBox,
    /// Area centroid `(lon, lat)` before snapping
    pub centroid: Option<(f64, f64)>,
}

impl Entity {
    /// Build an entity and derive its bounding box and centroid.
    ///
    /// Returns `None` for geometries without any coordinates.
    pub fn new(key: impl Into<String>, geometry: MultiPolygon<f64>) -> Option<Self> {
        let bbox = BoundingBox::of(&geometry)?;
        let centroid = geometry.centroid().map(|p| (p.x(), p.y()));
        Some(Self {
            key: key.into(),
            geometry,
            bbox,
            centroid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    #[test]
    fn test_entity_derives_bbox_and_centroid() {
        let poly = polygon![
            (x: 77.0, y: 28.0),
            (x: 77.2, y: 28.0),
            (x: 77.2, y: 28.4),
            (x: 77.0, y: 28.4),
        ];
        let entity = Entity::new("s1", MultiPolygon::new(vec![poly])).unwrap();

        assert_eq!(entity.bbox.lat_lon_extent(), (28.0, 28.4, 77.0, 77.2));
        let (cx, cy) = entity.centroid.unwrap();
        assert!((cx - 77.1).abs() < 1e-9);
        assert!((cy - 28.2).abs() < 1e-9);
    }

    #[test]
    fn test_union_and_padding() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(2.0, -1.0, 3.0, 0.5);
        let total = BoundingBox::union_all([&a, &b]).unwrap();
        assert_eq!(total, BoundingBox::new(0.0, -1.0, 3.0, 1.0));

        let padded = total.padded(0.5);
        assert_eq!(padded, BoundingBox::new(-0.5, -1.5, 3.5, 1.5));
        assert!(BoundingBox::union_all(std::iter::empty()).is_none());
    }

    #[test]
    fn test_strict_containment_excludes_edges() {
        let b = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(b.contains_strict(0.5, 0.5));
        assert!(!b.contains_strict(0.0, 0.5));
        assert!(!b.contains_strict(0.5, 1.0));
        assert!(b.contains_closed(0.0, 1.0));
    }
}
