//! Spatial join of feature points against entity geometries.

use geo::{Contains, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use tracing::{debug, info};

use super::JoinedTable;
use crate::models::{Entity, FeatureTable};

/// Containment test used by the spatial join
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPredicate {
    /// Point strictly inside the entity's bounding box. Boxes of neighbouring
    /// entities overlap, so a point can join several entities.
    #[default]
    BoundingBox,
    /// Point strictly inside the entity's polygon
    Polygon,
}

/// Wrapper for R-tree indexing of entity boxes
struct IndexedEntity {
    idx: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEntity {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over entity bounding boxes
pub struct EntityIndex<'a> {
    tree: RTree<IndexedEntity>,
    entities: &'a [Entity],
}

impl<'a> EntityIndex<'a> {
    /// Build spatial index from entities
    pub fn build(entities: &'a [Entity]) -> Self {
        info!("Building spatial index for {} entities...", entities.len());

        let indexed: Vec<IndexedEntity> = entities
            .iter()
            .enumerate()
            .map(|(idx, e)| IndexedEntity {
                idx,
                envelope: AABB::from_corners(
                    [e.bbox.min_lon, e.bbox.min_lat],
                    [e.bbox.max_lon, e.bbox.max_lat],
                ),
            })
            .collect();

        let tree = RTree::bulk_load(indexed);
        info!("Spatial index built with {} entries", tree.size());

        Self { tree, entities }
    }

    /// All entities containing the point under `predicate`, in input order
    pub fn lookup(&self, lon: f64, lat: f64, predicate: JoinPredicate) -> Vec<&'a Entity> {
        let point = Point::new(lon, lat);
        let query_envelope = AABB::from_point([lon, lat]);

        // R-tree candidates by envelope, then the strict containment test
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_envelope)
            .map(|ie| ie.idx)
            .filter(|&idx| {
                let entity = &self.entities[idx];
                match predicate {
                    JoinPredicate::BoundingBox => entity.bbox.contains_strict(lon, lat),
                    JoinPredicate::Polygon => entity.geometry.contains(&point),
                }
            })
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|idx| &self.entities[idx]).collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Inner-join feature points to entities.
///
/// Points outside every entity are dropped; points inside several entities
/// are kept once per entity. Groups are sorted by `(lon, lat)`.
pub fn spatial_join(entities: &[Entity], table: &FeatureTable, predicate: JoinPredicate) -> JoinedTable {
    let index = EntityIndex::build(entities);
    let mut joined = JoinedTable::new(table.columns.clone());
    let mut unmatched = 0usize;
    let mut multi = 0usize;

    for row in &table.rows {
        let hits = index.lookup(row.lon, row.lat, predicate);
        match hits.len() {
            0 => unmatched += 1,
            1 => {}
            _ => multi += 1,
        }
        for entity in hits {
            joined.push(&entity.key, row.clone());
        }
    }

    joined.sort_groups();

    debug!("{} points fell outside every entity", unmatched);
    if multi > 0 {
        info!(
            "{} points matched more than one entity ({:?} predicate)",
            multi, predicate
        );
    }
    info!(
        "Joined {} of {} points to {} entities",
        table.len() - unmatched,
        table.len(),
        joined.groups.len()
    );

    joined
}
