//! Core data models for the feature pipeline.

pub mod entity;
pub mod feature;

pub use entity::{BoundingBox, Entity};
pub use feature::{cmp_coords, FeatureRow, FeatureTable};
