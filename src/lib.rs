//! Mosaiks - MOSAIKS feature retrieval for village and shrid polygons
//!
//! This library provides the shared pipeline stages used by the `fetch` and
//! `average` binaries: geometry normalization, chunk planning, remote queries,
//! result merging and per-entity aggregation.

pub mod aggregate;
pub mod chunk;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod state;

pub use error::{ChunkError, GeometryError, QueryError, UnresolvedKey};
pub use models::{BoundingBox, Entity, FeatureRow, FeatureTable};
pub use source::{ChunkQuery, FeatureSource, MemorySource, Predicate, RedivisClient};
