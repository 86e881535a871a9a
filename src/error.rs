//! Typed errors for the library layers.
//!
//! Pipeline steps and binaries wrap these in `anyhow` with context.

use std::fmt;

/// A polygon literal or geometry that cannot be turned into a usable polygon.
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("Malformed geometry for '{key}': {reason}")]
    Malformed { key: String, reason: String },

    #[error("Empty geometry for '{0}'")]
    Empty(String),
}

impl GeometryError {
    pub fn malformed(key: &str, reason: impl fmt::Display) -> Self {
        Self::Malformed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single remote chunk query.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Query service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Query {id} failed: {message}")]
    Failed { id: String, message: String },

    #[error("Query {id} did not complete within {secs}s")]
    Timeout { id: String, secs: u64 },

    #[error("Failed to decode query result: {0}")]
    Decode(String),
}

/// Invalid input to the chunk planner.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ChunkError {
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("Tile size must be positive and finite, got {0}")]
    InvalidTileSize(f64),

    #[error("Bounding box is not finite")]
    NonFiniteBounds,
}

/// An entity whose coordinate had no exact match in the feature table.
///
/// Non-fatal: these are collected into the unresolved report.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedKey {
    pub key: String,
    pub lon: f64,
    pub lat: f64,
}

impl fmt::Display for UnresolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No feature row at ({}, {}) for '{}'", self.lon, self.lat, self.key)
    }
}

impl std::error::Error for UnresolvedKey {}
