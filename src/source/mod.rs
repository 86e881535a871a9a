//! Remote feature table access.
//!
//! Pipeline stages take a [`FeatureSource`] explicitly so a run can point at
//! the hosted dataset ([`RedivisClient`]) or at rows already on disk
//! ([`MemorySource`]).

mod memory;
mod redivis;

pub use memory::MemorySource;
pub use redivis::{RedivisClient, DEFAULT_ENDPOINT};

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::QueryError;
use crate::models::{BoundingBox, FeatureTable};

/// Row filter for a single chunk query
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Coordinates inside a tile. `inclusive` keeps rows lying on the edges.
    Range { bounds: BoundingBox, inclusive: bool },
    /// Exact `(lon, lat)` matches, one disjunct per pair
    Points(Vec<(f64, f64)>),
}

impl Predicate {
    /// Render as a SQL boolean expression
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Range { bounds, inclusive } => {
                let (gt, lt) = if *inclusive { (">=", "<=") } else { (">", "<") };
                format!(
                    "lon {gt} {} AND lon {lt} {} AND lat {gt} {} AND lat {lt} {}",
                    bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat
                )
            }
            Predicate::Points(points) if points.is_empty() => "FALSE".to_string(),
            Predicate::Points(points) => points
                .iter()
                .map(|(x, y)| format!("(lon = {} AND lat = {})", x, y))
                .collect::<Vec<_>>()
                .join(" OR "),
        }
    }

    /// Evaluate the predicate locally
    pub fn matches(&self, lon: f64, lat: f64) -> bool {
        match self {
            Predicate::Range { bounds, inclusive: true } => bounds.contains_closed(lon, lat),
            Predicate::Range { bounds, inclusive: false } => bounds.contains_strict(lon, lat),
            Predicate::Points(points) => points.iter().any(|&(x, y)| x == lon && y == lat),
        }
    }
}

/// One chunk of work against a table
#[derive(Debug, Clone)]
pub struct ChunkQuery {
    pub table: String,
    pub predicate: Predicate,
    /// Human readable position, used in logs
    pub label: String,
}

impl ChunkQuery {
    pub fn new(table: &str, predicate: Predicate, label: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            predicate,
            label: label.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!("SELECT * FROM {} WHERE {}", self.table, self.predicate.to_sql())
    }
}

impl fmt::Display for ChunkQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Anything that can answer a chunk query with a feature table.
///
/// Queries are read-only, so a failed chunk can simply be issued again.
#[allow(async_fn_in_trait)]
pub trait FeatureSource {
    async fn fetch(&self, query: &ChunkQuery) -> Result<FeatureTable, QueryError>;
}

impl<S: FeatureSource> FeatureSource for &S {
    async fn fetch(&self, query: &ChunkQuery) -> Result<FeatureTable, QueryError> {
        (**self).fetch(query).await
    }
}

/// Bounded retry for a single chunk
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// Issue a chunk query, retrying up to `policy.max_attempts` times
pub async fn fetch_with_retry<S: FeatureSource>(
    source: &S,
    query: &ChunkQuery,
    policy: &RetryPolicy,
) -> Result<FeatureTable, QueryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match source.fetch(query).await {
            Ok(table) => {
                debug!("Chunk {} returned {} rows", query, table.len());
                return Ok(table);
            }
            Err(e) if attempts < max_attempts => {
                warn!(
                    "Query for chunk {} failed (attempt {}/{}): {}",
                    query, attempts, max_attempts, e
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pauses every `every` chunks to stay under the service's rate limit
#[derive(Debug, Clone)]
pub struct Throttle {
    every: usize,
    pause: Duration,
    issued: usize,
}

impl Throttle {
    pub fn new(every: usize, pause: Duration) -> Self {
        Self {
            every,
            pause,
            issued: 0,
        }
    }

    /// Record one issued chunk, sleeping if the cadence is reached
    pub async fn tick(&mut self) {
        self.issued += 1;
        if self.every > 0 && self.issued % self.every == 0 && !self.pause.is_zero() {
            debug!("Throttling for {:?} after {} chunks", self.pause, self.issued);
            tokio::time::sleep(self.pause).await;
        }
    }
}
