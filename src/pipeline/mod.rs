//! Pipeline stages wired from the library pieces.
//!
//! Every stage takes its [`FeatureSource`] explicitly and issues chunk
//! queries strictly one at a time.

pub mod average;
pub mod centroid;
pub mod combine;
pub mod dump;
pub mod exact;
pub mod prepare;
pub mod tiles;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::error::QueryError;
use crate::models::FeatureTable;
use crate::source::{fetch_with_retry, ChunkQuery, FeatureSource, RetryPolicy, Throttle};

/// Issues chunk queries in order with retry, throttling and a progress bar
pub struct ChunkRunner {
    retry: RetryPolicy,
    throttle: Throttle,
    progress: ProgressBar,
    total: usize,
    issued: usize,
}

impl ChunkRunner {
    pub fn new(config: &Config, total: usize) -> Result<Self> {
        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                )?
                .progress_chars("#>-"),
        );

        Ok(Self {
            retry: config.dataset.retry_policy(),
            throttle: Throttle::new(config.chunking.throttle_every, config.chunking.throttle_pause()),
            progress,
            total,
            issued: 0,
        })
    }

    pub async fn run<S: FeatureSource>(
        &mut self,
        source: &S,
        query: &ChunkQuery,
    ) -> Result<FeatureTable, QueryError> {
        self.issued += 1;
        info!("Processing chunk {} of {} ({})", self.issued, self.total, query);

        let result = fetch_with_retry(source, query, &self.retry).await;
        self.progress.inc(1);
        self.throttle.tick().await;
        result
    }

    pub fn finish(&self) {
        self.progress.finish_with_message("Queries complete");
    }

    pub fn abandon(&self) {
        self.progress.abandon_with_message("Query failed");
    }
}
