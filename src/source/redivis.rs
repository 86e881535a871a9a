//! Client for the hosted MOSAIKS table on Redivis.
//!
//! A chunk query is submitted as SQL, polled until it settles, and its rows
//! downloaded as CSV.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{ChunkQuery, FeatureSource};
use crate::error::QueryError;
use crate::io::read_feature_table;
use crate::models::FeatureTable;

pub const DEFAULT_ENDPOINT: &str = "https://redivis.com/api/v1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    query: &'a str,
    /// `owner.dataset` that bare table names resolve against
    #[serde(skip_serializing_if = "Option::is_none")]
    default_dataset: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStatus {
    id: String,
    status: String,
    error_message: Option<String>,
}

/// Remote feature source backed by the Redivis query API
pub struct RedivisClient {
    client: Client,
    endpoint: Url,
    dataset: Option<String>,
    token: Option<String>,
    marker: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl RedivisClient {
    /// `endpoint` is the API base, e.g. [`DEFAULT_ENDPOINT`]; `dataset` is the
    /// `owner.dataset` reference queries run against.
    pub fn new(
        endpoint: &str,
        dataset: Option<String>,
        token: Option<String>,
        marker: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, QueryError> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| QueryError::Decode(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let client = Client::builder()
            .user_agent("mosaiks/0.1 (feature retrieval)")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            dataset,
            token,
            marker: marker.to_string(),
            poll_interval,
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, QueryError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| QueryError::Decode(format!("invalid URL for '{}': {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, QueryError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(QueryError::Status { status, body })
    }

    fn submit_body<'a>(&'a self, sql: &'a str) -> SubmitRequest<'a> {
        SubmitRequest {
            query: sql,
            default_dataset: self.dataset.as_deref(),
        }
    }

    async fn submit(&self, sql: &str) -> Result<QueryStatus, QueryError> {
        let request = self
            .client
            .post(self.url("queries")?)
            .json(&self.submit_body(sql));
        let response = Self::check(self.authorized(request).send().await?).await?;
        response.json().await.map_err(QueryError::Http)
    }

    async fn status(&self, id: &str) -> Result<QueryStatus, QueryError> {
        let request = self.client.get(self.url(&format!("queries/{}", id))?);
        let response = Self::check(self.authorized(request).send().await?).await?;
        response.json().await.map_err(QueryError::Http)
    }

    /// Poll until the query completes, fails or runs past the timeout
    async fn wait(&self, mut status: QueryStatus) -> Result<String, QueryError> {
        let started = Instant::now();
        loop {
            match status.status.as_str() {
                "completed" => return Ok(status.id),
                "failed" | "cancelled" => {
                    return Err(QueryError::Failed {
                        message: status
                            .error_message
                            .unwrap_or_else(|| status.status.clone()),
                        id: status.id,
                    })
                }
                other => debug!("Query {} is {}", status.id, other),
            }

            if started.elapsed() >= self.timeout {
                return Err(QueryError::Timeout {
                    id: status.id,
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            status = self.status(&status.id).await?;
        }
    }

    async fn rows(&self, id: &str) -> Result<FeatureTable, QueryError> {
        let mut url = self.url(&format!("queries/{}/rows", id))?;
        url.query_pairs_mut().append_pair("format", "csv");

        let response = Self::check(self.authorized(self.client.get(url)).send().await?).await?;
        let body = response.bytes().await?;
        read_feature_table(body.as_ref(), &self.marker)
            .map_err(|e| QueryError::Decode(format!("{:#}", e)))
    }
}

impl FeatureSource for RedivisClient {
    async fn fetch(&self, query: &ChunkQuery) -> Result<FeatureTable, QueryError> {
        let sql = query.to_sql();
        debug!("Submitting query for chunk {}: {} bytes of SQL", query, sql.len());

        let submitted = self.submit(&sql).await?;
        let id = self.wait(submitted).await?;
        let table = self.rows(&id).await?;

        info!("Chunk {} returned {} rows", query, table.len());
        Ok(table)
    }
}
