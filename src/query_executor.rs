use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::SourceConfig;
use crate::error::{FederationError, Result};

/// Body of a GraphQL-over-HTTP request sent to a source.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub query: String,
    pub variables: Map<String, Value>,
}

/// Sends one request to a source and returns the decoded response body.
///
/// Implementations report transport problems (connection errors, non-2xx
/// status, undecodable bodies) as `UpstreamTransport`. GraphQL `errors` in a
/// decodable body are left for the caller to interpret.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, source: &SourceConfig, request: &UpstreamRequest) -> Result<Value>;
}

pub struct HttpQueryExecutor {
    client: reqwest::Client,
}

impl Default for HttpQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpQueryExecutor {
    pub fn new() -> Self {
        HttpQueryExecutor {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpQueryExecutor { client }
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, source: &SourceConfig, request: &UpstreamRequest) -> Result<Value> {
        let mut builder = self
            .client
            .post(&source.url)
            .header(CONTENT_TYPE, "application/json")
            .json(request);
        if let Some(timeout) = source.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FederationError::transport(&source.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FederationError::transport(
                &source.name,
                format!("HTTP status {}", status),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            FederationError::transport(&source.name, format!("failed to parse response: {}", e))
        })
    }
}
