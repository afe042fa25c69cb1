use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{collections::BTreeMap, fs, path::Path, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    GraphQLRequest, SourceConfig,
    error::{FederationError, Result},
    execution::execute_request,
    query_executor::QueryExecutor,
    schema_registry::{RemoteTypeRegistry, SchemaRegistry, fetch_and_build_types},
};

/// Gateway configuration file.
///
/// ```yaml
/// request_timeout_secs: 30
/// sources:
///   books:
///     url: http://localhost:4001/graphql
///     timeout_secs: 5
/// ```
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl GatewayConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| FederationError::Config(format!("failed to parse config file: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "reading gateway config");
        let contents = fs::read_to_string(path).map_err(|e| {
            FederationError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn source_configs(&self) -> Vec<SourceConfig> {
        self.sources
            .iter()
            .map(|(name, entry)| SourceConfig {
                name: name.clone(),
                url: entry.url.clone(),
                timeout_secs: entry.timeout_secs,
            })
            .collect()
    }
}

pub struct FederationGateway {
    schema_registry: Arc<RwLock<Box<dyn SchemaRegistry + Send + Sync>>>,
    query_executor: Arc<dyn QueryExecutor>,
    request_timeout: Option<Duration>,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Box<dyn SchemaRegistry + Send + Sync>,
        query_executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        FederationGateway {
            schema_registry: Arc::new(RwLock::new(schema_registry)),
            query_executor,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Executes a client request against every registered source.
    ///
    /// Field errors are part of the returned response. When the request
    /// timeout elapses, every upstream call still in flight is cancelled.
    pub async fn process_request(&self, request: GraphQLRequest) -> Result<Value> {
        tracing::debug!(operation = ?request.operation_name, "processing request");

        let schema = self.schema_registry.read().await.get_schema().await?;

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let execution = execute_request(
            &schema,
            Arc::clone(&self.query_executor),
            &request,
            cancel.clone(),
        );

        match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(timeout = ?timeout, "request timed out");
                    cancel.cancel();
                    Err(FederationError::Timeout(timeout))
                }
            },
            None => execution.await,
        }
    }

    pub async fn register_source(
        &self,
        source: SourceConfig,
        registry: RemoteTypeRegistry,
    ) -> Result<()> {
        let mut schema_registry = self.schema_registry.write().await;
        schema_registry.register_source(source, registry).await
    }

    /// Introspects `source` and stitches its root fields into the schema.
    pub async fn provision_source(&self, source: SourceConfig) -> Result<()> {
        let registry = self.fetch_source(&source).await?;
        self.register_source(source, registry).await
    }

    async fn fetch_source(&self, source: &SourceConfig) -> Result<RemoteTypeRegistry> {
        tracing::info!(source = %source.name, url = %source.url, "provisioning source");
        fetch_and_build_types(self.query_executor.as_ref(), source).await
    }

    /// Provisions every source of the config file at `path`. Sources are
    /// introspected concurrently and any failure aborts the whole load.
    pub async fn load_sources(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let config = GatewayConfig::from_file(path)?;
        if let Some(secs) = config.request_timeout_secs {
            self.request_timeout = Some(Duration::from_secs(secs));
        }

        let sources = config.source_configs();
        let registries =
            try_join_all(sources.iter().map(|source| self.fetch_source(source))).await?;
        for (source, registry) in sources.into_iter().zip(registries) {
            self.register_source(source, registry).await?;
        }

        tracing::info!(sources = config.sources.len(), "sources provisioned");
        Ok(())
    }
}

/// Response body for a request that could not be executed at all.
pub fn error_response(error: &FederationError) -> Value {
    json!({ "data": null, "errors": error.to_graphql_errors(None) })
}
