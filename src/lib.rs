pub mod dataloader;
pub mod error;
pub mod execution;
pub mod export_store;
pub mod federation_gateway;
pub mod introspection;
pub mod query_executor;
pub mod query_planner;
pub mod request_context;
pub mod resolver;
pub mod response_path;
pub mod schema_registry;

pub use error::{FederationError, Result};
pub use federation_gateway::FederationGateway;
pub use query_executor::HttpQueryExecutor;
pub use schema_registry::InMemorySchemaRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote GraphQL service whose schema is stitched into the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        SourceConfig {
            name: name.into(),
            url: url.into(),
            timeout_secs: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}
