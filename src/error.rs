use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while provisioning sources or resolving federated fields.
///
/// Errors are `Clone` because a single failed upstream call is reported to
/// every field that was batched into it.
#[derive(Debug, Clone, Error)]
pub enum FederationError {
    #[error("failed to fetch schema of source '{source_name}': {message}")]
    SchemaFetch {
        source_name: String,
        message: String,
    },

    #[error("type '{type_name}' of kind {kind} is not supported")]
    UnsupportedKind { type_name: String, kind: String },

    #[error("failed to compile query for field '{field}': {message}")]
    QueryCompile { field: String, message: String },

    #[error("request to source '{source_name}' failed: {message}")]
    UpstreamTransport {
        source_name: String,
        message: String,
    },

    /// The `errors` list of one upstream response, shared by every field of
    /// the batch that received it.
    #[error("source '{source_name}' returned {} error(s)", errors.len())]
    UpstreamGraphQL {
        source_name: String,
        errors: Arc<Vec<Value>>,
    },

    #[error("request to source '{source_name}' was cancelled")]
    Cancelled { source_name: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Request(String),
}

impl FederationError {
    pub(crate) fn compile(field: &str, message: impl Into<String>) -> Self {
        FederationError::QueryCompile {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn transport(source_name: &str, message: impl ToString) -> Self {
        FederationError::UpstreamTransport {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Converts the error into entries of a GraphQL `errors` list.
    ///
    /// Upstream GraphQL errors are re-surfaced verbatim, everything else
    /// becomes a single entry carrying `path` when one is given.
    pub fn to_graphql_errors(&self, path: Option<Value>) -> Vec<Value> {
        match self {
            FederationError::UpstreamGraphQL { errors, .. } => errors.as_ref().clone(),
            other => {
                let mut error = json!({ "message": other.to_string() });
                if let Some(path) = path {
                    error["path"] = path;
                }
                vec![error]
            }
        }
    }
}

pub type Result<T, E = FederationError> = std::result::Result<T, E>;
