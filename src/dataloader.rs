//! Per-request, per-source batching of federated field queries.
//!
//! Every `load` issued before a deferred value of the batch is forced joins
//! the same batch. A deferred value yields once on its first poll, so keys
//! queued by futures polled in the same pass still make it in. It then drains
//! the queue and sends a single request to the source from the polling task,
//! handing each caller the entry of the response keyed by its alias.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::SourceConfig;
use crate::error::{FederationError, Result};
use crate::query_executor::{QueryExecutor, UpstreamRequest};
use crate::query_planner::{FieldQuery, InjectedVariable};
use crate::request_context::OperationInfo;

/// A value that resolves once the batch holding its key has been flushed.
pub type DeferredValue = BoxFuture<'static, Result<Value>>;

struct PendingLoad {
    key: FieldQuery,
    waiters: Vec<oneshot::Sender<Result<Value>>>,
}

#[derive(Default)]
struct Batch {
    pending: Vec<PendingLoad>,
}

pub struct Dispatcher {
    source: SourceConfig,
    executor: Arc<dyn QueryExecutor>,
    operation: Arc<OperationInfo>,
    variables: Arc<Map<String, Value>>,
    cancel: CancellationToken,
    batch: Mutex<Batch>,
}

impl Dispatcher {
    pub fn new(
        source: SourceConfig,
        executor: Arc<dyn QueryExecutor>,
        operation: Arc<OperationInfo>,
        variables: Arc<Map<String, Value>>,
        cancel: CancellationToken,
    ) -> Self {
        Dispatcher {
            source,
            executor,
            operation,
            variables,
            cancel,
            batch: Mutex::new(Batch::default()),
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Queues `key` and returns immediately. Identical keys share one slot.
    ///
    /// Nothing is sent until one of the returned values is polled. No task
    /// is spawned, so the batch only depends on the order the caller polls in.
    pub fn load(self: &Arc<Self>, key: FieldQuery) -> DeferredValue {
        let (sender, receiver) = oneshot::channel();
        {
            let mut batch = self.batch.lock();
            match batch.pending.iter_mut().find(|p| p.key == key) {
                Some(pending) => pending.waiters.push(sender),
                None => batch.pending.push(PendingLoad {
                    key,
                    waiters: vec![sender],
                }),
            }
        }

        let dispatcher = Arc::clone(self);
        async move {
            tokio::task::yield_now().await;
            dispatcher.flush().await;
            receiver.await.unwrap_or(Err(FederationError::Cancelled {
                source_name: dispatcher.source.name.clone(),
            }))
        }
        .boxed()
    }

    /// Sends every queued key to the source in one request. Does nothing
    /// when the queue has already been drained.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut self.batch.lock().pending);
        if pending.is_empty() {
            return;
        }

        let pending = unique_aliases(pending);
        let request = build_batch_request(
            &self.source.name,
            &self.operation,
            &self.variables,
            pending.iter().map(|p| &p.key),
        );
        tracing::debug!(
            source = %self.source.name,
            fields = pending.len(),
            query = %request.query,
            "dispatching batch"
        );

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FederationError::Cancelled {
                source_name: self.source.name.clone(),
            }),
            result = self.executor.execute(&self.source, &request) => result,
        };

        match result.and_then(|body| response_data(&self.source.name, body)) {
            Ok(data) => {
                for load in pending {
                    let value = data.get(&load.key.alias).cloned().unwrap_or(Value::Null);
                    for waiter in load.waiters {
                        let _ = waiter.send(Ok(value.clone()));
                    }
                }
            }
            Err(err) => {
                tracing::debug!(source = %self.source.name, error = %err, "batch failed");
                for waiter in pending.into_iter().flat_map(|p| p.waiters) {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

// Keys are matched back to callers by alias only, so two different keys must
// never share one.
fn unique_aliases(pending: Vec<PendingLoad>) -> Vec<PendingLoad> {
    let mut seen = HashSet::new();
    pending
        .into_iter()
        .map(|mut load| {
            if !seen.insert(load.key.alias.clone()) {
                let mut hasher = Sha256::new();
                hasher.update(load.key.body.as_bytes());
                for (name, injected) in &load.key.injected_variables {
                    hasher.update(name.as_bytes());
                    hasher.update(injected.value.to_string().as_bytes());
                }
                let digest = hex::encode(hasher.finalize());
                let mut alias = format!("{}_{}", load.key.alias, &digest[..8]);
                let mut n = 0;
                while !seen.insert(alias.clone()) {
                    n += 1;
                    alias = format!("{}_{}_{}", load.key.alias, &digest[..8], n);
                }
                load.key.alias = alias;
            }
            load
        })
        .collect()
}

/// Builds the single upstream request of a batch.
///
/// Only client variables that are declared and used by at least one key or by
/// the operation's own directives are forwarded; each injected variable is
/// declared and sent once.
pub fn build_batch_request<'k>(
    source: &str,
    operation: &OperationInfo,
    variables: &Map<String, Value>,
    keys: impl Iterator<Item = &'k FieldQuery>,
) -> UpstreamRequest {
    let mut used: BTreeSet<&str> = operation
        .directive_variables
        .iter()
        .map(String::as_str)
        .collect();
    let mut injected: BTreeMap<&str, &InjectedVariable> = BTreeMap::new();
    let mut fragments = Vec::new();

    for key in keys {
        used.extend(key.used_variables.iter().map(String::as_str));
        injected.extend(
            key.injected_variables
                .iter()
                .map(|(name, variable)| (name.as_str(), variable)),
        );
        fragments.push(key.fragment());
    }

    let mut declarations = Vec::new();
    let mut outbound = Map::new();
    for declaration in operation.variables.iter().filter(|d| used.contains(d.name.as_str())) {
        declarations.push(declaration.upstream(source));
        if let Some(value) = variables.get(&declaration.name) {
            outbound.insert(declaration.name.clone(), value.clone());
        }
    }
    for (name, variable) in injected {
        declarations.push(format!("${}: {}", name, variable.var_type));
        outbound.insert(name.to_string(), variable.value.clone());
    }

    let mut query = operation.kind.as_str().to_string();
    if let Some(name) = &operation.name {
        query.push(' ');
        query.push_str(name);
    }
    if !declarations.is_empty() {
        query.push('(');
        query.push_str(&declarations.join(", "));
        query.push(')');
    }
    if !operation.directives.is_empty() {
        query.push(' ');
        query.push_str(&operation.directives);
    }
    query.push_str(" { ");
    query.push_str(&fragments.join(" "));
    query.push_str(" }");

    UpstreamRequest {
        query,
        variables: outbound,
    }
}

/// Extracts `data` from a source response, failing on GraphQL errors.
fn response_data(source: &str, body: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut body) = body else {
        return Err(FederationError::transport(source, "response is not a JSON object"));
    };

    if let Some(Value::Array(errors)) = body.remove("errors") {
        if !errors.is_empty() {
            return Err(FederationError::UpstreamGraphQL {
                source_name: source.to_string(),
                errors: Arc::new(errors),
            });
        }
    }

    match body.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        _ => Ok(Map::new()),
    }
}
