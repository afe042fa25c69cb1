use futures::FutureExt;
use graphql_parser::query::Field;
use std::sync::Arc;

use crate::SourceConfig;
use crate::dataloader::DeferredValue;
use crate::query_planner::{FieldQueryPlanner, Fragments};
use crate::request_context::RequestContext;
use crate::response_path::ResponsePath;
use crate::schema_registry::{RemoteTypeRegistry, TypeId};

/// The client field being resolved, with its position in the response.
pub struct FieldInfo<'q, 'a> {
    pub field: &'q Field<'a, String>,
    pub path: ResponsePath,
    pub fragments: &'q Fragments<'a>,
}

/// Resolves root fields of one source by delegating them to the source.
#[derive(Clone)]
pub struct RemoteResolver {
    source: SourceConfig,
    registry: Arc<RemoteTypeRegistry>,
    root_type: TypeId,
}

impl RemoteResolver {
    pub fn new(source: SourceConfig, registry: Arc<RemoteTypeRegistry>, root_type: TypeId) -> Self {
        RemoteResolver {
            source,
            registry,
            root_type,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Compiles the field and queues it on the source's dispatcher.
    ///
    /// Never waits on the source. A compile failure is returned as an
    /// already-failed deferred value.
    pub fn resolve(&self, ctx: &RequestContext, info: &FieldInfo<'_, '_>) -> DeferredValue {
        let planner =
            FieldQueryPlanner::new(&self.registry, &ctx.exports, &ctx.operation, info.fragments);

        match planner.plan_field(info.field, Some(self.root_type), &info.path) {
            Ok(key) => ctx.dispatcher(&self.source).load(key),
            Err(err) => futures::future::ready(Err(err)).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FederationError, Result};
    use crate::query_executor::{QueryExecutor, UpstreamRequest};
    use crate::request_context::OperationInfo;
    use crate::schema_registry::tests::library_registry;
    use async_trait::async_trait;
    use graphql_parser::query::{Definition, OperationDefinition, Selection, parse_query};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, Value, json};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingExecutor {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _source: &SourceConfig,
            request: &UpstreamRequest,
        ) -> Result<Value> {
            self.queries.lock().push(request.query.clone());
            Ok(json!({ "data": { "book": { "title": "Dune" } } }))
        }
    }

    fn root_fields(
        document: &graphql_parser::query::Document<'static, String>,
    ) -> Vec<Field<'static, String>> {
        let Definition::Operation(OperationDefinition::SelectionSet(selection_set)) =
            &document.definitions[0]
        else {
            panic!("expected a shorthand query");
        };
        selection_set
            .items
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => field.clone(),
                _ => panic!("expected fields"),
            })
            .collect()
    }

    #[tokio::test]
    async fn delegates_to_the_source() {
        let registry = Arc::new(library_registry("svc"));
        let source = SourceConfig::new("svc", "http://svc");
        let resolver =
            RemoteResolver::new(source, Arc::clone(&registry), registry.query_type().unwrap());

        let executor = Arc::new(RecordingExecutor::default());
        let ctx = RequestContext::new(
            OperationInfo::query(),
            Map::new(),
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            CancellationToken::new(),
        );
        let document = parse_query::<String>(r#"{ svc_book(id: "42") { title } }"#).unwrap();
        let fields = root_fields(&document);
        let fragments = Fragments::new();

        let value = resolver
            .resolve(
                &ctx,
                &FieldInfo {
                    field: &fields[0],
                    path: ResponsePath::root().with_key("svc_book"),
                    fragments: &fragments,
                },
            )
            .await
            .unwrap();

        assert_eq!(value, json!({ "title": "Dune" }));
        assert_eq!(
            executor.queries.lock().clone(),
            vec![r#"query { book(id: "42") { title } }"#.to_string()]
        );
    }

    #[tokio::test]
    async fn compile_errors_fail_without_a_request() {
        let registry = Arc::new(library_registry("svc"));
        let resolver = RemoteResolver::new(
            SourceConfig::new("svc", "http://svc"),
            Arc::clone(&registry),
            registry.query_type().unwrap(),
        );

        let executor = Arc::new(RecordingExecutor::default());
        let ctx = RequestContext::new(
            OperationInfo::query(),
            Map::new(),
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            CancellationToken::new(),
        );
        let document = parse_query::<String>("{ svc_book { ...Missing } }").unwrap();
        let fields = root_fields(&document);
        let fragments = Fragments::new();

        let result = resolver
            .resolve(
                &ctx,
                &FieldInfo {
                    field: &fields[0],
                    path: ResponsePath::root().with_key("svc_book"),
                    fragments: &fragments,
                },
            )
            .await;

        assert!(matches!(result, Err(FederationError::QueryCompile { .. })));
        assert!(executor.queries.lock().is_empty());
    }
}
