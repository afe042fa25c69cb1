//! Executes a client operation against the federated root types.
//!
//! Root fields are delegated through their resolvers. Everything below a
//! root field is completed from the upstream value by walking the client's
//! selection set, except `_join` selections which run root fields again with
//! the exports captured by their enclosing object.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use graphql_parser::query::{
    Definition, Directive, Document, Field, OperationDefinition, Selection, SelectionSet, Value,
    VariableDefinition, parse_query,
};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::GraphQLRequest;
use crate::dataloader::DeferredValue;
use crate::error::{FederationError, Result};
use crate::query_executor::QueryExecutor;
use crate::query_planner::Fragments;
use crate::request_context::{OperationInfo, OperationKind, RequestContext};
use crate::resolver::FieldInfo;
use crate::response_path::ResponsePath;
use crate::schema_registry::{FederatedSchema, JOIN_FIELD, RootType};

const TYPENAME_FIELD: &str = "__typename";

type FieldGroup<'q, 'a> = (String, Vec<&'q Field<'a, String>>);

/// Runs `request` and returns the GraphQL response body.
///
/// Field errors end up in the `errors` entry of the response. An `Err` is
/// only returned when the request as a whole cannot be executed.
pub async fn execute_request(
    schema: &FederatedSchema,
    executor: Arc<dyn QueryExecutor>,
    request: &GraphQLRequest,
    cancel: CancellationToken,
) -> Result<JsonValue> {
    let document = parse_query::<String>(&request.query)
        .map_err(|e| FederationError::Request(e.to_string()))?;
    let operation = select_operation(&document, request.operation_name.as_deref())?;
    let info = OperationInfo::from_definition(operation)?;

    let variables = match &request.variables {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(variables)) => variables.clone(),
        Some(_) => {
            return Err(FederationError::Request(
                "variables must be a JSON object".to_string(),
            ));
        }
    };

    let fragments: Fragments<'_> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Fragment(fragment) => Some((fragment.name.clone(), fragment.clone())),
            Definition::Operation(_) => None,
        })
        .collect();

    let (selection_set, variable_definitions) = operation_parts(operation);
    let kind = info.kind;
    let execution = Execution {
        schema,
        ctx: RequestContext::new(info, variables, executor, cancel),
        fragments: &fragments,
        variable_definitions,
    };

    let (root, serial) = match kind {
        OperationKind::Query => (&schema.query, false),
        OperationKind::Mutation => (&schema.mutation, true),
    };

    let mut fields = Vec::new();
    execution.collect_fields(selection_set, &mut fields, &mut Vec::new())?;
    let data = execution
        .execute_root_fields(root, fields, ResponsePath::root(), serial)
        .await;

    let errors = execution.ctx.take_errors();
    let mut response = json!({ "data": data });
    if !errors.is_empty() {
        response["errors"] = JsonValue::Array(errors);
    }
    Ok(response)
}

fn select_operation<'d, 'a>(
    document: &'d Document<'a, String>,
    name: Option<&str>,
) -> Result<&'d OperationDefinition<'a, String>> {
    let mut operations = document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        Definition::Fragment(_) => None,
    });

    match name {
        Some(name) => operations
            .find(|operation| operation_name(operation) == Some(name))
            .ok_or_else(|| FederationError::Request(format!("unknown operation named '{}'", name))),
        None => {
            let first = operations.next().ok_or_else(|| {
                FederationError::Request("document contains no operation".to_string())
            })?;
            if operations.next().is_some() {
                return Err(FederationError::Request(
                    "operation name is required when the document contains several operations"
                        .to_string(),
                ));
            }
            Ok(first)
        }
    }
}

fn operation_name<'d>(operation: &'d OperationDefinition<'_, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

fn operation_parts<'d, 'a>(
    operation: &'d OperationDefinition<'a, String>,
) -> (&'d SelectionSet<'a, String>, &'d [VariableDefinition<'a, String>]) {
    match operation {
        OperationDefinition::SelectionSet(s) => (s, &[]),
        OperationDefinition::Query(q) => (&q.selection_set, &q.variable_definitions),
        OperationDefinition::Mutation(m) => (&m.selection_set, &m.variable_definitions),
        OperationDefinition::Subscription(s) => (&s.selection_set, &s.variable_definitions),
    }
}

fn export_name<'q>(field: &'q Field<'_, String>) -> Option<&'q str> {
    field
        .directives
        .iter()
        .filter(|d| d.name == "export")
        .flat_map(|d| d.arguments.iter())
        .find_map(|(name, value)| match (name.as_str(), value) {
            ("as", Value::String(as_name)) => Some(as_name.as_str()),
            _ => None,
        })
}

struct Execution<'q, 'a> {
    schema: &'q FederatedSchema,
    ctx: RequestContext,
    fragments: &'q Fragments<'a>,
    variable_definitions: &'q [VariableDefinition<'a, String>],
}

impl<'q, 'a> Execution<'q, 'a> {
    /// Groups the selected fields by response key, resolving fragments and
    /// `@skip` / `@include`.
    fn collect_fields(
        &self,
        selection_set: &'q SelectionSet<'a, String>,
        out: &mut Vec<FieldGroup<'q, 'a>>,
        visited: &mut Vec<&'q str>,
    ) -> Result<()> {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if !self.included(&field.directives) {
                        continue;
                    }
                    let key = field.alias.as_ref().unwrap_or(&field.name);
                    match out.iter_mut().find(|(k, _)| k == key) {
                        Some((_, group)) => group.push(field),
                        None => out.push((key.clone(), vec![field])),
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if self.included(&fragment.directives) {
                        self.collect_fields(&fragment.selection_set, out, visited)?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)
                        || visited.contains(&spread.fragment_name.as_str())
                    {
                        continue;
                    }
                    let fragment = self.fragments.get(&spread.fragment_name).ok_or_else(|| {
                        FederationError::Request(format!(
                            "unknown fragment '{}'",
                            spread.fragment_name
                        ))
                    })?;
                    visited.push(&spread.fragment_name);
                    self.collect_fields(&fragment.selection_set, out, visited)?;
                }
            }
        }
        Ok(())
    }

    fn included(&self, directives: &[Directive<'a, String>]) -> bool {
        directives.iter().all(|directive| match directive.name.as_str() {
            "skip" => !self.condition(directive),
            "include" => self.condition(directive),
            _ => true,
        })
    }

    fn condition(&self, directive: &Directive<'a, String>) -> bool {
        let argument = directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| value);

        match argument {
            Some(Value::Boolean(condition)) => *condition,
            Some(Value::Variable(name)) => self
                .ctx
                .variables
                .get(name)
                .and_then(JsonValue::as_bool)
                .or_else(|| {
                    self.variable_definitions
                        .iter()
                        .find(|d| &d.name == name)
                        .and_then(|d| match d.default_value {
                            Some(Value::Boolean(default)) => Some(default),
                            _ => None,
                        })
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Resolves root fields of `root` found at `path`.
    ///
    /// Every federated field is queued before any of them is awaited, unless
    /// `serial` is set. `_join` selections run once the other fields are done.
    fn execute_root_fields(
        &'q self,
        root: &'q RootType,
        fields: Vec<FieldGroup<'q, 'a>>,
        path: ResponsePath,
        serial: bool,
    ) -> BoxFuture<'q, JsonValue> {
        async move {
            let mut data = Map::new();
            let mut joins = Vec::new();
            let mut delegated = Vec::new();

            for (key, group) in fields {
                let field = group[0];
                let field_path = path.with_key(key.clone());
                if field.name == TYPENAME_FIELD {
                    data.insert(key, JsonValue::String(root.name.clone()));
                } else if field.name == JOIN_FIELD {
                    joins.push((key, group));
                } else if let Some(root_field) = root.fields.get(&field.name) {
                    delegated.push((key, root_field, group, field_path));
                } else {
                    let err = FederationError::Request(format!(
                        "cannot query field '{}' on type '{}'",
                        field.name, root.name
                    ));
                    self.ctx.report(&err, &field_path);
                    data.insert(key, JsonValue::Null);
                }
            }

            if serial {
                for (key, root_field, group, field_path) in delegated {
                    let source = root_field.resolver.source().name.as_str();
                    let deferred = root_field.resolver.resolve(
                        &self.ctx,
                        &FieldInfo {
                            field: group[0],
                            path: field_path.clone(),
                            fragments: self.fragments,
                        },
                    );
                    let value = self.complete_deferred(source, group, deferred, field_path).await;
                    data.insert(key, value);
                }
            } else {
                let pending: Vec<_> = delegated
                    .into_iter()
                    .map(|(key, root_field, group, field_path)| {
                        let source = root_field.resolver.source().name.as_str();
                        let deferred = root_field.resolver.resolve(
                            &self.ctx,
                            &FieldInfo {
                                field: group[0],
                                path: field_path.clone(),
                                fragments: self.fragments,
                            },
                        );
                        async move {
                            let value =
                                self.complete_deferred(source, group, deferred, field_path).await;
                            (key, value)
                        }
                    })
                    .collect();
                data.extend(join_all(pending).await);
            }

            self.execute_joins(joins, &path, &mut data).await;
            JsonValue::Object(data)
        }
        .boxed()
    }

    async fn execute_joins(
        &'q self,
        joins: Vec<FieldGroup<'q, 'a>>,
        path: &ResponsePath,
        data: &mut Map<String, JsonValue>,
    ) {
        for (key, group) in joins {
            let join_path = path.with_key(key.clone());
            let mut fields = Vec::new();
            let collected = group.iter().try_for_each(|join| {
                self.collect_fields(&join.selection_set, &mut fields, &mut Vec::new())
            });
            let value = match collected {
                Ok(()) => {
                    self.execute_root_fields(&self.schema.query, fields, join_path, false)
                        .await
                }
                Err(err) => {
                    self.ctx.report(&err, &join_path);
                    JsonValue::Null
                }
            };
            data.insert(key, value);
        }
    }

    async fn complete_deferred(
        &'q self,
        source: &'q str,
        fields: Vec<&'q Field<'a, String>>,
        deferred: DeferredValue,
        path: ResponsePath,
    ) -> JsonValue {
        match deferred.await {
            Ok(value) => self.complete_value(source, fields, value, path).await,
            Err(err) => {
                self.ctx.report(&err, &path);
                JsonValue::Null
            }
        }
    }

    /// Shapes an upstream value by the client's selection, storing exports
    /// on the way.
    fn complete_value(
        &'q self,
        source: &'q str,
        fields: Vec<&'q Field<'a, String>>,
        value: JsonValue,
        path: ResponsePath,
    ) -> BoxFuture<'q, JsonValue> {
        async move {
            for name in fields.iter().filter_map(|field| export_name(field)) {
                self.ctx.exports.store(name, value.clone(), &path);
            }

            if fields.iter().all(|field| field.selection_set.items.is_empty()) {
                return value;
            }

            match value {
                JsonValue::Array(items) => {
                    let items = items.into_iter().enumerate().map(|(index, item)| {
                        self.complete_value(source, fields.clone(), item, path.with_index(index))
                    });
                    JsonValue::Array(join_all(items).await)
                }
                JsonValue::Object(object) => {
                    self.complete_object(source, &fields, object, path).await
                }
                other => other,
            }
        }
        .boxed()
    }

    async fn complete_object(
        &'q self,
        source: &'q str,
        fields: &[&'q Field<'a, String>],
        mut object: Map<String, JsonValue>,
        path: ResponsePath,
    ) -> JsonValue {
        let mut selected = Vec::new();
        for field in fields {
            let collected =
                self.collect_fields(&field.selection_set, &mut selected, &mut Vec::new());
            if let Err(err) = collected {
                self.ctx.report(&err, &path);
                return JsonValue::Null;
            }
        }

        let mut joins = Vec::new();
        let mut children = Vec::new();
        for (key, group) in selected {
            if group[0].name == JOIN_FIELD {
                joins.push((key, group));
                continue;
            }
            let value = object.remove(&key).unwrap_or(JsonValue::Null);
            let value = if group[0].name == TYPENAME_FIELD {
                self.local_typename(source, value)
            } else {
                value
            };
            let child_path = path.with_key(key.clone());
            children.push(async move {
                (key, self.complete_value(source, group, value, child_path).await)
            });
        }

        let mut data: Map<String, JsonValue> = join_all(children).await.into_iter().collect();
        self.execute_joins(joins, &path, &mut data).await;
        JsonValue::Object(data)
    }

    // Upstream answers with its own type names.
    fn local_typename(&self, source: &str, value: JsonValue) -> JsonValue {
        let JsonValue::String(name) = value else {
            return value;
        };
        let local = format!("{}_{}", source, name);
        match self.schema.registries.get(source) {
            Some(registry) if registry.lookup(&local).is_some() => JsonValue::String(local),
            _ => JsonValue::String(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceConfig;
    use crate::query_executor::UpstreamRequest;
    use crate::schema_registry::tests::library_registry;
    use crate::schema_registry::merge_root_fields;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// Answers every top-level field of an upstream query with the canned
    /// value of its field name, under the alias it was requested with.
    #[derive(Default)]
    struct CannedExecutor {
        data: HashMap<String, JsonValue>,
        failures: HashMap<String, FederationError>,
        requests: Mutex<Vec<(String, UpstreamRequest)>>,
    }

    impl CannedExecutor {
        fn with_data(mut self, source: &str, data: JsonValue) -> Self {
            self.data.insert(source.to_string(), data);
            self
        }

        fn with_failure(mut self, source: &str, err: FederationError) -> Self {
            self.failures.insert(source.to_string(), err);
            self
        }

        fn requests(&self) -> Vec<(String, UpstreamRequest)> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for CannedExecutor {
        async fn execute(
            &self,
            source: &SourceConfig,
            request: &UpstreamRequest,
        ) -> Result<JsonValue> {
            self.requests.lock().push((source.name.clone(), request.clone()));
            if let Some(err) = self.failures.get(&source.name) {
                return Err(err.clone());
            }

            let document = parse_query::<String>(&request.query).unwrap();
            let Definition::Operation(operation) = &document.definitions[0] else {
                panic!("expected an operation");
            };
            let (selection_set, _) = operation_parts(operation);
            let canned = &self.data[&source.name];
            let mut data = Map::new();
            for selection in &selection_set.items {
                let Selection::Field(field) = selection else {
                    panic!("expected top-level fields");
                };
                let alias = field.alias.clone().unwrap_or_else(|| field.name.clone());
                data.insert(alias, canned.get(&field.name).cloned().unwrap_or(JsonValue::Null));
            }
            Ok(json!({ "data": data }))
        }
    }

    fn schema(sources: &[&str]) -> FederatedSchema {
        let mut query = RootType::new("Query");
        let mut mutation = RootType::new("Mutation");
        let mut configs = HashMap::new();
        let mut registries = HashMap::new();
        for name in sources {
            let source = SourceConfig::new(*name, format!("http://{}", name));
            let registry = Arc::new(library_registry(name));
            merge_root_fields(&source, &registry, &mut query, &mut mutation);
            configs.insert(name.to_string(), source);
            registries.insert(name.to_string(), registry);
        }
        FederatedSchema {
            sources: configs,
            registries,
            query,
            mutation,
        }
    }

    async fn run(
        schema: &FederatedSchema,
        executor: &Arc<CannedExecutor>,
        request: GraphQLRequest,
    ) -> Result<JsonValue> {
        execute_request(
            schema,
            Arc::clone(executor) as Arc<dyn QueryExecutor>,
            &request,
            CancellationToken::new(),
        )
        .await
    }

    fn library_data() -> JsonValue {
        json!({
            "book": { "__typename": "Book", "title": "Dune", "genre": "SCIFI" },
            "user": { "id": 7, "friends": [{ "id": 8 }, { "id": 9 }] },
            "search": [{ "title": "Dune" }, { "title": "Emma" }],
            "addBook": { "title": "Added" },
        })
    }

    #[tokio::test]
    async fn resolves_a_federated_field() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default().with_data("svc", library_data()));

        let request = GraphQLRequest::new(r#"{ svc_book(id: "42") { title } }"#);
        let response = run(&schema, &executor, request).await.unwrap();

        assert_eq!(response, json!({ "data": { "svc_book": { "title": "Dune" } } }));
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.query, r#"query { book(id: "42") { title } }"#);
    }

    #[tokio::test]
    async fn batches_fields_of_one_source() {
        let schema = schema(&["svc", "other"]);
        let executor = Arc::new(
            CannedExecutor::default()
                .with_data("svc", library_data())
                .with_data("other", library_data()),
        );

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                r#"{
                    a: svc_book(id: "1") { title }
                    b: svc_book(id: "2") { genre }
                    svc_user(id: 1) { id }
                    other_book { title }
                }"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": {
                "a": { "title": "Dune" },
                "b": { "genre": "SCIFI" },
                "svc_user": { "id": 7 },
                "other_book": { "title": "Dune" },
            } })
        );
        let mut sources: Vec<_> = executor
            .requests()
            .into_iter()
            .map(|(source, _)| source)
            .collect();
        sources.sort();
        assert_eq!(sources, vec!["other".to_string(), "svc".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batches_hold_on_a_multi_threaded_runtime() {
        let schema = schema(&["svc", "other"]);
        let query = (0..40)
            .map(|i| {
                format!(
                    r#"b{i}: svc_book(id: "{i}") {{ title }}
                    o{i}: other_user(id: {i}) {{ id }}"#
                )
            })
            .collect::<Vec<_>>()
            .join(" ");

        for _ in 0..20 {
            let executor = Arc::new(
                CannedExecutor::default()
                    .with_data("svc", library_data())
                    .with_data("other", library_data()),
            );

            let response = run(&schema, &executor, GraphQLRequest::new(format!("{{ {query} }}")))
                .await
                .unwrap();

            assert_eq!(response["data"]["b39"], json!({ "title": "Dune" }));
            assert_eq!(response["data"]["o0"], json!({ "id": 7 }));
            let mut sources: Vec<_> = executor
                .requests()
                .into_iter()
                .map(|(source, _)| source)
                .collect();
            sources.sort();
            assert_eq!(sources, vec!["other".to_string(), "svc".to_string()]);
        }
    }

    #[tokio::test]
    async fn completes_lists_aliases_and_typenames() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default().with_data(
            "svc",
            json!({
                "search": [{ "name": "Dune", "title": "ignored" }, { "name": "Emma" }],
                "book": { "__typename": "Book", "title": "Dune" },
            }),
        ));

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                "{
                    __typename
                    svc_search { name: title }
                    svc_book { __typename ... on svc_Book { title } }
                }",
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": {
                "__typename": "Query",
                "svc_search": [{ "name": "Dune" }, { "name": "Emma" }],
                "svc_book": { "__typename": "svc_Book", "title": "Dune" },
            } })
        );
    }

    #[tokio::test]
    async fn joins_with_exported_values() {
        let schema = schema(&["svc", "other"]);
        let executor = Arc::new(
            CannedExecutor::default()
                .with_data("svc", library_data())
                .with_data(
                    "other",
                    json!({ "user": { "id": 7, "favourite": { "title": "Emma" } } }),
                ),
        );

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                r#"{ svc_user(id: 1) {
                    id @export(as: "userId")
                    _join { other_user(id: $userId) { favourite { title } } }
                } }"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": { "svc_user": {
                "id": 7,
                "_join": { "other_user": { "favourite": { "title": "Emma" } } },
            } } })
        );

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.query, "query { user(id: 1) { id } }");
        let (source, joined) = &requests[1];
        assert_eq!(source, "other");
        assert_eq!(joined.variables.len(), 1);
        let (name, value) = joined.variables.iter().next().unwrap();
        assert!(name.starts_with("userId"));
        assert_eq!(value, &json!(7));
        assert!(joined.query.starts_with(&format!("query(${}: Int!)", name)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn joins_of_list_elements_share_one_request() {
        let schema = schema(&["svc", "other"]);
        let executor = Arc::new(
            CannedExecutor::default()
                .with_data("svc", library_data())
                .with_data("other", json!({ "user": { "id": 7 } })),
        );

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                r#"{ svc_user(id: 1) { friends {
                    id @export(as: "friendId")
                    _join { other_user(id: $friendId) { id } }
                } } }"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": { "svc_user": { "friends": [
                { "id": 8, "_join": { "other_user": { "id": 7 } } },
                { "id": 9, "_join": { "other_user": { "id": 7 } } },
            ] } } })
        );
        let joined: Vec<_> = executor
            .requests()
            .into_iter()
            .filter(|(source, _)| source == "other")
            .map(|(_, request)| request)
            .collect();
        assert_eq!(joined.len(), 1);
        let mut values: Vec<_> = joined[0].variables.values().cloned().collect();
        values.sort_by_key(|value| value.as_i64());
        assert_eq!(values, vec![json!(8), json!(9)]);
    }

    #[tokio::test]
    async fn root_join_runs_after_its_siblings() {
        let schema = schema(&["svc", "other"]);
        let executor = Arc::new(
            CannedExecutor::default()
                .with_data("svc", library_data())
                .with_data("other", json!({ "search": [{ "title": "Emma" }] })),
        );

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                r#"{
                    _join { other_search(filter: {authorId: "exports.user.id"}) { title } }
                    svc_user(id: 1) @export(as: "user") { id }
                }"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": {
                "svc_user": { "id": 7 },
                "_join": { "other_search": [{ "title": "Emma" }] },
            } })
        );
        let requests = executor.requests();
        assert_eq!(requests[1].0, "other");
        assert_eq!(requests[1].1.variables.values().collect::<Vec<_>>(), vec![&json!(7)]);
    }

    #[tokio::test]
    async fn upstream_failures_become_field_errors() {
        let schema = schema(&["svc", "other"]);
        let executor = Arc::new(
            CannedExecutor::default()
                .with_data("other", library_data())
                .with_failure(
                    "svc",
                    FederationError::transport("svc", "HTTP status 500 Internal Server Error"),
                ),
        );

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                "{ svc_book { title } svc_user(id: 1) { id } other_book { title } }",
            ),
        )
        .await
        .unwrap();

        let message = "request to source 'svc' failed: HTTP status 500 Internal Server Error";
        assert_eq!(
            response,
            json!({
                "data": { "svc_book": null, "svc_user": null, "other_book": { "title": "Dune" } },
                "errors": [
                    { "message": message, "path": ["svc_book"] },
                    { "message": message, "path": ["svc_user"] },
                ],
            })
        );
    }

    #[tokio::test]
    async fn unknown_root_fields_are_reported() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default());

        let response = run(&schema, &executor, GraphQLRequest::new("{ nope }")).await.unwrap();

        assert_eq!(
            response,
            json!({
                "data": { "nope": null },
                "errors": [{
                    "message": "invalid request: cannot query field 'nope' on type 'Query'",
                    "path": ["nope"],
                }],
            })
        );
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn honours_skip_and_include() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default().with_data("svc", library_data()));

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                "query($skip: Boolean!, $genre: Boolean = true) {
                    svc_book @skip(if: $skip) { title }
                    svc_user(id: 1) @include(if: $genre) { id }
                }",
            )
            .with_variables(json!({ "skip": true })),
        )
        .await
        .unwrap();

        assert_eq!(response, json!({ "data": { "svc_user": { "id": 7 } } }));
        assert_eq!(executor.requests().len(), 1);
    }

    #[tokio::test]
    async fn mutation_fields_run_one_after_another() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default().with_data("svc", library_data()));

        let response = run(
            &schema,
            &executor,
            GraphQLRequest::new(
                r#"mutation {
                    a: svc_addBook(input: {title: "x"}) { title }
                    b: svc_addBook(input: {title: "y"}) { title }
                }"#,
            ),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            json!({ "data": { "a": { "title": "Added" }, "b": { "title": "Added" } } })
        );
        let queries: Vec<_> = executor.requests().into_iter().map(|(_, r)| r.query).collect();
        assert_eq!(
            queries,
            vec![
                r#"mutation { a: addBook(input: {title: "x"}) { title } }"#.to_string(),
                r#"mutation { b: addBook(input: {title: "y"}) { title } }"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn selects_operations_by_name() {
        let schema = schema(&["svc"]);
        let executor = Arc::new(CannedExecutor::default().with_data("svc", library_data()));
        let document = "query A { svc_book { title } } query B { svc_user(id: 1) { id } }";

        let request = GraphQLRequest::new(document).with_operation_name("B");
        let response = run(&schema, &executor, request).await.unwrap();
        assert_eq!(response, json!({ "data": { "svc_user": { "id": 7 } } }));

        for request in [
            GraphQLRequest::new(document),
            GraphQLRequest::new(document).with_operation_name("C"),
            GraphQLRequest::new("{ svc_book {"),
            GraphQLRequest::new("{ svc_book { title } }").with_variables(json!([1])),
        ] {
            assert!(matches!(
                run(&schema, &executor, request).await,
                Err(FederationError::Request(_))
            ));
        }
    }
}
