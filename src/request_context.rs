use graphql_parser::query::{
    Directive, OperationDefinition, Type, Value as AstValue, VariableDefinition,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::SourceConfig;
use crate::dataloader::Dispatcher;
use crate::error::{FederationError, Result};
use crate::export_store::ExportStore;
use crate::query_executor::QueryExecutor;
use crate::query_planner::{forwarded, print_directives, print_value};
use crate::response_path::ResponsePath;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

/// A variable type as declared by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclaredType {
    Named(String),
    List(Box<DeclaredType>),
    NonNull(Box<DeclaredType>),
}

impl DeclaredType {
    fn from_ast(ty: &Type<'_, String>) -> Self {
        match ty {
            Type::NamedType(name) => DeclaredType::Named(name.clone()),
            Type::ListType(inner) => DeclaredType::List(Box::new(Self::from_ast(inner))),
            Type::NonNullType(inner) => DeclaredType::NonNull(Box::new(Self::from_ast(inner))),
        }
    }

    /// Renders the type for `source`, dropping its namespace prefix.
    pub fn upstream(&self, source: &str) -> String {
        match self {
            DeclaredType::Named(name) => name
                .strip_prefix(source)
                .and_then(|rest| rest.strip_prefix('_'))
                .unwrap_or(name)
                .to_string(),
            DeclaredType::List(inner) => format!("[{}]", inner.upstream(source)),
            DeclaredType::NonNull(inner) => format!("{}!", inner.upstream(source)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDeclaration {
    pub name: String,
    pub var_type: DeclaredType,
    pub default_value: Option<String>,
}

impl VariableDeclaration {
    pub fn upstream(&self, source: &str) -> String {
        match &self.default_value {
            Some(default) => format!(
                "${}: {} = {}",
                self.name,
                self.var_type.upstream(source),
                default
            ),
            None => format!("${}: {}", self.name, self.var_type.upstream(source)),
        }
    }
}

/// What the dispatcher needs to know about the client's operation.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationInfo {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDeclaration>,
    /// Operation directives forwarded upstream, already printed.
    pub directives: String,
    /// Variables referenced by `directives`.
    pub directive_variables: BTreeSet<String>,
}

impl OperationInfo {
    pub fn query() -> Self {
        OperationInfo {
            kind: OperationKind::Query,
            name: None,
            variables: Vec::new(),
            directives: String::new(),
            directive_variables: BTreeSet::new(),
        }
    }

    pub fn from_definition(operation: &OperationDefinition<'_, String>) -> Result<Self> {
        let (kind, name, variables, directives) = match operation {
            OperationDefinition::SelectionSet(_) => return Ok(Self::query()),
            OperationDefinition::Query(q) => {
                (OperationKind::Query, &q.name, &q.variable_definitions, &q.directives)
            }
            OperationDefinition::Mutation(m) => {
                (OperationKind::Mutation, &m.name, &m.variable_definitions, &m.directives)
            }
            OperationDefinition::Subscription(_) => {
                return Err(FederationError::Request(
                    "subscriptions are not supported".to_string(),
                ));
            }
        };

        Ok(OperationInfo {
            kind,
            name: name.clone(),
            variables: variables
                .iter()
                .map(Self::declaration)
                .collect::<Result<_>>()?,
            directives: print_directives(directives, &Default::default())?,
            directive_variables: directive_variables(directives),
        })
    }

    fn declaration(definition: &VariableDefinition<'_, String>) -> Result<VariableDeclaration> {
        Ok(VariableDeclaration {
            name: definition.name.clone(),
            var_type: DeclaredType::from_ast(&definition.var_type),
            default_value: definition
                .default_value
                .as_ref()
                .map(print_value)
                .transpose()?,
        })
    }

    pub fn declaration_of(&self, name: &str) -> Option<&VariableDeclaration> {
        self.variables.iter().find(|v| v.name == name)
    }
}

fn directive_variables(directives: &[Directive<'_, String>]) -> BTreeSet<String> {
    fn walk(value: &AstValue<'_, String>, names: &mut BTreeSet<String>) {
        match value {
            AstValue::Variable(name) => {
                names.insert(name.clone());
            }
            AstValue::List(items) => items.iter().for_each(|item| walk(item, names)),
            AstValue::Object(fields) => fields.values().for_each(|item| walk(item, names)),
            _ => {}
        }
    }

    let mut names = BTreeSet::new();
    for directive in forwarded(directives) {
        for (_, value) in &directive.arguments {
            walk(value, &mut names);
        }
    }
    names
}

/// State shared by every resolver of one request.
///
/// Holds the export store, one dispatcher per source and the field errors
/// collected so far. Nothing in here outlives the request.
pub struct RequestContext {
    pub variables: Arc<Map<String, Value>>,
    pub operation: Arc<OperationInfo>,
    pub exports: ExportStore,
    pub cancel: CancellationToken,
    executor: Arc<dyn QueryExecutor>,
    dispatchers: Mutex<HashMap<String, Arc<Dispatcher>>>,
    errors: Mutex<CollectedErrors>,
}

#[derive(Default)]
struct CollectedErrors {
    entries: Vec<Value>,
    // Upstream error lists already copied into `entries`.
    surfaced: Vec<Arc<Vec<Value>>>,
}

impl RequestContext {
    pub fn new(
        operation: OperationInfo,
        variables: Map<String, Value>,
        executor: Arc<dyn QueryExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        RequestContext {
            variables: Arc::new(variables),
            operation: Arc::new(operation),
            exports: ExportStore::new(),
            cancel,
            executor,
            dispatchers: Mutex::new(HashMap::new()),
            errors: Mutex::new(CollectedErrors::default()),
        }
    }

    /// The dispatcher of `source` for this request, created on first use.
    pub fn dispatcher(&self, source: &SourceConfig) -> Arc<Dispatcher> {
        let mut dispatchers = self.dispatchers.lock();
        let dispatcher = dispatchers.entry(source.name.clone()).or_insert_with(|| {
            Arc::new(Dispatcher::new(
                source.clone(),
                Arc::clone(&self.executor),
                Arc::clone(&self.operation),
                Arc::clone(&self.variables),
                self.cancel.clone(),
            ))
        });
        Arc::clone(dispatcher)
    }

    /// Records a field error raised at `path`.
    ///
    /// The errors of one upstream response are recorded once, however many
    /// fields of its batch report them.
    pub fn report(&self, error: &FederationError, path: &ResponsePath) {
        tracing::debug!(path = %path, error = %error, "field error");
        let mut collected = self.errors.lock();
        if let FederationError::UpstreamGraphQL { errors, .. } = error {
            if collected.surfaced.iter().any(|seen| Arc::ptr_eq(seen, errors)) {
                return;
            }
            collected.surfaced.push(Arc::clone(errors));
        }
        collected
            .entries
            .extend(error.to_graphql_errors(Some(path.to_json())));
    }

    pub fn take_errors(&self) -> Vec<Value> {
        let mut collected = self.errors.lock();
        collected.surfaced.clear();
        std::mem::take(&mut collected.entries)
    }
}
