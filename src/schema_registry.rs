use async_trait::async_trait;
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{FederationError, Result};
use crate::introspection::{
    self, INTROSPECTION_QUERY, IntrospectionResponse, IntrospectionSchema, TypeKind,
};
use crate::query_executor::{QueryExecutor, UpstreamRequest};
use crate::resolver::RemoteResolver;
use crate::SourceConfig;

/// Scalars shared by every source. They are never namespaced.
pub const BUILTIN_SCALARS: [&str; 6] = ["Boolean", "String", "Int", "Float", "ID", "DateTime"];

/// Root field reserved for cross-source joins. It is never delegated.
pub const JOIN_FIELD: &str = "_join";

pub type TypeId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Named(TypeId),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(&self) -> TypeId {
        match self {
            TypeRef::Named(id) => *id,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteInputValue {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RemoteField {
    pub name: String,
    pub description: Option<String>,
    pub args: Vec<RemoteInputValue>,
    pub ty: TypeRef,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub enum RemoteTypeKind {
    Scalar,
    Enum { values: Vec<String> },
    Object { fields: Vec<RemoteField> },
    InputObject { fields: Vec<RemoteInputValue> },
}

#[derive(Clone, Debug)]
pub struct RemoteType {
    /// Name exposed locally, `{source}_{original_name}` unless scalar.
    pub name: String,
    pub original_name: String,
    pub description: Option<String>,
    pub kind: RemoteTypeKind,
}

/// The type graph of one remote source, namespaced by source name.
///
/// Types live in an arena and reference each other by index, which lets
/// recursive remote types (`User.friends: [User]`) resolve without any
/// ordering requirement.
#[derive(Debug)]
pub struct RemoteTypeRegistry {
    source: String,
    types: Vec<RemoteType>,
    index: HashMap<String, TypeId>,
    query_type: Option<TypeId>,
    mutation_type: Option<TypeId>,
}

impl RemoteTypeRegistry {
    fn new(source: &str) -> Self {
        let mut registry = RemoteTypeRegistry {
            source: source.to_string(),
            types: Vec::new(),
            index: HashMap::new(),
            query_type: None,
            mutation_type: None,
        };
        for scalar in BUILTIN_SCALARS {
            registry.insert(RemoteType {
                name: scalar.to_string(),
                original_name: scalar.to_string(),
                description: None,
                kind: RemoteTypeKind::Scalar,
            });
        }
        registry
    }

    fn insert(&mut self, remote_type: RemoteType) -> TypeId {
        let id = self.types.len();
        self.index.insert(remote_type.name.clone(), id);
        self.types.push(remote_type);
        id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &RemoteType {
        &self.types[id]
    }

    pub fn get_by_name(&self, name: &str) -> Option<&RemoteType> {
        self.lookup(name).map(|id| self.get(id))
    }

    pub fn types(&self) -> impl Iterator<Item = &RemoteType> {
        self.types.iter()
    }

    pub fn query_type(&self) -> Option<TypeId> {
        self.query_type
    }

    pub fn mutation_type(&self) -> Option<TypeId> {
        self.mutation_type
    }

    pub fn field(&self, parent: TypeId, name: &str) -> Option<&RemoteField> {
        match &self.get(parent).kind {
            RemoteTypeKind::Object { fields } => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    pub fn input_field(&self, parent: TypeId, name: &str) -> Option<&RemoteInputValue> {
        match &self.get(parent).kind {
            RemoteTypeKind::InputObject { fields } => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Renders a type reference with local (namespaced) names.
    pub fn display_type(&self, ty: &TypeRef) -> String {
        self.render_type(ty, |t| &t.name)
    }

    /// Renders a type reference the way the remote source spells it.
    pub fn upstream_type(&self, ty: &TypeRef) -> String {
        self.render_type(ty, |t| &t.original_name)
    }

    fn render_type(&self, ty: &TypeRef, name: fn(&RemoteType) -> &String) -> String {
        match ty {
            TypeRef::Named(id) => name(self.get(*id)).clone(),
            TypeRef::List(inner) => format!("[{}]", self.render_type(inner, name)),
            TypeRef::NonNull(inner) => format!("{}!", self.render_type(inner, name)),
        }
    }

    /// Strips the source prefix from a local type name.
    pub fn upstream_type_name<'n>(&self, local: &'n str) -> &'n str {
        local
            .strip_prefix(self.source.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(local)
    }

    fn resolve_type_ref(&self, type_ref: &introspection::TypeRef) -> Result<TypeRef> {
        match type_ref.kind {
            TypeKind::List | TypeKind::NonNull => {
                let inner = type_ref.of_type.as_deref().ok_or_else(|| {
                    FederationError::UnsupportedKind {
                        type_name: "<wrapper>".to_string(),
                        kind: format!("{:?} without ofType", type_ref.kind),
                    }
                })?;
                let inner = Box::new(self.resolve_type_ref(inner)?);
                Ok(match type_ref.kind {
                    TypeKind::List => TypeRef::List(inner),
                    _ => TypeRef::NonNull(inner),
                })
            }
            kind => {
                let name = type_ref.name.as_deref().unwrap_or_default();
                self.lookup(&namespaced_name(&self.source, kind, name))
                    .map(TypeRef::Named)
                    .ok_or_else(|| FederationError::UnsupportedKind {
                        type_name: name.to_string(),
                        kind: format!("{:?}", kind),
                    })
            }
        }
    }

    fn resolve_input_values(
        &self,
        values: &[introspection::InputValueDef],
    ) -> Result<Vec<RemoteInputValue>> {
        values
            .iter()
            .map(|value| {
                Ok(RemoteInputValue {
                    name: value.name.clone(),
                    description: value.description.clone(),
                    ty: self.resolve_type_ref(&value.type_ref)?,
                    default_value: value.default_value.clone(),
                })
            })
            .collect()
    }
}

fn namespaced_name(source: &str, kind: TypeKind, name: &str) -> String {
    match kind {
        TypeKind::Scalar => name.to_string(),
        _ => format!("{}_{}", source, name),
    }
}

/// Fetches the schema of `source` through introspection and builds its
/// namespaced type registry.
pub async fn fetch_and_build_types(
    executor: &dyn QueryExecutor,
    source: &SourceConfig,
) -> Result<RemoteTypeRegistry> {
    let schema_error = |message: String| FederationError::SchemaFetch {
        source_name: source.name.clone(),
        message,
    };

    let request = UpstreamRequest {
        query: INTROSPECTION_QUERY.to_string(),
        variables: Map::new(),
    };
    let body = executor
        .execute(source, &request)
        .await
        .map_err(|e| schema_error(e.to_string()))?;

    let response: IntrospectionResponse = serde_json::from_value(body)
        .map_err(|e| schema_error(format!("undecodable introspection response: {}", e)))?;

    match response.data {
        Some(data) => build_types(&source.name, &data.schema),
        None if !response.errors.is_empty() => Err(schema_error(format!(
            "introspection failed: {}",
            serde_json::Value::Array(response.errors)
        ))),
        None => Err(schema_error("introspection response has no data".to_string())),
    }
}

/// Builds the registry in two passes: named placeholders first, fields second.
pub fn build_types(source: &str, schema: &IntrospectionSchema) -> Result<RemoteTypeRegistry> {
    let mut registry = RemoteTypeRegistry::new(source);

    for t in &schema.types {
        if t.name.starts_with("__") {
            continue;
        }

        let name = namespaced_name(source, t.kind, &t.name);
        if registry.lookup(&name).is_some() {
            continue;
        }

        let kind = match t.kind {
            TypeKind::Scalar => RemoteTypeKind::Scalar,
            TypeKind::Enum => RemoteTypeKind::Enum {
                values: t
                    .enum_values
                    .iter()
                    .flatten()
                    .map(|v| v.name.clone())
                    .collect(),
            },
            TypeKind::Object => RemoteTypeKind::Object { fields: Vec::new() },
            TypeKind::InputObject => RemoteTypeKind::InputObject { fields: Vec::new() },
            other => {
                let err = FederationError::UnsupportedKind {
                    type_name: t.name.clone(),
                    kind: format!("{:?}", other),
                };
                tracing::warn!(source, error = %err, "skipping remote type");
                continue;
            }
        };

        registry.insert(RemoteType {
            name,
            original_name: t.name.clone(),
            description: t.description.clone(),
            kind,
        });
    }

    for t in &schema.types {
        let Some(id) = registry.lookup(&namespaced_name(source, t.kind, &t.name)) else {
            continue;
        };

        match t.kind {
            TypeKind::Object => {
                let mut fields = Vec::new();
                for field in t.fields.iter().flatten() {
                    let resolved = registry.resolve_type_ref(&field.type_ref).and_then(|ty| {
                        Ok(RemoteField {
                            name: field.name.clone(),
                            description: field.description.clone(),
                            args: registry.resolve_input_values(&field.args)?,
                            ty,
                            deprecation_reason: field
                                .deprecation_reason
                                .clone()
                                .filter(|_| field.is_deprecated),
                        })
                    });
                    match resolved {
                        Ok(field) => fields.push(field),
                        Err(err) => {
                            tracing::warn!(
                                source,
                                type_name = %t.name,
                                field = %field.name,
                                error = %err,
                                "skipping field"
                            )
                        }
                    }
                }
                registry.types[id].kind = RemoteTypeKind::Object { fields };
            }
            TypeKind::InputObject => {
                let mut fields = Vec::new();
                for field in t.input_fields.iter().flatten() {
                    match registry.resolve_input_values(std::slice::from_ref(field)) {
                        Ok(mut resolved) => fields.append(&mut resolved),
                        Err(err) => {
                            tracing::warn!(
                                source,
                                type_name = %t.name,
                                field = %field.name,
                                error = %err,
                                "skipping input field"
                            )
                        }
                    }
                }
                registry.types[id].kind = RemoteTypeKind::InputObject { fields };
            }
            _ => {}
        }
    }

    registry.query_type = schema
        .query_type
        .as_ref()
        .and_then(|t| registry.lookup(&namespaced_name(source, TypeKind::Object, &t.name)));
    registry.mutation_type = schema
        .mutation_type
        .as_ref()
        .and_then(|t| registry.lookup(&namespaced_name(source, TypeKind::Object, &t.name)));

    tracing::debug!(source, types = registry.types.len(), "built remote type registry");
    Ok(registry)
}

#[derive(Clone)]
pub struct RootField {
    pub name: String,
    pub upstream_name: String,
    pub description: Option<String>,
    pub args: Vec<RemoteInputValue>,
    pub ty: TypeRef,
    pub resolver: RemoteResolver,
}

#[derive(Clone)]
pub struct RootType {
    pub name: String,
    pub fields: BTreeMap<String, RootField>,
}

impl RootType {
    pub fn new(name: &str) -> Self {
        RootType {
            name: name.to_string(),
            fields: BTreeMap::new(),
        }
    }
}

/// Merged root types of every registered source.
pub struct FederatedSchema {
    pub sources: HashMap<String, SourceConfig>,
    pub registries: HashMap<String, Arc<RemoteTypeRegistry>>,
    pub query: RootType,
    pub mutation: RootType,
}

/// Installs the source's root query and mutation fields into the shared
/// root types as `{source}_{field}`.
pub fn merge_root_fields(
    source: &SourceConfig,
    registry: &Arc<RemoteTypeRegistry>,
    root_query: &mut RootType,
    root_mutation: &mut RootType,
) {
    add_to_root_type(source, registry, registry.query_type(), root_query);
    add_to_root_type(source, registry, registry.mutation_type(), root_mutation);
}

fn add_to_root_type(
    source: &SourceConfig,
    registry: &Arc<RemoteTypeRegistry>,
    remote_root: Option<TypeId>,
    root: &mut RootType,
) {
    let Some(remote_root) = remote_root else {
        return;
    };
    let RemoteTypeKind::Object { fields } = &registry.get(remote_root).kind else {
        return;
    };

    for field in fields.iter().filter(|f| f.name != JOIN_FIELD) {
        let name = format!("{}_{}", source.name, field.name);
        let root_field = RootField {
            name: name.clone(),
            upstream_name: field.name.clone(),
            description: field.description.clone(),
            args: field.args.clone(),
            ty: field.ty.clone(),
            resolver: RemoteResolver::new(source.clone(), Arc::clone(registry), remote_root),
        };
        if root.fields.insert(name.clone(), root_field).is_some() {
            tracing::warn!(field = %name, root = %root.name, "root field overwritten");
        }
    }

    tracing::debug!(
        source = %source.name,
        root = %root.name,
        fields = fields.len(),
        "loaded root type fields"
    );
}

#[async_trait]
pub trait SchemaRegistry {
    async fn register_source(
        &mut self,
        source: SourceConfig,
        registry: RemoteTypeRegistry,
    ) -> Result<()>;
    async fn get_schema(&self) -> Result<Arc<FederatedSchema>>;
}

pub struct InMemorySchemaRegistry {
    sources: Arc<RwLock<BTreeMap<String, (SourceConfig, Arc<RemoteTypeRegistry>)>>>,
    federated_schema: Arc<RwLock<Option<Arc<FederatedSchema>>>>,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            sources: Arc::new(RwLock::new(BTreeMap::new())),
            federated_schema: Arc::new(RwLock::new(None)),
        }
    }

    fn build_federated_schema(
        sources: &BTreeMap<String, (SourceConfig, Arc<RemoteTypeRegistry>)>,
    ) -> FederatedSchema {
        let mut query = RootType::new("Query");
        let mut mutation = RootType::new("Mutation");

        for (source, registry) in sources.values() {
            merge_root_fields(source, registry, &mut query, &mut mutation);
        }

        FederatedSchema {
            sources: sources
                .iter()
                .map(|(name, (source, _))| (name.clone(), source.clone()))
                .collect(),
            registries: sources
                .iter()
                .map(|(name, (_, registry))| (name.clone(), Arc::clone(registry)))
                .collect(),
            query,
            mutation,
        }
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register_source(
        &mut self,
        source: SourceConfig,
        registry: RemoteTypeRegistry,
    ) -> Result<()> {
        let invalid = |c: char| !(c.is_ascii_alphanumeric() || c == '_');
        if source.name.is_empty() || source.name.contains(invalid) {
            return Err(FederationError::Config(format!(
                "source name '{}' is not a valid graphql name prefix",
                source.name
            )));
        }

        let mut sources = self.sources.write().await;
        sources.insert(source.name.clone(), (source, Arc::new(registry)));

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = None;

        Ok(())
    }

    async fn get_schema(&self) -> Result<Arc<FederatedSchema>> {
        let cached_schema = self.federated_schema.read().await;
        if let Some(schema) = &*cached_schema {
            return Ok(Arc::clone(schema));
        }
        drop(cached_schema);

        let sources = self.sources.read().await;
        let schema = Arc::new(Self::build_federated_schema(&sources));

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = Some(Arc::clone(&schema));

        Ok(schema)
    }
}
