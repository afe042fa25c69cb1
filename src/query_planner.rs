//! Compiles one federated field of the client's query into the fragment that
//! is sent to the field's source.

use graphql_parser::query::{
    Directive, Field, FragmentDefinition, Selection, SelectionSet, TypeCondition, Value,
};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{FederationError, Result};
use crate::export_store::{EXPORTS_PREFIX, ExportStore};
use crate::request_context::OperationInfo;
use crate::response_path::ResponsePath;
use crate::schema_registry::{
    JOIN_FIELD, RemoteField, RemoteInputValue, RemoteTypeRegistry, TypeId, TypeRef,
};

/// Directives consumed by the gateway and never forwarded upstream.
pub const RESERVED_DIRECTIVES: [&str; 3] = ["export", "injectClaim", "tag"];

const SUFFIX_LEN: usize = 16;

pub type Fragments<'a> = HashMap<String, FragmentDefinition<'a, String>>;

/// An exported value passed upstream as a variable.
#[derive(Clone, Debug, PartialEq)]
pub struct InjectedVariable {
    /// The export reference that produced the value.
    pub export: String,
    pub value: JsonValue,
    /// Upstream GraphQL type used to declare the variable.
    pub var_type: String,
}

/// The upstream query of one federated field. This is the dataloader key.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldQuery {
    /// Key of the field in the upstream response.
    pub alias: String,
    pub field_name: String,
    /// Arguments, directives and selection set.
    pub body: String,
    pub used_variables: BTreeSet<String>,
    pub injected_variables: BTreeMap<String, InjectedVariable>,
}

impl FieldQuery {
    pub fn fragment(&self) -> String {
        if self.alias == self.field_name {
            format!("{}{}", self.field_name, self.body)
        } else {
            format!("{}: {}{}", self.alias, self.field_name, self.body)
        }
    }
}

/// Variable and literal references rewritten to injected variables.
#[derive(Default, Debug)]
pub struct Renames {
    variables: HashMap<String, String>,
    literals: HashMap<String, String>,
}

#[derive(Default)]
struct References {
    variables: BTreeSet<String>,
    literals: BTreeSet<String>,
}

pub struct FieldQueryPlanner<'p, 'a> {
    source: &'p str,
    registry: &'p RemoteTypeRegistry,
    exports: &'p ExportStore,
    operation: &'p OperationInfo,
    fragments: &'p Fragments<'a>,
}

impl<'p, 'a> FieldQueryPlanner<'p, 'a> {
    pub fn new(
        registry: &'p RemoteTypeRegistry,
        exports: &'p ExportStore,
        operation: &'p OperationInfo,
        fragments: &'p Fragments<'a>,
    ) -> Self {
        FieldQueryPlanner {
            source: registry.source(),
            registry,
            exports,
            operation,
            fragments,
        }
    }

    fn upstream_field_name<'n>(&self, name: &'n str) -> &'n str {
        name.strip_prefix(self.source)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(name)
    }

    /// Plans `field`, a root field of `parent`, resolving at `path`.
    pub fn plan_field(
        &self,
        field: &Field<'a, String>,
        parent: Option<TypeId>,
        path: &ResponsePath,
    ) -> Result<FieldQuery> {
        let field_name = self.upstream_field_name(&field.name).to_string();

        let mut references = References::default();
        self.collect_field(field, &mut references, &mut Vec::new())?;

        let variable_hits: BTreeMap<String, JsonValue> = references
            .variables
            .iter()
            .filter_map(|name| {
                let value = self.exports.load(&format!("{}{}", EXPORTS_PREFIX, name), path)?;
                Some((name.clone(), value))
            })
            .collect();
        let literal_hits: BTreeMap<String, JsonValue> = references
            .literals
            .iter()
            .filter_map(|reference| {
                let value = self.exports.load(reference, path)?;
                Some((reference.clone(), value))
            })
            .collect();

        let suffix = if variable_hits.is_empty() && literal_hits.is_empty() {
            None
        } else {
            Some(export_suffix(variable_hits.iter().chain(literal_hits.iter())))
        };

        // `exports.user.id` and `exports.user_id` flatten to the same name.
        let mut renames = Renames::default();
        if let Some(suffix) = &suffix {
            let mut taken = HashSet::new();
            for name in variable_hits.keys() {
                let new_name = unique_name(&mut taken, name, suffix);
                renames.variables.insert(name.clone(), new_name);
            }
            for reference in literal_hits.keys() {
                let name = variable_name(&reference[EXPORTS_PREFIX.len()..]);
                let new_name = unique_name(&mut taken, &name, suffix);
                renames.literals.insert(reference.clone(), new_name);
            }
        }

        let mut printer = Printer::new(&field.name, Some(self.registry), &renames);
        let definition = parent.and_then(|p| self.registry.field(p, &field_name));
        let mut body = String::new();
        printer.field_body(&mut body, field, definition, self.fragments)?;

        let mut injected_variables = BTreeMap::new();
        for (name, value) in variable_hits {
            let new_name = &renames.variables[&name];
            let var_type = self
                .operation
                .declaration_of(&name)
                .map(|d| d.var_type.upstream(self.source))
                .or_else(|| printer.inferred.get(new_name).cloned())
                .ok_or_else(|| {
                    FederationError::compile(
                        &field.name,
                        format!("cannot determine the type of exported variable '${}'", name),
                    )
                })?;
            injected_variables.insert(
                new_name.clone(),
                InjectedVariable {
                    export: name,
                    value,
                    var_type,
                },
            );
        }
        for (reference, value) in literal_hits {
            let new_name = &renames.literals[&reference];
            let var_type = printer.inferred.get(new_name).cloned().ok_or_else(|| {
                FederationError::compile(
                    &field.name,
                    format!("cannot determine the type of '{}'", reference),
                )
            })?;
            injected_variables.insert(
                new_name.clone(),
                InjectedVariable {
                    export: reference,
                    value,
                    var_type,
                },
            );
        }

        let base = field.alias.clone().unwrap_or_else(|| field_name.clone());
        let alias = match &suffix {
            Some(suffix) => format!("{}{}", base, suffix),
            None => base,
        };

        let query = FieldQuery {
            alias,
            field_name,
            body,
            used_variables: printer.used,
            injected_variables,
        };
        tracing::debug!(
            source = self.source,
            path = %path,
            fragment = %query.fragment(),
            "planned field query"
        );
        Ok(query)
    }

    fn collect_field(
        &self,
        field: &Field<'a, String>,
        references: &mut References,
        fragment_stack: &mut Vec<String>,
    ) -> Result<()> {
        for (_, value) in &field.arguments {
            collect_value(value, references);
        }
        for directive in forwarded(&field.directives) {
            for (_, value) in &directive.arguments {
                collect_value(value, references);
            }
        }
        self.collect_selection_set(&field.name, &field.selection_set, references, fragment_stack)
    }

    fn collect_selection_set(
        &self,
        root_field: &str,
        selection_set: &SelectionSet<'a, String>,
        references: &mut References,
        fragment_stack: &mut Vec<String>,
    ) -> Result<()> {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(child) if child.name == JOIN_FIELD => {}
                Selection::Field(child) => self.collect_field(child, references, fragment_stack)?,
                Selection::InlineFragment(fragment) => {
                    for directive in forwarded(&fragment.directives) {
                        for (_, value) in &directive.arguments {
                            collect_value(value, references);
                        }
                    }
                    self.collect_selection_set(
                        root_field,
                        &fragment.selection_set,
                        references,
                        fragment_stack,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let definition = lookup_fragment(
                        root_field,
                        self.fragments,
                        &spread.fragment_name,
                        fragment_stack,
                    )?;
                    for directive in forwarded(&spread.directives) {
                        for (_, value) in &directive.arguments {
                            collect_value(value, references);
                        }
                    }
                    fragment_stack.push(spread.fragment_name.clone());
                    self.collect_selection_set(
                        root_field,
                        &definition.selection_set,
                        references,
                        fragment_stack,
                    )?;
                    fragment_stack.pop();
                }
            }
        }
        Ok(())
    }
}

fn collect_value(value: &Value<'_, String>, references: &mut References) {
    match value {
        Value::Variable(name) => {
            references.variables.insert(name.clone());
        }
        Value::String(s) if s.starts_with(EXPORTS_PREFIX) => {
            references.literals.insert(s.clone());
        }
        Value::List(items) => items.iter().for_each(|v| collect_value(v, references)),
        Value::Object(fields) => fields.values().for_each(|v| collect_value(v, references)),
        _ => {}
    }
}

fn unique_name(taken: &mut HashSet<String>, name: &str, suffix: &str) -> String {
    let mut candidate = format!("{}{}", name, suffix);
    let mut n = 0;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{}{}_{}", name, suffix, n);
    }
    candidate
}

/// The directives that are printed upstream.
pub(crate) fn forwarded<'d, 'a>(
    directives: &'d [Directive<'a, String>],
) -> impl Iterator<Item = &'d Directive<'a, String>> {
    directives
        .iter()
        .filter(|d| !RESERVED_DIRECTIVES.contains(&d.name.as_str()))
}

fn lookup_fragment<'f, 'a>(
    root_field: &str,
    fragments: &'f Fragments<'a>,
    name: &str,
    fragment_stack: &[String],
) -> Result<&'f FragmentDefinition<'a, String>> {
    if fragment_stack.iter().any(|f| f == name) {
        return Err(FederationError::compile(
            root_field,
            format!("fragment '{}' spreads itself", name),
        ));
    }
    fragments
        .get(name)
        .ok_or_else(|| FederationError::compile(root_field, format!("unknown fragment '{}'", name)))
}

/// Hash suffix shared by the alias and the injected variables of one field.
fn export_suffix<'h>(hits: impl Iterator<Item = (&'h String, &'h JsonValue)>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in hits {
        hasher.update(name.as_bytes());
        hasher.update(value.to_string().as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SUFFIX_LEN);
    digest
}

// `user.id` -> `user_id`
fn variable_name(reference: &str) -> String {
    let mut name: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn unwrap_non_null(ty: &TypeRef) -> &TypeRef {
    match ty {
        TypeRef::NonNull(inner) => inner,
        other => other,
    }
}

/// Prints AST nodes back to GraphQL text, applying renames and recording the
/// variables it emits.
struct Printer<'r> {
    root_field: &'r str,
    registry: Option<&'r RemoteTypeRegistry>,
    renames: &'r Renames,
    used: BTreeSet<String>,
    inferred: HashMap<String, String>,
    fragment_stack: Vec<String>,
}

impl<'r> Printer<'r> {
    fn new(
        root_field: &'r str,
        registry: Option<&'r RemoteTypeRegistry>,
        renames: &'r Renames,
    ) -> Self {
        Printer {
            root_field,
            registry,
            renames,
            used: BTreeSet::new(),
            inferred: HashMap::new(),
            fragment_stack: Vec::new(),
        }
    }

    fn upstream_type_name<'n>(&self, name: &'n str) -> &'n str {
        match self.registry {
            Some(registry) => registry.upstream_type_name(name),
            None => name,
        }
    }

    fn field<'a>(
        &mut self,
        out: &mut String,
        field: &Field<'a, String>,
        parent: Option<TypeId>,
        fragments: &Fragments<'a>,
    ) -> Result<()> {
        if let Some(alias) = &field.alias {
            out.push_str(alias);
            out.push_str(": ");
        }
        out.push_str(&field.name);
        let definition = match (self.registry, parent) {
            (Some(registry), Some(parent)) => registry.field(parent, &field.name),
            _ => None,
        };
        self.field_body(out, field, definition, fragments)
    }

    fn field_body<'a>(
        &mut self,
        out: &mut String,
        field: &Field<'a, String>,
        definition: Option<&'r RemoteField>,
        fragments: &Fragments<'a>,
    ) -> Result<()> {
        self.arguments(out, &field.arguments, definition.map(|d| d.args.as_slice()))?;
        self.directives(out, &field.directives)?;
        let parent = definition.map(|d| d.ty.named());
        self.selection_set(out, &field.selection_set, parent, fragments)
    }

    fn arguments(
        &mut self,
        out: &mut String,
        arguments: &[(String, Value<'_, String>)],
        definitions: Option<&'r [RemoteInputValue]>,
    ) -> Result<()> {
        if arguments.is_empty() {
            return Ok(());
        }
        out.push('(');
        for (i, (name, value)) in arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push_str(": ");
            let ty = definitions
                .and_then(|defs| defs.iter().find(|d| &d.name == name))
                .map(|d| &d.ty);
            self.value(out, value, ty)?;
        }
        out.push(')');
        Ok(())
    }

    fn directives(&mut self, out: &mut String, directives: &[Directive<'_, String>]) -> Result<()> {
        for directive in forwarded(directives) {
            out.push_str(" @");
            out.push_str(&directive.name);
            self.arguments(out, &directive.arguments, None)?;
        }
        Ok(())
    }

    fn selection_set<'a>(
        &mut self,
        out: &mut String,
        selection_set: &SelectionSet<'a, String>,
        parent: Option<TypeId>,
        fragments: &Fragments<'a>,
    ) -> Result<()> {
        if selection_set.items.is_empty() {
            return Ok(());
        }

        let mut children = Vec::with_capacity(selection_set.items.len());
        for selection in &selection_set.items {
            let mut child = String::new();
            match selection {
                Selection::Field(field) if field.name == JOIN_FIELD => continue,
                Selection::Field(field) => self.field(&mut child, field, parent, fragments)?,
                Selection::InlineFragment(fragment) => {
                    let condition = fragment
                        .type_condition
                        .as_ref()
                        .map(|TypeCondition::On(name)| name.as_str());
                    self.inline_fragment(
                        &mut child,
                        condition,
                        &fragment.directives,
                        &fragment.selection_set,
                        parent,
                        fragments,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let definition = lookup_fragment(
                        self.root_field,
                        fragments,
                        &spread.fragment_name,
                        &self.fragment_stack,
                    )?;
                    let TypeCondition::On(condition) = &definition.type_condition;
                    self.fragment_stack.push(spread.fragment_name.clone());
                    self.inline_fragment(
                        &mut child,
                        Some(condition.as_str()),
                        &spread.directives,
                        &definition.selection_set,
                        parent,
                        fragments,
                    )?;
                    self.fragment_stack.pop();
                }
            }
            children.push(child);
        }

        // a selection of only `_join` still needs one upstream field
        if children.is_empty() {
            children.push("__typename".to_string());
        }

        out.push_str(" { ");
        out.push_str(&children.join(" "));
        out.push_str(" }");
        Ok(())
    }

    fn inline_fragment<'a>(
        &mut self,
        out: &mut String,
        condition: Option<&str>,
        directives: &[Directive<'a, String>],
        selection_set: &SelectionSet<'a, String>,
        parent: Option<TypeId>,
        fragments: &Fragments<'a>,
    ) -> Result<()> {
        out.push_str("...");
        let mut parent = parent;
        if let Some(condition) = condition {
            out.push_str(" on ");
            out.push_str(self.upstream_type_name(condition));
            parent = self.registry.and_then(|r| r.lookup(condition)).or(parent);
        }
        self.directives(out, directives)?;
        self.selection_set(out, selection_set, parent, fragments)
    }

    fn value(
        &mut self,
        out: &mut String,
        value: &Value<'_, String>,
        ty: Option<&'r TypeRef>,
    ) -> Result<()> {
        match value {
            Value::Variable(name) => {
                out.push('$');
                match self.renames.variables.get(name) {
                    Some(new_name) => {
                        out.push_str(new_name);
                        self.infer(new_name, ty);
                    }
                    None => {
                        out.push_str(name);
                        self.used.insert(name.clone());
                    }
                }
            }
            Value::String(s) => match self.renames.literals.get(s) {
                Some(new_name) => {
                    out.push('$');
                    out.push_str(new_name);
                    self.infer(new_name, ty);
                }
                None => out.push_str(&JsonValue::String(s.clone()).to_string()),
            },
            Value::Int(number) => {
                let number = number.as_i64().ok_or_else(|| {
                    FederationError::compile(self.root_field, "integer literal out of range")
                })?;
                out.push_str(&number.to_string());
            }
            Value::Float(number) => out.push_str(&number.to_string()),
            Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Null => out.push_str("null"),
            Value::Enum(name) => out.push_str(name),
            Value::List(items) => {
                let item_ty = ty.map(unwrap_non_null).and_then(|t| match t {
                    TypeRef::List(inner) => Some(inner.as_ref()),
                    _ => None,
                });
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.value(out, item, item_ty)?;
                }
                out.push(']');
            }
            Value::Object(fields) => {
                out.push('{');
                for (i, (name, field_value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push_str(": ");
                    let field_ty = match (self.registry, ty) {
                        (Some(registry), Some(ty)) => {
                            registry.input_field(ty.named(), name).map(|f| &f.ty)
                        }
                        _ => None,
                    };
                    self.value(out, field_value, field_ty)?;
                }
                out.push('}');
            }
        }
        Ok(())
    }

    fn infer(&mut self, variable: &str, ty: Option<&TypeRef>) {
        if let (Some(registry), Some(ty)) = (self.registry, ty) {
            self.inferred
                .entry(variable.to_string())
                .or_insert_with(|| registry.upstream_type(ty));
        }
    }
}

/// Prints a literal value, as used for variable defaults.
pub fn print_value(value: &Value<'_, String>) -> Result<String> {
    let renames = Renames::default();
    let mut printer = Printer::new("", None, &renames);
    let mut out = String::new();
    printer.value(&mut out, value, None)?;
    Ok(out)
}

/// Prints the forwarded directives of `directives`, space separated.
pub fn print_directives(directives: &[Directive<'_, String>], renames: &Renames) -> Result<String> {
    let mut printer = Printer::new("", None, renames);
    let mut out = String::new();
    printer.directives(&mut out, directives)?;
    Ok(out.trim_start().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_registry::tests::library_registry;
    use graphql_parser::query::{Definition, OperationDefinition, parse_query};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plan_with(query: &str, exports: &ExportStore, path: &ResponsePath) -> Result<FieldQuery> {
        let registry = library_registry("svc");
        let document = parse_query::<String>(query).unwrap();

        let mut fragments = Fragments::new();
        let mut operation = None;
        for definition in &document.definitions {
            match definition {
                Definition::Operation(op) => operation = Some(op),
                Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.clone(), fragment.clone());
                }
            }
        }
        let operation = operation.unwrap();
        let selection_set = match operation {
            OperationDefinition::SelectionSet(s) => s,
            OperationDefinition::Query(q) => &q.selection_set,
            OperationDefinition::Mutation(m) => &m.selection_set,
            OperationDefinition::Subscription(s) => &s.selection_set,
        };
        let Selection::Field(field) = &selection_set.items[0] else {
            panic!("expected a field");
        };

        let info = OperationInfo::from_definition(operation).unwrap();
        let planner = FieldQueryPlanner::new(&registry, exports, &info, &fragments);
        let parent = match operation {
            OperationDefinition::Mutation(_) => registry.mutation_type(),
            _ => registry.query_type(),
        };
        planner.plan_field(field, parent, path)
    }

    fn plan(query: &str) -> FieldQuery {
        let path = ResponsePath::root().with_key("svc_field");
        plan_with(query, &ExportStore::new(), &path).unwrap()
    }

    fn exports_at_root(values: &[(&str, JsonValue)]) -> ExportStore {
        let store = ExportStore::new();
        for (name, value) in values {
            store.store(name, value.clone(), &ResponsePath::root().with_key("exporter"));
        }
        store
    }

    #[test]
    fn compiles_plain_field() {
        let query = plan(r#"{ svc_book(id: "42") { title } }"#);

        assert_eq!(query.alias, "book");
        assert_eq!(query.field_name, "book");
        assert_eq!(query.fragment(), r#"book(id: "42") { title }"#);
        assert!(query.used_variables.is_empty());
        assert!(query.injected_variables.is_empty());
    }

    #[test]
    fn collects_variables_from_nested_literals_and_children() {
        let query = plan(
            r#"query($f: Int, $g: svc_Genre, $fmt: String) {
                svc_search(filter: {genre: $g, authorId: $f}) { title author(format: $fmt) { id } }
            }"#,
        );

        assert_eq!(
            query.fragment(),
            "search(filter: {authorId: $f, genre: $g}) { title author(format: $fmt) { id } }"
        );
        assert_eq!(
            query.used_variables.into_iter().collect::<Vec<_>>(),
            vec!["f", "fmt", "g"]
        );
    }

    #[test]
    fn prints_literals() {
        let query = plan(
            r#"{ svc_search(filter: {genre: SCIFI, authorId: 3, tags: ["a\"b", null, true, 1.5]}) {
                title
            } }"#,
        );

        assert_eq!(
            query.fragment(),
            concat!(
                r#"search(filter: {authorId: 3, genre: SCIFI, tags: ["a\"b", null, true, 1.5]}) "#,
                "{ title }"
            )
        );
    }

    #[test]
    fn strips_reserved_directives_and_join() {
        let query = plan(
            r#"query($show: Boolean) {
                svc_book(id: "1") @export(as: "b") @tag(type: "x") @include(if: $show) {
                    title @export(as: "t")
                    _join { other_x { y } }
                }
            }"#,
        );

        assert_eq!(query.fragment(), r#"book(id: "1") @include(if: $show) { title }"#);
        assert_eq!(query.used_variables.into_iter().collect::<Vec<_>>(), vec!["show"]);
    }

    #[test]
    fn join_only_selection_keeps_typename() {
        let query = plan(r#"{ svc_user(id: 1) { _join { other_x } } }"#);
        assert_eq!(query.fragment(), "user(id: 1) { __typename }");
    }

    #[test]
    fn keeps_client_aliases() {
        let query = plan(r#"{ first: svc_book(id: "1") { t: title } }"#);

        assert_eq!(query.alias, "first");
        assert_eq!(query.fragment(), r#"first: book(id: "1") { t: title }"#);
    }

    #[test]
    fn inlines_fragments_without_namespace() {
        let query = plan(
            r#"query { svc_book(id: "1") { ...BookParts ... on svc_Book { genre } } }
               fragment BookParts on svc_Book { title }"#,
        );

        assert_eq!(
            query.fragment(),
            r#"book(id: "1") { ... on Book { title } ... on Book { genre } }"#
        );
    }

    #[test]
    fn unknown_fragment_fails_the_field() {
        let err = plan_with(
            r#"{ svc_book(id: "1") { ...Missing } }"#,
            &ExportStore::new(),
            &ResponsePath::root().with_key("svc_book"),
        )
        .unwrap_err();

        assert!(matches!(err, FederationError::QueryCompile { field, .. } if field == "svc_book"));
    }

    #[test]
    fn injects_exported_variable() {
        let exports = exports_at_root(&[("userId", json!(7))]);
        let query = plan_with(
            r#"query($userId: Int!) { svc_user(id: $userId) { id } }"#,
            &exports,
            &ResponsePath::root().with_key("svc_user"),
        )
        .unwrap();

        let suffix = query.alias.strip_prefix("user").unwrap().to_string();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert_eq!(
            query.fragment(),
            format!("user{suffix}: user(id: $userId{suffix}) {{ id }}")
        );
        assert!(query.used_variables.is_empty());
        assert_eq!(
            query.injected_variables[&format!("userId{suffix}")],
            InjectedVariable {
                export: "userId".to_string(),
                value: json!(7),
                var_type: "Int!".to_string(),
            }
        );
    }

    #[test]
    fn aliases_differ_by_injected_values_only() {
        let q = r#"{ svc_user(id: "exports.user.id") { id } }"#;
        let path = ResponsePath::root().with_key("svc_user");

        let seven = plan_with(q, &exports_at_root(&[("user", json!({"id": 7}))]), &path).unwrap();
        let eight = plan_with(q, &exports_at_root(&[("user", json!({"id": 8}))]), &path).unwrap();
        let seven_again =
            plan_with(q, &exports_at_root(&[("user", json!({"id": 7}))]), &path).unwrap();

        assert_ne!(seven.alias, eight.alias);
        assert_eq!(seven, seven_again);
    }

    #[test]
    fn infers_type_of_injected_literal() {
        let exports = exports_at_root(&[("user", json!({"id": 9}))]);
        let path = ResponsePath::root().with_key("svc_user");

        let query =
            plan_with(r#"{ svc_user(id: "exports.user.id") { id } }"#, &exports, &path).unwrap();
        let (name, injected) = query.injected_variables.iter().next().unwrap();
        assert!(name.starts_with("user_id"));
        assert_eq!(injected.var_type, "Int!");
        assert_eq!(injected.value, json!(9));
        assert_eq!(injected.export, "exports.user.id");

        let query = plan_with(
            r#"{ svc_search(filter: {authorId: "exports.user.id"}) { title } }"#,
            &exports,
            &path,
        )
        .unwrap();
        assert_eq!(query.injected_variables.values().next().unwrap().var_type, "Int");
    }

    #[test]
    fn references_flattening_to_one_name_get_distinct_variables() {
        let exports = exports_at_root(&[("user", json!({"id": 9})), ("user_id", json!("five"))]);
        let path = ResponsePath::root().with_key("svc_search");

        let query = plan_with(
            r#"{ svc_search(filter: {authorId: "exports.user.id"}) {
                title
                author(format: "exports.user_id") { id }
            } }"#,
            &exports,
            &path,
        )
        .unwrap();

        assert_eq!(query.injected_variables.len(), 2);
        let by_export: HashMap<_, _> = query
            .injected_variables
            .iter()
            .map(|(name, injected)| (injected.export.as_str(), (name.as_str(), injected)))
            .collect();
        let (id_name, id) = by_export["exports.user.id"];
        let (format_name, format) = by_export["exports.user_id"];

        assert_ne!(id_name, format_name);
        assert_eq!((id.value.clone(), id.var_type.as_str()), (json!(9), "Int"));
        assert_eq!((format.value.clone(), format.var_type.as_str()), (json!("five"), "String"));
        assert_eq!(format_name, format!("{}_1", id_name));

        let fragment = query.fragment();
        assert!(fragment.contains(&format!("{{authorId: ${}}}", id_name)));
        assert!(fragment.contains(&format!("author(format: ${})", format_name)));
    }

    #[test]
    fn missing_exports_are_not_injected() {
        let query =
            plan(r#"query($userId: Int!) { svc_user(id: $userId) { favourite { title } } }"#);

        assert_eq!(query.alias, "user");
        assert_eq!(query.used_variables.into_iter().collect::<Vec<_>>(), vec!["userId"]);

        let query = plan(r#"{ svc_book(id: "exports.nothing") { title } }"#);
        assert_eq!(query.fragment(), r#"book(id: "exports.nothing") { title }"#);
    }

    #[test]
    fn untyped_injection_fails_the_field() {
        let exports = exports_at_root(&[("x", json!(1))]);
        let err = plan_with(
            r#"{ svc_book(unknown: $x) { title } }"#,
            &exports,
            &ResponsePath::root().with_key("svc_book"),
        )
        .unwrap_err();

        assert!(matches!(err, FederationError::QueryCompile { .. }));
    }

    #[test]
    fn prints_defaults_and_directives() {
        let document =
            parse_query::<String>(r#"query @a(x: [1, 2]) @export(as: "n") @b { f }"#).unwrap();
        let Definition::Operation(OperationDefinition::Query(q)) = &document.definitions[0] else {
            panic!("expected a query");
        };

        assert_eq!(
            print_directives(&q.directives, &Renames::default()).unwrap(),
            "@a(x: [1, 2]) @b"
        );
    }
}
