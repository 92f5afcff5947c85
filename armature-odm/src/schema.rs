//! Schemas: named, ordered sets of field descriptors.

use crate::{
    analysis::AnalysisSettings,
    error::{OdmError, Result},
    field::{Field, FieldKind},
    hint::{FieldDecl, Hinted},
    search::{Sort, SortOrder},
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A named set of field descriptors describing one document kind.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<(String, Field)>,
    strict: bool,
    index: Option<String>,
}

impl Schema {
    /// Define a schema from declarations. Inference errors surface here.
    pub fn define(name: impl Into<String>, decls: impl IntoIterator<Item = FieldDecl>) -> Result<Self> {
        let name = name.into();
        let mut fields: Vec<(String, Field)> = Vec::new();

        for decl in decls {
            if fields.iter().any(|(n, _)| *n == decl.name) {
                return Err(OdmError::schema(format!(
                    "field '{}' declared twice in schema '{}'",
                    decl.name, name
                )));
            }
            let field = decl.resolve()?;
            fields.push((decl.name, field));
        }

        Ok(Self {
            name,
            fields,
            strict: false,
            index: None,
        })
    }

    /// Start building a schema.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            decls: Vec::new(),
            strict: false,
            index: None,
        }
    }

    /// Schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Look up a field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether unknown attributes are rejected.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Index documents of this schema go to when none is given.
    pub fn default_index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Copy of this schema with a different default index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Copy of this schema under a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Merge `child` over `parent`: union of fields, the child winning on
    /// name collisions. Parent fields keep their position.
    pub fn merge(parent: &Schema, child: &Schema) -> Schema {
        let mut fields = parent.fields.clone();
        for (name, field) in &child.fields {
            upsert(&mut fields, name, field.clone());
        }
        Schema {
            name: child.name.clone(),
            fields,
            strict: child.strict || parent.strict,
            index: child.index.clone().or_else(|| parent.index.clone()),
        }
    }

    /// Merge schemas that must agree on the kind of every shared field.
    pub fn merge_compatible(name: impl Into<String>, schemas: &[&Schema]) -> Result<Schema> {
        let mut merged = Schema {
            name: name.into(),
            fields: Vec::new(),
            strict: false,
            index: None,
        };
        for schema in schemas {
            for (field_name, field) in &schema.fields {
                if let Some(existing) = merged.field(field_name)
                    && existing.kind != field.kind
                {
                    return Err(OdmError::SchemaConflict {
                        field: field_name.clone(),
                        existing: existing.kind.to_string(),
                        incoming: field.kind.to_string(),
                    });
                }
                upsert(&mut merged.fields, field_name, field.clone());
            }
            merged.strict |= schema.strict;
            if merged.index.is_none() {
                merged.index = schema.index.clone();
            }
        }
        Ok(merged)
    }

    /// Derive a schema from several ancestors plus its own declarations.
    ///
    /// Ancestors must agree on shared field kinds; own fields override.
    pub fn inherit(
        name: impl Into<String>,
        ancestors: &[&Schema],
        own: impl IntoIterator<Item = FieldDecl>,
    ) -> Result<Schema> {
        let name = name.into();
        let base = Schema::merge_compatible(name.clone(), ancestors)?;
        let own = Schema::define(name, own)?;
        Ok(Schema::merge(&base, &own))
    }

    /// Render the mapping consumed by index creation.
    ///
    /// Output depends only on the schema, so repeated calls serialize to
    /// identical bytes.
    pub fn to_wire_spec(&self) -> Value {
        let mut mapping = Map::new();

        if self.strict {
            mapping.insert("dynamic".to_string(), json!("strict"));
        }

        let mut properties = Map::new();
        for (name, field) in &self.fields {
            properties.insert(name.clone(), field.to_wire());
        }
        mapping.insert("properties".to_string(), Value::Object(properties));

        Value::Object(mapping)
    }

    /// Collect custom analysis definitions referenced by any field.
    pub fn analysis(&self) -> Result<AnalysisSettings> {
        let mut settings = AnalysisSettings::new();
        for (_, field) in &self.fields {
            collect_analysis(field, &mut settings)?;
        }
        Ok(settings)
    }

    /// Validate the attributes of an object against this schema.
    pub fn validate_object(&self, path: &str, values: &Map<String, Value>) -> Result<()> {
        for (key, value) in values {
            let full = join(path, key);
            match self.field(key) {
                Some(field) => field.validate(&full, value)?,
                None if self.strict => {
                    return Err(OdmError::validation(full, "unknown field in strict schema"));
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Check required fields, descending into object values.
    pub fn check_required(&self, path: &str, values: &Map<String, Value>) -> Result<()> {
        for (name, field) in &self.fields {
            let full = join(path, name);
            let value = values.get(name);

            // Multi fields hold zero or more values.
            if field.required && !field.multi && value.is_none_or(|v| field.is_empty_value(v)) {
                return Err(OdmError::validation(full, "value required"));
            }

            if let (Some(schema), Some(value)) = (&field.schema, value) {
                let objects: Vec<&Map<String, Value>> = match value {
                    Value::Object(map) => vec![map],
                    Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
                    _ => Vec::new(),
                };
                for object in objects {
                    schema.check_required(&full, object)?;
                }
            }
        }
        Ok(())
    }

    /// Type-level handle for a (dotted) field path, for query building.
    ///
    /// Paths descend through object fields and multi-fields, e.g.
    /// `comments.author` or `title.raw`.
    pub fn proxy(&self, path: &str) -> Option<FieldProxy> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut field = self.field(first)?.clone();
        for part in parts {
            field = match &field.schema {
                Some(schema) => schema.field(part).or_else(|| field.sub(part))?.clone(),
                None => field.sub(part)?.clone(),
            };
        }
        Some(FieldProxy {
            path: path.to_string(),
            field,
        })
    }
}

fn upsert(fields: &mut Vec<(String, Field)>, name: &str, field: Field) {
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = field,
        None => fields.push((name.to_string(), field)),
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn collect_analysis(field: &Field, settings: &mut AnalysisSettings) -> Result<()> {
    if let Some(analyzer) = &field.analyzer {
        settings.add_analyzer(analyzer)?;
    }
    if let Some(analyzer) = &field.search_analyzer {
        settings.add_analyzer(analyzer)?;
    }
    for (_, sub) in &field.fields {
        collect_analysis(sub, settings)?;
    }
    if let Some(schema) = &field.schema {
        settings.merge(&schema.analysis()?)?;
    }
    Ok(())
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    decls: Vec<FieldDecl>,
    strict: bool,
    index: Option<String>,
}

impl SchemaBuilder {
    /// Add a declaration.
    pub fn decl(mut self, decl: FieldDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Add an explicit field.
    pub fn field(self, name: impl Into<String>, field: Field) -> Self {
        self.decl(FieldDecl::explicit(name, field))
    }

    /// Add a field inferred from a Rust type.
    pub fn typed<T: Hinted + ?Sized>(self, name: impl Into<String>) -> Self {
        self.decl(FieldDecl::typed::<T>(name))
    }

    /// Add a field declared through a typed reference.
    pub fn declare<T: Hinted>(self, field: FieldRef<T>) -> Self {
        self.decl(field.decl())
    }

    /// Reject unknown attributes.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Set the default index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Resolve all declarations.
    pub fn build(self) -> Result<Schema> {
        let mut schema = Schema::define(self.name, self.decls)?;
        schema.strict = self.strict;
        schema.index = self.index;
        Ok(schema)
    }
}

/// A field seen at the type level, usable where a field name is expected.
#[derive(Debug, Clone)]
pub struct FieldProxy {
    path: String,
    field: Field,
}

impl FieldProxy {
    /// Dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Field kind.
    pub fn kind(&self) -> FieldKind {
        self.field.kind
    }

    /// Descriptor behind the proxy.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Descend into a multi-field or object attribute.
    pub fn sub(&self, name: &str) -> Option<FieldProxy> {
        let field = match &self.field.schema {
            Some(schema) => schema.field(name).or_else(|| self.field.sub(name))?,
            None => self.field.sub(name)?,
        };
        Some(FieldProxy {
            path: join(&self.path, name),
            field: field.clone(),
        })
    }

    /// Ascending sort on this field.
    pub fn asc(&self) -> Sort {
        Sort::new(self.path.clone(), SortOrder::Asc)
    }

    /// Descending sort on this field.
    pub fn desc(&self) -> Sort {
        Sort::new(self.path.clone(), SortOrder::Desc)
    }
}

/// Typed field name.
///
/// One constant serves as the schema declaration, the typed accessor on
/// documents and the field name in queries:
///
/// ```rust
/// use armature_odm::{Document, FieldRef, Schema};
/// use std::sync::Arc;
///
/// const TITLE: FieldRef<String> = FieldRef::new("title");
///
/// let schema = Arc::new(Schema::builder("Post").declare(TITLE).build().unwrap());
/// let mut post = Document::new(schema);
/// post.set_field(TITLE, "Hello".to_string()).unwrap();
/// assert_eq!(post.get_field(TITLE).unwrap().as_deref(), Some("Hello"));
/// let _sort = TITLE.desc();
/// ```
pub struct FieldRef<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FieldRef<T> {
    /// Create a reference.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Field name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ascending sort on this field.
    pub fn asc(&self) -> Sort {
        Sort::new(self.name, SortOrder::Asc)
    }

    /// Descending sort on this field.
    pub fn desc(&self) -> Sort {
        Sort::new(self.name, SortOrder::Desc)
    }
}

impl<T: Hinted> FieldRef<T> {
    /// Declaration inferred from `T`.
    pub fn decl(&self) -> FieldDecl {
        FieldDecl::typed::<T>(self.name)
    }
}

impl<T> Clone for FieldRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldRef<T> {}

impl<T> std::fmt::Debug for FieldRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FieldRef").field(&self.name).finish()
    }
}

/// Several document kinds stored in one index, told apart by a tag field.
///
/// The physical schema is the union of all members plus the discriminator.
/// Each member keeps its own field subset and carries the discriminator so
/// documents created from it are tagged on save.
#[derive(Debug, Clone)]
pub struct TaggedUnion {
    schema: Arc<Schema>,
    discriminator: String,
    members: Vec<(String, Arc<Schema>)>,
}

impl TaggedUnion {
    /// Build a union; member schema names become tags.
    pub fn new(
        name: impl Into<String>,
        discriminator: impl Into<String>,
        members: &[Arc<Schema>],
    ) -> Result<Self> {
        let name = name.into();
        let discriminator = discriminator.into();

        if members.is_empty() {
            return Err(OdmError::schema(format!("union '{}' has no members", name)));
        }
        for member in members {
            if member.field(&discriminator).is_some() {
                return Err(OdmError::schema(format!(
                    "discriminator '{}' collides with a field of '{}'",
                    discriminator,
                    member.name()
                )));
            }
        }

        let tag_schema = Schema::define(
            name.clone(),
            [FieldDecl::explicit(discriminator.clone(), Field::keyword().required())],
        )?;

        let refs: Vec<&Schema> = members.iter().map(|m| m.as_ref()).collect();
        let physical = Schema::merge_compatible(name, &refs)?;
        let physical = Schema::merge(&physical, &tag_schema).renamed(physical.name.clone());

        let mut tagged: Vec<(String, Arc<Schema>)> = Vec::with_capacity(members.len());
        for member in members {
            if tagged.iter().any(|(tag, _)| tag == member.name()) {
                return Err(OdmError::schema(format!("duplicate union member '{}'", member.name())));
            }
            let mut with_tag = Schema::merge(member, &tag_schema).renamed(member.name());
            if with_tag.index.is_none() {
                with_tag.index = physical.index.clone();
            }
            tagged.push((member.name().to_string(), Arc::new(with_tag)));
        }

        Ok(Self {
            schema: Arc::new(physical),
            discriminator,
            members: tagged,
        })
    }

    /// The physical schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Discriminator field name.
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Member schema for a tag.
    pub fn member(&self, tag: &str) -> Option<&Arc<Schema>> {
        self.members.iter().find(|(t, _)| t == tag).map(|(_, s)| s)
    }

    /// Tags in declaration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(t, _)| t.as_str())
    }

    /// Field names belonging to a tag, excluding the discriminator.
    pub fn fields_of(&self, tag: &str) -> Option<Vec<&str>> {
        self.member(tag).map(|schema| {
            schema
                .fields()
                .map(|(name, _)| name)
                .filter(|name| *name != self.discriminator)
                .collect()
        })
    }

    /// Pick the member schema for a stored source, falling back to the
    /// physical schema when the tag is missing or unknown.
    pub fn resolve(&self, source: &Value) -> Arc<Schema> {
        source
            .get(&self.discriminator)
            .and_then(Value::as_str)
            .and_then(|tag| self.member(tag))
            .cloned()
            .unwrap_or_else(|| self.schema.clone())
    }
}

/// Named collection of schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define and register a schema.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        decls: impl IntoIterator<Item = FieldDecl>,
    ) -> Result<Arc<Schema>> {
        let schema = Schema::define(name, decls)?;
        Ok(self.register(schema))
    }

    /// Register a built schema, replacing any schema with the same name.
    pub fn register(&mut self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name().to_string(), schema.clone());
        schema
    }

    /// Look up a schema.
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).cloned()
    }

    /// Merge two registered schemas and register the result as the child.
    pub fn merge(&mut self, parent: &str, child: &str) -> Result<Arc<Schema>> {
        let parent = self.require(parent)?;
        let child = self.require(child)?;
        Ok(self.register(Schema::merge(&parent, &child)))
    }

    /// Register a tagged union over registered schemas.
    pub fn define_union(
        &mut self,
        name: impl Into<String>,
        discriminator: impl Into<String>,
        members: &[&str],
    ) -> Result<TaggedUnion> {
        let members = members
            .iter()
            .map(|m| self.require(m))
            .collect::<Result<Vec<_>>>()?;
        let union = TaggedUnion::new(name, discriminator, &members)?;
        self.schemas
            .insert(union.schema().name().to_string(), union.schema().clone());
        Ok(union)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn require(&self, name: &str) -> Result<Arc<Schema>> {
        self.get(name)
            .ok_or_else(|| OdmError::schema(format!("unknown schema '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, Component};

    fn one(name: &str, field_name: &str, field: Field) -> Schema {
        Schema::builder(name).field(field_name, field).build().unwrap()
    }

    #[test]
    fn test_merge_override() {
        let parent = one("A", "a", Field::text());
        let child = one("B", "a", Field::keyword());
        let merged = Schema::merge(&parent, &child);
        assert_eq!(merged.field("a").unwrap().kind, FieldKind::Keyword);
        assert_eq!(merged.name(), "B");
    }

    #[test]
    fn test_merge_keeps_parent_order() {
        let parent = Schema::builder("P")
            .field("a", Field::text())
            .field("b", Field::text())
            .build()
            .unwrap();
        let child = Schema::builder("C")
            .field("c", Field::text())
            .field("a", Field::keyword())
            .build()
            .unwrap();
        let merged = Schema::merge(&parent, &child);
        let names: Vec<&str> = merged.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = Schema::builder("A")
            .field("x", Field::text())
            .field("y", Field::integer())
            .build()
            .unwrap();
        let b = Schema::builder("B")
            .field("y", Field::long())
            .field("z", Field::keyword())
            .build()
            .unwrap();
        let c = Schema::builder("C")
            .field("x", Field::keyword())
            .field("w", Field::boolean())
            .build()
            .unwrap();

        let left = Schema::merge(&Schema::merge(&a, &b), &c);
        let right = Schema::merge(&a, &Schema::merge(&b, &c));
        assert_eq!(left.to_wire_spec(), right.to_wire_spec());
        assert_eq!(
            serde_json::to_string(&left.to_wire_spec()).unwrap(),
            serde_json::to_string(&right.to_wire_spec()).unwrap()
        );
    }

    #[test]
    fn test_ancestors_must_agree() {
        let a = one("A", "shared", Field::text());
        let b = one("B", "shared", Field::keyword());
        let err = Schema::inherit("C", &[&a, &b], Vec::<FieldDecl>::new()).unwrap_err();
        assert!(matches!(err, OdmError::SchemaConflict { ref field, .. } if field == "shared"));

        let c = one("C", "shared", Field::text().analyzer(Analyzer::builtin("english")));
        let ok = Schema::inherit("D", &[&a, &c], [FieldDecl::typed::<bool>("flag")]).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn test_own_fields_override_ancestors() {
        let a = one("A", "title", Field::text());
        let derived = Schema::inherit(
            "B",
            &[&a],
            [FieldDecl::explicit("title", Field::keyword())],
        )
        .unwrap();
        assert_eq!(derived.field("title").unwrap().kind, FieldKind::Keyword);
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let err = Schema::builder("X")
            .typed::<String>("a")
            .typed::<i32>("a")
            .build()
            .unwrap_err();
        assert!(err.is_schema_error());
    }

    #[test]
    fn test_inference_errors_at_definition() {
        let err = Schema::builder("X")
            .decl(FieldDecl::hinted("anything", crate::hint::TypeHint::Any))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("anything"));
    }

    #[test]
    fn test_wire_spec_deterministic_and_ordered() {
        let comment = Arc::new(
            Schema::builder("Comment")
                .typed::<String>("author")
                .typed::<chrono::NaiveDate>("created")
                .build()
                .unwrap(),
        );
        let post = Schema::builder("Post")
            .field("title", Field::text().sub_field("raw", Field::keyword()))
            .typed::<Vec<String>>("tags")
            .decl(FieldDecl::hinted(
                "comments",
                crate::hint::TypeHint::list(crate::hint::TypeHint::object(comment)),
            ))
            .strict()
            .build()
            .unwrap();

        let first = serde_json::to_string(&post.to_wire_spec()).unwrap();
        let second = serde_json::to_string(&post.to_wire_spec()).unwrap();
        assert_eq!(first, second);

        assert_eq!(
            post.to_wire_spec(),
            json!({
                "dynamic": "strict",
                "properties": {
                    "title": { "type": "text", "fields": { "raw": { "type": "keyword" } } },
                    "tags": { "type": "text" },
                    "comments": {
                        "type": "nested",
                        "properties": {
                            "author": { "type": "text" },
                            "created": { "type": "date", "format": "yyyy-MM-dd" }
                        }
                    }
                }
            })
        );
        assert!(first.find("\"title\"").unwrap() < first.find("\"comments\"").unwrap());
    }

    #[test]
    fn test_analysis_collected_from_nested_schemas() {
        let folding: Analyzer = Analyzer::custom("folding", Component::builtin("standard"))
            .filter(Component::builtin("asciifolding"))
            .into();
        let inner = Arc::new(one("Inner", "body", Field::text().analyzer(folding)));
        let outer = one("Outer", "inner", Field::object(inner));

        let analysis = outer.analysis().unwrap().to_json();
        assert_eq!(analysis["analyzer"]["folding"]["tokenizer"], json!("standard"));
    }

    #[test]
    fn test_proxy_paths() {
        let comment = Arc::new(one("Comment", "author", Field::keyword()));
        let post = Schema::builder("Post")
            .field("title", Field::text().sub_field("raw", Field::keyword()))
            .field("comments", Field::nested(comment))
            .build()
            .unwrap();

        let raw = post.proxy("title.raw").unwrap();
        assert_eq!(raw.path(), "title.raw");
        assert_eq!(raw.kind(), FieldKind::Keyword);

        let author = post.proxy("comments").unwrap().sub("author").unwrap();
        assert_eq!(author.path(), "comments.author");

        assert!(post.proxy("missing").is_none());
        assert!(post.proxy("title.nope").is_none());
        assert_eq!(raw.desc().to_json(), json!({ "title.raw": { "order": "desc" } }));
    }

    #[test]
    fn test_validate_object_strict() {
        let strict = Schema::builder("S").typed::<String>("a").strict().build().unwrap();
        let mut values = Map::new();
        values.insert("a".to_string(), json!("x"));
        assert!(strict.validate_object("", &values).is_ok());
        values.insert("b".to_string(), json!(1));
        assert!(strict.validate_object("", &values).is_err());
    }

    #[test]
    fn test_check_required_descends() {
        let inner = Arc::new(Schema::builder("Inner").typed::<String>("name").build().unwrap());
        let outer = Schema::builder("Outer")
            .field("inner", Field::nested(inner))
            .build()
            .unwrap();

        let mut values = Map::new();
        values.insert("inner".to_string(), json!([{ "name": "ok" }, {}]));
        let err = outer.check_required("", &values).unwrap_err();
        assert!(err.to_string().contains("inner.name"));
    }

    #[test]
    fn test_required_list_may_be_empty() {
        let schema = Schema::builder("Note")
            .typed::<String>("body")
            .typed::<Vec<String>>("tags")
            .build()
            .unwrap();
        let tags = schema.field("tags").unwrap();
        assert!(tags.required && tags.multi);

        let mut values = Map::new();
        values.insert("body".to_string(), json!("x"));
        assert!(schema.check_required("", &values).is_ok());

        values.insert("tags".to_string(), json!([]));
        assert!(schema.check_required("", &values).is_ok());

        values.remove("body");
        assert!(schema.check_required("", &values).is_err());
    }

    #[test]
    fn test_tagged_union() {
        let post = Arc::new(Schema::builder("post").typed::<String>("title").build().unwrap());
        let answer = Arc::new(
            Schema::builder("answer")
                .typed::<String>("body")
                .typed::<Option<bool>>("accepted")
                .build()
                .unwrap(),
        );
        let union = TaggedUnion::new("qa", "kind", &[post, answer]).unwrap();

        let names: Vec<&str> = union.schema().fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["title", "body", "accepted", "kind"]);
        assert_eq!(union.fields_of("answer").unwrap(), vec!["body", "accepted"]);
        assert_eq!(union.tags().collect::<Vec<_>>(), vec!["post", "answer"]);

        let resolved = union.resolve(&json!({ "kind": "answer", "body": "42" }));
        assert_eq!(resolved.name(), "answer");
        let fallback = union.resolve(&json!({ "body": "?" }));
        assert_eq!(fallback.name(), "qa");
    }

    #[test]
    fn test_union_rejects_conflicts() {
        let a = Arc::new(one("a", "x", Field::text()));
        let b = Arc::new(one("b", "x", Field::integer()));
        assert!(TaggedUnion::new("u", "kind", &[a.clone(), b]).is_err());

        let c = Arc::new(one("c", "kind", Field::keyword()));
        assert!(TaggedUnion::new("u", "kind", &[a, c]).is_err());
    }

    #[test]
    fn test_registry() {
        let mut registry = SchemaRegistry::new();
        registry.define("base", [FieldDecl::typed::<String>("a")]).unwrap();
        registry
            .define("child", [FieldDecl::explicit("a", Field::keyword())])
            .unwrap();

        let merged = registry.merge("base", "child").unwrap();
        assert_eq!(merged.field("a").unwrap().kind, FieldKind::Keyword);
        assert_eq!(registry.names(), vec!["base", "child"]);
        assert!(registry.merge("base", "missing").is_err());

        let union = registry.define_union("all", "kind", &["base"]).unwrap();
        assert_eq!(union.discriminator(), "kind");
        assert!(registry.get("all").is_some());
    }
}
