//! Index and template descriptors.

use crate::{
    analysis::{AnalysisSettings, Analyzer, AnalyzeToken, parse_tokens},
    connections::connections,
    document::ensure_concrete,
    error::{OdmError, Result},
    schema::Schema,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An index: settings, aliases and the schemas stored in it.
///
/// The name may be a pattern (`logs-*`) when the descriptor is only used as
/// a template or a search target.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    settings: Map<String, Value>,
    aliases: Map<String, Value>,
    schemas: Vec<Arc<Schema>>,
    analyzers: Vec<Analyzer>,
    using: Option<String>,
}

impl Index {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Map::new(),
            aliases: Map::new(),
            schemas: Vec::new(),
            analyzers: Vec::new(),
            using: None,
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set an index setting.
    pub fn settings(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Set the number of shards.
    pub fn shards(self, shards: u32) -> Self {
        self.settings("number_of_shards", json!(shards))
    }

    /// Set the number of replicas.
    pub fn replicas(self, replicas: u32) -> Self {
        self.settings("number_of_replicas", json!(replicas))
    }

    /// Set the refresh interval.
    pub fn refresh_interval(self, interval: impl Into<String>) -> Self {
        self.settings("refresh_interval", Value::String(interval.into()))
    }

    /// Add an alias, optionally filtered.
    pub fn alias(mut self, name: impl Into<String>, filter: Option<Value>) -> Self {
        let body = match filter {
            Some(filter) => json!({ "filter": filter }),
            None => json!({}),
        };
        self.aliases.insert(name.into(), body);
        self
    }

    /// Store documents of `schema` in this index.
    pub fn document(mut self, schema: Arc<Schema>) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Define an analyzer not referenced by any field.
    pub fn analyzer(mut self, analyzer: impl Into<Analyzer>) -> Self {
        self.analyzers.push(analyzer.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Registered schemas.
    pub fn schemas(&self) -> &[Arc<Schema>] {
        &self.schemas
    }

    /// A registered schema defaulting to this index.
    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas
            .iter()
            .find(|s| s.name() == name)
            .map(|s| Arc::new(s.as_ref().clone().with_index(self.name.clone())))
    }

    /// Union of all registered schemas; shared fields must agree on kind.
    pub fn mapping(&self) -> Result<Schema> {
        let schemas: Vec<&Schema> = self.schemas.iter().map(|s| s.as_ref()).collect();
        Schema::merge_compatible(self.name.clone(), &schemas)
    }

    /// Custom analysis collected from schemas and explicit analyzers.
    pub fn analysis(&self) -> Result<AnalysisSettings> {
        let mut analysis = AnalysisSettings::new();
        for schema in &self.schemas {
            analysis.merge(&schema.analysis()?)?;
        }
        for analyzer in &self.analyzers {
            analysis.add_analyzer(analyzer)?;
        }
        Ok(analysis)
    }

    /// Render the index creation body.
    pub fn to_wire(&self) -> Result<Value> {
        let mut body = Map::new();

        let mut settings = self.settings.clone();
        let analysis = self.analysis()?;
        if !analysis.is_empty() {
            settings.insert("analysis".to_string(), analysis.to_json());
        }
        if !settings.is_empty() {
            body.insert("settings".to_string(), Value::Object(settings));
        }

        if !self.schemas.is_empty() {
            body.insert("mappings".to_string(), self.mapping()?.to_wire_spec());
        }

        if !self.aliases.is_empty() {
            body.insert("aliases".to_string(), Value::Object(self.aliases.clone()));
        }

        Ok(Value::Object(body))
    }

    /// Create the index. Returns `false` when it already existed and
    /// `ignore_if_exists` is set.
    pub async fn create(&self, ignore_if_exists: bool) -> Result<bool> {
        ensure_concrete(&self.name)?;
        let body = self.to_wire()?;
        info!(index = %self.name, "Creating index");

        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn.transport().create_index(&self.name, body).await?;

        if response.status == 400
            && response.body["error"]["type"] == "resource_already_exists_exception"
        {
            if ignore_if_exists {
                debug!(index = %self.name, "Index already exists");
                return Ok(false);
            }
            return Err(OdmError::IndexExists(self.name.clone()));
        }
        response.error_for_status()?;
        Ok(true)
    }

    /// Delete the index. Returns `false` when it was missing and
    /// `ignore_if_missing` is set.
    pub async fn delete(&self, ignore_if_missing: bool) -> Result<bool> {
        info!(index = %self.name, "Deleting index");

        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn.transport().delete_index(&self.name).await?;

        if response.is_not_found() {
            if ignore_if_missing {
                warn!(index = %self.name, "Index to delete was not found");
                return Ok(false);
            }
            return Err(OdmError::IndexNotFound(self.name.clone()));
        }
        response.error_for_status()?;
        Ok(true)
    }

    /// Check whether the index exists.
    pub async fn exists(&self) -> Result<bool> {
        debug!(index = %self.name, "Checking if index exists");
        let conn = connections().get_connection(self.using.as_deref())?;
        conn.transport().index_exists(&self.name).await
    }

    /// Make recent writes searchable.
    pub async fn refresh(&self) -> Result<()> {
        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn.transport().refresh(&self.name).await?;
        if response.is_not_found() {
            return Err(OdmError::IndexNotFound(self.name.clone()));
        }
        response.error_for_status()?;
        Ok(())
    }

    /// Run text through an analyzer defined in this index (or a built-in).
    pub async fn analyze(&self, text: &str, analyzer: Option<&str>) -> Result<Vec<AnalyzeToken>> {
        let mut body = Map::new();
        if let Some(analyzer) = analyzer {
            body.insert("analyzer".to_string(), json!(analyzer));
        }
        body.insert("text".to_string(), json!(text));

        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn
            .transport()
            .analyze(Some(self.name.as_str()), Value::Object(body))
            .await?
            .error_for_status()?;
        parse_tokens(&response.body)
    }

    /// Copy under a new name. Schemas are shared; settings and aliases are
    /// independent copies.
    pub fn clone_as(&self, name: impl Into<String>, using: Option<&str>) -> Index {
        Index {
            name: name.into(),
            using: using.map(str::to_string).or_else(|| self.using.clone()),
            ..self.clone()
        }
    }

    /// Turn the descriptor into a template matching its name.
    pub fn as_template(&self, template_name: impl Into<String>, order: Option<i64>) -> Result<IndexTemplate> {
        Ok(IndexTemplate {
            name: template_name.into(),
            pattern: self.name.clone(),
            order,
            body: self.to_wire()?,
            using: self.using.clone(),
        })
    }
}

/// An index template.
///
/// Saving a template affects indices created afterwards only.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTemplate {
    name: String,
    pattern: String,
    order: Option<i64>,
    body: Value,
    using: Option<String>,
}

impl IndexTemplate {
    /// Template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Precedence among matching templates.
    pub fn order(&self) -> Option<i64> {
        self.order
    }

    /// Render the template body.
    pub fn to_wire(&self) -> Value {
        let mut template = Map::new();
        template.insert("index_patterns".to_string(), json!([self.pattern]));
        if let Some(order) = self.order {
            template.insert("order".to_string(), json!(order));
        }
        if let Value::Object(body) = &self.body {
            for (key, value) in body {
                template.insert(key.clone(), value.clone());
            }
        }
        Value::Object(template)
    }

    /// Register the template.
    pub async fn save(&self) -> Result<()> {
        info!(template = %self.name, pattern = %self.pattern, "Saving index template");
        let conn = connections().get_connection(self.using.as_deref())?;
        conn.transport()
            .put_template(&self.name, self.to_wire())
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Component;
    use crate::field::Field;

    fn blog_index() -> Index {
        let folding: Analyzer = Analyzer::custom("folding", Component::builtin("standard"))
            .filter(Component::builtin("lowercase"))
            .into();
        let post = Arc::new(
            Schema::builder("Post")
                .field("title", Field::text().analyzer(folding))
                .typed::<Vec<String>>("tags")
                .build()
                .unwrap(),
        );
        Index::new("blog")
            .shards(1)
            .replicas(0)
            .alias("blog-current", None)
            .alias("blog-rust", Some(json!({ "term": { "tags": "rust" } })))
            .document(post)
    }

    #[test]
    fn test_to_wire() {
        let body = blog_index().to_wire().unwrap();
        assert_eq!(body["settings"]["number_of_shards"], json!(1));
        assert_eq!(body["settings"]["analysis"]["analyzer"]["folding"]["type"], json!("custom"));
        assert_eq!(body["mappings"]["properties"]["title"]["analyzer"], json!("folding"));
        assert_eq!(body["aliases"]["blog-current"], json!({}));
        assert_eq!(body["aliases"]["blog-rust"]["filter"]["term"]["tags"], json!("rust"));
    }

    #[test]
    fn test_empty_index_body() {
        assert_eq!(Index::new("x").to_wire().unwrap(), json!({}));
    }

    #[test]
    fn test_conflicting_schemas() {
        let a = Arc::new(Schema::builder("A").field("f", Field::text()).build().unwrap());
        let b = Arc::new(Schema::builder("B").field("f", Field::long()).build().unwrap());
        let index = Index::new("mixed").document(a).document(b);
        assert!(matches!(index.to_wire(), Err(OdmError::SchemaConflict { .. })));
    }

    #[test]
    fn test_clone_as_is_independent() {
        let original = blog_index();
        let copy = original.clone_as("blog-v2", Some("other")).replicas(2);
        assert_eq!(copy.name(), "blog-v2");
        assert!(Arc::ptr_eq(&copy.schemas()[0], &original.schemas()[0]));
        assert_eq!(original.to_wire().unwrap()["settings"]["number_of_replicas"], json!(0));
        assert_eq!(copy.to_wire().unwrap()["settings"]["number_of_replicas"], json!(2));
    }

    #[test]
    fn test_bound_schema_defaults_to_index() {
        let index = blog_index();
        let schema = index.schema("Post").unwrap();
        assert_eq!(schema.default_index(), Some("blog"));
        assert!(index.schema("Nope").is_none());
    }

    #[test]
    fn test_template_body() {
        let template = Index::new("logs-*")
            .shards(2)
            .document(Arc::new(Schema::builder("Log").typed::<String>("message").build().unwrap()))
            .as_template("logs", Some(5))
            .unwrap();

        let body = template.to_wire();
        assert_eq!(body["index_patterns"], json!(["logs-*"]));
        assert_eq!(body["order"], json!(5));
        assert_eq!(body["settings"]["number_of_shards"], json!(2));
        assert_eq!(body["mappings"]["properties"]["message"]["type"], json!("text"));
        assert_eq!(template.pattern(), "logs-*");
    }
}
