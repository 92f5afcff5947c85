//! Analyzer, tokenizer and filter definitions referenced by fields.
//!
//! Built-in components are referenced by name only. Custom components carry
//! their definition, which ends up in the `settings.analysis` section of the
//! index that uses them.

use crate::{
    connections::connections,
    error::{OdmError, Result},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

/// A tokenizer, token filter or char filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    name: String,
    definition: Option<Value>,
}

impl Component {
    /// Reference a component shipped with the engine.
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: None,
        }
    }

    /// Define a named component, e.g. `{"type": "stop", "stopwords": [..]}`.
    pub fn custom(name: impl Into<String>, definition: Value) -> Self {
        Self {
            name: name.into(),
            definition: Some(definition),
        }
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition, `None` for built-ins.
    pub fn definition(&self) -> Option<&Value> {
        self.definition.as_ref()
    }

    fn inline(&self) -> Value {
        match &self.definition {
            Some(def) => def.clone(),
            None => json!(self.name),
        }
    }
}

/// Custom analyzer built from a tokenizer and filter chains.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAnalyzer {
    name: String,
    tokenizer: Component,
    filters: Vec<Component>,
    char_filters: Vec<Component>,
}

impl CustomAnalyzer {
    /// Add a token filter.
    pub fn filter(mut self, filter: Component) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a char filter.
    pub fn char_filter(mut self, filter: Component) -> Self {
        self.char_filters.push(filter);
        self
    }

    fn definition(&self) -> Value {
        let mut def = Map::new();
        def.insert("type".to_string(), json!("custom"));
        def.insert("tokenizer".to_string(), json!(self.tokenizer.name));
        if !self.filters.is_empty() {
            let names: Vec<&str> = self.filters.iter().map(|f| f.name.as_str()).collect();
            def.insert("filter".to_string(), json!(names));
        }
        if !self.char_filters.is_empty() {
            let names: Vec<&str> = self.char_filters.iter().map(|f| f.name.as_str()).collect();
            def.insert("char_filter".to_string(), json!(names));
        }
        Value::Object(def)
    }
}

/// Analyzer referenced by a text field.
#[derive(Debug, Clone, PartialEq)]
pub enum Analyzer {
    /// Analyzer shipped with the engine (`standard`, `english`, ...).
    Builtin(String),
    /// Analyzer defined in the index settings.
    Custom(CustomAnalyzer),
}

impl Analyzer {
    /// Reference a built-in analyzer.
    pub fn builtin(name: impl Into<String>) -> Self {
        Analyzer::Builtin(name.into())
    }

    /// Start a custom analyzer definition.
    pub fn custom(name: impl Into<String>, tokenizer: Component) -> CustomAnalyzer {
        CustomAnalyzer {
            name: name.into(),
            tokenizer,
            filters: Vec::new(),
            char_filters: Vec::new(),
        }
    }

    /// Analyzer name as referenced in mappings.
    pub fn name(&self) -> &str {
        match self {
            Analyzer::Builtin(name) => name,
            Analyzer::Custom(custom) => &custom.name,
        }
    }

    /// Run the analyzer on `text` through the engine's analyze API.
    ///
    /// Custom analyzers are sent inline, so the index does not need to exist.
    pub async fn simulate(&self, text: &str, using: Option<&str>) -> Result<Vec<AnalyzeToken>> {
        let body = self.simulate_body(text);
        debug!(analyzer = self.name(), "Simulating analyzer");

        let conn = connections().get_connection(using)?;
        let response = conn.transport().analyze(None, body).await?.error_for_status()?;
        parse_tokens(&response.body)
    }

    pub(crate) fn simulate_body(&self, text: &str) -> Value {
        match self {
            Analyzer::Builtin(name) => json!({ "analyzer": name, "text": text }),
            Analyzer::Custom(custom) => {
                let mut body = Map::new();
                body.insert("tokenizer".to_string(), custom.tokenizer.inline());
                if !custom.filters.is_empty() {
                    let filters: Vec<Value> = custom.filters.iter().map(Component::inline).collect();
                    body.insert("filter".to_string(), Value::Array(filters));
                }
                if !custom.char_filters.is_empty() {
                    let filters: Vec<Value> =
                        custom.char_filters.iter().map(Component::inline).collect();
                    body.insert("char_filter".to_string(), Value::Array(filters));
                }
                body.insert("text".to_string(), json!(text));
                Value::Object(body)
            }
        }
    }
}

impl From<CustomAnalyzer> for Analyzer {
    fn from(custom: CustomAnalyzer) -> Self {
        Analyzer::Custom(custom)
    }
}

/// A token produced by the analyze API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeToken {
    /// Token text.
    pub token: String,
    /// Start offset in the input.
    pub start_offset: u64,
    /// End offset in the input.
    pub end_offset: u64,
    /// Token position.
    pub position: u64,
    /// Token type.
    #[serde(rename = "type", default)]
    pub token_type: String,
}

pub(crate) fn parse_tokens(body: &Value) -> Result<Vec<AnalyzeToken>> {
    match body.get("tokens") {
        Some(tokens) => Ok(serde_json::from_value(tokens.clone())?),
        None => Ok(Vec::new()),
    }
}

/// The `analysis` section of index settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisSettings {
    analyzer: Map<String, Value>,
    tokenizer: Map<String, Value>,
    filter: Map<String, Value>,
    char_filter: Map<String, Value>,
}

impl AnalysisSettings {
    /// Create empty analysis settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an analyzer and the custom components it references.
    ///
    /// Built-in analyzers add nothing. Registering a different definition
    /// under a name already present fails with [`OdmError::SchemaConflict`].
    pub fn add_analyzer(&mut self, analyzer: &Analyzer) -> Result<()> {
        let Analyzer::Custom(custom) = analyzer else {
            return Ok(());
        };

        insert_unique(&mut self.analyzer, &custom.name, custom.definition())?;
        if let Some(def) = &custom.tokenizer.definition {
            insert_unique(&mut self.tokenizer, &custom.tokenizer.name, def.clone())?;
        }
        for filter in &custom.filters {
            if let Some(def) = &filter.definition {
                insert_unique(&mut self.filter, &filter.name, def.clone())?;
            }
        }
        for filter in &custom.char_filters {
            if let Some(def) = &filter.definition {
                insert_unique(&mut self.char_filter, &filter.name, def.clone())?;
            }
        }
        Ok(())
    }

    /// Merge another set of definitions into this one.
    pub fn merge(&mut self, other: &AnalysisSettings) -> Result<()> {
        for (name, def) in &other.analyzer {
            insert_unique(&mut self.analyzer, name, def.clone())?;
        }
        for (name, def) in &other.tokenizer {
            insert_unique(&mut self.tokenizer, name, def.clone())?;
        }
        for (name, def) in &other.filter {
            insert_unique(&mut self.filter, name, def.clone())?;
        }
        for (name, def) in &other.char_filter {
            insert_unique(&mut self.char_filter, name, def.clone())?;
        }
        Ok(())
    }

    /// Whether no custom definitions were collected.
    pub fn is_empty(&self) -> bool {
        self.analyzer.is_empty()
            && self.tokenizer.is_empty()
            && self.filter.is_empty()
            && self.char_filter.is_empty()
    }

    /// Render as the `settings.analysis` object, omitting empty sections.
    pub fn to_json(&self) -> Value {
        let mut analysis = Map::new();
        for (key, section) in [
            ("analyzer", &self.analyzer),
            ("tokenizer", &self.tokenizer),
            ("filter", &self.filter),
            ("char_filter", &self.char_filter),
        ] {
            if !section.is_empty() {
                analysis.insert(key.to_string(), Value::Object(section.clone()));
            }
        }
        Value::Object(analysis)
    }
}

fn insert_unique(section: &mut Map<String, Value>, name: &str, def: Value) -> Result<()> {
    match section.get(name) {
        Some(existing) if *existing != def => Err(OdmError::SchemaConflict {
            field: name.to_string(),
            existing: existing.to_string(),
            incoming: def.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            section.insert(name.to_string(), def);
            Ok(())
        }
    }
}
