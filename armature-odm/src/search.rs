//! Search requests returning schema-bound documents.

use crate::{
    connections::connections,
    document::Document,
    error::{OdmError, Result},
    schema::{Schema, TaggedUnion},
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// A sort clause on one field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    field: String,
    order: SortOrder,
}

impl Sort {
    /// Sort on `field`.
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    /// Field path.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Order.
    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Render as `{ field: { "order": ... } }`.
    pub fn to_json(&self) -> Value {
        json!({ self.field.as_str(): { "order": self.order.as_str() } })
    }
}

/// Aggregation types.
#[derive(Debug, Clone)]
pub enum Aggregation {
    /// Terms aggregation.
    Terms {
        /// Field to aggregate on.
        field: String,
        /// Maximum number of buckets.
        size: Option<u64>,
    },
    /// Date histogram aggregation.
    DateHistogram {
        /// Field containing dates.
        field: String,
        /// Calendar interval (day, week, month, etc.).
        calendar_interval: String,
    },
    /// Avg aggregation.
    Avg {
        /// Field to average.
        field: String,
    },
    /// Sum aggregation.
    Sum {
        /// Field to sum.
        field: String,
    },
    /// Min aggregation.
    Min {
        /// Field to find minimum.
        field: String,
    },
    /// Max aggregation.
    Max {
        /// Field to find maximum.
        field: String,
    },
    /// Cardinality (distinct count) aggregation.
    Cardinality {
        /// Field to count.
        field: String,
    },
    /// Any aggregation body.
    Raw(Value),
}

impl Aggregation {
    /// Terms aggregation on `field`.
    pub fn terms(field: impl Into<String>) -> Self {
        Aggregation::Terms {
            field: field.into(),
            size: None,
        }
    }

    /// Render the aggregation body.
    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms { field, size } => {
                let mut terms = json!({ "field": field });
                if let Some(size) = size {
                    terms["size"] = json!(size);
                }
                json!({ "terms": terms })
            }
            Aggregation::DateHistogram {
                field,
                calendar_interval,
            } => json!({
                "date_histogram": { "field": field, "calendar_interval": calendar_interval }
            }),
            Aggregation::Avg { field } => json!({ "avg": { "field": field } }),
            Aggregation::Sum { field } => json!({ "sum": { "field": field } }),
            Aggregation::Min { field } => json!({ "min": { "field": field } }),
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
            Aggregation::Cardinality { field } => json!({ "cardinality": { "field": field } }),
            Aggregation::Raw(body) => body.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Schema(Arc<Schema>),
    Union(TaggedUnion),
}

impl Target {
    fn schema(&self) -> &Schema {
        match self {
            Target::Schema(schema) => schema,
            Target::Union(union) => union.schema(),
        }
    }

    fn document(&self, hit: &Value) -> Document {
        match self {
            Target::Schema(schema) => Document::from_hit(schema.clone(), hit),
            Target::Union(union) => union.from_hit(hit),
        }
    }
}

/// Search request builder.
///
/// Clauses added with [`match_field`](Search::match_field) and
/// [`term`](Search::term) are combined with any raw query in a `bool`
/// query's `must` list.
#[derive(Debug, Clone)]
pub struct Search {
    target: Target,
    indices: Vec<String>,
    query: Option<Value>,
    clauses: Vec<Value>,
    from: Option<u64>,
    size: Option<u64>,
    sort: Vec<Sort>,
    source_includes: Option<Vec<String>>,
    source_excludes: Option<Vec<String>>,
    aggregations: Map<String, Value>,
    track_total_hits: Option<bool>,
    using: Option<String>,
}

impl Search {
    /// Search documents of one schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_target(Target::Schema(schema))
    }

    /// Search a tagged union; each hit becomes a document of its member.
    pub fn for_union(union: &TaggedUnion) -> Self {
        Self::with_target(Target::Union(union.clone()))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            indices: Vec::new(),
            query: None,
            clauses: Vec::new(),
            from: None,
            size: None,
            sort: Vec::new(),
            source_includes: None,
            source_excludes: None,
            aggregations: Map::new(),
            track_total_hits: None,
            using: None,
        }
    }

    /// Search these indices (names or patterns) instead of the schema default.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.indices.push(index.into());
        self
    }

    /// Set a raw query.
    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Require a full-text match.
    pub fn match_field(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        let field: String = field.into();
        let text: String = text.into();
        self.clauses.push(json!({ "match": { field: text } }));
        self
    }

    /// Require an exact value.
    pub fn term(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field: String = field.into();
        let value: Value = value.into();
        self.clauses.push(json!({ "term": { field: value } }));
        self
    }

    /// Set pagination offset.
    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    /// Set maximum results.
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Add a sort clause, e.g. from a field proxy.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    /// Add a sort clause by field path.
    pub fn sort_by(self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort(Sort::new(field, order))
    }

    /// Include only specific fields in the returned sources.
    pub fn source_includes(mut self, fields: Vec<String>) -> Self {
        self.source_includes = Some(fields);
        self
    }

    /// Exclude specific fields from the returned sources.
    pub fn source_excludes(mut self, fields: Vec<String>) -> Self {
        self.source_excludes = Some(fields);
        self
    }

    /// Add an aggregation.
    pub fn aggregation(mut self, name: impl Into<String>, agg: Aggregation) -> Self {
        self.aggregations.insert(name.into(), agg.to_json());
        self
    }

    /// Track total hits accurately (for counts > 10000).
    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = Some(track);
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Indices the request targets; empty means all.
    pub fn indices(&self) -> Vec<String> {
        if !self.indices.is_empty() {
            return self.indices.clone();
        }
        self.target
            .schema()
            .default_index()
            .map(|index| vec![index.to_string()])
            .unwrap_or_default()
    }

    fn build_query(&self) -> Option<Value> {
        if self.clauses.is_empty() {
            return self.query.clone();
        }
        let mut must: Vec<Value> = self.query.iter().cloned().collect();
        must.extend(self.clauses.iter().cloned());
        Some(json!({ "bool": { "must": must } }))
    }

    /// Build the search body.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();

        if let Some(query) = self.build_query() {
            body.insert("query".to_string(), query);
        }

        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }

        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }

        if !self.sort.is_empty() {
            let sort: Vec<Value> = self.sort.iter().map(Sort::to_json).collect();
            body.insert("sort".to_string(), Value::Array(sort));
        }

        let mut source = Map::new();
        if let Some(includes) = &self.source_includes {
            source.insert("includes".to_string(), json!(includes));
        }
        if let Some(excludes) = &self.source_excludes {
            source.insert("excludes".to_string(), json!(excludes));
        }
        if !source.is_empty() {
            body.insert("_source".to_string(), Value::Object(source));
        }

        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), Value::Object(self.aggregations.clone()));
        }

        if let Some(track) = self.track_total_hits {
            body.insert("track_total_hits".to_string(), json!(track));
        }

        Value::Object(body)
    }

    /// Execute the search.
    pub async fn execute(&self) -> Result<SearchResponse> {
        let indices = self.indices();
        debug!(indices = ?indices, "Searching");

        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn.transport().search(&indices, self.to_json()).await?;

        if response.is_not_found() && response.body["error"]["type"] == "index_not_found_exception" {
            return Err(OdmError::IndexNotFound(indices.join(",")));
        }
        let result = response.error_for_status()?.body;

        let hits = result["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .map(|hit| {
                        let doc = self.target.document(hit);
                        match &self.using {
                            Some(alias) => doc.using(alias.clone()),
                            None => doc,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Older engines report the total as a bare number.
        let total = result["hits"]["total"]["value"]
            .as_u64()
            .or_else(|| result["hits"]["total"].as_u64())
            .unwrap_or(0);

        Ok(SearchResponse {
            total,
            total_relation: result["hits"]["total"]["relation"]
                .as_str()
                .unwrap_or("eq")
                .to_string(),
            max_score: result["hits"]["max_score"].as_f64(),
            hits,
            aggregations: result.get("aggregations").cloned(),
            took_ms: result["took"].as_u64().unwrap_or(0),
        })
    }
}

/// Search result.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Total matching documents.
    pub total: u64,
    /// Total relation ("eq" or "gte").
    pub total_relation: String,
    /// Maximum score.
    pub max_score: Option<f64>,
    /// Matching documents with metadata.
    pub hits: Vec<Document>,
    /// Aggregation results.
    pub aggregations: Option<Value>,
    /// Time taken in milliseconds.
    pub took_ms: u64,
}

impl SearchResponse {
    /// Buckets of a bucket aggregation.
    pub fn buckets(&self, name: &str) -> &[Value] {
        self.aggregations
            .as_ref()
            .and_then(|aggs| aggs[name]["buckets"].as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
