//! Bulk dispatch of document writes.

use crate::{
    connections::connections,
    document::Document,
    error::{OdmError, Result},
    transport::DocTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// A batch of document actions sent in one request.
///
/// Documents are read when the action is added; later local changes are
/// not picked up.
#[derive(Debug, Clone, Default)]
pub struct Bulk {
    lines: Vec<Value>,
    actions: usize,
    index: Option<String>,
    using: Option<String>,
}

impl Bulk {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every action to this index instead of each document's own.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.actions
    }

    /// Whether no action is queued.
    pub fn is_empty(&self) -> bool {
        self.actions == 0
    }

    /// Index the whole document, replacing any stored version.
    pub fn index(self, doc: &Document) -> Result<Self> {
        self.write("index", doc)
    }

    /// Create the document; fails per item if the ID exists.
    pub fn create(self, doc: &Document) -> Result<Self> {
        self.write("create", doc)
    }

    /// Send the document's changed attributes. Clean documents add nothing.
    pub fn update(mut self, doc: &Document) -> Result<Self> {
        let changes = doc.changes();
        if changes.is_empty() {
            return Ok(self);
        }
        let target = self.target(doc)?;
        target.require_id()?;
        self.push("update", &target, Some(json!({ "doc": changes })));
        Ok(self)
    }

    /// Delete the stored document.
    pub fn delete(mut self, doc: &Document) -> Result<Self> {
        let target = self.target(doc)?;
        target.require_id()?;
        self.push("delete", &target, None);
        Ok(self)
    }

    fn write(mut self, op: &str, doc: &Document) -> Result<Self> {
        doc.full_clean()?;
        let target = self.target(doc)?;
        self.push(op, &target, Some(doc.to_wire(true)));
        Ok(self)
    }

    fn target(&self, doc: &Document) -> Result<DocTarget> {
        Ok(doc.target(doc.write_index(self.index.as_deref())?))
    }

    fn push(&mut self, op: &str, target: &DocTarget, source: Option<Value>) {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), json!(target.index));
        if let Some(id) = &target.id {
            meta.insert("_id".to_string(), json!(id));
        }
        if let Some(routing) = &target.routing {
            meta.insert("routing".to_string(), json!(routing));
        }
        self.lines.push(json!({ op: meta }));
        if let Some(source) = source {
            self.lines.push(source);
        }
        self.actions += 1;
    }

    /// Request lines in dispatch order.
    pub fn lines(&self) -> &[Value] {
        &self.lines
    }

    /// Send the batch. With `raise_on_error`, any failed item turns the
    /// whole call into [`OdmError::Batch`].
    pub async fn execute(&self, raise_on_error: bool) -> Result<BulkResponse> {
        if self.is_empty() {
            return Ok(BulkResponse::default());
        }

        debug!(actions = self.actions, "Executing bulk request");
        let conn = connections().get_connection(self.using.as_deref())?;
        let response = conn
            .transport()
            .bulk(self.lines.clone())
            .await?
            .error_for_status()?;
        let result: BulkResponse = serde_json::from_value(response.body)?;

        if result.errors {
            let errors: Vec<String> = result
                .failures()
                .map(|item| {
                    let reason = item
                        .error
                        .as_ref()
                        .map_or("Unknown error", |e| e.reason.as_str());
                    format!("{}: {}", item.id.as_deref().unwrap_or_default(), reason)
                })
                .collect();

            if raise_on_error {
                return Err(OdmError::Batch {
                    operation: "bulk",
                    succeeded: result.items.len() - errors.len(),
                    failed: errors.len(),
                    errors,
                });
            }
            warn!(failed = errors.len(), "Bulk request had failed items");
        }

        Ok(result)
    }
}

/// Bulk operation response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Time taken in milliseconds.
    pub took: u64,
    /// Whether there were errors.
    pub errors: bool,
    /// Individual item results, in request order.
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Items that carry an error.
    pub fn failures(&self) -> impl Iterator<Item = &BulkItemStatus> {
        self.items
            .iter()
            .map(BulkItem::status)
            .filter(|status| status.error.is_some())
    }
}

/// Individual bulk item result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkItem {
    /// Index result.
    Index(BulkItemStatus),
    /// Create result.
    Create(BulkItemStatus),
    /// Update result.
    Update(BulkItemStatus),
    /// Delete result.
    Delete(BulkItemStatus),
}

impl BulkItem {
    /// Status regardless of the operation.
    pub fn status(&self) -> &BulkItemStatus {
        match self {
            BulkItem::Index(s) | BulkItem::Create(s) | BulkItem::Update(s) | BulkItem::Delete(s) => s,
        }
    }
}

/// Status of a bulk item operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemStatus {
    /// Index name.
    #[serde(rename = "_index")]
    pub index: String,
    /// Document ID.
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// Document version.
    #[serde(rename = "_version", default)]
    pub version: Option<i64>,
    /// Sequence number.
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<i64>,
    /// Primary term.
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<i64>,
    /// Result status.
    #[serde(default)]
    pub result: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// Error details.
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

impl BulkItemStatus {
    /// Check if the operation was successful.
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Bulk item error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error reason.
    pub reason: String,
}
