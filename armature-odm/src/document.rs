//! Documents: schema-bound attribute maps with engine metadata.

use crate::{
    connections::connections,
    error::{OdmError, Result},
    schema::{FieldRef, Schema, TaggedUnion},
    transport::{DocTarget, Refresh, TransportResponse},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine metadata of a stored document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocMeta {
    /// Document ID.
    pub id: Option<String>,
    /// Concrete index the document lives in.
    pub index: Option<String>,
    /// Shard routing.
    pub routing: Option<String>,
    /// Relevance score of a search hit.
    pub score: Option<f64>,
    /// Document version.
    pub version: Option<i64>,
    /// Sequence number.
    pub seq_no: Option<i64>,
    /// Primary term.
    pub primary_term: Option<i64>,
}

impl DocMeta {
    pub(crate) fn update_from(&mut self, body: &Value) {
        if let Some(id) = body["_id"].as_str() {
            self.id = Some(id.to_string());
        }
        if let Some(index) = body["_index"].as_str() {
            self.index = Some(index.to_string());
        }
        if let Some(routing) = body["_routing"].as_str() {
            self.routing = Some(routing.to_string());
        }
        if let Some(score) = body["_score"].as_f64() {
            self.score = Some(score);
        }
        if let Some(version) = body["_version"].as_i64() {
            self.version = Some(version);
        }
        if let Some(seq_no) = body["_seq_no"].as_i64() {
            self.seq_no = Some(seq_no);
        }
        if let Some(term) = body["_primary_term"].as_i64() {
            self.primary_term = Some(term);
        }
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    /// Document ID.
    pub id: String,
    /// Concrete index.
    pub index: String,
    /// `created`, `updated`, `noop`, ...
    pub result: String,
    /// New version.
    pub version: Option<i64>,
    /// New sequence number.
    pub seq_no: Option<i64>,
    /// Primary term.
    pub primary_term: Option<i64>,
}

impl SaveResult {
    fn from_body(body: &Value) -> Self {
        Self {
            id: body["_id"].as_str().unwrap_or_default().to_string(),
            index: body["_index"].as_str().unwrap_or_default().to_string(),
            result: body["result"].as_str().unwrap_or_default().to_string(),
            version: body["_version"].as_i64(),
            seq_no: body["_seq_no"].as_i64(),
            primary_term: body["_primary_term"].as_i64(),
        }
    }

    /// Whether the write created a new document.
    pub fn is_created(&self) -> bool {
        self.result == "created"
    }
}

/// Options for fetching documents.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Index override.
    pub index: Option<String>,
    /// Connection alias.
    pub using: Option<String>,
    /// Shard routing.
    pub routing: Option<String>,
}

impl GetOptions {
    /// Read from a specific index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Set routing.
    pub fn routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }
}

/// What `mget` does with IDs that were not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Missing {
    /// Fail with [`OdmError::NotFound`].
    #[default]
    Raise,
    /// Leave them out of the result.
    Skip,
    /// Put `None` in their slot.
    Null,
}

/// Options for `mget`.
#[derive(Debug, Clone)]
pub struct MgetOptions {
    /// Index override.
    pub index: Option<String>,
    /// Connection alias.
    pub using: Option<String>,
    /// Missing-document policy.
    pub missing: Missing,
    /// Fail on per-document errors instead of treating them as missing.
    pub raise_on_error: bool,
}

impl Default for MgetOptions {
    fn default() -> Self {
        Self {
            index: None,
            using: None,
            missing: Missing::Raise,
            raise_on_error: true,
        }
    }
}

impl MgetOptions {
    /// Read from a specific index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Set the missing-document policy.
    pub fn missing(mut self, missing: Missing) -> Self {
        self.missing = missing;
        self
    }

    /// Set whether per-document errors fail the call.
    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }
}

/// Options for `save`.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Concrete index override.
    pub index: Option<String>,
    /// Connection alias.
    pub using: Option<String>,
    /// Refresh policy.
    pub refresh: Refresh,
    /// Run [`Document::full_clean`] first.
    pub validate: bool,
    /// Drop empty arrays and objects from the body.
    pub skip_empty: bool,
    /// Only write if the stored document still has the loaded seq_no/term.
    pub if_unchanged: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            index: None,
            using: None,
            refresh: Refresh::False,
            validate: true,
            skip_empty: true,
            if_unchanged: false,
        }
    }
}

impl SaveOptions {
    /// Write to a specific index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Set the refresh policy.
    pub fn refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    /// Skip local validation.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Keep empty arrays and objects in the body.
    pub fn keep_empty(mut self) -> Self {
        self.skip_empty = false;
        self
    }

    /// Use optimistic concurrency control.
    pub fn if_unchanged(mut self) -> Self {
        self.if_unchanged = true;
        self
    }
}

/// Options for partial updates.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Concrete index override.
    pub index: Option<String>,
    /// Connection alias.
    pub using: Option<String>,
    /// Refresh policy.
    pub refresh: Refresh,
    /// Retries on version conflicts.
    pub retry_on_conflict: Option<u32>,
    /// Create the document from the partial body if it does not exist.
    pub doc_as_upsert: bool,
}

impl UpdateOptions {
    /// Write to a specific index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Set the refresh policy.
    pub fn refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    /// Retry on version conflicts.
    pub fn retry_on_conflict(mut self, retries: u32) -> Self {
        self.retry_on_conflict = Some(retries);
        self
    }

    /// Upsert with the partial body.
    pub fn doc_as_upsert(mut self) -> Self {
        self.doc_as_upsert = true;
        self
    }
}

/// Options for `delete`.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Concrete index override.
    pub index: Option<String>,
    /// Connection alias.
    pub using: Option<String>,
    /// Refresh policy.
    pub refresh: Refresh,
    /// Return `false` instead of failing when the document is missing.
    pub ignore_not_found: bool,
}

impl DeleteOptions {
    /// Delete from a specific index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Use a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Set the refresh policy.
    pub fn refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    /// Tolerate missing documents.
    pub fn ignore_not_found(mut self) -> Self {
        self.ignore_not_found = true;
        self
    }
}

/// A server-side update script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    lang: Option<String>,
    params: Map<String, Value>,
}

impl Script {
    /// Inline script source.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            lang: None,
            params: Map::new(),
        }
    }

    /// Script language.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Add a parameter.
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Render as the `script` object.
    pub fn to_json(&self) -> Value {
        let mut script = Map::new();
        script.insert("source".to_string(), json!(self.source));
        if let Some(lang) = &self.lang {
            script.insert("lang".to_string(), json!(lang));
        }
        if !self.params.is_empty() {
            script.insert("params".to_string(), Value::Object(self.params.clone()));
        }
        Value::Object(script)
    }
}

/// An instance of a schema.
///
/// Attribute values are JSON values checked against the schema when set.
/// Unknown names become dynamic attributes unless the schema is strict.
/// An attribute that was never set is absent from the wire form; one set to
/// `null` is sent as `null`.
#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    values: Map<String, Value>,
    meta: DocMeta,
    dirty: BTreeSet<String>,
    using: Option<String>,
}

impl Document {
    /// Create an empty document.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            values: Map::new(),
            meta: DocMeta::default(),
            dirty: BTreeSet::new(),
            using: None,
        }
    }

    /// Create a document from an object of attribute values.
    pub fn construct(schema: Arc<Schema>, values: Value) -> Result<Self> {
        let Value::Object(values) = values else {
            return Err(OdmError::validation(schema.name(), "expected an object of attributes"));
        };
        let mut doc = Self::new(schema);
        for (name, value) in values {
            doc.set_value(name, value)?;
        }
        Ok(doc)
    }

    /// Create a document from any serializable value.
    ///
    /// `None` fields serialize as explicit nulls unless the type skips them
    /// with `#[serde(skip_serializing_if = "Option::is_none")]`.
    pub fn from_typed<T: Serialize>(schema: Arc<Schema>, value: &T) -> Result<Self> {
        Self::construct(schema, serde_json::to_value(value)?)
    }

    /// Deserialize the attributes into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.values.clone()))?)
    }

    /// Build a document from a stored hit (`get`, `mget` entry, search hit).
    ///
    /// Stored sources are trusted and not validated.
    pub fn from_hit(schema: Arc<Schema>, hit: &Value) -> Self {
        let values = match hit.get("_source") {
            Some(Value::Object(source)) => source.clone(),
            _ => Map::new(),
        };
        let mut meta = DocMeta::default();
        meta.update_from(hit);
        Self {
            schema,
            values,
            meta,
            dirty: BTreeSet::new(),
            using: None,
        }
    }

    /// Set the ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.meta.id = Some(id.into());
        self
    }

    /// Set the index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.meta.index = Some(index.into());
        self
    }

    /// Set the routing.
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.meta.routing = Some(routing.into());
        self
    }

    /// Bind to a connection alias.
    pub fn using(mut self, alias: impl Into<String>) -> Self {
        self.using = Some(alias.into());
        self
    }

    /// Schema the document is bound to.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Metadata.
    pub fn meta(&self) -> &DocMeta {
        &self.meta
    }

    /// Mutable metadata.
    pub fn meta_mut(&mut self) -> &mut DocMeta {
        &mut self.meta
    }

    /// Document ID.
    pub fn id(&self) -> Option<&str> {
        self.meta.id.as_deref()
    }

    /// Attribute values.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Set an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.set_value(name.into(), serde_json::to_value(value)?)
    }

    /// Store an explicit `null`.
    pub fn set_null(&mut self, name: impl Into<String>) -> Result<()> {
        self.set_value(name.into(), Value::Null)
    }

    /// Remove an attribute so it is absent from the wire form.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.dirty.remove(name);
        self.values.shift_remove(name)
    }

    /// Raw attribute value.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether an attribute is present (possibly `null`).
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Attribute value deserialized into `T`; absent and `null` give `None`.
    pub fn value_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Typed setter.
    pub fn set_field<T: Serialize>(&mut self, field: FieldRef<T>, value: T) -> Result<()> {
        self.set(field.name(), value)
    }

    /// Typed getter.
    pub fn get_field<T: DeserializeOwned>(&self, field: FieldRef<T>) -> Result<Option<T>> {
        self.value_as(field.name())
    }

    /// Whether anything changed since the last save or load.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Names changed since the last save or load.
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Forget pending changes.
    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    fn set_value(&mut self, name: String, value: Value) -> Result<()> {
        self.check_value(&name, &value)?;
        self.values.insert(name.clone(), value);
        self.dirty.insert(name);
        Ok(())
    }

    fn check_value(&self, name: &str, value: &Value) -> Result<()> {
        match self.schema.field(name) {
            Some(field) => field.validate(name, value),
            None if self.schema.is_strict() => {
                Err(OdmError::validation(name, "unknown field in strict schema"))
            }
            None => Ok(()),
        }
    }

    /// Validate every value and require all required fields.
    pub fn full_clean(&self) -> Result<()> {
        self.schema.validate_object("", &self.values)?;
        self.schema.check_required("", &self.values)
    }

    /// Serialize attributes: schema fields in declaration order, then
    /// dynamic attributes. `skip_empty` drops empty arrays and objects but
    /// never an explicit `null`.
    pub fn to_wire(&self, skip_empty: bool) -> Value {
        let mut out = Map::new();

        for (name, _) in self.schema.fields() {
            if let Some(value) = self.values.get(name) {
                push_value(&mut out, name, value, skip_empty);
            }
        }
        for (name, value) in &self.values {
            if self.schema.field(name).is_none() {
                push_value(&mut out, name, value, skip_empty);
            }
        }

        Value::Object(out)
    }

    fn resolve_index(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .or(self.meta.index.as_deref())
            .or(self.schema.default_index())
            .map(str::to_string)
            .ok_or_else(|| OdmError::validation("_index", "no index given and the schema has no default"))
    }

    pub(crate) fn write_index(&self, explicit: Option<&str>) -> Result<String> {
        let index = self.resolve_index(explicit)?;
        ensure_concrete(&index)?;
        Ok(index)
    }

    fn alias<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.using.as_deref())
    }

    pub(crate) fn target(&self, index: String) -> DocTarget {
        DocTarget {
            index,
            id: self.meta.id.clone(),
            routing: self.meta.routing.clone(),
            ..Default::default()
        }
    }

    fn apply_write(&mut self, body: &Value) -> SaveResult {
        let routing = self.meta.routing.clone();
        self.meta.update_from(body);
        if self.meta.routing.is_none() {
            self.meta.routing = routing;
        }
        SaveResult::from_body(body)
    }

    /// Fetch a document by ID.
    pub async fn get(schema: Arc<Schema>, id: &str, opts: GetOptions) -> Result<Document> {
        let index = default_index(&schema, opts.index.as_deref())?;
        match Self::fetch(schema, id, &index, &opts).await? {
            Some(doc) => Ok(doc),
            None => Err(OdmError::NotFound {
                index,
                id: id.to_string(),
            }),
        }
    }

    /// Fetch a document by ID, `None` when missing.
    pub async fn try_get(schema: Arc<Schema>, id: &str, opts: GetOptions) -> Result<Option<Document>> {
        let index = default_index(&schema, opts.index.as_deref())?;
        Self::fetch(schema, id, &index, &opts).await
    }

    async fn fetch(
        schema: Arc<Schema>,
        id: &str,
        index: &str,
        opts: &GetOptions,
    ) -> Result<Option<Document>> {
        debug!(index, id, "Getting document");
        let conn = connections().get_connection(opts.using.as_deref())?;
        let target = DocTarget {
            routing: opts.routing.clone(),
            ..DocTarget::new(index, Some(id.to_string()))
        };
        let response = conn.transport().get_document(&target).await?;

        if response.is_not_found() {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        if !response.body["found"].as_bool().unwrap_or(false) {
            return Ok(None);
        }

        let mut doc = Document::from_hit(schema, &response.body);
        doc.using = opts.using.clone();
        Ok(Some(doc))
    }

    /// Fetch several documents in one request, in the order of `ids`.
    ///
    /// Per-document errors fail the call with [`OdmError::Batch`] when
    /// `raise_on_error` is set. Otherwise an errored entry counts as missing
    /// and follows the [`Missing`] policy.
    pub async fn mget(
        schema: Arc<Schema>,
        ids: &[String],
        opts: MgetOptions,
    ) -> Result<Vec<Option<Document>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let index = default_index(&schema, opts.index.as_deref())?;
        debug!(index = %index, count = ids.len(), "Getting documents");

        let conn = connections().get_connection(opts.using.as_deref())?;
        let response = conn.transport().mget(&index, ids).await?.error_for_status()?;
        let entries = response.body["docs"].as_array().cloned().unwrap_or_default();

        let mut docs = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        let mut missing = Vec::new();

        for entry in &entries {
            let id = entry["_id"].as_str().unwrap_or_default();
            if entry["found"].as_bool().unwrap_or(false) {
                let mut doc = Document::from_hit(schema.clone(), entry);
                doc.using = opts.using.clone();
                docs.push(Some(doc));
            } else if let Some(error) = entry.get("error")
                && opts.raise_on_error
            {
                let reason = error["reason"].as_str().map_or_else(|| error.to_string(), str::to_string);
                errors.push(format!("{}: {}", id, reason));
            } else {
                missing.push(id.to_string());
                if opts.missing == Missing::Null {
                    docs.push(None);
                }
            }
        }

        if !errors.is_empty() {
            return Err(OdmError::Batch {
                operation: "mget",
                succeeded: entries.len() - errors.len(),
                failed: errors.len(),
                errors,
            });
        }
        if !missing.is_empty() && opts.missing == Missing::Raise {
            return Err(OdmError::NotFound {
                index,
                id: missing.join(","),
            });
        }
        Ok(docs)
    }

    /// Index the whole document.
    ///
    /// Only metadata is taken from the response; local attributes stay as
    /// they were sent. The dirty set is cleared on success.
    pub async fn save(&mut self, opts: SaveOptions) -> Result<SaveResult> {
        if opts.validate {
            self.full_clean()?;
        }
        let index = self.write_index(opts.index.as_deref())?;
        let body = self.to_wire(opts.skip_empty);

        let mut target = self.target(index);
        target.refresh = opts.refresh;
        if opts.if_unchanged {
            target.if_seq_no = self.meta.seq_no;
            target.if_primary_term = self.meta.primary_term;
        }

        debug!(index = %target.index, id = ?target.id, "Saving document");
        let conn = connections().get_connection(self.alias(opts.using.as_deref()))?;
        let response = conn.transport().index_document(&target, body).await?;
        let response = response.error_for_status()?;

        self.dirty.clear();
        Ok(self.apply_write(&response.body))
    }

    /// Set attributes and send them as a partial update.
    ///
    /// Values are validated and the target resolved before anything changes
    /// locally. The new values are applied before the request is sent and
    /// stay dirty until it succeeds, so a failed update can be retried with
    /// [`Document::save_changes`].
    pub async fn update(
        &mut self,
        fields: impl IntoIterator<Item = (String, Value)>,
        opts: UpdateOptions,
    ) -> Result<SaveResult> {
        let fields: Vec<(String, Value)> = fields.into_iter().collect();
        for (name, value) in &fields {
            self.check_value(name, value)?;
        }
        let target = self.update_target(&opts)?;

        let mut partial = Map::new();
        for (name, value) in fields {
            self.values.insert(name.clone(), value.clone());
            self.dirty.insert(name.clone());
            partial.insert(name, value);
        }

        let response = self
            .send_update(target, json!({ "doc": &partial }), &opts)
            .await?;
        for name in partial.keys() {
            self.dirty.remove(name);
        }
        Ok(self.apply_write(&response.body))
    }

    /// Run a script against the stored document.
    ///
    /// Local attributes are not touched; reload to observe the result.
    pub async fn update_script(&mut self, script: Script, opts: UpdateOptions) -> Result<SaveResult> {
        let target = self.update_target(&opts)?;
        let response = self
            .send_update(target, json!({ "script": script.to_json() }), &opts)
            .await?;
        Ok(self.apply_write(&response.body))
    }

    /// Send only the attributes changed since the last save or load.
    ///
    /// Returns `None` without a request when nothing changed.
    pub async fn save_changes(&mut self, opts: UpdateOptions) -> Result<Option<SaveResult>> {
        if self.dirty.is_empty() {
            return Ok(None);
        }

        let target = self.update_target(&opts)?;
        let partial = self.changes();
        let response = self
            .send_update(target, json!({ "doc": partial }), &opts)
            .await?;
        self.dirty.clear();
        Ok(Some(self.apply_write(&response.body)))
    }

    /// Current values of the changed attributes.
    pub(crate) fn changes(&self) -> Map<String, Value> {
        self.dirty
            .iter()
            .filter_map(|name| self.values.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }

    fn update_target(&self, opts: &UpdateOptions) -> Result<DocTarget> {
        let index = self.write_index(opts.index.as_deref())?;
        let mut target = self.target(index);
        target.require_id()?;
        target.refresh = opts.refresh;
        target.retry_on_conflict = opts.retry_on_conflict;
        Ok(target)
    }

    async fn send_update(
        &self,
        target: DocTarget,
        mut body: Value,
        opts: &UpdateOptions,
    ) -> Result<TransportResponse> {
        if opts.doc_as_upsert {
            body["doc_as_upsert"] = json!(true);
        }

        debug!(index = %target.index, id = ?target.id, "Updating document");
        let conn = connections().get_connection(self.alias(opts.using.as_deref()))?;
        let response = conn.transport().update_document(&target, body).await?;

        if response.is_not_found() && response.body["error"]["type"] == "document_missing_exception" {
            return Err(OdmError::NotFound {
                index: target.index,
                id: target.id.unwrap_or_default(),
            });
        }
        response.error_for_status()
    }

    /// Delete the stored document.
    pub async fn delete(&self, opts: DeleteOptions) -> Result<bool> {
        let index = self.write_index(opts.index.as_deref())?;
        let mut target = self.target(index);
        let id = target.require_id()?.to_string();
        target.refresh = opts.refresh;

        debug!(index = %target.index, id = %id, "Deleting document");
        let conn = connections().get_connection(self.alias(opts.using.as_deref()))?;
        let response = conn.transport().delete_document(&target).await?;

        if response.is_not_found() {
            if opts.ignore_not_found {
                warn!(index = %target.index, id = %id, "Document to delete was not found");
                return Ok(false);
            }
            return Err(OdmError::NotFound {
                index: target.index,
                id,
            });
        }
        response.error_for_status()?;
        Ok(true)
    }
}

impl TaggedUnion {
    /// Create an empty document of one member, tagged.
    pub fn instantiate(&self, tag: &str) -> Result<Document> {
        let schema = self
            .member(tag)
            .ok_or_else(|| OdmError::validation(self.discriminator(), format!("unknown tag '{}'", tag)))?;
        let mut doc = Document::new(schema.clone());
        doc.set(self.discriminator(), tag)?;
        Ok(doc)
    }

    /// Build a document from a hit, picking the member by its tag.
    pub fn from_hit(&self, hit: &Value) -> Document {
        let source = hit.get("_source").unwrap_or(&Value::Null);
        Document::from_hit(self.resolve(source), hit)
    }
}

fn default_index(schema: &Schema, explicit: Option<&str>) -> Result<String> {
    explicit
        .or(schema.default_index())
        .map(str::to_string)
        .ok_or_else(|| OdmError::validation("_index", "no index given and the schema has no default"))
}

pub(crate) fn ensure_concrete(index: &str) -> Result<()> {
    if index.contains('*') {
        return Err(OdmError::validation(
            "_index",
            format!("'{}' is a pattern; pass a concrete index to write to", index),
        ));
    }
    Ok(())
}

fn push_value(out: &mut Map<String, Value>, name: &str, value: &Value, skip_empty: bool) {
    if !skip_empty {
        out.insert(name.to_string(), value.clone());
        return;
    }
    if let Some(value) = strip_empty(value) {
        out.insert(name.to_string(), value);
    }
}

fn strip_empty(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                if let Some(inner) = strip_empty(inner) {
                    out.insert(key.clone(), inner);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => Some(Value::Array(
            items.iter().map(|item| strip_empty(item).unwrap_or_else(|| item.clone())).collect(),
        )),
        other => Some(other.clone()),
    }
}
