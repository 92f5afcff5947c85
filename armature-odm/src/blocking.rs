//! Blocking execution of the async operations.
//!
//! [`BlockingClient`] owns a current-thread runtime and drives the same
//! futures the async API returns, so both modes share one implementation.
//! It must not be used from inside another tokio runtime.

use crate::{
    analysis::{AnalyzeToken, Analyzer},
    bulk::{Bulk, BulkResponse},
    document::{
        DeleteOptions, Document, GetOptions, MgetOptions, SaveOptions, SaveResult, Script,
        UpdateOptions,
    },
    error::Result,
    index::{Index, IndexTemplate},
    schema::Schema,
    search::{Search, SearchResponse},
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous facade over the async API.
#[derive(Debug)]
pub struct BlockingClient {
    runtime: Runtime,
}

impl BlockingClient {
    /// Start a dedicated runtime.
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .thread_name("armature-odm-blocking")
            .enable_all()
            .build()?;
        Ok(Self { runtime })
    }

    /// Block on any future.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// See [`Document::get`].
    pub fn get(&self, schema: Arc<Schema>, id: &str, opts: GetOptions) -> Result<Document> {
        self.block_on(Document::get(schema, id, opts))
    }

    /// See [`Document::try_get`].
    pub fn try_get(&self, schema: Arc<Schema>, id: &str, opts: GetOptions) -> Result<Option<Document>> {
        self.block_on(Document::try_get(schema, id, opts))
    }

    /// See [`Document::mget`].
    pub fn mget(
        &self,
        schema: Arc<Schema>,
        ids: &[String],
        opts: MgetOptions,
    ) -> Result<Vec<Option<Document>>> {
        self.block_on(Document::mget(schema, ids, opts))
    }

    /// See [`Document::save`].
    pub fn save(&self, doc: &mut Document, opts: SaveOptions) -> Result<SaveResult> {
        self.block_on(doc.save(opts))
    }

    /// See [`Document::update`].
    pub fn update(
        &self,
        doc: &mut Document,
        fields: impl IntoIterator<Item = (String, Value)>,
        opts: UpdateOptions,
    ) -> Result<SaveResult> {
        self.block_on(doc.update(fields, opts))
    }

    /// See [`Document::update_script`].
    pub fn update_script(&self, doc: &mut Document, script: Script, opts: UpdateOptions) -> Result<SaveResult> {
        self.block_on(doc.update_script(script, opts))
    }

    /// See [`Document::save_changes`].
    pub fn save_changes(&self, doc: &mut Document, opts: UpdateOptions) -> Result<Option<SaveResult>> {
        self.block_on(doc.save_changes(opts))
    }

    /// See [`Document::delete`].
    pub fn delete(&self, doc: &Document, opts: DeleteOptions) -> Result<bool> {
        self.block_on(doc.delete(opts))
    }

    /// See [`Index::create`].
    pub fn create_index(&self, index: &Index, ignore_if_exists: bool) -> Result<bool> {
        self.block_on(index.create(ignore_if_exists))
    }

    /// See [`Index::delete`].
    pub fn delete_index(&self, index: &Index, ignore_if_missing: bool) -> Result<bool> {
        self.block_on(index.delete(ignore_if_missing))
    }

    /// See [`Index::exists`].
    pub fn index_exists(&self, index: &Index) -> Result<bool> {
        self.block_on(index.exists())
    }

    /// See [`Index::refresh`].
    pub fn refresh(&self, index: &Index) -> Result<()> {
        self.block_on(index.refresh())
    }

    /// See [`Index::analyze`].
    pub fn analyze(&self, index: &Index, text: &str, analyzer: Option<&str>) -> Result<Vec<AnalyzeToken>> {
        self.block_on(index.analyze(text, analyzer))
    }

    /// See [`IndexTemplate::save`].
    pub fn save_template(&self, template: &IndexTemplate) -> Result<()> {
        self.block_on(template.save())
    }

    /// See [`Analyzer::simulate`].
    pub fn simulate(&self, analyzer: &Analyzer, text: &str, using: Option<&str>) -> Result<Vec<AnalyzeToken>> {
        self.block_on(analyzer.simulate(text, using))
    }

    /// See [`Search::execute`].
    pub fn search(&self, search: &Search) -> Result<SearchResponse> {
        self.block_on(search.execute())
    }

    /// See [`Bulk::execute`].
    pub fn bulk(&self, bulk: &Bulk, raise_on_error: bool) -> Result<BulkResponse> {
        self.block_on(bulk.execute(raise_on_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{Connection, connections};
    use crate::error::OdmError;
    use crate::field::Field;
    use crate::testing::MemoryTransport;
    use serde_json::json;

    fn setup(alias: &str) -> (Arc<MemoryTransport>, Arc<Schema>) {
        let transport = Arc::new(MemoryTransport::new());
        connections().add_connection(alias, Connection::from_shared(transport.clone()));
        let schema = Arc::new(
            Schema::builder("Task")
                .field("title", Field::text().required())
                .field("done", Field::boolean())
                .index("tasks")
                .build()
                .unwrap(),
        );
        (transport, schema)
    }

    #[test]
    fn test_document_lifecycle() {
        let (transport, schema) = setup("blocking-lifecycle");
        let client = BlockingClient::new().unwrap();

        let mut doc = Document::new(schema.clone()).with_id("1").using("blocking-lifecycle");
        doc.set("title", "write docs").unwrap();
        let saved = client.save(&mut doc, SaveOptions::default()).unwrap();
        assert!(saved.is_created());

        doc.set("done", true).unwrap();
        assert!(client.save_changes(&mut doc, UpdateOptions::default()).unwrap().is_some());
        assert_eq!(
            transport.source("tasks", "1"),
            Some(json!({ "title": "write docs", "done": true }))
        );

        let opts = GetOptions::default().using("blocking-lifecycle");
        let loaded = client.get(schema.clone(), "1", opts.clone()).unwrap();
        assert_eq!(loaded.value("done"), Some(&json!(true)));

        assert!(client.delete(&loaded, DeleteOptions::default()).unwrap());
        assert!(client.try_get(schema.clone(), "1", opts.clone()).unwrap().is_none());
        assert!(matches!(client.get(schema, "1", opts), Err(OdmError::NotFound { .. })));
    }

    #[test]
    fn test_matches_async_results() {
        let (transport, schema) = setup("blocking-search");
        transport.insert_raw("tasks", "a", json!({ "title": "one", "done": false }));
        transport.insert_raw("tasks", "b", json!({ "title": "two", "done": true }));

        let client = BlockingClient::new().unwrap();
        let search = Search::new(schema).term("done", true).using("blocking-search");
        let blocking = client.search(&search).unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let async_result = runtime.block_on(search.execute()).unwrap();

        assert_eq!(blocking.total, async_result.total);
        let ids: Vec<_> = blocking.hits.iter().map(|d| d.id().map(str::to_string)).collect();
        let async_ids: Vec<_> = async_result.hits.iter().map(|d| d.id().map(str::to_string)).collect();
        assert_eq!(ids, async_ids);
        assert_eq!(ids, vec![Some("b".to_string())]);
    }
}
