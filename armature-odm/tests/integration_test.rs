//! Integration tests for armature-odm

use armature_odm::testing::MemoryTransport;
use armature_odm::*;
use serde_json::{Value, json};
use std::sync::Arc;

fn register(alias: &str) -> Arc<MemoryTransport> {
    let transport = Arc::new(MemoryTransport::new());
    connections().add_connection(alias, Connection::from_shared(transport.clone()));
    transport
}

fn article_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("Article")
            .typed::<String>("title")
            .typed::<Option<Vec<String>>>("tags")
            .typed::<Option<i64>>("views")
            .index("articles")
            .build()
            .unwrap(),
    )
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn seed_articles(transport: &MemoryTransport) {
    transport.insert_raw("articles", "1", json!({ "title": "one" }));
    transport.insert_raw("articles", "3", json!({ "title": "three" }));
}

#[test]
fn test_type_hint_table() {
    let cases = [
        (TypeHint::of::<String>(), FieldKind::Text),
        (TypeHint::of::<bool>(), FieldKind::Boolean),
        (TypeHint::of::<i32>(), FieldKind::Integer),
        (TypeHint::of::<i64>(), FieldKind::Long),
        (TypeHint::of::<f32>(), FieldKind::Float),
        (TypeHint::of::<f64>(), FieldKind::Double),
        (TypeHint::of::<Binary>(), FieldKind::Binary),
        (TypeHint::of::<chrono::NaiveDateTime>(), FieldKind::Date),
        (TypeHint::of::<chrono::NaiveDate>(), FieldKind::Date),
    ];

    for (hint, kind) in cases {
        let field = translate(&hint).unwrap();
        assert_eq!(field.kind, kind);
        assert!(field.required);
        assert!(!field.multi);

        let optional = translate(&TypeHint::optional(hint.clone())).unwrap();
        assert!(!optional.required);
        assert!(!optional.multi);

        let list = translate(&TypeHint::list(hint.clone())).unwrap();
        assert!(list.multi);

        let both = translate(&TypeHint::optional(TypeHint::list(hint))).unwrap();
        assert_eq!((both.kind, both.required, both.multi), (kind, false, true));
    }
}

#[test]
fn test_merge_overrides_and_conflicts() {
    let a = Schema::builder("A").field("x", Field::text()).build().unwrap();
    let b = Schema::builder("B").field("x", Field::keyword()).build().unwrap();
    let merged = Schema::merge(&a, &b);
    assert_eq!(merged.field("x").unwrap().kind, FieldKind::Keyword);

    let err = Schema::merge_compatible("AB", &[&a, &b]).unwrap_err();
    assert!(err.is_schema_error());
}

#[test]
fn test_wire_spec_is_deterministic() {
    let schema = article_schema();
    assert_eq!(schema.to_wire_spec(), schema.to_wire_spec());
    let index = Index::new("articles").document(schema);
    assert_eq!(index.to_wire().unwrap(), index.to_wire().unwrap());
}

#[tokio::test]
async fn test_mget_missing_policies() {
    let transport = register("it-mget");
    seed_articles(&transport);
    let schema = article_schema();
    let wanted = ids(&["1", "2", "3"]);

    let null = Document::mget(
        schema.clone(),
        &wanted,
        MgetOptions::default().using("it-mget").missing(Missing::Null),
    )
    .await
    .unwrap();
    assert_eq!(null.len(), 3);
    assert_eq!(null[0].as_ref().and_then(Document::id), Some("1"));
    assert!(null[1].is_none());
    assert_eq!(null[2].as_ref().and_then(Document::id), Some("3"));

    let skip = Document::mget(
        schema.clone(),
        &wanted,
        MgetOptions::default().using("it-mget").missing(Missing::Skip),
    )
    .await
    .unwrap();
    let skipped: Vec<_> = skip.iter().flatten().filter_map(Document::id).collect();
    assert_eq!(skipped, vec!["1", "3"]);

    let raise = Document::mget(schema, &wanted, MgetOptions::default().using("it-mget")).await;
    assert!(matches!(raise, Err(OdmError::NotFound { ref id, .. }) if id == "2"));
}

#[tokio::test]
async fn test_mget_errors_with_raise_on_error() {
    let transport = register("it-mget-errors");
    seed_articles(&transport);
    transport.fail_document("articles", "3", "shard_failure", "shard unavailable");
    let schema = article_schema();
    let wanted = ids(&["1", "3"]);

    let err = Document::mget(
        schema.clone(),
        &wanted,
        MgetOptions::default().using("it-mget-errors").missing(Missing::Null),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OdmError::Batch { operation: "mget", failed: 1, .. }));

    let docs = Document::mget(
        schema,
        &wanted,
        MgetOptions::default()
            .using("it-mget-errors")
            .missing(Missing::Null)
            .raise_on_error(false),
    )
    .await
    .unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs[0].is_some());
    assert!(docs[1].is_none());
}

#[tokio::test]
async fn test_mget_errors_follow_missing_policy() {
    let transport = register("it-mget-policy");
    seed_articles(&transport);
    transport.fail_document("articles", "3", "shard_failure", "shard unavailable");
    let schema = article_schema();
    let wanted = ids(&["1", "3"]);
    let opts = || MgetOptions::default().using("it-mget-policy").raise_on_error(false);

    let raise = Document::mget(schema.clone(), &wanted, opts()).await;
    assert!(matches!(raise, Err(OdmError::NotFound { ref id, .. }) if id == "3"));

    let skip = Document::mget(schema, &wanted, opts().missing(Missing::Skip))
        .await
        .unwrap();
    assert_eq!(skip.len(), 1);
    assert_eq!(skip[0].as_ref().and_then(Document::id), Some("1"));
}

#[tokio::test]
async fn test_try_get_missing_is_absent() {
    register("it-get");
    let found = Document::try_get(article_schema(), "nope", GetOptions::default().using("it-get"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_save_assigns_id_and_keeps_values() {
    let transport = register("it-save");
    let mut doc = Document::new(article_schema()).using("it-save");
    doc.set("title", "Hello").unwrap();
    doc.set("tags", Vec::<String>::new()).unwrap();
    let before = doc.values().clone();

    let result = doc.save(SaveOptions::default()).await.unwrap();

    assert!(result.is_created());
    let id = doc.id().unwrap().to_string();
    assert_eq!(id, result.id);
    assert_eq!(doc.meta().index.as_deref(), Some("articles"));
    assert_eq!(doc.values(), &before);
    assert!(!doc.is_dirty());
    // Empty lists are not sent.
    assert_eq!(transport.source("articles", &id), Some(json!({ "title": "Hello" })));
}

#[tokio::test]
async fn test_update_mutates_locally_script_does_not() {
    let transport = register("it-update");
    transport.insert_raw("articles", "1", json!({ "title": "one", "views": 1 }));
    let opts = GetOptions::default().using("it-update");
    let mut doc = Document::get(article_schema(), "1", opts.clone()).await.unwrap();

    doc.update(
        [("views".to_string(), json!(5))],
        UpdateOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(doc.value("views"), Some(&json!(5)));
    assert_eq!(transport.source("articles", "1").unwrap()["views"], json!(5));

    let script = Script::new("ctx._source.views += params.n").param("n", json!(10));
    doc.update_script(script, UpdateOptions::default()).await.unwrap();
    assert_eq!(doc.value("views"), Some(&json!(5)));
    assert_eq!(doc.value("title"), Some(&json!("one")));

    let sent = transport.requests_for("update_document");
    assert_eq!(sent.last().unwrap().body["script"]["params"]["n"], json!(10));
}

#[tokio::test]
async fn test_update_rejects_invalid_value_before_dispatch() {
    let transport = register("it-update-invalid");
    transport.insert_raw("articles", "1", json!({ "title": "one" }));
    let mut doc = Document::get(article_schema(), "1", GetOptions::default().using("it-update-invalid"))
        .await
        .unwrap();
    transport.clear_requests();

    let err = doc
        .update([("views".to_string(), json!("many"))], UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OdmError::Validation { .. }));
    assert!(doc.value("views").is_none());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_update_without_target_changes_nothing() {
    let transport = register("it-update-target");
    let mut doc = Document::new(article_schema()).using("it-update-target");
    doc.set("title", "draft").unwrap();
    doc.mark_clean();

    let err = doc
        .update([("views".to_string(), json!(5))], UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OdmError::Validation { ref field, .. } if field == "_id"));
    assert!(doc.value("views").is_none());
    assert!(!doc.is_dirty());

    let mut pattern = Document::new(article_schema())
        .with_id("1")
        .with_index("articles-*")
        .using("it-update-target");
    assert!(pattern
        .update([("views".to_string(), json!(5))], UpdateOptions::default())
        .await
        .is_err());
    assert!(pattern.value("views").is_none());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_failed_update_stays_dirty() {
    let transport = register("it-update-retry");
    transport.insert_raw("articles", "2", json!({ "title": "two" }));
    let mut doc = Document::new(article_schema()).with_id("1").using("it-update-retry");

    let err = doc
        .update([("views".to_string(), json!(5))], UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(doc.value("views"), Some(&json!(5)));
    assert_eq!(doc.dirty_fields().collect::<Vec<_>>(), vec!["views"]);

    transport.insert_raw("articles", "1", json!({ "title": "one" }));
    assert!(doc.save_changes(UpdateOptions::default()).await.unwrap().is_some());
    assert!(!doc.is_dirty());
    assert_eq!(
        transport.source("articles", "1"),
        Some(json!({ "title": "one", "views": 5 }))
    );
}

#[tokio::test]
async fn test_save_with_unset_list_field() {
    let transport = register("it-save-list");
    let schema = Arc::new(
        Schema::builder("Note")
            .typed::<String>("body")
            .typed::<Vec<String>>("labels")
            .index("notes")
            .build()
            .unwrap(),
    );
    let mut doc = Document::new(schema).with_id("1").using("it-save-list");
    doc.set("body", "remember").unwrap();

    doc.save(SaveOptions::default()).await.unwrap();
    assert_eq!(transport.source("notes", "1"), Some(json!({ "body": "remember" })));
}

#[tokio::test]
async fn test_wildcard_index_requires_override() {
    let transport = register("it-wildcard");
    let schema = Arc::new(
        Schema::builder("Log")
            .typed::<String>("message")
            .index("logs-*")
            .build()
            .unwrap(),
    );
    let mut doc = Document::new(schema).using("it-wildcard");
    doc.set("message", "boot").unwrap();

    assert!(doc.save(SaveOptions::default()).await.is_err());
    assert!(transport.requests().is_empty());

    doc.save(SaveOptions::default().index("logs-2024")).await.unwrap();
    assert_eq!(transport.doc_count("logs-2024"), 1);
}

#[tokio::test]
async fn test_strict_schema_rejects_unknown_fields() {
    let schema = Arc::new(
        Schema::builder("Strict")
            .typed::<String>("name")
            .strict()
            .build()
            .unwrap(),
    );
    assert_eq!(schema.to_wire_spec()["dynamic"], json!("strict"));
    let mut doc = Document::new(schema);
    assert!(doc.set("other", 1).is_err());
    assert!(Document::construct(doc.schema().clone(), json!({ "name": "a", "x": 1 })).is_err());
}

#[tokio::test]
async fn test_tagged_union_round_trip() {
    let transport = register("it-union");
    let post = Arc::new(Schema::builder("Post").typed::<String>("title").index("content").build().unwrap());
    let comment = Arc::new(Schema::builder("Comment").typed::<String>("body").build().unwrap());
    let union = TaggedUnion::new("Content", "kind", &[post, comment]).unwrap();

    let mut c = union.instantiate("Comment").unwrap().with_id("c1").using("it-union");
    c.set("body", "nice").unwrap();
    c.save(SaveOptions::default()).await.unwrap();
    assert_eq!(
        transport.source("content", "c1"),
        Some(json!({ "body": "nice", "kind": "Comment" }))
    );

    let results = Search::for_union(&union).using("it-union").execute().await.unwrap();
    assert_eq!(results.hits.len(), 1);
    assert_eq!(results.hits[0].schema().name(), "Comment");
}

#[tokio::test]
async fn test_index_and_template_lifecycle() {
    let transport = register("it-index");
    let index = Index::new("articles-v1")
        .shards(1)
        .alias("articles", None)
        .document(article_schema())
        .using("it-index");

    assert!(index.create(false).await.unwrap());
    assert!(!index.create(true).await.unwrap());
    assert!(matches!(index.create(false).await, Err(OdmError::IndexExists(_))));
    assert!(index.exists().await.unwrap());
    assert_eq!(
        transport.index_body("articles-v1").unwrap()["mappings"]["properties"]["title"]["type"],
        json!("text")
    );

    let template = Index::new("articles-*")
        .document(article_schema())
        .using("it-index")
        .as_template("articles", Some(1))
        .unwrap();
    template.save().await.unwrap();
    assert_eq!(transport.template("articles").unwrap()["index_patterns"], json!(["articles-*"]));
    // Existing indices are not touched.
    assert_eq!(transport.index_body("articles-v1"), Some(index.to_wire().unwrap()));

    assert!(index.delete(false).await.unwrap());
    assert!(!index.delete(true).await.unwrap());
    assert!(!index.exists().await.unwrap());
}

#[tokio::test]
async fn test_search_sort_by_proxy() {
    let transport = register("it-search");
    for (id, views) in [("a", 3), ("b", 10), ("c", 7)] {
        transport.insert_raw("articles", id, json!({ "title": id, "views": views }));
    }
    let schema = article_schema();

    let results = Search::new(schema.clone())
        .sort(schema.proxy("views").unwrap().desc())
        .size(2)
        .using("it-search")
        .execute()
        .await
        .unwrap();

    assert_eq!(results.total, 3);
    let order: Vec<_> = results.hits.iter().filter_map(Document::id).collect();
    assert_eq!(order, vec!["b", "c"]);
}

#[tokio::test]
async fn test_bulk_dirty_updates() {
    let transport = register("it-bulk");
    seed_articles(&transport);
    let opts = GetOptions::default().using("it-bulk");
    let mut one = Document::get(article_schema(), "1", opts.clone()).await.unwrap();
    let three = Document::get(article_schema(), "3", opts).await.unwrap();
    one.set("views", 2).unwrap();

    let response = Bulk::new()
        .using("it-bulk")
        .update(&one)
        .unwrap()
        .update(&three)
        .unwrap()
        .delete(&three)
        .unwrap()
        .execute(true)
        .await
        .unwrap();

    assert_eq!(response.items.len(), 2);
    assert_eq!(transport.source("articles", "1"), Some(json!({ "title": "one", "views": 2 })));
    assert_eq!(transport.source("articles", "3"), None);
}

#[tokio::test]
async fn test_configured_alias_resolves_lazily() {
    let registry = Connections::new();
    registry.set_factory(Arc::new(|_config: &ConnectionConfig| {
        Ok(Connection::new(MemoryTransport::new()))
    }));
    let config: ConnectionsConfig = ConnectionsConfig::parse(
        r#"
        [default]
        hosts = ["http://localhost:9200"]
        request_timeout = 5

        [analytics]
        hosts = ["http://analytics:9200"]
        "#,
        FileFormat::Toml,
    )
    .unwrap();
    registry.configure_from(&config);

    assert_eq!(registry.aliases(), vec!["analytics", "default"]);
    assert!(!registry.is_materialized("default"));
    registry.get_connection(None).unwrap();
    assert!(registry.is_materialized("default"));
    assert!(!registry.is_materialized("analytics"));
}

#[test]
fn test_error_display() {
    let err = OdmError::NotFound {
        index: "articles".to_string(),
        id: "7".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("articles"));
    assert!(display.contains('7'));
    assert!(err.is_not_found());
}

// Live cluster tests; run with OPENSEARCH_URL set and `--ignored`.

fn live_alias() -> &'static str {
    let config = ConnectionConfig::from_env("OPENSEARCH").build();
    connections().configure([("live".to_string(), config)]);
    "live"
}

#[tokio::test]
#[ignore]
async fn test_live_round_trip() {
    let alias = live_alias();
    let index = Index::new("armature-odm-it")
        .replicas(0)
        .document(article_schema())
        .using(alias);
    index.delete(true).await.unwrap();
    index.create(false).await.unwrap();

    let schema = index.schema("Article").unwrap();
    let mut doc = Document::new(schema.clone()).with_id("1").using(alias);
    doc.set("title", "live").unwrap();
    doc.save(SaveOptions::default().refresh(Refresh::True)).await.unwrap();

    let loaded = Document::get(schema, "1", GetOptions::default().using(alias))
        .await
        .unwrap();
    assert_eq!(loaded.value("title"), Some(&Value::from("live")));

    index.delete(false).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_analyzer_simulate() {
    let alias = live_alias();
    let tokens = Analyzer::builtin("standard")
        .simulate("Hello World", Some(alias))
        .await
        .unwrap();
    let terms: Vec<_> = tokens.iter().map(|t| t.token.as_str()).collect();
    assert_eq!(terms, vec!["hello", "world"]);
}
