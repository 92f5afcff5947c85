//! In-memory [`Transport`] for tests.
//!
//! Mimics the response shapes of the engine closely enough for the mapping
//! layer: versions and sequence numbers, `found: false` entries, per-item
//! errors in `mget` and `bulk`, and a small query subset (`match_all`,
//! `term`, `terms`, `match`, `ids`, `bool`) for search.

use crate::{
    error::Result,
    transport::{DocTarget, Transport, TransportResponse},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// A request seen by the memory transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Operation name, e.g. `index_document`.
    pub operation: &'static str,
    /// Index, template name or document path.
    pub target: String,
    /// Request body, `null` when none.
    pub body: Value,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    version: i64,
    seq_no: i64,
    routing: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct StoredIndex {
    body: Value,
    docs: BTreeMap<String, StoredDoc>,
    next_seq_no: i64,
}

impl StoredIndex {
    fn next_seq_no(&mut self) -> i64 {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        seq_no
    }
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, StoredIndex>,
    templates: BTreeMap<String, Value>,
    failures: HashMap<(String, String), (String, String)>,
    requests: Vec<RecordedRequest>,
}

/// Transport that keeps indices and documents in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read or write of one document fail with the given error.
    pub fn fail_document(&self, index: &str, id: &str, error_type: &str, reason: &str) {
        self.state.lock().failures.insert(
            (index.to_string(), id.to_string()),
            (error_type.to_string(), reason.to_string()),
        );
    }

    /// Store a source directly, bypassing validation.
    pub fn insert_raw(&self, index: &str, id: &str, source: Value) {
        let mut state = self.state.lock();
        let stored = state.indices.entry(index.to_string()).or_default();
        let seq_no = stored.next_seq_no();
        stored.docs.insert(
            id.to_string(),
            StoredDoc {
                source,
                version: 1,
                seq_no,
                routing: None,
            },
        );
    }

    /// Stored `_source` of a document.
    pub fn source(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .indices
            .get(index)
            .and_then(|i| i.docs.get(id))
            .map(|d| d.source.clone())
    }

    /// Number of documents in an index.
    pub fn doc_count(&self, index: &str) -> usize {
        self.state.lock().indices.get(index).map_or(0, |i| i.docs.len())
    }

    /// Names of existing indices.
    pub fn indices(&self) -> Vec<String> {
        self.state.lock().indices.keys().cloned().collect()
    }

    /// Body an index was created with.
    pub fn index_body(&self, index: &str) -> Option<Value> {
        self.state.lock().indices.get(index).map(|i| i.body.clone())
    }

    /// Body a template was registered with.
    pub fn template(&self, name: &str) -> Option<Value> {
        self.state.lock().templates.get(name).cloned()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Requests of one operation.
    pub fn requests_for(&self, operation: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

fn record(state: &mut State, operation: &'static str, target: impl Into<String>, body: &Value) {
    state.requests.push(RecordedRequest {
        operation,
        target: target.into(),
        body: body.clone(),
    });
}

fn ok(body: Value) -> Result<TransportResponse> {
    Ok(TransportResponse::new(200, body))
}

fn error_body(error_type: &str, reason: String) -> Value {
    json!({ "error": { "type": error_type, "reason": reason } })
}

fn index_missing(index: &str) -> TransportResponse {
    let mut body = error_body("index_not_found_exception", format!("no such index [{}]", index));
    body["status"] = json!(404);
    TransportResponse::new(404, body)
}

fn injected(state: &State, index: &str, id: &str) -> Option<Value> {
    state
        .failures
        .get(&(index.to_string(), id.to_string()))
        .map(|(error_type, reason)| json!({ "type": error_type, "reason": reason }))
}

fn doc_meta(index: &str, id: &str, doc: &StoredDoc) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("_index".to_string(), json!(index));
    meta.insert("_id".to_string(), json!(id));
    meta.insert("_version".to_string(), json!(doc.version));
    meta.insert("_seq_no".to_string(), json!(doc.seq_no));
    meta.insert("_primary_term".to_string(), json!(1));
    if let Some(routing) = &doc.routing {
        meta.insert("_routing".to_string(), json!(routing));
    }
    meta
}

fn found_doc(index: &str, id: &str, doc: &StoredDoc) -> Value {
    let mut body = doc_meta(index, id, doc);
    body.insert("found".to_string(), json!(true));
    body.insert("_source".to_string(), doc.source.clone());
    Value::Object(body)
}

fn write_result(index: &str, id: &str, doc: &StoredDoc, result: &str) -> Value {
    let mut body = doc_meta(index, id, doc);
    body.insert("result".to_string(), json!(result));
    body.insert(
        "_shards".to_string(),
        json!({ "total": 1, "successful": 1, "failed": 0 }),
    );
    Value::Object(body)
}

fn conflict(index: &str, id: &str) -> (u16, Value) {
    (
        409,
        error_body(
            "version_conflict_engine_exception",
            format!("[{}]: version conflict, document already exists (index [{}])", id, index),
        ),
    )
}

enum WriteMode {
    Index,
    Create,
}

fn write_doc(
    state: &mut State,
    target: &DocTarget,
    source: Value,
    mode: WriteMode,
) -> (u16, Value) {
    let id = target
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    if let Some(error) = injected(state, &target.index, &id) {
        return (500, json!({ "error": error }));
    }

    let stored = state.indices.entry(target.index.clone()).or_default();
    let existing = stored.docs.get(&id);

    if matches!(mode, WriteMode::Create) && existing.is_some() {
        return conflict(&target.index, &id);
    }
    if let Some(expected) = target.if_seq_no
        && existing.map(|d| d.seq_no) != Some(expected)
    {
        return (
            409,
            error_body(
                "version_conflict_engine_exception",
                format!("[{}]: version conflict, required seqNo [{}]", id, expected),
            ),
        );
    }

    let (version, result, status) = match existing {
        Some(doc) => (doc.version + 1, "updated", 200),
        None => (1, "created", 201),
    };
    let seq_no = stored.next_seq_no();
    let doc = StoredDoc {
        source,
        version,
        seq_no,
        routing: target.routing.clone(),
    };
    let body = write_result(&target.index, &id, &doc, result);
    stored.docs.insert(id, doc);
    (status, body)
}

fn update_doc(state: &mut State, target: &DocTarget, body: &Value) -> (u16, Value) {
    let Some(id) = target.id.clone() else {
        return (400, error_body("action_request_validation_exception", "id is missing".to_string()));
    };

    if let Some(error) = injected(state, &target.index, &id) {
        return (500, json!({ "error": error }));
    }

    let existing = state
        .indices
        .get(&target.index)
        .and_then(|stored| stored.docs.get(&id))
        .cloned();

    let Some(doc) = existing else {
        if let Some(upsert) = body.get("upsert") {
            return write_doc(state, target, upsert.clone(), WriteMode::Create);
        }
        if body["doc_as_upsert"].as_bool().unwrap_or(false) {
            return write_doc(state, target, body["doc"].clone(), WriteMode::Create);
        }
        if !state.indices.contains_key(&target.index) {
            return (404, index_missing(&target.index).body);
        }
        return (
            404,
            error_body(
                "document_missing_exception",
                format!("[{}]: document missing", id),
            ),
        );
    };

    if let Some(expected) = target.if_seq_no
        && doc.seq_no != expected
    {
        return (
            409,
            error_body(
                "version_conflict_engine_exception",
                format!("[{}]: version conflict, required seqNo [{}]", id, expected),
            ),
        );
    }

    let mut source = doc.source.clone();
    if let (Some(Value::Object(partial)), Value::Object(current)) = (body.get("doc"), &mut source) {
        for (key, value) in partial {
            current.insert(key.clone(), value.clone());
        }
    }
    // Scripts are recorded but not executed; only version and seq_no move.

    if source == doc.source && body.get("script").is_none() {
        return (200, write_result(&target.index, &id, &doc, "noop"));
    }

    let stored = state.indices.entry(target.index.clone()).or_default();
    let updated = StoredDoc {
        source,
        version: doc.version + 1,
        seq_no: stored.next_seq_no(),
        routing: doc.routing.clone(),
    };
    let response = write_result(&target.index, &id, &updated, "updated");
    stored.docs.insert(id, updated);
    (200, response)
}

fn delete_doc(state: &mut State, target: &DocTarget) -> (u16, Value) {
    let Some(id) = target.id.clone() else {
        return (400, error_body("action_request_validation_exception", "id is missing".to_string()));
    };

    if let Some(error) = injected(state, &target.index, &id) {
        return (500, json!({ "error": error }));
    }

    let Some(stored) = state.indices.get_mut(&target.index) else {
        return (404, index_missing(&target.index).body);
    };

    match stored.docs.remove(&id) {
        Some(doc) => {
            let deleted = StoredDoc {
                version: doc.version + 1,
                seq_no: stored.next_seq_no(),
                ..doc
            };
            (200, write_result(&target.index, &id, &deleted, "deleted"))
        }
        None => (
            404,
            json!({ "_index": target.index, "_id": id, "result": "not_found" }),
        ),
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            name.starts_with(prefix)
                && name.len() >= prefix.len()
                && matches_suffix(rest, &name[prefix.len()..])
        }
    }
}

fn matches_suffix(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    (0..=name.len())
        .filter(|i| name.is_char_boundary(*i))
        .any(|i| matches_pattern(pattern, &name[i..]))
}

fn lookup<'a>(source: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![source];
    for part in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(v) = map.get(part) {
                        next.push(v);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(part) {
                            next.push(v);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

// Falls back to the parent path so `title.raw` reads `title`.
fn field_values<'a>(source: &'a Value, path: &str) -> Vec<&'a Value> {
    let values = lookup(source, path);
    if values.is_empty()
        && let Some((parent, _)) = path.rsplit_once('.')
    {
        return lookup(source, parent);
    }
    values
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn single_clause(clause: &Value) -> Option<(&String, &Value)> {
    clause.as_object().and_then(|m| m.iter().next())
}

fn matches_query(query: &Value, id: &str, source: &Value) -> bool {
    let Some((kind, clause)) = single_clause(query) else {
        return true;
    };
    match kind.as_str() {
        "match_all" => true,
        "match_none" => false,
        "ids" => clause["values"]
            .as_array()
            .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(id))),
        "term" => single_clause(clause).is_some_and(|(field, expected)| {
            let expected = expected.get("value").unwrap_or(expected);
            field_values(source, field).contains(&expected)
        }),
        "terms" => single_clause(clause).is_some_and(|(field, expected)| {
            let actual = field_values(source, field);
            expected
                .as_array()
                .is_some_and(|list| list.iter().any(|e| actual.contains(&e)))
        }),
        "match" => single_clause(clause).is_some_and(|(field, expected)| {
            let text = expected.get("query").unwrap_or(expected);
            let wanted = match text {
                Value::String(s) => tokens(s),
                other => vec![other.to_string()],
            };
            let present: Vec<String> = field_values(source, field)
                .into_iter()
                .flat_map(|v| match v {
                    Value::String(s) => tokens(s),
                    other => vec![other.to_string()],
                })
                .collect();
            wanted.iter().any(|w| present.contains(w))
        }),
        "exists" => clause["field"]
            .as_str()
            .is_some_and(|field| field_values(source, field).iter().any(|v| !v.is_null())),
        "bool" => {
            let all = |key: &str| {
                clauses(&clause[key])
                    .iter()
                    .all(|c| matches_query(c, id, source))
            };
            let should = clauses(&clause["should"]);
            let should_ok = should.is_empty()
                || should.iter().any(|c| matches_query(c, id, source))
                || !(clause.get("must").is_none() && clause.get("filter").is_none());
            let must_not = clauses(&clause["must_not"])
                .iter()
                .any(|c| matches_query(c, id, source));
            all("must") && all("filter") && should_ok && !must_not
        }
        _ => false,
    }
}

fn clauses(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn sort_keys(sort: &Value) -> Vec<(String, bool)> {
    clauses(sort)
        .iter()
        .filter_map(|entry| match entry {
            Value::String(field) => Some((field.clone(), false)),
            Value::Object(map) => map.iter().next().map(|(field, spec)| {
                let order = spec.get("order").unwrap_or(spec);
                (field.clone(), order.as_str() == Some("desc"))
            }),
            _ => None,
        })
        .collect()
}

fn filter_source(source: &Value, filter: Option<&Value>) -> Option<Value> {
    match filter {
        None | Some(Value::Bool(true)) => Some(source.clone()),
        Some(Value::Bool(false)) => None,
        Some(Value::Array(fields)) => {
            let mut out = Map::new();
            for field in fields.iter().filter_map(Value::as_str) {
                if let Some(value) = source.get(field) {
                    out.insert(field.to_string(), value.clone());
                }
            }
            Some(Value::Object(out))
        }
        Some(_) => Some(source.clone()),
    }
}

fn terms_aggregations(aggs: &Value, hits: &[(&str, &str, &StoredDoc)]) -> Value {
    let mut out = Map::new();
    let Some(aggs) = aggs.as_object() else {
        return Value::Object(out);
    };
    for (name, agg) in aggs {
        let Some(field) = agg["terms"]["field"].as_str() else {
            continue;
        };
        let mut counts: Vec<(Value, u64)> = Vec::new();
        for (_, _, doc) in hits {
            for value in field_values(&doc.source, field) {
                match counts.iter_mut().find(|(v, _)| v == value) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((value.clone(), 1)),
                }
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let buckets: Vec<Value> = counts
            .into_iter()
            .map(|(key, doc_count)| json!({ "key": key, "doc_count": doc_count }))
            .collect();
        out.insert(name.clone(), json!({ "buckets": buckets }));
    }
    Value::Object(out)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_index(&self, index: &str, body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "create_index", index, &body);

        if state.indices.contains_key(index) {
            return Ok(TransportResponse::new(
                400,
                error_body(
                    "resource_already_exists_exception",
                    format!("index [{}] already exists", index),
                ),
            ));
        }
        state.indices.insert(
            index.to_string(),
            StoredIndex {
                body,
                ..Default::default()
            },
        );
        ok(json!({ "acknowledged": true, "shards_acknowledged": true, "index": index }))
    }

    async fn delete_index(&self, index: &str) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "delete_index", index, &Value::Null);

        match state.indices.remove(index) {
            Some(_) => ok(json!({ "acknowledged": true })),
            None => Ok(index_missing(index)),
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let mut state = self.state.lock();
        record(&mut state, "index_exists", index, &Value::Null);
        Ok(state.indices.contains_key(index))
    }

    async fn put_template(&self, name: &str, body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "put_template", name, &body);
        state.templates.insert(name.to_string(), body);
        ok(json!({ "acknowledged": true }))
    }

    async fn refresh(&self, index: &str) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "refresh", index, &Value::Null);

        if !state.indices.contains_key(index) {
            return Ok(index_missing(index));
        }
        ok(json!({ "_shards": { "total": 1, "successful": 1, "failed": 0 } }))
    }

    async fn index_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "index_document", target.index.clone(), &body);
        let (status, body) = write_doc(&mut state, target, body, WriteMode::Index);
        Ok(TransportResponse::new(status, body))
    }

    async fn get_document(&self, target: &DocTarget) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        let id = target.require_id()?.to_string();
        record(&mut state, "get_document", format!("{}/{}", target.index, id), &Value::Null);

        if let Some(error) = injected(&state, &target.index, &id) {
            return Ok(TransportResponse::new(500, json!({ "error": error })));
        }
        let Some(stored) = state.indices.get(&target.index) else {
            return Ok(index_missing(&target.index));
        };
        match stored.docs.get(&id) {
            Some(doc) => ok(found_doc(&target.index, &id, doc)),
            None => Ok(TransportResponse::new(
                404,
                json!({ "_index": target.index, "_id": id, "found": false }),
            )),
        }
    }

    async fn mget(&self, index: &str, ids: &[String]) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "mget", index, &json!({ "ids": ids }));

        let docs: Vec<Value> = ids
            .iter()
            .map(|id| {
                if let Some(error) = injected(&state, index, id) {
                    return json!({ "_index": index, "_id": id, "error": error });
                }
                match state.indices.get(index) {
                    None => json!({
                        "_index": index,
                        "_id": id,
                        "error": {
                            "type": "index_not_found_exception",
                            "reason": format!("no such index [{}]", index)
                        }
                    }),
                    Some(stored) => match stored.docs.get(id) {
                        Some(doc) => found_doc(index, id, doc),
                        None => json!({ "_index": index, "_id": id, "found": false }),
                    },
                }
            })
            .collect();

        ok(json!({ "docs": docs }))
    }

    async fn update_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "update_document", target.index.clone(), &body);
        let (status, body) = update_doc(&mut state, target, &body);
        Ok(TransportResponse::new(status, body))
    }

    async fn delete_document(&self, target: &DocTarget) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "delete_document", target.index.clone(), &Value::Null);
        let (status, body) = delete_doc(&mut state, target);
        Ok(TransportResponse::new(status, body))
    }

    async fn analyze(&self, index: Option<&str>, body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "analyze", index.unwrap_or(""), &body);

        let text = match &body["text"] {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        };

        let whole = body["analyzer"].as_str() == Some("keyword")
            || body["tokenizer"].as_str() == Some("keyword");

        let mut tokens = Vec::new();
        if whole {
            tokens.push(json!({
                "token": text,
                "start_offset": 0,
                "end_offset": text.len(),
                "type": "word",
                "position": 0
            }));
        } else {
            let mut position = 0;
            let mut offset = 0;
            for word in text.split_whitespace() {
                let start = text[offset..].find(word).map_or(offset, |i| offset + i);
                let end = start + word.len();
                offset = end;
                tokens.push(json!({
                    "token": word.to_lowercase(),
                    "start_offset": start,
                    "end_offset": end,
                    "type": "<ALPHANUM>",
                    "position": position
                }));
                position += 1;
            }
        }

        ok(json!({ "tokens": tokens }))
    }

    async fn search(&self, indices: &[String], body: Value) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "search", indices.join(","), &body);

        let mut selected: Vec<&str> = Vec::new();
        for name in state.indices.keys() {
            if indices.is_empty() || indices.iter().any(|p| matches_pattern(p, name)) {
                selected.push(name);
            }
        }
        for pattern in indices.iter().filter(|p| !p.contains('*')) {
            if !state.indices.contains_key(pattern.as_str()) {
                return Ok(index_missing(pattern));
            }
        }

        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let mut hits: Vec<(&str, &str, &StoredDoc)> = Vec::new();
        for name in selected {
            if let Some(stored) = state.indices.get(name) {
                for (id, doc) in &stored.docs {
                    if matches_query(&query, id, &doc.source) {
                        hits.push((name, id.as_str(), doc));
                    }
                }
            }
        }

        let keys = sort_keys(&body["sort"]);
        if !keys.is_empty() {
            hits.sort_by(|a, b| {
                for (field, desc) in &keys {
                    let ord = compare(
                        field_values(&a.2.source, field).first().copied(),
                        field_values(&b.2.source, field).first().copied(),
                    );
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let total = hits.len();
        let from = body["from"].as_u64().unwrap_or(0) as usize;
        let size = body["size"].as_u64().unwrap_or(10) as usize;
        let aggregations = body
            .get("aggs")
            .or_else(|| body.get("aggregations"))
            .map(|aggs| terms_aggregations(aggs, &hits));

        let page: Vec<Value> = hits
            .iter()
            .skip(from)
            .take(size)
            .map(|(index, id, doc)| {
                let mut hit = Map::new();
                hit.insert("_index".to_string(), json!(index));
                hit.insert("_id".to_string(), json!(id));
                hit.insert("_score".to_string(), json!(1.0));
                if let Some(routing) = &doc.routing {
                    hit.insert("_routing".to_string(), json!(routing));
                }
                if let Some(source) = filter_source(&doc.source, body.get("_source")) {
                    hit.insert("_source".to_string(), source);
                }
                Value::Object(hit)
            })
            .collect();

        let mut response = json!({
            "took": 1,
            "timed_out": false,
            "hits": {
                "total": { "value": total, "relation": "eq" },
                "max_score": if total > 0 { json!(1.0) } else { Value::Null },
                "hits": page
            }
        });
        if let Some(aggregations) = aggregations {
            response["aggregations"] = aggregations;
        }
        ok(response)
    }

    async fn bulk(&self, lines: Vec<Value>) -> Result<TransportResponse> {
        let mut state = self.state.lock();
        record(&mut state, "bulk", "", &Value::Array(lines.clone()));

        let mut items = Vec::new();
        let mut errors = false;
        let mut lines = lines.into_iter();

        while let Some(action) = lines.next() {
            let Some((op, meta)) = action.as_object().and_then(|m| m.iter().next()) else {
                continue;
            };
            let op = op.clone();
            let target = DocTarget {
                index: meta["_index"].as_str().unwrap_or_default().to_string(),
                id: meta["_id"].as_str().map(str::to_string),
                routing: meta["routing"].as_str().map(str::to_string),
                ..Default::default()
            };

            let (status, mut body) = match op.as_str() {
                "index" => {
                    let source = lines.next().unwrap_or(Value::Null);
                    write_doc(&mut state, &target, source, WriteMode::Index)
                }
                "create" => {
                    let source = lines.next().unwrap_or(Value::Null);
                    write_doc(&mut state, &target, source, WriteMode::Create)
                }
                "update" => {
                    let partial = lines.next().unwrap_or(Value::Null);
                    update_doc(&mut state, &target, &partial)
                }
                "delete" => delete_doc(&mut state, &target),
                other => (
                    400,
                    error_body("illegal_argument_exception", format!("unknown action [{}]", other)),
                ),
            };

            if let Value::Object(map) = &mut body {
                map.insert("status".to_string(), json!(status));
                if !map.contains_key("_index") {
                    map.insert("_index".to_string(), json!(target.index));
                }
                if !map.contains_key("_id")
                    && let Some(id) = &target.id
                {
                    map.insert("_id".to_string(), json!(id));
                }
            }
            if !(200..300).contains(&status) && !(op == "delete" && status == 404) {
                errors = true;
            }
            items.push(json!({ op: body }));
        }

        ok(json!({ "took": 1, "errors": errors, "items": items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: &str, id: &str) -> DocTarget {
        DocTarget::new(index, Some(id.to_string()))
    }

    #[tokio::test]
    async fn test_index_and_get() {
        let transport = MemoryTransport::new();
        let created = transport
            .index_document(&target("blog", "1"), json!({ "title": "Hello" }))
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.body["result"], json!("created"));
        assert_eq!(created.body["_version"], json!(1));

        let updated = transport
            .index_document(&target("blog", "1"), json!({ "title": "Again" }))
            .await
            .unwrap();
        assert_eq!(updated.body["_version"], json!(2));

        let got = transport.get_document(&target("blog", "1")).await.unwrap();
        assert_eq!(got.body["_source"]["title"], json!("Again"));

        let missing = transport.get_document(&target("blog", "2")).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body["found"], json!(false));
    }

    #[tokio::test]
    async fn test_auto_id() {
        let transport = MemoryTransport::new();
        let response = transport
            .index_document(&DocTarget::new("blog", None), json!({}))
            .await
            .unwrap();
        let id = response.body["_id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert!(transport.source("blog", id).is_some());
    }

    #[tokio::test]
    async fn test_create_index_twice() {
        let transport = MemoryTransport::new();
        assert!(transport.create_index("a", json!({})).await.unwrap().is_success());
        let again = transport.create_index("a", json!({})).await.unwrap();
        assert_eq!(again.status, 400);
        assert_eq!(again.body["error"]["type"], json!("resource_already_exists_exception"));
    }

    #[tokio::test]
    async fn test_update_merges_partial_doc() {
        let transport = MemoryTransport::new();
        transport.insert_raw("blog", "1", json!({ "title": "a", "views": 1 }));
        let response = transport
            .update_document(&target("blog", "1"), json!({ "doc": { "views": 2 } }))
            .await
            .unwrap();
        assert_eq!(response.body["result"], json!("updated"));
        assert_eq!(transport.source("blog", "1").unwrap(), json!({ "title": "a", "views": 2 }));

        let missing = transport
            .update_document(&target("blog", "9"), json!({ "doc": {} }))
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_search_subset() {
        let transport = MemoryTransport::new();
        transport.insert_raw("blog", "1", json!({ "tag": "rust", "n": 2, "body": "Fast code" }));
        transport.insert_raw("blog", "2", json!({ "tag": "go", "n": 1, "body": "Simple code" }));
        transport.insert_raw("blog", "3", json!({ "tag": "rust", "n": 3, "body": "Safe" }));

        let response = transport
            .search(
                &["blog".to_string()],
                json!({ "query": { "term": { "tag": "rust" } }, "sort": [{ "n": { "order": "desc" } }] }),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = response.body["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["3", "1"]);

        let matched = transport
            .search(&["blo*".to_string()], json!({ "query": { "match": { "body": "CODE" } } }))
            .await
            .unwrap();
        assert_eq!(matched.body["hits"]["total"]["value"], json!(2));

        let missing = transport.search(&["nope".to_string()], json!({})).await.unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_terms_aggregation() {
        let transport = MemoryTransport::new();
        transport.insert_raw("blog", "1", json!({ "tag": "rust" }));
        transport.insert_raw("blog", "2", json!({ "tag": "rust" }));
        transport.insert_raw("blog", "3", json!({ "tag": "go" }));

        let response = transport
            .search(&[], json!({ "size": 0, "aggs": { "tags": { "terms": { "field": "tag" } } } }))
            .await
            .unwrap();
        assert_eq!(
            response.body["aggregations"]["tags"]["buckets"][0],
            json!({ "key": "rust", "doc_count": 2 })
        );
        assert!(response.body["hits"]["hits"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_items() {
        let transport = MemoryTransport::new();
        transport.insert_raw("blog", "1", json!({}));
        let response = transport
            .bulk(vec![
                json!({ "index": { "_index": "blog", "_id": "2" } }),
                json!({ "title": "two" }),
                json!({ "create": { "_index": "blog", "_id": "1" } }),
                json!({ "title": "dup" }),
                json!({ "delete": { "_index": "blog", "_id": "1" } }),
            ])
            .await
            .unwrap();

        assert_eq!(response.body["errors"], json!(true));
        let items = response.body["items"].as_array().unwrap();
        assert_eq!(items[0]["index"]["status"], json!(201));
        assert_eq!(items[1]["create"]["status"], json!(409));
        assert_eq!(items[2]["delete"]["result"], json!("deleted"));
        assert_eq!(transport.doc_count("blog"), 1);
    }

    #[tokio::test]
    async fn test_analyze_whitespace_lowercase() {
        let transport = MemoryTransport::new();
        let response = transport
            .analyze(None, json!({ "analyzer": "standard", "text": "Quick Brown" }))
            .await
            .unwrap();
        let tokens = crate::analysis::parse_tokens(&response.body).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].token, "brown");
        assert_eq!(tokens[1].start_offset, 6);
    }

    #[test]
    fn test_patterns() {
        assert!(matches_pattern("logs-*", "logs-2024"));
        assert!(matches_pattern("*-2024", "logs-2024"));
        assert!(matches_pattern("l*s-*4", "logs-2024"));
        assert!(!matches_pattern("logs-*", "metrics-2024"));
        assert!(matches_pattern("exact", "exact"));
    }
}
