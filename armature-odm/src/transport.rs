//! The remote operations documents and indices dispatch through.
//!
//! [`Transport`] is the seam between the mapping layer and the engine. The
//! OpenSearch implementation sends real requests; [`crate::testing`] ships an
//! in-memory one.

use crate::{
    config::ConnectionConfig,
    error::{OdmError, Result},
};
use async_trait::async_trait;
use opensearch::{
    BulkParts, DeleteParts, GetParts, IndexParts, MgetParts, OpenSearch, SearchParts, UpdateParts,
    http::{
        request::JsonBody,
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::{
        IndicesAnalyzeParts, IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts,
        IndicesPutTemplateParts, IndicesRefreshParts,
    },
};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Refresh policy for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    /// Do not refresh.
    #[default]
    False,
    /// Refresh the affected shards immediately.
    True,
    /// Wait for the next scheduled refresh.
    WaitFor,
}

impl Refresh {
    fn to_param(self) -> opensearch::params::Refresh {
        match self {
            Refresh::False => opensearch::params::Refresh::False,
            Refresh::True => opensearch::params::Refresh::True,
            Refresh::WaitFor => opensearch::params::Refresh::WaitFor,
        }
    }

    /// Query string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresh::False => "false",
            Refresh::True => "true",
            Refresh::WaitFor => "wait_for",
        }
    }
}

/// Address and write parameters of a single document request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocTarget {
    /// Concrete index name.
    pub index: String,
    /// Document ID, `None` to let the engine assign one.
    pub id: Option<String>,
    /// Shard routing.
    pub routing: Option<String>,
    /// Refresh policy.
    pub refresh: Refresh,
    /// Retries on version conflicts (update only).
    pub retry_on_conflict: Option<u32>,
    /// Optimistic concurrency: expected sequence number.
    pub if_seq_no: Option<i64>,
    /// Optimistic concurrency: expected primary term.
    pub if_primary_term: Option<i64>,
}

impl DocTarget {
    /// Target a document in an index.
    pub fn new(index: impl Into<String>, id: Option<String>) -> Self {
        Self {
            index: index.into(),
            id,
            ..Default::default()
        }
    }

    pub(crate) fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| OdmError::validation("_id", "document has no id"))
    }
}

/// Status and decoded body of an engine response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body, `null` when empty.
    pub body: Value,
}

impl TransportResponse {
    /// Create a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the status is 404.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Turn a non-success response into [`OdmError::Request`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub(crate) fn into_error(self) -> OdmError {
        let error = &self.body["error"];
        let (error_type, reason) = match error {
            Value::Object(_) => (
                error["type"].as_str().unwrap_or("unknown").to_string(),
                error["reason"].as_str().unwrap_or("Unknown error").to_string(),
            ),
            Value::String(reason) => ("unknown".to_string(), reason.clone()),
            _ => ("unknown".to_string(), "Unknown error".to_string()),
        };
        OdmError::Request {
            status: self.status,
            error_type,
            reason,
        }
    }
}

/// Remote operations used by documents, indices, search and bulk.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Create an index with settings, mappings and aliases.
    async fn create_index(&self, index: &str, body: Value) -> Result<TransportResponse>;

    /// Delete an index.
    async fn delete_index(&self, index: &str) -> Result<TransportResponse>;

    /// Check whether an index exists.
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Register an index template.
    async fn put_template(&self, name: &str, body: Value) -> Result<TransportResponse>;

    /// Refresh an index.
    async fn refresh(&self, index: &str) -> Result<TransportResponse>;

    /// Index a full document.
    async fn index_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse>;

    /// Fetch a document.
    async fn get_document(&self, target: &DocTarget) -> Result<TransportResponse>;

    /// Fetch several documents from one index.
    async fn mget(&self, index: &str, ids: &[String]) -> Result<TransportResponse>;

    /// Partially update a document (`doc` or `script` body).
    async fn update_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse>;

    /// Delete a document.
    async fn delete_document(&self, target: &DocTarget) -> Result<TransportResponse>;

    /// Run text through an analyzer.
    async fn analyze(&self, index: Option<&str>, body: Value) -> Result<TransportResponse>;

    /// Search one or more indices; empty means all.
    async fn search(&self, indices: &[String], body: Value) -> Result<TransportResponse>;

    /// Send newline-delimited bulk actions.
    async fn bulk(&self, lines: Vec<Value>) -> Result<TransportResponse>;
}

/// [`Transport`] over the `opensearch` client.
#[derive(Clone)]
pub struct OpenSearchTransport {
    client: OpenSearch,
    hosts: Vec<String>,
}

impl OpenSearchTransport {
    /// Build a client from configuration. No request is sent.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        info!(hosts = ?config.hosts, "Initializing OpenSearch transport");

        let url = opensearch::http::Url::parse(config.url()?)
            .map_err(|e| OdmError::Config(format!("Invalid URL: {}", e)))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(config.request_timeout)
            .disable_proxy();

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.auth(opensearch::auth::Credentials::Basic(user.clone(), pass.clone()));
        }

        if let Some(tls) = &config.tls {
            builder = with_tls(builder, tls)?;
        }

        let transport = builder
            .build()
            .map_err(|e| OdmError::Connection(e.to_string()))?;

        debug!("OpenSearch transport initialized");

        Ok(Self {
            client: OpenSearch::new(transport),
            hosts: config.hosts.clone(),
        })
    }

    /// Get the underlying client.
    pub fn inner(&self) -> &OpenSearch {
        &self.client
    }
}

#[cfg(any(feature = "rustls", feature = "native-tls"))]
fn with_tls(builder: TransportBuilder, tls: &crate::config::TlsConfig) -> Result<TransportBuilder> {
    use opensearch::cert::{Certificate, CertificateValidation};

    let validation = if tls.danger_accept_invalid_certs {
        CertificateValidation::None
    } else if let Some(path) = &tls.ca_cert {
        let pem = std::fs::read(path)
            .map_err(|e| OdmError::Config(format!("Failed to read CA certificate {}: {}", path, e)))?;
        CertificateValidation::Full(Certificate::from_pem(&pem)?)
    } else {
        CertificateValidation::Default
    };
    Ok(builder.cert_validation(validation))
}

#[cfg(not(any(feature = "rustls", feature = "native-tls")))]
fn with_tls(_builder: TransportBuilder, _tls: &crate::config::TlsConfig) -> Result<TransportBuilder> {
    Err(OdmError::Config(
        "TLS settings require the rustls or native-tls feature".to_string(),
    ))
}

impl std::fmt::Debug for OpenSearchTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSearchTransport")
            .field("hosts", &self.hosts)
            .finish()
    }
}

async fn read(response: Response) -> Result<TransportResponse> {
    let status = response.status_code().as_u16();
    let text = response.text().await?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(TransportResponse::new(status, body))
}

#[async_trait]
impl Transport for OpenSearchTransport {
    async fn create_index(&self, index: &str, body: Value) -> Result<TransportResponse> {
        debug!(index, "Creating index");
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await?;
        read(response).await
    }

    async fn delete_index(&self, index: &str) -> Result<TransportResponse> {
        debug!(index, "Deleting index");
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index]))
            .send()
            .await?;
        read(response).await
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;
        Ok(response.status_code().is_success())
    }

    async fn put_template(&self, name: &str, body: Value) -> Result<TransportResponse> {
        debug!(template = name, "Putting index template");
        let response = self
            .client
            .indices()
            .put_template(IndicesPutTemplateParts::Name(name))
            .body(body)
            .send()
            .await?;
        read(response).await
    }

    async fn refresh(&self, index: &str) -> Result<TransportResponse> {
        debug!(index, "Refreshing index");
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await?;
        read(response).await
    }

    async fn index_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse> {
        debug!(index = %target.index, id = ?target.id, "Indexing document");
        let parts = match &target.id {
            Some(id) => IndexParts::IndexId(&target.index, id),
            None => IndexParts::Index(&target.index),
        };
        let mut request = self
            .client
            .index(parts)
            .body(body)
            .refresh(target.refresh.to_param());
        if let Some(routing) = &target.routing {
            request = request.routing(routing);
        }
        if let Some(seq_no) = target.if_seq_no {
            request = request.if_seq_no(seq_no);
        }
        if let Some(term) = target.if_primary_term {
            request = request.if_primary_term(term);
        }
        read(request.send().await?).await
    }

    async fn get_document(&self, target: &DocTarget) -> Result<TransportResponse> {
        let id = target.require_id()?;
        debug!(index = %target.index, id, "Getting document");
        let mut request = self.client.get(GetParts::IndexId(&target.index, id));
        if let Some(routing) = &target.routing {
            request = request.routing(routing);
        }
        read(request.send().await?).await
    }

    async fn mget(&self, index: &str, ids: &[String]) -> Result<TransportResponse> {
        debug!(index, count = ids.len(), "Getting documents");
        let response = self
            .client
            .mget(MgetParts::Index(index))
            .body(json!({ "ids": ids }))
            .send()
            .await?;
        read(response).await
    }

    async fn update_document(&self, target: &DocTarget, body: Value) -> Result<TransportResponse> {
        let id = target.require_id()?;
        debug!(index = %target.index, id, "Updating document");
        let mut request = self
            .client
            .update(UpdateParts::IndexId(&target.index, id))
            .body(body)
            .refresh(target.refresh.to_param());
        if let Some(routing) = &target.routing {
            request = request.routing(routing);
        }
        if let Some(retries) = target.retry_on_conflict {
            request = request.retry_on_conflict(i64::from(retries));
        }
        if let Some(seq_no) = target.if_seq_no {
            request = request.if_seq_no(seq_no);
        }
        if let Some(term) = target.if_primary_term {
            request = request.if_primary_term(term);
        }
        read(request.send().await?).await
    }

    async fn delete_document(&self, target: &DocTarget) -> Result<TransportResponse> {
        let id = target.require_id()?;
        debug!(index = %target.index, id, "Deleting document");
        let mut request = self
            .client
            .delete(DeleteParts::IndexId(&target.index, id))
            .refresh(target.refresh.to_param());
        if let Some(routing) = &target.routing {
            request = request.routing(routing);
        }
        read(request.send().await?).await
    }

    async fn analyze(&self, index: Option<&str>, body: Value) -> Result<TransportResponse> {
        let parts = match index {
            Some(index) => IndicesAnalyzeParts::Index(index),
            None => IndicesAnalyzeParts::None,
        };
        let response = self.client.indices().analyze(parts).body(body).send().await?;
        read(response).await
    }

    async fn search(&self, indices: &[String], body: Value) -> Result<TransportResponse> {
        debug!(indices = ?indices, "Executing search");
        let names: Vec<&str> = indices.iter().map(String::as_str).collect();
        let parts = if names.is_empty() {
            SearchParts::None
        } else {
            SearchParts::Index(&names)
        };
        let response = self.client.search(parts).body(body).send().await?;
        read(response).await
    }

    async fn bulk(&self, lines: Vec<Value>) -> Result<TransportResponse> {
        debug!(lines = lines.len(), "Executing bulk request");
        let body: Vec<JsonBody<Value>> = lines.into_iter().map(JsonBody::from).collect();
        let response = self.client.bulk(BulkParts::None).body(body).send().await?;
        read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let ok = TransportResponse::new(201, json!({ "result": "created" }));
        assert!(ok.error_for_status().is_ok());

        let err = TransportResponse::new(
            400,
            json!({ "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" } }),
        )
        .error_for_status()
        .unwrap_err();

        match err {
            OdmError::Request {
                status,
                error_type,
                reason,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error_type, "mapper_parsing_exception");
                assert_eq!(reason, "failed to parse");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_without_body() {
        let err = TransportResponse::new(500, Value::Null).into_error();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_doc_target_requires_id() {
        let target = DocTarget::new("blog", None);
        assert!(target.require_id().is_err());
        let target = DocTarget::new("blog", Some("1".to_string()));
        assert_eq!(target.require_id().unwrap(), "1");
    }

    #[test]
    fn test_transport_builds_without_network() {
        let transport = OpenSearchTransport::new(&ConnectionConfig::new("http://localhost:9200"));
        assert!(transport.is_ok());

        let bad = OpenSearchTransport::new(&ConnectionConfig::new("not a url"));
        assert!(matches!(bad, Err(OdmError::Config(_))));
    }

    #[test]
    fn test_refresh_strings() {
        assert_eq!(Refresh::default().as_str(), "false");
        assert_eq!(Refresh::WaitFor.as_str(), "wait_for");
    }
}
