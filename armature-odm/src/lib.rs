//! Declarative document mapping for OpenSearch/Elasticsearch in the Armature
//! framework.
//!
//! This crate provides:
//! - Field descriptors and type-hint translation
//! - Schemas with inheritance, tagged unions and wire mappings
//! - Documents with validation, dirty tracking and engine metadata
//! - A process-wide registry of named connections
//! - Index and template descriptors with custom analysis
//! - Search, bulk dispatch and a blocking facade
//!
//! # Example
//!
//! ```rust,no_run
//! use armature_odm::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     connections().configure([(
//!         "default".to_string(),
//!         ConnectionConfig::new("http://localhost:9200"),
//!     )]);
//!
//!     let article = Arc::new(
//!         Schema::builder("Article")
//!             .field("title", Field::text().required().sub_field("raw", Field::keyword()))
//!             .typed::<Vec<String>>("tags")
//!             .field("published", Field::date())
//!             .index("articles")
//!             .build()?,
//!     );
//!
//!     Index::new("articles")
//!         .shards(1)
//!         .document(article.clone())
//!         .create(true)
//!         .await?;
//!
//!     let mut doc = Document::new(article.clone()).with_id("1");
//!     doc.set("title", "Hello OpenSearch")?;
//!     doc.set("tags", ["tutorial", "search"])?;
//!     doc.save(SaveOptions::default().refresh(Refresh::WaitFor)).await?;
//!
//!     let results = Search::new(article.clone())
//!         .match_field("title", "hello")
//!         .sort(article.proxy("title.raw").ok_or("no such field")?.asc())
//!         .execute()
//!         .await?;
//!     println!("{} hits", results.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod analysis;
mod bulk;
mod config;
mod connections;
mod document;
mod error;
mod field;
mod hint;
mod index;
mod schema;
mod search;
mod transport;

pub mod blocking;
pub mod testing;

pub use analysis::{AnalysisSettings, AnalyzeToken, Analyzer, Component, CustomAnalyzer};
pub use bulk::{Bulk, BulkItem, BulkItemError, BulkItemStatus, BulkResponse};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, ConnectionsConfig, FileFormat, TlsConfig};
pub use connections::{Connection, ConnectionFactory, Connections, DEFAULT_ALIAS, connections};
pub use document::{
    DeleteOptions, DocMeta, Document, GetOptions, MgetOptions, Missing, SaveOptions, SaveResult,
    Script, UpdateOptions,
};
pub use error::{OdmError, Result};
pub use field::{CALENDAR_DATE_FORMAT, Field, FieldKind};
pub use hint::{Binary, FieldDecl, Hinted, TypeHint, translate};
pub use index::{Index, IndexTemplate};
pub use schema::{FieldProxy, FieldRef, Schema, SchemaBuilder, SchemaRegistry, TaggedUnion};
pub use search::{Aggregation, Search, SearchResponse, Sort, SortOrder};
pub use transport::{DocTarget, OpenSearchTransport, Refresh, Transport, TransportResponse};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        ConnectionConfig, Document, Field, FieldRef, Index, OdmError, Refresh, Result, SaveOptions,
        Schema, Search, SortOrder, connections,
    };
}
