//! vecscope query engine
//!
//! Client-side engine for browsing and filtering a namespace of a vector
//! database. It coerces loosely typed filter input, compiles it into the
//! backend's filter AST, pages with id cursors in both directions, infers a
//! schema by sampling documents, and caches pages and schemas for a few
//! minutes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vecscope_client::{LoadOptions, MemoryBackend, QueryOrchestrator};
//! use vecscope_common::Document;
//!
//! #[tokio::main]
//! async fn main() -> vecscope_common::Result<()> {
//!     let backend = Arc::new(MemoryBackend::with_documents(
//!         "articles",
//!         vec![Document::new(1i64).with("title", "Hello")],
//!     ));
//!     let engine = QueryOrchestrator::builder(backend).namespace("articles").build();
//!
//!     engine.set_search_text("1");
//!     engine.load_documents(LoadOptions::default()).await;
//!     println!("{} documents", engine.total_count().unwrap_or(0));
//!     Ok(())
//! }
//! ```

pub use backend::NamespaceClient;
pub use cache::{CacheEntry, CacheStats, CachedPage, EngineCache, QueryCacheKey, SchemaCacheKey, TtlCache};
pub use coercion::{FieldType, coerce, coerce_value, parse_value_for_field_type};
pub use compiler::{Filter, FilterOperator, TypeMap, compile, describe, with_cursor};
pub use config::EngineConfig;
pub use debounce::Debouncer;
pub use discovery::{
    ArrayElementType, AttributeType, DiscoveredAttribute, DiscoveryOptions, NumericRange, StringPattern,
    default_visible_columns, discover,
};
pub use history::{FilterHistory, HistoryEntry, HistoryKey, MemoryFilterHistory};
pub use init::{ClientFactory, ClientInitializer};
pub use memory::MemoryBackend;
pub use orchestrator::{LoadOptions, LoadOutcome, OrchestratorBuilder, QueryOrchestrator};
pub use pagination::{PagePlan, PageStrategy, Pagination, total_pages};
pub use state::{Action, EngineState, QueryState, reduce};

pub mod backend;
pub mod cache;
pub mod coercion;
pub mod compiler;
pub mod config;
pub mod debounce;
pub mod discovery;
pub mod history;
pub mod init;
pub mod memory;
pub mod orchestrator;
pub mod pagination;
pub mod state;
