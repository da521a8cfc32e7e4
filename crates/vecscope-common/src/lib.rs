//! Common library for vecscope
//!
//! This crate provides the types shared by the query engine and any backend
//! transport: the tagged document value, the error type, the filter AST and
//! the request/response envelopes of the namespace API.
//!
//! Modules:
//! * `error`: Defines error types and handling.
//! * `filter`: Defines the backend filter AST and its tuple wire form.
//! * `protocol`: Defines query/write request and response bodies.
//! * `value`: Defines the tagged attribute value.

pub mod error;
pub mod filter;
pub mod protocol;
pub mod value;

// Re-export commonly used types at the base
pub use error::*;
pub use filter::{FilterExpr, FilterOp};
pub use protocol::{Document, QueryRequest, QueryResponse, RankBy, SortDirection, WriteRequest, WriteResponse};
pub use value::{Value, ValueType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
