//! The namespace API the engine talks to.

use async_trait::async_trait;
use std::sync::Arc;
use vecscope_common::{QueryRequest, QueryResponse, Result, WriteRequest, WriteResponse};

/// A client scoped to one backend connection.
///
/// Implementations carry the transport and credentials; the engine only sees
/// namespace-level query and write calls.
#[async_trait]
pub trait NamespaceClient: Send + Sync {
    /// Run a filtered, ranked query or an aggregation.
    async fn query(&self, namespace: &str, request: QueryRequest) -> Result<QueryResponse>;

    /// Apply upserts, patches or deletes.
    async fn write(&self, namespace: &str, request: WriteRequest) -> Result<WriteResponse>;
}

#[async_trait]
impl<T: NamespaceClient + ?Sized> NamespaceClient for Arc<T> {
    async fn query(&self, namespace: &str, request: QueryRequest) -> Result<QueryResponse> {
        (**self).query(namespace, request).await
    }

    async fn write(&self, namespace: &str, request: WriteRequest) -> Result<WriteResponse> {
        (**self).write(namespace, request).await
    }
}
