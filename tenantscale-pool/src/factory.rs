//! Connection factory seam.

use crate::PoolResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Creates, probes and tears down connections to the backing store.
///
/// The pool wraps each created connection in an `Arc` and identifies it by
/// pointer on release, so the connection type needs no identity of its own.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Handle to one live connection.
    type Connection: Send + Sync + 'static;

    /// Establish a connection tagged with `connection_id`.
    async fn create(&self, connection_id: &str) -> PoolResult<Self::Connection>;

    /// Run a cheap query to verify the connection works.
    async fn probe(&self, connection: &Self::Connection) -> PoolResult<()>;

    /// Tear down a connection the pool no longer holds.
    async fn destroy(&self, _connection: Arc<Self::Connection>) -> PoolResult<()> {
        Ok(())
    }
}
