//! Pooled connection bookkeeping.

use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a connection id of the form `conn_<uuid>`.
pub fn generate_connection_id() -> String {
    format!("conn_{}", Uuid::new_v4().simple())
}

/// One live connection plus its metadata, owned by the pool.
#[derive(Debug)]
pub(crate) struct ResourceConnection<C> {
    pub client: Arc<C>,
    pub id: String,
    pub created_at: Instant,
    pub last_used: Instant,
    pub in_use: bool,
    pub query_count: u64,
}

impl<C> ResourceConnection<C> {
    pub fn new(id: String, client: Arc<C>) -> Self {
        let now = Instant::now();
        Self {
            client,
            id,
            created_at: now,
            last_used: now,
            in_use: false,
            query_count: 0,
        }
    }

    pub fn mark_in_use(&mut self) {
        self.in_use = true;
        self.last_used = Instant::now();
        self.query_count += 1;
    }

    pub fn mark_idle(&mut self) {
        self.in_use = false;
        self.last_used = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            age: self.created_at.elapsed(),
            idle_for: self.idle_for(),
            in_use: self.in_use,
            query_count: self.query_count,
        }
    }
}

/// Read-only view of a pooled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: String,
    pub age: Duration,
    pub idle_for: Duration,
    pub in_use: bool,
    /// Times the connection has been handed out.
    pub query_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_format() {
        let id = generate_connection_id();
        assert!(id.starts_with("conn_"));
        assert_eq!(id.len(), "conn_".len() + 32);
        assert_ne!(id, generate_connection_id());
    }

    #[test]
    fn test_in_use_counts_queries() {
        let mut conn = ResourceConnection::new("conn_1".into(), Arc::new(()));
        conn.mark_in_use();
        conn.mark_idle();
        conn.mark_in_use();

        let info = conn.info();
        assert!(info.in_use);
        assert_eq!(info.query_count, 2);
    }
}
