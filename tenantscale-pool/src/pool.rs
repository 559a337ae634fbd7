//! Bounded connection pool.
//!
//! Holds at most `max_connections` live connections. Callers that find the
//! pool saturated wait in a FIFO queue and are handed a connection directly
//! by `release`, or fail with [`PoolError::AcquireTimeout`].

use crate::config::{INITIAL_CONNECTION_CAP, PoolConfig};
use crate::connection::{ConnectionInfo, ResourceConnection, generate_connection_id};
use crate::factory::ConnectionFactory;
use crate::{PoolError, PoolResult};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Chunk size used by [`ResourcePool::with_batch`] callers that have no preference.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Smoothing factor of the acquire/operation time averages.
const EMA_ALPHA: f64 = 0.1;

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub pending_requests: usize,
    pub successful_connections: u64,
    pub failed_connections: u64,
    /// Moving average of acquire time, in milliseconds.
    pub average_acquire_ms: f64,
    /// Moving average of `with_connection` time, in milliseconds.
    pub average_operation_ms: f64,
}

/// Result of [`ResourcePool::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub total_connections: usize,
    pub active_connections: usize,
    /// Probe round trip, absent if the probe failed.
    pub response_time_ms: Option<u64>,
    pub errors: Vec<String>,
}

/// What a queued acquire is woken with.
enum Grant<C> {
    /// An idle connection, already marked in use.
    Connection(Arc<C>),
    /// A reserved creation slot the waiter must fill itself.
    Slot,
}

struct PendingAcquire<C> {
    id: u64,
    sender: oneshot::Sender<Grant<C>>,
    enqueued_at: Instant,
}

struct PoolState<C> {
    connections: HashMap<String, ResourceConnection<C>>,
    waiters: VecDeque<PendingAcquire<C>>,
    /// Slots reserved by in-flight creates.
    creating: usize,
    next_waiter_id: u64,
    closed: bool,
    successful_connections: u64,
    failed_connections: u64,
    average_acquire_ms: f64,
    average_operation_ms: f64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            waiters: VecDeque::new(),
            creating: 0,
            next_waiter_id: 0,
            closed: false,
            successful_connections: 0,
            failed_connections: 0,
            average_acquire_ms: 0.0,
            average_operation_ms: 0.0,
        }
    }

    fn try_reserve(&mut self, max: usize) -> bool {
        if self.connections.len() + self.creating < max {
            self.creating += 1;
            true
        } else {
            false
        }
    }

    fn record_acquire(&mut self, elapsed: Duration) {
        self.average_acquire_ms = ema(self.average_acquire_ms, elapsed);
    }

    fn record_operation(&mut self, elapsed: Duration) {
        self.average_operation_ms = ema(self.average_operation_ms, elapsed);
    }

    /// Hand the idle connection `id` to the oldest live waiter.
    fn hand_off(&mut self, id: &str) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.sender.is_closed() {
                continue;
            }
            let client = match self.connections.get_mut(id) {
                Some(conn) => {
                    conn.mark_in_use();
                    conn.client.clone()
                }
                None => return false,
            };
            match waiter.sender.send(Grant::Connection(client)) {
                Ok(()) => {
                    self.record_acquire(waiter.enqueued_at.elapsed());
                    return true;
                }
                Err(_) => {
                    if let Some(conn) = self.connections.get_mut(id) {
                        conn.in_use = false;
                        conn.query_count = conn.query_count.saturating_sub(1);
                    }
                }
            }
        }
        false
    }

    /// Pass a free creation slot to the oldest live waiter.
    fn grant_slot(&mut self, max: usize) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.sender.is_closed() {
                continue;
            }
            if !self.try_reserve(max) {
                self.waiters.push_front(waiter);
                return false;
            }
            if waiter.sender.send(Grant::Slot).is_ok() {
                return true;
            }
            self.creating = self.creating.saturating_sub(1);
        }
        false
    }

    fn snapshot(&self) -> PoolStats {
        let active = self.connections.values().filter(|c| c.in_use).count();
        PoolStats {
            total_connections: self.connections.len(),
            active_connections: active,
            idle_connections: self.connections.len() - active,
            pending_requests: self.waiters.len(),
            successful_connections: self.successful_connections,
            failed_connections: self.failed_connections,
            average_acquire_ms: self.average_acquire_ms,
            average_operation_ms: self.average_operation_ms,
        }
    }
}

fn ema(previous: f64, sample: Duration) -> f64 {
    previous * (1.0 - EMA_ALPHA) + sample.as_secs_f64() * 1000.0 * EMA_ALPHA
}

struct PoolInner<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Connection>>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

enum Acquisition<C> {
    Ready(Arc<C>),
    Create,
    Wait(oneshot::Receiver<Grant<C>>, u64),
}

/// Bounded pool of connections produced by a [`ConnectionFactory`].
///
/// Cloning is cheap and shares the pool.
pub struct ResourcePool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> ResourcePool<F> {
    /// Create a pool. No connections are opened until [`initialize`](Self::initialize)
    /// or the first [`acquire`](Self::acquire).
    pub fn new(config: PoolConfig, factory: F) -> PoolResult<Self> {
        config.validate()?;

        info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            acquire_timeout = ?config.acquire_timeout,
            idle_timeout = ?config.idle_timeout,
            "Resource pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState::new()),
                initialized: AtomicBool::new(false),
                init_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection factory.
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Whether the pool has been initialized and not closed since.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Open up to `min(min_connections, 10)` connections and start the
    /// reaper and health monitor. Calling it again only logs a warning.
    pub async fn initialize(&self) {
        self.initialize_once(true).await;
    }

    async fn initialize_once(&self, warn_if_done: bool) {
        let _guard = self.inner.init_lock.lock().await;
        if self.is_initialized() {
            if warn_if_done {
                warn!("Resource pool already initialized");
            }
            return;
        }

        let config = &self.inner.config;
        info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Initializing connection pool"
        );

        let initial = config.min_connections.min(INITIAL_CONNECTION_CAP);
        let reserved = {
            let mut state = self.inner.state.lock();
            state.closed = false;
            (0..initial)
                .take_while(|_| state.try_reserve(config.max_connections))
                .count()
        };

        let created = join_all((0..reserved).map(|_| self.create_connection(false))).await;
        let failed = created.iter().filter(|r| r.is_err()).count();

        self.start_reaper();
        self.start_health_monitor();
        self.inner.initialized.store(true, Ordering::Release);

        let stats = self.stats();
        info!(
            initial_connections = stats.total_connections,
            failed,
            "Connection pool initialized"
        );
    }

    async fn ensure_initialized(&self) -> PoolResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.inner.state.lock().closed {
            return Err(PoolError::ShuttingDown);
        }
        self.initialize_once(false).await;
        Ok(())
    }

    /// Acquire a connection.
    ///
    /// Reuses an idle connection, creates one while under `max_connections`,
    /// or waits in FIFO order for a release until `acquire_timeout`.
    pub async fn acquire(&self) -> PoolResult<Arc<F::Connection>> {
        self.ensure_initialized().await?;
        let started = Instant::now();

        let next = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }

            let idle = state
                .connections
                .values_mut()
                .find(|c| !c.in_use)
                .map(|conn| {
                    conn.mark_in_use();
                    conn.client.clone()
                });

            if let Some(client) = idle {
                Acquisition::Ready(client)
            } else if state.try_reserve(self.inner.config.max_connections) {
                Acquisition::Create
            } else {
                let (sender, receiver) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(PendingAcquire {
                    id,
                    sender,
                    enqueued_at: started,
                });
                debug!(
                    pending_requests = state.waiters.len(),
                    "Waiting for a free connection"
                );
                Acquisition::Wait(receiver, id)
            }
        };

        let result = match next {
            Acquisition::Ready(client) => Ok(client),
            Acquisition::Create => self.create_connection(true).await,
            Acquisition::Wait(receiver, id) => {
                return self.wait_for_connection(receiver, id, started).await;
            }
        };

        let mut state = self.inner.state.lock();
        match &result {
            Ok(_) => state.record_acquire(started.elapsed()),
            Err(e) => error!(
                error = %e,
                pool_size = state.connections.len(),
                pending_requests = state.waiters.len(),
                "Failed to acquire connection"
            ),
        }
        result
    }

    async fn wait_for_connection(
        &self,
        mut receiver: oneshot::Receiver<Grant<F::Connection>>,
        waiter_id: u64,
        started: Instant,
    ) -> PoolResult<Arc<F::Connection>> {
        let timeout = self.inner.config.acquire_timeout;

        let grant = match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(_)) => return Err(PoolError::ShuttingDown),
            Err(_) => {
                let mut state = self.inner.state.lock();
                state.waiters.retain(|w| w.id != waiter_id);

                // A release or failed create may have woken us right at the deadline.
                match receiver.try_recv() {
                    Ok(Grant::Connection(client)) => return Ok(client),
                    Ok(Grant::Slot) => {
                        // Too late to create; pass the slot on.
                        state.creating = state.creating.saturating_sub(1);
                        state.grant_slot(self.inner.config.max_connections);
                    }
                    Err(_) => {}
                }

                state.failed_connections += 1;
                error!(
                    timeout = ?timeout,
                    pool_size = state.connections.len(),
                    pending_requests = state.waiters.len(),
                    "Connection acquire timeout"
                );
                return Err(PoolError::AcquireTimeout(timeout));
            }
        };

        match grant {
            Grant::Connection(client) => Ok(client),
            Grant::Slot => {
                debug!("Creating connection into a slot freed by a failed create");
                let result = self.create_connection(true).await;
                if result.is_ok() {
                    self.inner.state.lock().record_acquire(started.elapsed());
                }
                result
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// Hands it straight to the oldest waiter if any. Releasing an unknown
    /// or already idle connection only logs a warning.
    pub fn release(&self, client: &Arc<F::Connection>) {
        let mut state = self.inner.state.lock();

        let Some(conn) = state
            .connections
            .values_mut()
            .find(|c| Arc::ptr_eq(&c.client, client))
        else {
            warn!("Attempted to release unknown connection");
            return;
        };

        if !conn.in_use {
            warn!(connection_id = %conn.id, "Attempted to release idle connection");
            return;
        }

        conn.mark_idle();
        let id = conn.id.clone();
        state.hand_off(&id);
    }

    /// Acquire, run `operation`, and release on every exit path.
    pub async fn with_connection<T, E, Op, Fut>(&self, operation: Op) -> Result<T, E>
    where
        Op: FnOnce(Arc<F::Connection>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let started = Instant::now();
        let client = self.acquire().await?;
        let guard = ReleaseGuard {
            pool: self,
            client: client.clone(),
        };

        let result = operation(client).await;

        drop(guard);
        self.inner.state.lock().record_operation(started.elapsed());
        result
    }

    /// Run `operation` for every item through [`with_connection`](Self::with_connection),
    /// `batch_size` items at a time. Stops at the first chunk containing an
    /// error and returns that error.
    pub async fn with_batch<I, T, E, Op, Fut>(
        &self,
        items: Vec<I>,
        operation: Op,
        batch_size: usize,
    ) -> Result<Vec<T>, E>
    where
        Op: Fn(Arc<F::Connection>, I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError> + Display,
    {
        let batch_size = batch_size.max(1);
        let mut results = Vec::with_capacity(items.len());
        let mut remaining = items.into_iter();

        loop {
            let chunk: Vec<I> = remaining.by_ref().take(batch_size).collect();
            if chunk.is_empty() {
                break;
            }

            let operation = &operation;
            let outcomes = join_all(
                chunk
                    .into_iter()
                    .map(|item| self.with_connection(move |client| operation(client, item))),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(value) => results.push(value),
                    Err(e) => {
                        error!(error = %e, "Batch operation failed");
                        return Err(e);
                    }
                }
            }
        }

        Ok(results)
    }

    /// Pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().snapshot()
    }

    /// Metadata of every held connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .state
            .lock()
            .connections
            .values()
            .map(ResourceConnection::info)
            .collect()
    }

    /// Probe the backing store through a pooled connection.
    pub async fn health_check(&self) -> PoolHealth {
        let started = Instant::now();
        let factory = &self.inner.factory;

        let probe = self
            .with_connection(|client| async move { factory.probe(&client).await })
            .await;

        let stats = self.stats();
        match probe {
            Ok(()) => {
                let elapsed = started.elapsed();
                PoolHealth {
                    healthy: stats.total_connections > 0
                        && elapsed < self.inner.config.probe_latency_threshold,
                    total_connections: stats.total_connections,
                    active_connections: stats.active_connections,
                    response_time_ms: Some(elapsed.as_millis() as u64),
                    errors: Vec::new(),
                }
            }
            Err(e) => PoolHealth {
                healthy: false,
                total_connections: stats.total_connections,
                active_connections: stats.active_connections,
                response_time_ms: None,
                errors: vec![e.to_string()],
            },
        }
    }

    /// Destroy idle connections past `idle_timeout`, keeping at least
    /// `min_connections`. Returns the number destroyed.
    pub async fn reap_idle(&self) -> usize {
        let reaped = {
            let mut state = self.inner.state.lock();
            let config = &self.inner.config;

            let expired: Vec<String> = state
                .connections
                .values()
                .filter(|c| !c.in_use && c.idle_for() > config.idle_timeout)
                .map(|c| c.id.clone())
                .collect();

            let mut reaped = Vec::new();
            for id in expired {
                if state.connections.len() <= config.min_connections {
                    break;
                }
                if let Some(conn) = state.connections.remove(&id) {
                    reaped.push(conn);
                }
            }
            reaped
        };

        let count = reaped.len();
        join_all(reaped.into_iter().map(|conn| self.destroy_connection(conn))).await;

        if count > 0 {
            debug!(
                reaped = count,
                remaining = self.stats().total_connections,
                "Reaped idle connections"
            );
        }
        count
    }

    /// Create connections until `min_connections` are held.
    pub async fn replenish(&self) -> usize {
        let mut created = 0;
        loop {
            let reserved = {
                let mut state = self.inner.state.lock();
                !state.closed
                    && state.connections.len() + state.creating < self.inner.config.min_connections
                    && state.try_reserve(self.inner.config.max_connections)
            };
            if !reserved {
                break;
            }

            match self.create_connection(false).await {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!(error = %e, "Failed to create connection during health check");
                    tokio::time::sleep(self.inner.config.create_retry_interval).await;
                    break;
                }
            }
        }
        created
    }

    /// Reject waiters, destroy every connection and stop background tasks.
    pub async fn close(&self) {
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for handle in tasks {
            handle.abort();
        }

        let (waiters, connections) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let waiters = std::mem::take(&mut state.waiters);
            let connections: Vec<_> = state.connections.drain().map(|(_, c)| c).collect();
            (waiters, connections)
        };

        info!(
            total_connections = connections.len(),
            rejected_waiters = waiters.len(),
            "Closing connection pool"
        );

        // Dropping the senders fails every waiter with ShuttingDown.
        drop(waiters);

        join_all(connections.into_iter().map(|conn| self.destroy_connection(conn))).await;
        self.inner.initialized.store(false, Ordering::Release);

        info!("Connection pool closed");
    }

    /// Create one connection into a slot already reserved by the caller.
    async fn create_connection(&self, in_use: bool) -> PoolResult<Arc<F::Connection>> {
        let config = &self.inner.config;
        let id = generate_connection_id();

        let created = tokio::time::timeout(config.create_timeout, self.inner.factory.create(&id))
            .await
            .unwrap_or(Err(PoolError::CreateTimeout(config.create_timeout)));

        let client = {
            let mut state = self.inner.state.lock();
            state.creating = state.creating.saturating_sub(1);

            let client = match created {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    state.failed_connections += 1;
                    error!(connection_id = %id, error = %e, "Failed to create connection");
                    // Hand the freed slot to the next waiter.
                    if !state.closed && state.grant_slot(config.max_connections) {
                        debug!("Passed failed create slot to a waiting acquire");
                    }
                    return Err(e);
                }
            };

            if !state.closed {
                let mut conn = ResourceConnection::new(id.clone(), client.clone());
                if in_use {
                    conn.mark_in_use();
                }
                state.connections.insert(id.clone(), conn);
                state.successful_connections += 1;
                debug!(
                    connection_id = %id,
                    total_connections = state.connections.len(),
                    "Connection created"
                );
                if !in_use {
                    state.hand_off(&id);
                }
                return Ok(client);
            }
            client
        };

        // Closed while the factory was working.
        self.destroy_connection(ResourceConnection::new(id, client)).await;
        Err(PoolError::ShuttingDown)
    }

    async fn destroy_connection(&self, conn: ResourceConnection<F::Connection>) {
        let timeout = self.inner.config.destroy_timeout;
        let lifespan = conn.created_at.elapsed();
        let query_count = conn.query_count;
        let id = conn.id;

        match tokio::time::timeout(timeout, self.inner.factory.destroy(conn.client)).await {
            Ok(Ok(())) => debug!(
                connection_id = %id,
                lifespan_ms = lifespan.as_millis() as u64,
                query_count,
                "Connection destroyed"
            ),
            Ok(Err(e)) => error!(connection_id = %id, error = %e, "Error destroying connection"),
            Err(_) => error!(connection_id = %id, timeout = ?timeout, "Connection destroy timed out"),
        }
    }

    fn start_reaper(&self) {
        let period = self.inner.config.reap_interval;
        self.spawn_periodic(period, |pool| async move {
            pool.reap_idle().await;
        });
    }

    fn start_health_monitor(&self) {
        let period = self.inner.config.health_check_interval;
        self.spawn_periodic(period, |pool| async move {
            let health = pool.health_check().await;
            let stats = pool.stats();
            info!(
                healthy = health.healthy,
                response_time_ms = ?health.response_time_ms,
                errors = ?health.errors,
                total_connections = stats.total_connections,
                active_connections = stats.active_connections,
                idle_connections = stats.idle_connections,
                pending_requests = stats.pending_requests,
                "Connection pool health check"
            );
            pool.replenish().await;
        });
    }

    /// Run `tick` every `period` for as long as the pool is alive.
    fn spawn_periodic<T, Fut>(&self, period: Duration, tick: T)
    where
        T: Fn(ResourcePool<F>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!("Zero maintenance interval, periodic task not started");
            return;
        }
        let weak: Weak<PoolInner<F>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                tick(ResourcePool { inner }).await;
            }
        });
        self.inner.tasks.lock().push(handle);
    }
}

/// Releases its connection when dropped.
struct ReleaseGuard<'a, F: ConnectionFactory> {
    pool: &'a ResourcePool<F>,
    client: Arc<F::Connection>,
}

impl<F: ConnectionFactory> Drop for ReleaseGuard<'_, F> {
    fn drop(&mut self) {
        self.pool.release(&self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        type Connection = usize;

        async fn create(&self, _connection_id: &str) -> PoolResult<usize> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn probe(&self, _connection: &usize) -> PoolResult<()> {
            Ok(())
        }

        async fn destroy(&self, _connection: Arc<usize>) -> PoolResult<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(min: usize, max: usize) -> ResourcePool<CountingFactory> {
        ResourcePool::new(
            PoolConfig::new(min, max).with_acquire_timeout(Duration::from_millis(100)),
            CountingFactory::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_min_connections() {
        let pool = pool(3, 10);
        pool.initialize().await;

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.idle_connections, 3);
        assert_eq!(stats.successful_connections, 3);

        // Second call is a no-op.
        pool.initialize().await;
        assert_eq!(pool.stats().total_connections, 3);
    }

    #[tokio::test]
    async fn test_initial_connections_are_capped() {
        let pool = pool(15, 20);
        pool.initialize().await;
        assert_eq!(pool.stats().total_connections, INITIAL_CONNECTION_CAP);
    }

    #[tokio::test]
    async fn test_acquire_initializes_lazily() {
        let pool = pool(2, 4);
        assert!(!pool.is_initialized());

        let conn = pool.acquire().await.unwrap();
        assert!(pool.is_initialized());
        assert_eq!(pool.stats().active_connections, 1);
        pool.release(&conn);
    }

    #[tokio::test]
    async fn test_idle_connection_is_reused() {
        let pool = pool(0, 4);

        let first = pool.acquire().await.unwrap();
        pool.release(&first);
        let second = pool.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.factory().created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_release_is_harmless() {
        let pool = pool(0, 2);
        let conn = pool.acquire().await.unwrap();

        pool.release(&conn);
        pool.release(&conn);
        pool.release(&Arc::new(99));

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.idle_connections, 1);
    }

    #[tokio::test]
    async fn test_reaper_keeps_min_connections() {
        let pool = ResourcePool::new(
            PoolConfig::new(1, 5).with_idle_timeout(Duration::from_millis(10)),
            CountingFactory::default(),
        )
        .unwrap();

        let conns: Vec<_> = futures::future::join_all((0..4).map(|_| pool.acquire()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        for conn in &conns {
            pool.release(conn);
        }

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(pool.reap_idle().await, 3);
        assert_eq!(pool.stats().total_connections, 1);
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reaper_skips_busy_connections() {
        let pool = ResourcePool::new(
            PoolConfig::new(0, 5).with_idle_timeout(Duration::from_millis(10)),
            CountingFactory::default(),
        )
        .unwrap();

        let busy = pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(pool.reap_idle().await, 0);
        pool.release(&busy);
    }

    #[tokio::test]
    async fn test_replenish_restores_minimum() {
        let pool = pool(3, 5);
        assert_eq!(pool.replenish().await, 3);
        assert_eq!(pool.replenish().await, 0);
        assert_eq!(pool.stats().total_connections, 3);
    }

    #[tokio::test]
    async fn test_health_check_reports_healthy() {
        let pool = pool(1, 2);
        pool.initialize().await;

        let health = pool.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.total_connections, 1);
        assert!(health.response_time_ms.is_some());
        assert!(health.errors.is_empty());
    }

    #[tokio::test]
    async fn test_close_destroys_everything() {
        let pool = pool(2, 4);
        pool.initialize().await;
        pool.close().await;

        assert_eq!(pool.stats().total_connections, 0);
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 2);
        assert!(!pool.is_initialized());
        assert_eq!(pool.acquire().await.unwrap_err(), PoolError::ShuttingDown);
    }

    #[test]
    fn test_ema_smoothing() {
        let avg = ema(0.0, Duration::from_millis(100));
        assert!((avg - 10.0).abs() < 1e-9);
        let avg = ema(avg, Duration::from_millis(100));
        assert!((avg - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = ResourcePool::new(PoolConfig::new(5, 2), CountingFactory::default())
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::Config(_)));
    }
}
