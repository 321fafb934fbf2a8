//! Bounded connection pool.
//!
//! Every entity operation acquires a connection for its duration via an
//! RAII guard; the connection goes back to the pool on every exit path.
//! A guard dropped with an open transaction cannot roll back
//! asynchronously, so that connection is discarded instead of reused.
//! Call [`PoolGuard::close`] for graceful release.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::{Result, StoreError};
use crate::storage::{Connect, Connection};

/// Pool configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `acquire` waits for a free slot before failing.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are dropped on reuse.
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are dropped on reuse.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: None,
        }
    }
}

impl PoolConfig {
    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(StoreError::Config("max_connections must be positive".into()));
        }
        if self.min_connections > self.max_connections {
            return Err(StoreError::Config(
                "min_connections exceeds max_connections".into(),
            ));
        }
        Ok(())
    }
}

struct Idle<T> {
    connection: T,
    created_at: Instant,
    last_used: Instant,
}

impl<T> Idle<T> {
    fn new(connection: T) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }
}

/// Connection pool over any [`Connect`] factory.
pub struct Pool<C: Connect> {
    config: PoolConfig,
    connector: C,
    available: Arc<Mutex<VecDeque<Idle<C::Conn>>>>,
    total: Arc<AtomicUsize>,
}

impl<C: Connect> Pool<C> {
    pub async fn new(connector: C, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            config,
            connector,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total: Arc::new(AtomicUsize::new(0)),
        };
        pool.ensure_min_connections().await?;
        Ok(pool)
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<PoolGuard<C::Conn>> {
        let start = Instant::now();

        loop {
            if let Some(mut idle) = self.take_available().await {
                idle.last_used = Instant::now();
                return Ok(self.guard(idle.connection));
            }

            // Reserve the slot before the suspending connect; otherwise
            // every concurrent acquirer passes the size check first and
            // the bound is exceeded.
            if self.total.fetch_add(1, Ordering::SeqCst) < self.config.max_connections {
                match self.connector.connect().await {
                    Ok(connection) => {
                        debug!(
                            total = self.total.load(Ordering::SeqCst),
                            "opened pooled connection"
                        );
                        return Ok(self.guard(connection));
                    }
                    Err(error) => {
                        self.total.fetch_sub(1, Ordering::SeqCst);
                        return Err(error);
                    }
                }
            }
            self.total.fetch_sub(1, Ordering::SeqCst);

            if start.elapsed() > self.config.acquire_timeout {
                return Err(StoreError::Database(
                    "connection pool timeout: no connections available".into(),
                ));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Pop a reusable idle connection, discarding expired ones.
    async fn take_available(&self) -> Option<Idle<C::Conn>> {
        let mut available = self.available.lock().await;

        let mut removed = 0usize;
        let mut kept = VecDeque::with_capacity(available.len());
        while let Some(idle) = available.pop_front() {
            if idle.is_expired(self.config.max_lifetime)
                || idle.is_idle_too_long(self.config.idle_timeout)
            {
                removed += 1;
            } else {
                kept.push_back(idle);
            }
        }
        *available = kept;
        if removed > 0 {
            self.total.fetch_sub(removed, Ordering::SeqCst);
        }

        available.pop_front()
    }

    async fn ensure_min_connections(&self) -> Result<()> {
        let mut available = self.available.lock().await;
        while self.total.load(Ordering::SeqCst) < self.config.min_connections {
            let connection = self.connector.connect().await?;
            available.push_back(Idle::new(connection));
            self.total.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn guard(&self, connection: C::Conn) -> PoolGuard<C::Conn> {
        PoolGuard {
            connection: Some(connection),
            pool: Arc::clone(&self.available),
            total: Arc::clone(&self.total),
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let available = self.available.lock().await;
        let total = self.total.load(Ordering::SeqCst);
        PoolStats {
            total_connections: total,
            available_connections: available.len(),
            active_connections: total.saturating_sub(available.len()),
            max_connections: self.config.max_connections,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

/// RAII guard returning the connection to the pool when dropped.
pub struct PoolGuard<T: Connection> {
    connection: Option<T>,
    pool: Arc<Mutex<VecDeque<Idle<T>>>>,
    total: Arc<AtomicUsize>,
}

impl<T: Connection> PoolGuard<T> {
    pub fn connection(&mut self) -> &mut T {
        self.connection
            .as_mut()
            .expect("connection already returned to pool")
    }

    /// Gracefully release the connection: roll back any open
    /// transaction, then return it to the pool. Preferred over relying
    /// on `Drop`, which cannot run async cleanup.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut connection) = self.connection.take() {
            if connection.in_transaction() {
                connection.rollback().await?;
            }
            let mut pool = self.pool.lock().await;
            pool.push_back(Idle::new(connection));
        }
        Ok(())
    }
}

impl<T: Connection> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if connection.in_transaction() {
                warn!("pool guard dropped with an open transaction; discarding connection");
                self.total.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            if let Ok(mut pool) = self.pool.try_lock() {
                pool.push_back(Idle::new(connection));
            } else {
                warn!("pool busy on guard drop; discarding connection");
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::{MemConnection, MemConnector, MemDb};
    use async_trait::async_trait;

    fn connector() -> MemConnector {
        MemDb::new().connector()
    }

    /// Connector that suspends mid-connect, widening the window between
    /// the size check and the slot becoming visible.
    struct SlowConnector(MemConnector);

    #[async_trait]
    impl Connect for SlowConnector {
        type Conn = MemConnection;

        async fn connect(&self) -> Result<MemConnection> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.connect().await
        }
    }

    #[tokio::test]
    async fn test_pool_creation_respects_min_connections() {
        let config = PoolConfig::default().min_connections(2).max_connections(5);
        let pool = Pool::new(connector(), config).await.unwrap();

        let stats = pool.stats().await;
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.available_connections, 2);
    }

    #[tokio::test]
    async fn test_connection_returns_on_drop() {
        let config = PoolConfig::default().max_connections(5);
        let pool = Pool::new(connector(), config).await.unwrap();

        {
            let _guard = pool.acquire().await.unwrap();
            let stats = pool.stats().await;
            assert_eq!(stats.active_connections, 1);
        }

        let stats = pool.stats().await;
        assert_eq!(stats.available_connections, 1);
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let config = PoolConfig::default()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(50));
        let pool = Pool::new(connector(), config).await.unwrap();

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PoolConfig::default().min_connections(5).max_connections(2);
        assert!(matches!(
            Pool::new(connector(), config).await,
            Err(StoreError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_size_bound_holds_under_concurrent_acquires() {
        let config = PoolConfig::default().max_connections(1);
        let pool = Arc::new(
            Pool::new(SlowConnector(MemDb::new().connector()), config)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let _guard = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats().await;
        assert_eq!(stats.total_connections, 1);
    }

    #[tokio::test]
    async fn test_guard_with_open_transaction_is_discarded() {
        let config = PoolConfig::default().max_connections(3);
        let pool = Pool::new(connector(), config).await.unwrap();

        {
            let mut guard = pool.acquire().await.unwrap();
            guard.connection().begin().await.unwrap();
        } // dropped mid-transaction

        let stats = pool.stats().await;
        assert_eq!(stats.total_connections, 0);
    }
}
