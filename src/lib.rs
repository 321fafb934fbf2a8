// ============================================================================
// storycore: identity & persistence core for a story-sharing backend
// ============================================================================

pub mod core;
pub mod entities;
pub mod listing;
pub mod model;
pub mod node;
pub mod snowflake;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{Result, StoreError, Value};
pub use entities::{Like, Post, Reservation, Topic, User};
pub use listing::{Direction, Listing, Page};
pub use node::Node;
pub use snowflake::{Id, SnowflakeGenerator, SnowflakeLayout};
pub use storage::pool::{Pool, PoolConfig, PoolGuard, PoolStats};
pub use storage::{Connect, Connection};

// ============================================================================
// High-level Store API
// ============================================================================

/// Identifier generation and pooled storage access, bundled.
///
/// This is the recommended entry point for applications: one generator
/// shared by every entity type, one bounded pool of storage
/// connections.
///
/// # Examples
///
/// ```
/// use storycore::storage::mem::MemDb;
/// use storycore::{Node, Store, User};
///
/// # fn main() -> storycore::Result<()> {
/// # tokio_test::block_on(async {
/// let db = MemDb::new();
/// let store = Store::new(db.connector()).await?;
///
/// let id = store.next_id().await;
/// let mut user = User::create(id, "alice", "Alice", "secret")?;
///
/// let mut guard = store.acquire().await?;
/// user.save(guard.connection()).await?;
/// guard.close().await?;
/// # Ok(())
/// # })
/// # }
/// ```
pub struct Store<C: Connect> {
    pool: Pool<C>,
    generator: SnowflakeGenerator,
}

impl<C: Connect> Store<C> {
    /// Build a store with default pool sizing and identifier layout.
    pub async fn new(connector: C) -> Result<Self> {
        Self::with_config(connector, PoolConfig::default(), SnowflakeLayout::default()).await
    }

    /// Build a store with explicit configuration. Both configs are
    /// validated here; nothing fails later for configuration reasons.
    pub async fn with_config(
        connector: C,
        pool_config: PoolConfig,
        layout: SnowflakeLayout,
    ) -> Result<Self> {
        let generator = SnowflakeGenerator::new(layout)?;
        let pool = Pool::new(connector, pool_config).await?;
        Ok(Self { pool, generator })
    }

    /// Issue the next snowflake identifier.
    pub async fn next_id(&self) -> Id {
        self.generator.next().await
    }

    /// Acquire a pooled connection for one unit of work.
    pub async fn acquire(&self) -> Result<PoolGuard<C::Conn>> {
        self.pool.acquire().await
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn generator(&self) -> &SnowflakeGenerator {
        &self.generator
    }
}
