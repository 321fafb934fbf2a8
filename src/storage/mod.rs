//! Storage contract consumed by the persistence core, plus the pieces
//! shipped with it: parameterized statement builders, a bounded
//! connection pool and an in-memory backend for tests and demos.

pub mod mem;
pub mod pool;
pub mod sql;

use async_trait::async_trait;

use crate::core::{Result, Value};

/// One fetched row: column name/value pairs in select order.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// A storage connection.
///
/// Statements are parameterized with `$1..$n` placeholders. Transactions
/// nest: an inner `begin` behaves like a savepoint, so a multi-step save
/// can run inside a larger caller-owned transaction. The core never
/// imposes its own timeout; cancellation is the caller's business.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query, returning every matching row.
    async fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query, returning the first matching row if any.
    async fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>>;

    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;
}

/// Connection factory used by the pool.
#[async_trait]
pub trait Connect: Send + Sync {
    type Conn: Connection + 'static;

    async fn connect(&self) -> Result<Self::Conn>;
}
