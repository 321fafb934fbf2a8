//! In-memory storage backend.
//!
//! Implements the [`Connection`] contract over plain hash maps so entity
//! logic is exercisable without a real database. It interprets exactly
//! the statement dialect produced by [`crate::storage::sql`]; it is a
//! test/demo backend, not a general SQL engine.
//!
//! Transactions are snapshot-based and nest like savepoints: `begin`
//! pushes a copy of the tables, `rollback` restores the matching copy.

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::core::{Result, StoreError, Value};
use crate::storage::{Connect, Connection, Row};

type MemRow = HashMap<String, Value>;
type Tables = HashMap<String, Vec<MemRow>>;

struct MemState {
    tables: Tables,
    /// SQL fragments that poison the next matching statement. Lets
    /// tests inject storage faults at precise points.
    fail_on: Vec<String>,
}

/// Shared in-memory database. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemDb {
    state: Arc<Mutex<MemState>>,
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState {
                tables: HashMap::new(),
                fail_on: Vec::new(),
            })),
        }
    }

    pub fn connector(&self) -> MemConnector {
        MemConnector { db: self.clone() }
    }

    pub fn connection(&self) -> MemConnection {
        MemConnection {
            db: self.clone(),
            snapshots: Vec::new(),
        }
    }

    /// Make the next statement whose SQL contains `fragment` fail once.
    pub fn fail_once_on(&self, fragment: &str) {
        self.lock().fail_on.push(fragment.to_string());
    }

    /// Number of rows currently in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemConnector {
    db: MemDb,
}

#[async_trait]
impl Connect for MemConnector {
    type Conn = MemConnection;

    async fn connect(&self) -> Result<MemConnection> {
        Ok(self.db.connection())
    }
}

pub struct MemConnection {
    db: MemDb,
    snapshots: Vec<Tables>,
}

lazy_static! {
    static ref INSERT_RE: Regex =
        Regex::new(r"^INSERT INTO (?P<table>\w+) \((?P<columns>[^)]*)\) VALUES \((?P<values>.*)\)$")
            .unwrap();
    static ref UPDATE_RE: Regex =
        Regex::new(r"^UPDATE (?P<table>\w+) SET (?P<assigns>.+?)( WHERE (?P<where>.+))?$").unwrap();
    static ref DELETE_RE: Regex =
        Regex::new(r"^DELETE FROM (?P<table>\w+)( WHERE (?P<where>.+))?$").unwrap();
    static ref SELECT_RE: Regex = Regex::new(
        r"^SELECT \* FROM (?P<table>\w+)( WHERE (?P<where>.+?))?( ORDER BY (?P<order>.+))?$"
    )
    .unwrap();
}

enum Cond {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    In(String, Vec<Value>, bool),
    IsNull(String, bool),
}

impl Cond {
    fn matches(&self, row: &MemRow) -> bool {
        let value_of = |col: &str| row.get(col).cloned().unwrap_or(Value::Null);
        match self {
            Self::Eq(col, v) => value_of(col) == *v,
            Self::Lt(col, v) => {
                let current = value_of(col);
                !current.is_null() && current.compare(v) == std::cmp::Ordering::Less
            }
            Self::Gt(col, v) => {
                let current = value_of(col);
                !current.is_null() && current.compare(v) == std::cmp::Ordering::Greater
            }
            Self::In(col, values, negated) => values.contains(&value_of(col)) != *negated,
            Self::IsNull(col, want_null) => value_of(col).is_null() == *want_null,
        }
    }
}

fn param<'a>(token: &str, params: &'a [Value]) -> Result<&'a Value> {
    let index: usize = token
        .strip_prefix('$')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StoreError::Database(format!("bad placeholder '{}'", token)))?;
    // Placeholders are 1-based; `$0` has no parameter to name.
    index
        .checked_sub(1)
        .and_then(|i| params.get(i))
        .ok_or_else(|| StoreError::Database(format!("missing parameter {}", token)))
}

fn parse_conditions(clause: Option<&str>, params: &[Value]) -> Result<Vec<Cond>> {
    let Some(clause) = clause else {
        return Ok(Vec::new());
    };
    clause
        .split(" AND ")
        .map(|cond| {
            if let Some(col) = cond.strip_suffix(" IS NOT NULL") {
                return Ok(Cond::IsNull(col.to_string(), false));
            }
            if let Some(col) = cond.strip_suffix(" IS NULL") {
                return Ok(Cond::IsNull(col.to_string(), true));
            }
            for (separator, negated) in [(" NOT IN (", true), (" IN (", false)] {
                if let Some((col, rest)) = cond.split_once(separator) {
                    let inner = rest.strip_suffix(')').ok_or_else(|| {
                        StoreError::Database(format!("malformed IN condition '{}'", cond))
                    })?;
                    let values = inner
                        .split(", ")
                        .map(|token| param(token, params).cloned())
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Cond::In(col.to_string(), values, negated));
                }
            }
            for (separator, build) in [
                (" = ", Cond::Eq as fn(String, Value) -> Cond),
                (" < ", Cond::Lt as fn(String, Value) -> Cond),
                (" > ", Cond::Gt as fn(String, Value) -> Cond),
            ] {
                if let Some((col, token)) = cond.split_once(separator) {
                    return Ok(build(col.to_string(), param(token, params)?.clone()));
                }
            }
            Err(StoreError::Database(format!("unsupported condition '{}'", cond)))
        })
        .collect()
}

fn row_matches(row: &MemRow, conditions: &[Cond]) -> bool {
    conditions.iter().all(|cond| cond.matches(row))
}

impl MemConnection {
    fn check_injected_failure(&self, sql: &str) -> Result<()> {
        let mut state = self.db.lock();
        if let Some(position) = state.fail_on.iter().position(|f| sql.contains(f.as_str())) {
            state.fail_on.remove(position);
            return Err(StoreError::Database(format!(
                "injected failure for statement: {}",
                sql
            )));
        }
        Ok(())
    }

    fn run_statement(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_injected_failure(sql)?;

        if let Some(captures) = INSERT_RE.captures(sql) {
            let table = captures.name("table").unwrap().as_str();
            let columns: Vec<&str> = captures.name("columns").unwrap().as_str().split(", ").collect();
            let values = captures.name("values").unwrap().as_str();
            let mut row = MemRow::new();
            for (column, token) in columns.iter().zip(values.split(", ")) {
                row.insert(column.to_string(), param(token, params)?.clone());
            }
            let mut state = self.db.lock();
            state.tables.entry(table.to_string()).or_default().push(row);
            return Ok(1);
        }

        if let Some(captures) = UPDATE_RE.captures(sql) {
            let table = captures.name("table").unwrap().as_str();
            let conditions =
                parse_conditions(captures.name("where").map(|m| m.as_str()), params)?;
            let assigns = captures.name("assigns").unwrap().as_str();

            let mut state = self.db.lock();
            let rows = state.tables.entry(table.to_string()).or_default();
            let mut affected = 0u64;
            for row in rows.iter_mut().filter(|row| row_matches(row, &conditions)) {
                for assign in assigns.split(", ") {
                    let (col, rhs) = assign.split_once(" = ").ok_or_else(|| {
                        StoreError::Database(format!("malformed assignment '{}'", assign))
                    })?;
                    let relative_prefix = format!("{} + ", col);
                    if let Some(token) = rhs.strip_prefix(relative_prefix.as_str()) {
                        let delta = param(token, params)?.as_i64().ok_or_else(|| {
                            StoreError::Database("relative update needs an integer delta".into())
                        })?;
                        let current = row.get(col).and_then(Value::as_i64).unwrap_or(0);
                        row.insert(col.to_string(), Value::Integer(current + delta));
                    } else {
                        row.insert(col.to_string(), param(rhs, params)?.clone());
                    }
                }
                affected += 1;
            }
            return Ok(affected);
        }

        if let Some(captures) = DELETE_RE.captures(sql) {
            let table = captures.name("table").unwrap().as_str();
            let conditions =
                parse_conditions(captures.name("where").map(|m| m.as_str()), params)?;
            let mut state = self.db.lock();
            let rows = state.tables.entry(table.to_string()).or_default();
            let before = rows.len();
            rows.retain(|row| !row_matches(row, &conditions));
            return Ok((before - rows.len()) as u64);
        }

        Err(StoreError::Database(format!("unsupported statement: {}", sql)))
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_injected_failure(sql)?;

        let captures = SELECT_RE
            .captures(sql)
            .ok_or_else(|| StoreError::Database(format!("unsupported query: {}", sql)))?;
        let table = captures.name("table").unwrap().as_str();
        let conditions = parse_conditions(captures.name("where").map(|m| m.as_str()), params)?;

        let state = self.db.lock();
        let mut rows: Vec<MemRow> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, &conditions))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);

        if let Some(order) = captures.name("order").map(|m| m.as_str()) {
            if order == "RANDOM()" {
                // Fresh random hasher per query: a different permutation
                // each time, no RNG dependency needed in a test backend.
                let hasher = RandomState::new();
                let mut keyed: Vec<(u64, MemRow)> = rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, row)| (hasher.hash_one(i as u64), row))
                    .collect();
                keyed.sort_by_key(|(key, _)| *key);
                rows = keyed.into_iter().map(|(_, row)| row).collect();
            } else {
                let keys: Vec<(&str, bool)> = order
                    .split(", ")
                    .map(|part| {
                        part.strip_suffix(" DESC")
                            .map(|col| (col, true))
                            .or_else(|| part.strip_suffix(" ASC").map(|col| (col, false)))
                            .unwrap_or((part, false))
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    for (col, descending) in &keys {
                        let left = a.get(*col).cloned().unwrap_or(Value::Null);
                        let right = b.get(*col).cloned().unwrap_or(Value::Null);
                        let ordering = left.compare(&right);
                        let ordering = if *descending { ordering.reverse() } else { ordering };
                        if ordering != std::cmp::Ordering::Equal {
                            return ordering;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().collect())
            .collect())
    }
}

#[async_trait]
impl Connection for MemConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run_statement(sql, params)
    }

    async fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run_query(sql, params)
    }

    async fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.run_query(sql, params)?.into_iter().next())
    }

    async fn begin(&mut self) -> Result<()> {
        let snapshot = self.db.lock().tables.clone();
        self.snapshots.push(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshots
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Database("no active transaction".into()))
    }

    async fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| StoreError::Database("no active transaction".into()))?;
        self.db.lock().tables = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sql::{Delete, Insert, Order, Select, Update};

    async fn seed(conn: &mut MemConnection) {
        for (id, name, count) in [(1i64, "a", 10i64), (2, "b", 20), (3, "c", 30)] {
            let (sql, params) = Insert::into("things")
                .value("id", id)
                .value("name", name)
                .value("count", count)
                .build();
            conn.execute(&sql, &params).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        let (sql, params) = Select::table("things")
            .filter_gt("count", 10i64)
            .order_by("count", Order::Desc)
            .build();
        let rows = conn.fetch(&sql, &params).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&Value::from("c")));
    }

    #[tokio::test]
    async fn test_update_with_relative_assignment() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        let (sql, params) = Update::table("things")
            .set_add("count", -5)
            .filter_eq("id", 2i64)
            .build();
        assert_eq!(conn.execute(&sql, &params).await.unwrap(), 1);

        let (sql, params) = Select::table("things").filter_eq("id", 2i64).build();
        let row = conn.fetch_one(&sql, &params).await.unwrap().unwrap();
        assert_eq!(row.get("count"), Some(&Value::Integer(15)));
    }

    #[tokio::test]
    async fn test_zero_placeholder_is_an_error() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        let result = conn
            .fetch("SELECT * FROM things WHERE id = $0", &[Value::Integer(1)])
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_delete_returns_affected_count() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        let (sql, params) = Delete::from("things").filter_eq("id", 1i64).build();
        assert_eq!(conn.execute(&sql, &params).await.unwrap(), 1);
        assert_eq!(db.count("things"), 2);
    }

    #[tokio::test]
    async fn test_in_and_null_conditions() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        let (sql, params) = Select::table("things")
            .filter_in("id", vec![Value::Integer(1), Value::Integer(3)])
            .build();
        assert_eq!(conn.fetch(&sql, &params).await.unwrap().len(), 2);

        let (sql, params) = Select::table("things")
            .filter_not_in("id", vec![Value::Integer(1)])
            .build();
        assert_eq!(conn.fetch(&sql, &params).await.unwrap().len(), 2);

        let (sql, params) = Select::table("things").filter_is_null("name").build();
        assert_eq!(conn.fetch(&sql, &params).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_transaction_rollback_restores_tables() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        conn.begin().await.unwrap();
        let (sql, params) = Delete::from("things").build();
        conn.execute(&sql, &params).await.unwrap();
        assert_eq!(db.count("things"), 0);

        conn.rollback().await.unwrap();
        assert_eq!(db.count("things"), 3);
    }

    #[tokio::test]
    async fn test_nested_transactions_act_as_savepoints() {
        let db = MemDb::new();
        let mut conn = db.connection();
        seed(&mut conn).await;

        conn.begin().await.unwrap();
        let (sql, params) = Insert::into("things").value("id", 4i64).build();
        conn.execute(&sql, &params).await.unwrap();

        conn.begin().await.unwrap();
        let (sql, params) = Insert::into("things").value("id", 5i64).build();
        conn.execute(&sql, &params).await.unwrap();
        conn.rollback().await.unwrap(); // undoes only the inner insert

        assert_eq!(db.count("things"), 4);
        conn.commit().await.unwrap();
        assert_eq!(db.count("things"), 4);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let db = MemDb::new();
        let mut conn = db.connection();
        db.fail_once_on("INSERT INTO things");

        let (sql, params) = Insert::into("things").value("id", 1i64).build();
        assert!(conn.execute(&sql, &params).await.is_err());
        assert!(conn.execute(&sql, &params).await.is_ok());
    }
}
