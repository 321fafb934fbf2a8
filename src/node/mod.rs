//! Persistent entities.
//!
//! [`Node`] binds a schema-described entity to a storage table. Types
//! implement the four accessor methods; everything else is provided:
//! fetching, listing, dirty-tracked saves, deletion and storage-side
//! counter adjustment.
//!
//! The first save of a type with a reservation kind also records
//! `(id, kind)` in the reservation table, inside the same transaction as
//! the row insert, so an identifier never points at a row that failed to
//! materialize.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{Result, StoreError, Value};
use crate::model::{EntityState, FieldId, Schema};
use crate::storage::sql::{Delete, Insert, Select, Update};
use crate::storage::{Connection, Row};

/// Table holding `(id, kind)` reservation records.
pub const RESERVATION_TABLE: &str = "snowflakes";

#[async_trait]
pub trait Node: Send + Sync + Sized {
    /// The type's schema, built once and shared by every instance.
    fn schema() -> &'static Schema;

    fn from_state(state: EntityState) -> Self;

    fn state(&self) -> &EntityState;

    fn state_mut(&mut self) -> &mut EntityState;

    /// Reconstruct an instance from a fetched row. Columns the schema
    /// does not know are ignored; missing columns read as null.
    fn hydrate(row: &Row) -> Self {
        let schema = Self::schema();
        let values = schema
            .field_ids()
            .map(|field| {
                row.get(schema.spec(field).name())
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        Self::from_state(EntityState::hydrated(schema, values))
    }

    /// Current values of the primary-key fields, paired with their
    /// column names.
    fn key_values(&self) -> Vec<(&'static str, Value)> {
        let schema = Self::schema();
        schema
            .keys()
            .iter()
            .map(|key| (schema.name(*key), self.state().get(*key).clone()))
            .collect()
    }

    /// Fetch the single row matching the primary key.
    ///
    /// `keys` are the key values in schema key order. Zero rows is
    /// [`StoreError::NotFound`]; a storage fault is
    /// [`StoreError::NotFetched`].
    async fn get<C: Connection>(conn: &mut C, keys: &[Value]) -> Result<Self> {
        let schema = Self::schema();
        debug_assert_eq!(keys.len(), schema.keys().len());
        let mut select = Select::table(schema.table());
        for (key, value) in schema.keys().iter().zip(keys) {
            select = select.filter_eq(schema.name(*key), value.clone());
        }
        Self::get_with(conn, select).await
    }

    /// Fetch the first row matching a caller-built select.
    async fn get_with<C: Connection>(conn: &mut C, select: Select) -> Result<Self> {
        let (sql, params) = select.build();
        let row = conn
            .fetch_one(&sql, &params)
            .await
            .map_err(|e| StoreError::NotFetched(e.to_string()))?;
        row.map(|row| Self::hydrate(&row)).ok_or(StoreError::NotFound)
    }

    /// Fetch every row matching a caller-built select, in its order.
    async fn list<C: Connection>(conn: &mut C, select: Select) -> Result<Vec<Self>> {
        let (sql, params) = select.build();
        let rows = conn
            .fetch(&sql, &params)
            .await
            .map_err(|e| StoreError::NotFetched(e.to_string()))?;
        Ok(rows.iter().map(|row| Self::hydrate(row)).collect())
    }

    /// Persist the instance.
    ///
    /// Every current value is validated first; no statement runs if any
    /// field is invalid. A fresh instance inserts all fields (plus the
    /// reservation record, transactionally); a persisted one updates
    /// exactly the changed fields, keyed by the primary key. An update
    /// matching zero rows is [`StoreError::NotUpdated`]. On any failure
    /// the in-memory state keeps its pre-save changed set.
    async fn save<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        self.state().validate_all()?;
        if self.state().persisted() {
            self.update(conn).await
        } else {
            self.insert(conn).await
        }
    }

    async fn insert<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        let schema = Self::schema();
        let reservation = schema.reservation_kind();

        if reservation.is_some() {
            conn.begin()
                .await
                .map_err(|e| StoreError::NotCreated(e.to_string()))?;
        }

        let result = self.insert_statements(conn, reservation).await;
        match result {
            Ok(()) => {
                if reservation.is_some() {
                    conn.commit()
                        .await
                        .map_err(|e| StoreError::NotCreated(e.to_string()))?;
                }
                self.state_mut().complete_save();
                debug!(table = schema.table(), "inserted entity");
                Ok(())
            }
            Err(error) => {
                if reservation.is_some() {
                    if let Err(rollback_error) = conn.rollback().await {
                        warn!(%rollback_error, "rollback after failed insert");
                    }
                }
                Err(StoreError::NotCreated(error.to_string()))
            }
        }
    }

    async fn insert_statements<C: Connection>(
        &self,
        conn: &mut C,
        reservation: Option<&'static str>,
    ) -> Result<()> {
        let schema = Self::schema();

        if let Some(kind) = reservation {
            let id = self
                .state()
                .get(schema.keys()[0])
                .clone();
            let (sql, params) = Insert::into(RESERVATION_TABLE)
                .value("id", id)
                .value("kind", kind)
                .build();
            conn.execute(&sql, &params).await?;
        }

        let mut insert = Insert::into(schema.table());
        for field in schema.field_ids() {
            insert = insert.value(schema.name(field), self.state().get(field).clone());
        }
        let (sql, params) = insert.build();
        conn.execute(&sql, &params).await?;
        Ok(())
    }

    async fn update<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        let schema = Self::schema();
        let changed = self.state().changed_fields();
        if changed.is_empty() {
            return Ok(());
        }

        let mut update = Update::table(schema.table());
        for field in &changed {
            update = update.set(schema.name(*field), self.state().get(*field).clone());
        }
        for (column, value) in self.key_values() {
            update = update.filter_eq(column, value);
        }
        let (sql, params) = update.build();
        let affected = conn
            .execute(&sql, &params)
            .await
            .map_err(|e| StoreError::NotUpdated(e.to_string()))?;
        if affected == 0 {
            return Err(StoreError::NotUpdated(
                "no row matched the primary key".into(),
            ));
        }
        self.state_mut().complete_save();
        debug!(table = schema.table(), fields = changed.len(), "updated entity");
        Ok(())
    }

    /// Delete the row with the given primary key values, returning the
    /// affected row count.
    async fn delete_by<C: Connection>(conn: &mut C, keys: &[Value]) -> Result<u64> {
        let schema = Self::schema();
        debug_assert_eq!(keys.len(), schema.keys().len());
        let mut delete = Delete::from(schema.table());
        for (key, value) in schema.keys().iter().zip(keys) {
            delete = delete.filter_eq(schema.name(*key), value.clone());
        }
        let (sql, params) = delete.build();
        conn.execute(&sql, &params).await
    }

    /// Delete this instance's row.
    async fn delete<C: Connection>(&self, conn: &mut C) -> Result<u64> {
        let keys: Vec<Value> = self.key_values().into_iter().map(|(_, v)| v).collect();
        Self::delete_by(conn, &keys).await
    }

    /// Adjust an integer counter field by `delta`, storage side
    /// (`col = col + $n`), so concurrent adjustments never lose updates.
    ///
    /// The in-memory copy is left as is; re-fetch for the fresh count.
    async fn adjust_counter<C: Connection>(
        &self,
        conn: &mut C,
        field: FieldId,
        delta: i64,
    ) -> Result<()> {
        let keys: Vec<Value> = self.key_values().into_iter().map(|(_, v)| v).collect();
        Self::adjust_counter_by(conn, &keys, field, delta).await
    }

    /// [`Node::adjust_counter`] keyed directly by primary key values,
    /// for callers that hold a reference, not a fetched instance.
    async fn adjust_counter_by<C: Connection>(
        conn: &mut C,
        keys: &[Value],
        field: FieldId,
        delta: i64,
    ) -> Result<()> {
        let schema = Self::schema();
        debug_assert_eq!(keys.len(), schema.keys().len());
        let mut update = Update::table(schema.table()).set_add(schema.name(field), delta);
        for (key, value) in schema.keys().iter().zip(keys) {
            update = update.filter_eq(schema.name(*key), value.clone());
        }
        let (sql, params) = update.build();
        let affected = conn
            .execute(&sql, &params)
            .await
            .map_err(|e| StoreError::NotUpdated(e.to_string()))?;
        if affected == 0 {
            return Err(StoreError::NotUpdated(
                "no row matched the primary key".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldSpec};
    use crate::storage::mem::{MemConnection, MemDb};
    use lazy_static::lazy_static;

    struct Fields {
        id: FieldId,
        name: FieldId,
        count: FieldId,
    }

    lazy_static! {
        static ref GADGET: (Schema, Fields) = {
            let mut b = Schema::builder("gadgets");
            let id = b.add_key(FieldSpec::required("id", FieldKind::Id));
            let name = b.add(FieldSpec::required("name", FieldKind::text_max(16)));
            let count =
                b.add(FieldSpec::required("count", FieldKind::integer_min(0)).with_default(0i64));
            b.reserve_as("gadget");
            (b.build(), Fields { id, name, count })
        };
    }

    struct Gadget {
        state: EntityState,
    }

    impl Gadget {
        fn create(id: i64, name: &str) -> Self {
            let mut state = EntityState::new(&GADGET.0);
            state.set(GADGET.1.id, id).unwrap();
            state.set(GADGET.1.name, name).unwrap();
            Self { state }
        }
    }

    impl Node for Gadget {
        fn schema() -> &'static Schema {
            &GADGET.0
        }

        fn from_state(state: EntityState) -> Self {
            Self { state }
        }

        fn state(&self) -> &EntityState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EntityState {
            &mut self.state
        }
    }

    fn setup() -> (MemDb, MemConnection) {
        let db = MemDb::new();
        let conn = db.connection();
        (db, conn)
    }

    #[tokio::test]
    async fn test_insert_writes_row_and_reservation() {
        let (db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        gadget.save(&mut conn).await.unwrap();

        assert_eq!(db.count("gadgets"), 1);
        assert_eq!(db.count(RESERVATION_TABLE), 1);
        assert!(gadget.state().persisted());
        assert!(gadget.state().changed_fields().is_empty());
        assert!(gadget.state().is_locked(GADGET.1.id));
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_reservation() {
        let (db, mut conn) = setup();
        db.fail_once_on("INSERT INTO gadgets");

        let mut gadget = Gadget::create(1, "widget");
        let err = gadget.save(&mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::NotCreated(_)));
        assert!(err.is_not_saved());

        assert_eq!(db.count("gadgets"), 0);
        assert_eq!(db.count(RESERVATION_TABLE), 0);
        assert!(!gadget.state().persisted());
    }

    #[tokio::test]
    async fn test_get_roundtrip_and_not_found() {
        let (_db, mut conn) = setup();
        let mut gadget = Gadget::create(7, "widget");
        gadget.state.set(GADGET.1.count, 3i64).unwrap();
        gadget.save(&mut conn).await.unwrap();

        let fetched = Gadget::get(&mut conn, &[Value::Integer(7)]).await.unwrap();
        assert_eq!(fetched.state().get(GADGET.1.name), &Value::from("widget"));
        assert_eq!(fetched.state().get(GADGET.1.count), &Value::Integer(3));
        assert!(fetched.state().persisted());

        let missing = Gadget::get(&mut conn, &[Value::Integer(8)]).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_touches_only_changed_fields() {
        let (_db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        gadget.save(&mut conn).await.unwrap();

        // Bump the counter out of band; a full-row update would clobber it.
        gadget
            .adjust_counter(&mut conn, GADGET.1.count, 5)
            .await
            .unwrap();

        gadget.state_mut().set(GADGET.1.name, "gizmo").unwrap();
        gadget.save(&mut conn).await.unwrap();

        let fetched = Gadget::get(&mut conn, &[Value::Integer(1)]).await.unwrap();
        assert_eq!(fetched.state().get(GADGET.1.name), &Value::from("gizmo"));
        assert_eq!(fetched.state().get(GADGET.1.count), &Value::Integer(5));
    }

    #[tokio::test]
    async fn test_update_of_missing_row_is_not_updated() {
        let (_db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        gadget.save(&mut conn).await.unwrap();

        Gadget::delete_by(&mut conn, &[Value::Integer(1)]).await.unwrap();

        gadget.state_mut().set(GADGET.1.name, "gizmo").unwrap();
        let err = gadget.save(&mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::NotUpdated(_)));
    }

    #[tokio::test]
    async fn test_save_without_changes_is_noop() {
        let (db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        gadget.save(&mut conn).await.unwrap();

        db.fail_once_on("UPDATE gadgets"); // would fail if a statement ran
        gadget.save(&mut conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_statement() {
        let (db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        // Force an invalid current value past the setter.
        gadget.state = {
            let mut state = EntityState::new(&GADGET.0);
            state.set(GADGET.1.id, 1i64).unwrap();
            state
        };

        let err = gadget.save(&mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
        assert_eq!(db.count("gadgets"), 0);
        assert_eq!(db.count(RESERVATION_TABLE), 0);
    }

    #[tokio::test]
    async fn test_operations_run_on_spawned_tasks() {
        // Saves routinely run inside spawned request handlers, so the
        // trait's provided futures have to be Send.
        let (db, _conn) = setup();
        let worker = db.clone();
        let handle = tokio::spawn(async move {
            let mut conn = worker.connection();
            let mut gadget = Gadget::create(1, "widget");
            gadget.save(&mut conn).await
        });

        handle.await.unwrap().unwrap();
        assert_eq!(db.count("gadgets"), 1);
    }

    #[tokio::test]
    async fn test_delete_returns_affected_count() {
        let (db, mut conn) = setup();
        let mut gadget = Gadget::create(1, "widget");
        gadget.save(&mut conn).await.unwrap();

        assert_eq!(gadget.delete(&mut conn).await.unwrap(), 1);
        assert_eq!(db.count("gadgets"), 0);
        assert_eq!(Gadget::delete_by(&mut conn, &[Value::Integer(1)]).await.unwrap(), 0);
    }
}
