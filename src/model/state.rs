use crate::core::{Result, StoreError, Value};
use crate::model::schema::{FieldId, Schema};

/// Per-instance entity state: current value for every field of the
/// schema, the changed set (fields mutated since the last save), the
/// locked set (fields rejecting further writes) and the persisted flag.
///
/// Assignment is all-or-nothing: a write that fails the lock check or
/// validation leaves the state exactly as it was.
pub struct EntityState {
    schema: &'static Schema,
    values: Vec<Value>,
    changed: Vec<bool>,
    locked: Vec<bool>,
    persisted: bool,
}

impl EntityState {
    /// Fresh, unpersisted state seeded with every field's default.
    /// All fields start changed so the first save writes a full row.
    pub fn new(schema: &'static Schema) -> Self {
        let values = schema
            .field_ids()
            .map(|f| schema.spec(f).initial_value())
            .collect();
        Self {
            schema,
            values,
            changed: vec![true; schema.len()],
            locked: vec![false; schema.len()],
            persisted: false,
        }
    }

    /// State reconstructed from storage: values as fetched, nothing
    /// changed, primary keys locked, persisted.
    pub fn hydrated(schema: &'static Schema, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), schema.len());
        let mut state = Self {
            schema,
            values,
            changed: vec![false; schema.len()],
            locked: vec![false; schema.len()],
            persisted: true,
        };
        state.lock_keys();
        state
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn get(&self, field: FieldId) -> &Value {
        &self.values[field.index()]
    }

    /// Assign a value to a field.
    ///
    /// Rejects writes to locked fields, then runs the field's intrinsic
    /// constraint check and every custom validator; only a fully valid
    /// write is stored and marked changed.
    pub fn set(&mut self, field: FieldId, value: impl Into<Value>) -> Result<()> {
        if self.locked[field.index()] {
            return Err(StoreError::LockedField {
                field: self.schema.name(field),
            });
        }
        let value = value.into();
        self.schema.check(field, &value)?;
        self.values[field.index()] = value;
        self.changed[field.index()] = true;
        Ok(())
    }

    pub fn is_changed(&self, field: FieldId) -> bool {
        self.changed[field.index()]
    }

    pub fn changed_fields(&self) -> Vec<FieldId> {
        self.schema
            .field_ids()
            .filter(|f| self.changed[f.index()])
            .collect()
    }

    pub fn mark_all_changed(&mut self) {
        self.changed.fill(true);
    }

    pub fn clear_changed(&mut self) {
        self.changed.fill(false);
    }

    pub fn is_locked(&self, field: FieldId) -> bool {
        self.locked[field.index()]
    }

    pub fn lock(&mut self, field: FieldId) {
        self.locked[field.index()] = true;
    }

    pub fn unlock(&mut self, field: FieldId) {
        self.locked[field.index()] = false;
    }

    pub fn lock_all(&mut self) {
        self.locked.fill(true);
    }

    pub fn unlock_all(&mut self) {
        self.locked.fill(false);
    }

    /// Lock every primary-key field.
    pub fn lock_keys(&mut self) {
        for key in self.schema.keys() {
            self.locked[key.index()] = true;
        }
    }

    pub fn persisted(&self) -> bool {
        self.persisted
    }

    /// Force-check every current value against its constraints and
    /// validators. Run before every save.
    pub fn validate_all(&self) -> Result<()> {
        for field in self.schema.field_ids() {
            self.schema.check(field, &self.values[field.index()])?;
        }
        Ok(())
    }

    /// Put back a previously read value and changed flag, bypassing
    /// locks and validation. For undoing internal writes after a
    /// failed save; never for user input.
    pub(crate) fn restore(&mut self, field: FieldId, value: Value, changed: bool) {
        self.values[field.index()] = value;
        self.changed[field.index()] = changed;
    }

    /// Transition after a successful save: nothing changed, keys
    /// locked, persisted.
    pub(crate) fn complete_save(&mut self) {
        self.clear_changed();
        self.persisted = true;
        self.lock_keys();
    }
}
