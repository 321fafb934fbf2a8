use crate::core::{Result, StoreError, Value};
use crate::model::field::FieldSpec;

/// Handle to one field within a schema. Returned by the builder at
/// type-registration time; entities keep them next to the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

impl FieldId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Custom validator: returns the violated constraint as a string.
pub type Validator = fn(&Value) -> std::result::Result<(), String>;

/// Per-entity-type registry: the ordered field specs, each field's
/// validators, the primary-key set and the table binding. Built exactly
/// once at type-registration time and shared by every instance.
pub struct Schema {
    table: &'static str,
    fields: Vec<FieldSpec>,
    validators: Vec<Vec<Validator>>,
    keys: Vec<FieldId>,
    reservation_kind: Option<&'static str>,
}

impl Schema {
    pub fn builder(table: &'static str) -> SchemaBuilder {
        SchemaBuilder {
            table,
            fields: Vec::new(),
            validators: Vec::new(),
            keys: Vec::new(),
            reservation_kind: None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        (0..self.fields.len()).map(FieldId)
    }

    pub fn spec(&self, field: FieldId) -> &FieldSpec {
        &self.fields[field.0]
    }

    pub fn name(&self, field: FieldId) -> &'static str {
        self.fields[field.0].name()
    }

    /// Look a field up by name.
    pub fn field(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f.name() == name)
            .map(FieldId)
    }

    /// Primary-key fields, locked once an instance is persisted.
    pub fn keys(&self) -> &[FieldId] {
        &self.keys
    }

    pub fn is_key(&self, field: FieldId) -> bool {
        self.keys.contains(&field)
    }

    /// Entity kind recorded in the identifier reservation table on the
    /// first save, if this type participates in reservation.
    pub fn reservation_kind(&self) -> Option<&'static str> {
        self.reservation_kind
    }

    /// Run the intrinsic constraint check and every registered custom
    /// validator, in registration order.
    pub fn check(&self, field: FieldId, value: &Value) -> Result<()> {
        let spec = &self.fields[field.0];
        spec.check(value).map_err(|reason| StoreError::Validation {
            field: spec.name(),
            reason,
        })?;
        for validator in &self.validators[field.0] {
            validator(value).map_err(|reason| StoreError::Validation {
                field: spec.name(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Builder used once per entity type. Fields, keys and validators are
/// registered explicitly; there is no attribute scanning.
pub struct SchemaBuilder {
    table: &'static str,
    fields: Vec<FieldSpec>,
    validators: Vec<Vec<Validator>>,
    keys: Vec<FieldId>,
    reservation_kind: Option<&'static str>,
}

impl SchemaBuilder {
    /// Register a field, returning its handle.
    pub fn add(&mut self, spec: FieldSpec) -> FieldId {
        assert!(
            self.fields.iter().all(|f| f.name() != spec.name()),
            "field '{}' registered twice",
            spec.name()
        );
        self.fields.push(spec);
        self.validators.push(Vec::new());
        FieldId(self.fields.len() - 1)
    }

    /// Register a field and mark it as part of the primary key.
    pub fn add_key(&mut self, spec: FieldSpec) -> FieldId {
        let id = self.add(spec);
        self.keys.push(id);
        id
    }

    /// Register a custom validator for a field. Validators run in
    /// registration order after the intrinsic constraint check.
    pub fn validator(&mut self, field: FieldId, validator: Validator) {
        self.validators[field.0].push(validator);
    }

    /// Record identifier reservations for this type under `kind`.
    pub fn reserve_as(&mut self, kind: &'static str) {
        self.reservation_kind = Some(kind);
    }

    pub fn build(self) -> Schema {
        assert!(!self.fields.is_empty(), "schema has no fields");
        Schema {
            table: self.table,
            fields: self.fields,
            validators: self.validators,
            keys: self.keys,
            reservation_kind: self.reservation_kind,
        }
    }
}
