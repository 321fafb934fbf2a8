//! Declarative, validated, dirty-tracked field storage for entity
//! instances. Knows nothing about any database: schemas describe fields
//! and constraints, `EntityState` carries per-instance values plus the
//! changed and locked sets.

pub mod field;
pub mod schema;
pub mod state;

pub use field::{FieldDefault, FieldKind, FieldSpec};
pub use schema::{FieldId, Schema, SchemaBuilder, Validator};
pub use state::EntityState;
