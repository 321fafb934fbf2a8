use crate::core::Value;

/// Built-in field kinds and their intrinsic constraints.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Boolean,
    Integer { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    Text { min_len: Option<usize>, max_len: Option<usize> },
    Bytes { min_len: Option<usize>, max_len: Option<usize> },
    Timestamp { require_timezone: bool },
    /// Reference to another entity kind, stored as that entity's id.
    Relation { kind: &'static str },
    /// Snowflake identifier.
    Id,
}

impl FieldKind {
    pub fn integer() -> Self {
        Self::Integer { min: None, max: None }
    }

    pub fn integer_min(min: i64) -> Self {
        Self::Integer { min: Some(min), max: None }
    }

    pub fn float() -> Self {
        Self::Float { min: None, max: None }
    }

    pub fn text() -> Self {
        Self::Text { min_len: None, max_len: None }
    }

    pub fn text_max(max_len: usize) -> Self {
        Self::Text { min_len: None, max_len: Some(max_len) }
    }

    pub fn bytes() -> Self {
        Self::Bytes { min_len: None, max_len: None }
    }

    pub fn timestamp() -> Self {
        Self::Timestamp { require_timezone: false }
    }

    pub fn timestamp_with_timezone() -> Self {
        Self::Timestamp { require_timezone: true }
    }

    pub fn relation(kind: &'static str) -> Self {
        Self::Relation { kind }
    }
}

/// Default-value provider for a field.
#[derive(Clone)]
pub enum FieldDefault {
    None,
    Value(Value),
    Provider(fn() -> Value),
}

impl FieldDefault {
    pub(crate) fn resolve(&self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Provider(f) => f(),
        }
    }
}

/// Static descriptor of one storable attribute: name, nullability,
/// default provider and intrinsic constraints. Defined once when the
/// entity type is declared, immutable thereafter.
#[derive(Clone)]
pub struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
    nullable: bool,
    default: FieldDefault,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            default: FieldDefault::None,
        }
    }

    /// A non-nullable field.
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            nullable: false,
            ..Self::new(name, kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }

    pub fn with_default_fn(mut self, provider: fn() -> Value) -> Self {
        self.default = FieldDefault::Provider(provider);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn initial_value(&self) -> Value {
        self.default.resolve()
    }

    /// Intrinsic constraint check. Custom validators run separately,
    /// after this passes.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("null value is disallowed".into())
            };
        }

        match (&self.kind, value) {
            (FieldKind::Boolean, Value::Boolean(_)) => Ok(()),

            (FieldKind::Integer { min, max }, Value::Integer(i)) => {
                if let Some(min) = min {
                    if i < min {
                        return Err(format!("value {} is less than minimum {}", i, min));
                    }
                }
                if let Some(max) = max {
                    if i > max {
                        return Err(format!("value {} is greater than maximum {}", i, max));
                    }
                }
                Ok(())
            }

            (FieldKind::Float { min, max }, Value::Float(f)) => {
                if let Some(min) = min {
                    if f < min {
                        return Err(format!("value {} is less than minimum {}", f, min));
                    }
                }
                if let Some(max) = max {
                    if f > max {
                        return Err(format!("value {} is greater than maximum {}", f, max));
                    }
                }
                Ok(())
            }

            (FieldKind::Text { min_len, max_len }, Value::Text(s)) => {
                check_length(s.chars().count(), *min_len, *max_len)
            }

            (FieldKind::Bytes { min_len, max_len }, Value::Bytes(b)) => {
                check_length(b.len(), *min_len, *max_len)
            }

            (FieldKind::Timestamp { require_timezone }, v) => match v {
                Value::Timestamp(_) => Ok(()),
                Value::NaiveTimestamp(_) => {
                    if *require_timezone {
                        Err("naive timestamp is disallowed".into())
                    } else {
                        Ok(())
                    }
                }
                other => Err(format!("expected TIMESTAMP, got {}", other.type_name())),
            },

            (FieldKind::Relation { .. }, Value::Integer(i)) | (FieldKind::Id, Value::Integer(i)) => {
                if *i < 0 {
                    Err("identifiers are non-negative".into())
                } else {
                    Ok(())
                }
            }

            (kind, other) => Err(format!(
                "expected {}, got {}",
                kind_name(kind),
                other.type_name()
            )),
        }
    }
}

fn check_length(len: usize, min: Option<usize>, max: Option<usize>) -> Result<(), String> {
    if let Some(min) = min {
        if len < min {
            return Err(format!("length {} is less than minimum {}", len, min));
        }
    }
    if let Some(max) = max {
        if len > max {
            return Err(format!("length {} is greater than maximum {}", len, max));
        }
    }
    Ok(())
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Boolean => "BOOLEAN",
        FieldKind::Integer { .. } => "INTEGER",
        FieldKind::Float { .. } => "FLOAT",
        FieldKind::Text { .. } => "TEXT",
        FieldKind::Bytes { .. } => "BYTES",
        FieldKind::Timestamp { .. } => "TIMESTAMP",
        FieldKind::Relation { .. } => "RELATION",
        FieldKind::Id => "ID",
    }
}
