use thiserror::Error;

use crate::snowflake::Id;

/// Closed error taxonomy of the persistence core.
///
/// Every operation reports its failure as one of these kinds; callers
/// pattern-match on the kind instead of catching a class hierarchy.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A field constraint or custom validator rejected a value.
    #[error("validation failed for field '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    /// Attempted mutation of a locked field (primary keys after the
    /// first save, or anything locked explicitly).
    #[error("field '{field}' is locked")]
    LockedField { field: &'static str },

    /// A `get` matched zero rows.
    #[error("no matching row found")]
    NotFound,

    /// Storage-layer fault during a read.
    #[error("storage read failed: {0}")]
    NotFetched(String),

    /// Storage-layer fault while inserting a new row.
    #[error("row was not created: {0}")]
    NotCreated(String),

    /// Storage-layer fault while updating an existing row.
    #[error("row was not updated: {0}")]
    NotUpdated(String),

    /// Pagination pivot identifier absent from the candidate sequence.
    #[error("pivot {0} not present in the listing")]
    PivotNotFound(Id),

    /// Both `before` and `after` cursors were supplied together.
    #[error("only one of `before` and `after` can be supplied")]
    InvalidCursor,

    /// Any other storage-layer fault.
    #[error("storage error: {0}")]
    Database(String),

    /// Invalid process configuration. Only reported at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for the two save-time storage fault kinds.
    pub fn is_not_saved(&self) -> bool {
        matches!(self, Self::NotCreated(_) | Self::NotUpdated(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
