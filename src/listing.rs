//! Cursor pagination.
//!
//! A [`Listing`] carries a section's limit policy; [`window`] cuts a
//! page out of an already ordered, already filtered sequence around a
//! pivot identifier. Both halves are pure: ordering, filtering and
//! fetching are entirely the caller's job.

use crate::core::{Result, StoreError};
use crate::snowflake::Id;

/// Paging direction relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Items preceding the pivot in sequence order.
    Before,
    /// Items following the pivot in sequence order.
    After,
}

/// A validated page request: an optional pivot with direction, and the
/// clamped item limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub pivot: Option<(Direction, Id)>,
    pub limit: usize,
}

/// Limit policy for one listing (a feed section, a topic index, ...).
#[derive(Debug, Clone, Copy)]
pub struct Listing {
    min_limit: usize,
    max_limit: usize,
    default_limit: usize,
}

impl Listing {
    /// Panics if the bounds are inconsistent; listings are declared as
    /// constants at type-registration time.
    pub fn new(min_limit: usize, max_limit: usize, default_limit: usize) -> Self {
        assert!(min_limit >= 1, "min_limit must be at least 1");
        assert!(min_limit <= max_limit, "min_limit exceeds max_limit");
        assert!(
            (min_limit..=max_limit).contains(&default_limit),
            "default_limit outside [min_limit, max_limit]"
        );
        Self {
            min_limit,
            max_limit,
            default_limit,
        }
    }

    pub fn min_limit(&self) -> usize {
        self.min_limit
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Validate raw cursor arguments into a [`Page`].
    ///
    /// Supplying both cursors is [`StoreError::InvalidCursor`]. An
    /// absent limit takes the default; an out-of-range one is clamped,
    /// never rejected.
    pub fn validate(
        &self,
        before: Option<Id>,
        after: Option<Id>,
        limit: Option<usize>,
    ) -> Result<Page> {
        let pivot = match (before, after) {
            (Some(_), Some(_)) => return Err(StoreError::InvalidCursor),
            (Some(id), None) => Some((Direction::Before, id)),
            (None, Some(id)) => Some((Direction::After, id)),
            (None, None) => None,
        };
        let limit = limit
            .map(|l| l.clamp(self.min_limit, self.max_limit))
            .unwrap_or(self.default_limit);
        Ok(Page { pivot, limit })
    }
}

/// Cut the requested page out of `items`.
///
/// `id_of` projects each item to its identifier. Without a pivot the
/// result is the first `limit` items. With one, the pivot is located by
/// identifier and the page taken strictly before or after it; a pivot
/// not present in the sequence is [`StoreError::PivotNotFound`], never a
/// silent empty page.
pub fn window<T>(items: Vec<T>, id_of: impl Fn(&T) -> Id, page: Page) -> Result<Vec<T>> {
    let Some((direction, pivot)) = page.pivot else {
        let mut items = items;
        items.truncate(page.limit);
        return Ok(items);
    };

    let k = items
        .iter()
        .position(|item| id_of(item) == pivot)
        .ok_or(StoreError::PivotNotFound(pivot))?;

    let (start, end) = match direction {
        Direction::Before => (k.saturating_sub(page.limit), k),
        Direction::After => (k + 1, (k + 1 + page.limit).min(items.len())),
    };

    Ok(items
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect())
}
