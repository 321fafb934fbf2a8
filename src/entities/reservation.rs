//! Identifier reservation records.
//!
//! Every reserving entity type writes `(id, kind)` here in the same
//! transaction as its first save, so any identifier can be resolved to
//! the kind of thing it names without probing every table.

use lazy_static::lazy_static;

use crate::core::{Result, StoreError};
use crate::model::{EntityState, FieldId, FieldKind, FieldSpec, Schema};
use crate::node::{Node, RESERVATION_TABLE};
use crate::snowflake::Id;
use crate::storage::Connection;

struct Fields {
    id: FieldId,
    kind: FieldId,
}

lazy_static! {
    static ref RESERVATION: (Schema, Fields) = {
        let mut b = Schema::builder(RESERVATION_TABLE);
        let id = b.add_key(FieldSpec::required("id", FieldKind::Id));
        let kind = b.add(FieldSpec::required("kind", FieldKind::text_max(32)));
        (b.build(), Fields { id, kind })
    };
}

pub struct Reservation {
    state: EntityState,
}

impl Reservation {
    pub fn id(&self) -> Id {
        Id::new(self.state.get(RESERVATION.1.id).as_i64().unwrap_or(0))
    }

    pub fn kind(&self) -> &str {
        self.state.get(RESERVATION.1.kind).as_str().unwrap_or("")
    }

    /// Resolve an identifier to its reserved kind, if any.
    pub async fn find<C: Connection>(conn: &mut C, id: Id) -> Result<Option<Self>> {
        match Self::get(conn, &[id.into()]).await {
            Ok(reservation) => Ok(Some(reservation)),
            Err(StoreError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Node for Reservation {
    fn schema() -> &'static Schema {
        &RESERVATION.0
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Topic, User};
    use crate::storage::mem::MemDb;

    #[tokio::test]
    async fn test_resolves_reserved_kinds() {
        let db = MemDb::new();
        let mut conn = db.connection();

        let mut user = User::create(Id::new(1), "alice", "Alice", "pw").unwrap();
        user.save(&mut conn).await.unwrap();
        let mut topic = Topic::create(Id::new(2), "Science", "science", "d").unwrap();
        topic.save(&mut conn).await.unwrap();

        let user_res = Reservation::find(&mut conn, Id::new(1)).await.unwrap().unwrap();
        assert_eq!(user_res.kind(), "user");
        let topic_res = Reservation::find(&mut conn, Id::new(2)).await.unwrap().unwrap();
        assert_eq!(topic_res.kind(), "topic");

        assert!(Reservation::find(&mut conn, Id::new(99)).await.unwrap().is_none());
    }
}
