//! Likes: one user's reaction to one post.
//!
//! The composite primary key (user, post) makes a like idempotent per
//! pair; both counter copies (on the user and on the post) move inside
//! the same transaction as the like row, in both directions.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use tracing::warn;

use crate::core::{Result, StoreError, Value};
use crate::model::{EntityState, FieldId, FieldKind, FieldSpec, Schema};
use crate::node::Node;
use crate::snowflake::Id;
use crate::storage::Connection;
use crate::storage::sql::{Order, Select};

use super::post::Post;
use super::user::User;

struct Fields {
    user_id: FieldId,
    post_id: FieldId,
    submitted_at: FieldId,
}

fn now() -> Value {
    Value::Timestamp(Utc::now())
}

lazy_static! {
    static ref LIKE: (Schema, Fields) = {
        let mut b = Schema::builder("likes");
        let user_id = b.add_key(FieldSpec::required("user_id", FieldKind::relation("user")));
        let post_id = b.add_key(FieldSpec::required("post_id", FieldKind::relation("post")));
        let submitted_at = b.add(
            FieldSpec::required("submitted_at", FieldKind::timestamp_with_timezone())
                .with_default_fn(now),
        );
        (
            b.build(),
            Fields {
                user_id,
                post_id,
                submitted_at,
            },
        )
    };
}

pub struct Like {
    state: EntityState,
}

impl Like {
    /// A fresh, unpersisted like.
    pub fn create(user_id: Id, post_id: Id) -> Result<Self> {
        let mut state = EntityState::new(&LIKE.0);
        state.set(LIKE.1.user_id, user_id)?;
        state.set(LIKE.1.post_id, post_id)?;
        Ok(Self { state })
    }

    pub fn user_id(&self) -> Id {
        Id::new(self.state.get(LIKE.1.user_id).as_i64().unwrap_or(0))
    }

    pub fn post_id(&self) -> Id {
        Id::new(self.state.get(LIKE.1.post_id).as_i64().unwrap_or(0))
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.state.get(LIKE.1.submitted_at).as_timestamp()
    }

    /// Existence check. Absence is an answer here, not an error.
    pub async fn find<C: Connection>(
        conn: &mut C,
        user_id: Id,
        post_id: Id,
    ) -> Result<Option<Self>> {
        match Self::get(conn, &[user_id.into(), post_id.into()]).await {
            Ok(like) => Ok(Some(like)),
            Err(StoreError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Likes on one post, newest first.
    pub async fn list_for_post<C: Connection>(conn: &mut C, post_id: Id) -> Result<Vec<Self>> {
        Self::list(
            conn,
            Select::table("likes")
                .filter_eq("post_id", post_id)
                .order_by("submitted_at", Order::Desc),
        )
        .await
    }

    /// Likes given by one user, newest first.
    pub async fn list_for_user<C: Connection>(conn: &mut C, user_id: Id) -> Result<Vec<Self>> {
        Self::list(
            conn,
            Select::table("likes")
                .filter_eq("user_id", user_id)
                .order_by("submitted_at", Order::Desc),
        )
        .await
    }

    /// Record the like: the row plus a likes-counter increment on the
    /// user and on the post, atomically.
    pub async fn submit<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        self.state.validate_all()?;
        conn.begin().await?;

        let result = async {
            Node::save(self, conn).await?;
            User::adjust_likes_count_for(conn, self.user_id(), 1).await?;
            Post::adjust_likes_count_for(conn, self.post_id(), 1).await?;
            Ok(())
        }
        .await;

        self.finish(conn, result).await
    }

    /// Withdraw the like: delete the row and decrement both counters,
    /// atomically. A never-persisted like is a no-op.
    pub async fn retract<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        if !self.state.persisted() {
            return Ok(());
        }
        conn.begin().await?;

        let result = async {
            self.delete(conn).await?;
            User::adjust_likes_count_for(conn, self.user_id(), -1).await?;
            Post::adjust_likes_count_for(conn, self.post_id(), -1).await?;
            Ok(())
        }
        .await;

        self.finish(conn, result).await
    }

    async fn finish<C: Connection>(&mut self, conn: &mut C, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => conn.commit().await,
            Err(error) => {
                if let Err(rollback_error) = conn.rollback().await {
                    warn!(%rollback_error, "rollback after failed like operation");
                }
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Like {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Like")
            .field("user_id", &self.user_id())
            .field("post_id", &self.post_id())
            .field("submitted_at", &self.submitted_at())
            .finish()
    }
}

impl Node for Like {
    fn schema() -> &'static Schema {
        &LIKE.0
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
