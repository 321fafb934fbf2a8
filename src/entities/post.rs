//! Posts (stories) submitted by users into topics.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use tracing::warn;

use crate::core::{Result, Value};
use crate::model::{EntityState, FieldId, FieldKind, FieldSpec, Schema};
use crate::node::Node;
use crate::snowflake::Id;
use crate::storage::Connection;
use crate::storage::sql::{Order, Select};

use super::topic::Topic;
use super::user::User;

pub const MAX_CONTENT_LENGTH: usize = 8196;

struct Fields {
    id: FieldId,
    author_id: FieldId,
    topic_id: FieldId,
    content: FieldId,
    likes_count: FieldId,
    is_published: FieldId,
    is_removed: FieldId,
    submitted_at: FieldId,
    published_at: FieldId,
    edited_at: FieldId,
}

fn now() -> Value {
    Value::Timestamp(Utc::now())
}

lazy_static! {
    static ref POST: (Schema, Fields) = {
        let mut b = Schema::builder("posts");
        let id = b.add_key(FieldSpec::required("id", FieldKind::Id));
        let author_id = b.add(FieldSpec::required("author_id", FieldKind::relation("user")));
        let topic_id = b.add(FieldSpec::required("topic_id", FieldKind::relation("topic")));
        let content = b.add(FieldSpec::required(
            "content",
            FieldKind::text_max(MAX_CONTENT_LENGTH),
        ));
        let likes_count = b.add(
            FieldSpec::required("likes_count", FieldKind::integer_min(0)).with_default(0i64),
        );
        let is_published =
            b.add(FieldSpec::required("is_published", FieldKind::Boolean).with_default(false));
        let is_removed =
            b.add(FieldSpec::required("is_removed", FieldKind::Boolean).with_default(false));
        let submitted_at = b.add(
            FieldSpec::required("submitted_at", FieldKind::timestamp_with_timezone())
                .with_default_fn(now),
        );
        let published_at = b.add(
            FieldSpec::required("published_at", FieldKind::timestamp_with_timezone())
                .with_default_fn(now),
        );
        let edited_at = b.add(FieldSpec::new("edited_at", FieldKind::timestamp_with_timezone()));
        b.reserve_as("post");
        (
            b.build(),
            Fields {
                id,
                author_id,
                topic_id,
                content,
                likes_count,
                is_published,
                is_removed,
                submitted_at,
                published_at,
                edited_at,
            },
        )
    };
}

pub struct Post {
    state: EntityState,
}

impl Post {
    /// A fresh, unpersisted post.
    pub fn create(id: Id, author_id: Id, topic_id: Id, content: &str) -> Result<Self> {
        let mut state = EntityState::new(&POST.0);
        state.set(POST.1.id, id)?;
        state.set(POST.1.author_id, author_id)?;
        state.set(POST.1.topic_id, topic_id)?;
        state.set(POST.1.content, content)?;
        Ok(Self { state })
    }

    pub fn id(&self) -> Id {
        Id::new(self.state.get(POST.1.id).as_i64().unwrap_or(0))
    }

    pub fn author_id(&self) -> Id {
        Id::new(self.state.get(POST.1.author_id).as_i64().unwrap_or(0))
    }

    pub fn topic_id(&self) -> Id {
        Id::new(self.state.get(POST.1.topic_id).as_i64().unwrap_or(0))
    }

    pub fn content(&self) -> &str {
        self.state.get(POST.1.content).as_str().unwrap_or("")
    }

    pub fn likes_count(&self) -> i64 {
        self.state.get(POST.1.likes_count).as_i64().unwrap_or(0)
    }

    pub fn is_published(&self) -> bool {
        self.state.get(POST.1.is_published).as_bool().unwrap_or(false)
    }

    pub fn is_removed(&self) -> bool {
        self.state.get(POST.1.is_removed).as_bool().unwrap_or(false)
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.state.get(POST.1.submitted_at).as_timestamp()
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.state.get(POST.1.published_at).as_timestamp()
    }

    pub fn edited_at(&self) -> Option<DateTime<Utc>> {
        self.state.get(POST.1.edited_at).as_timestamp()
    }

    pub fn set_content(&mut self, content: &str) -> Result<()> {
        self.state.set(POST.1.content, content)
    }

    pub fn set_published(&mut self, published: bool) -> Result<()> {
        self.state.set(POST.1.is_published, published)
    }

    pub async fn get_by_id<C: Connection>(conn: &mut C, id: Id) -> Result<Self> {
        Self::get(conn, &[id.into()]).await
    }

    /// Persist the post.
    ///
    /// The first save runs in one transaction: the row (with its
    /// identifier reservation) plus a posts-counter increment on both
    /// the author and the topic; rolling back any step rolls back all
    /// of them. Later saves write only the changed fields; a content
    /// change touches `edited_at` and a publication-flag change touches
    /// `published_at`.
    pub async fn save<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        if !self.state.persisted() {
            return self.submit(conn).await;
        }

        // Stage the timestamp touches so a failed update leaves them
        // as they were.
        let mut staged = Vec::new();
        for (trigger, stamp) in [
            (POST.1.content, POST.1.edited_at),
            (POST.1.is_published, POST.1.published_at),
        ] {
            if self.state.is_changed(trigger) {
                staged.push((stamp, self.state.get(stamp).clone(), self.state.is_changed(stamp)));
                self.state.set(stamp, Utc::now())?;
            }
        }

        let result = Node::save(self, conn).await;
        if result.is_err() {
            for (stamp, value, changed) in staged {
                self.state.restore(stamp, value, changed);
            }
        }
        result
    }

    async fn submit<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        self.state.validate_all()?;
        conn.begin().await?;

        let result = async {
            Node::save(self, conn).await?;
            User::adjust_posts_count_for(conn, self.author_id(), 1).await?;
            Topic::adjust_posts_count_for(conn, self.topic_id(), 1).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => conn.commit().await,
            Err(error) => {
                if let Err(rollback_error) = conn.rollback().await {
                    warn!(%rollback_error, "rollback after failed post submission");
                }
                Err(error)
            }
        }
    }

    /// Soft removal: the row stays, flagged `is_removed`.
    pub async fn remove<C: Connection>(&mut self, conn: &mut C) -> Result<()> {
        self.state.set(POST.1.is_removed, true)?;
        Node::save(self, conn).await
    }

    fn visible() -> Select {
        Select::table("posts")
            .filter_eq("is_published", Value::Boolean(true))
            .filter_eq("is_removed", Value::Boolean(false))
    }

    /// Published posts, most recently published first.
    pub async fn list_latest<C: Connection>(conn: &mut C) -> Result<Vec<Self>> {
        Self::list(conn, Self::visible().order_by("published_at", Order::Desc)).await
    }

    /// Published posts by like count, recency breaking ties.
    pub async fn list_top<C: Connection>(conn: &mut C) -> Result<Vec<Self>> {
        Self::list(
            conn,
            Self::visible()
                .order_by("likes_count", Order::Desc)
                .order_by("published_at", Order::Desc),
        )
        .await
    }

    /// The hot section currently ranks like the top section.
    pub async fn list_hot<C: Connection>(conn: &mut C) -> Result<Vec<Self>> {
        Self::list_top(conn).await
    }

    /// Published posts in random order.
    pub async fn list_random<C: Connection>(conn: &mut C) -> Result<Vec<Self>> {
        Self::list(conn, Self::visible().order_random()).await
    }

    /// Published posts of one topic, most recently published first.
    pub async fn list_by_topic<C: Connection>(conn: &mut C, topic_id: Id) -> Result<Vec<Self>> {
        Self::list(
            conn,
            Self::visible()
                .filter_eq("topic_id", topic_id)
                .order_by("published_at", Order::Desc),
        )
        .await
    }

    pub async fn adjust_likes_count<C: Connection>(&self, conn: &mut C, delta: i64) -> Result<()> {
        self.adjust_counter(conn, POST.1.likes_count, delta).await
    }

    pub(crate) async fn adjust_likes_count_for<C: Connection>(
        conn: &mut C,
        id: Id,
        delta: i64,
    ) -> Result<()> {
        Self::adjust_counter_by(conn, &[id.into()], POST.1.likes_count, delta).await
    }
}

impl std::fmt::Debug for Post {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Post")
            .field("id", &self.id())
            .field("author_id", &self.author_id())
            .field("topic_id", &self.topic_id())
            .field("likes_count", &self.likes_count())
            .field("is_published", &self.is_published())
            .field("is_removed", &self.is_removed())
            .finish()
    }
}

impl Node for Post {
    fn schema() -> &'static Schema {
        &POST.0
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
