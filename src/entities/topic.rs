//! Topics grouping posts.

use lazy_static::lazy_static;
use regex::Regex;

use crate::core::{Result, Value};
use crate::model::{EntityState, FieldId, FieldKind, FieldSpec, Schema};
use crate::node::Node;
use crate::snowflake::Id;
use crate::storage::Connection;
use crate::storage::sql::{Order, Select};

struct Fields {
    id: FieldId,
    title: FieldId,
    slug: FieldId,
    description: FieldId,
    posts_count: FieldId,
    is_active: FieldId,
}

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new(r"^[a-z]+[a-z0-9]*$").unwrap();
    static ref TOPIC: (Schema, Fields) = {
        let mut b = Schema::builder("topics");
        let id = b.add_key(FieldSpec::required("id", FieldKind::Id));
        let title = b.add(FieldSpec::required("title", FieldKind::text_max(64)));
        let slug = b.add(FieldSpec::required("slug", FieldKind::text_max(32)));
        let description = b.add(FieldSpec::required("description", FieldKind::text_max(512)));
        let posts_count = b.add(
            FieldSpec::required("posts_count", FieldKind::integer_min(0)).with_default(0i64),
        );
        let is_active =
            b.add(FieldSpec::required("is_active", FieldKind::Boolean).with_default(false));
        b.validator(slug, |v| match v.as_str() {
            Some(s) if !SLUG_RE.is_match(s) => Err(
                "slug can contain only lowercase letters and digits, and starts with a letter"
                    .into(),
            ),
            _ => Ok(()),
        });
        b.reserve_as("topic");
        (
            b.build(),
            Fields {
                id,
                title,
                slug,
                description,
                posts_count,
                is_active,
            },
        )
    };
}

pub struct Topic {
    state: EntityState,
}

impl Topic {
    /// A fresh, unpersisted topic. Topics start inactive.
    pub fn create(id: Id, title: &str, slug: &str, description: &str) -> Result<Self> {
        let mut state = EntityState::new(&TOPIC.0);
        state.set(TOPIC.1.id, id)?;
        state.set(TOPIC.1.title, title)?;
        state.set(TOPIC.1.slug, slug)?;
        state.set(TOPIC.1.description, description)?;
        Ok(Self { state })
    }

    pub fn id(&self) -> Id {
        Id::new(self.state.get(TOPIC.1.id).as_i64().unwrap_or(0))
    }

    pub fn title(&self) -> &str {
        self.state.get(TOPIC.1.title).as_str().unwrap_or("")
    }

    pub fn slug(&self) -> &str {
        self.state.get(TOPIC.1.slug).as_str().unwrap_or("")
    }

    pub fn description(&self) -> &str {
        self.state.get(TOPIC.1.description).as_str().unwrap_or("")
    }

    pub fn posts_count(&self) -> i64 {
        self.state.get(TOPIC.1.posts_count).as_i64().unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        self.state.get(TOPIC.1.is_active).as_bool().unwrap_or(false)
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.state.set(TOPIC.1.title, title)
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.state.set(TOPIC.1.description, description)
    }

    pub fn set_active(&mut self, active: bool) -> Result<()> {
        self.state.set(TOPIC.1.is_active, active)
    }

    pub async fn get_by_id<C: Connection>(conn: &mut C, id: Id) -> Result<Self> {
        Self::get(conn, &[id.into()]).await
    }

    pub async fn get_by_slug<C: Connection>(conn: &mut C, slug: &str) -> Result<Self> {
        Self::get_with(conn, Select::table("topics").filter_eq("slug", slug)).await
    }

    /// Topics ordered by title; optionally only (in)active ones.
    pub async fn list_all<C: Connection>(
        conn: &mut C,
        is_active: Option<bool>,
    ) -> Result<Vec<Self>> {
        let mut select = Select::table("topics").order_by("title", Order::Asc);
        if let Some(active) = is_active {
            select = select.filter_eq("is_active", Value::Boolean(active));
        }
        Self::list(conn, select).await
    }

    pub async fn adjust_posts_count<C: Connection>(&self, conn: &mut C, delta: i64) -> Result<()> {
        self.adjust_counter(conn, TOPIC.1.posts_count, delta).await
    }

    pub(crate) async fn adjust_posts_count_for<C: Connection>(
        conn: &mut C,
        id: Id,
        delta: i64,
    ) -> Result<()> {
        Self::adjust_counter_by(conn, &[id.into()], TOPIC.1.posts_count, delta).await
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id())
            .field("title", &self.title())
            .field("slug", &self.slug())
            .field("posts_count", &self.posts_count())
            .field("is_active", &self.is_active())
            .finish()
    }
}

impl Node for Topic {
    fn schema() -> &'static Schema {
        &TOPIC.0
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
    use crate::core::StoreError;
    use crate::storage::mem::MemDb;

    #[test]
    fn test_slug_validator() {
        assert!(Topic::create(Id::new(1), "Science", "science42", "desc").is_ok());

        for bad in ["42science", "Science", "sci-ence", ""] {
            let err = Topic::create(Id::new(1), "Science", bad, "desc").unwrap_err();
            assert!(matches!(err, StoreError::Validation { field: "slug", .. }));
        }
    }

    #[tokio::test]
    async fn test_get_by_slug() {
        let db = MemDb::new();
        let mut conn = db.connection();

        let mut topic = Topic::create(Id::new(1), "Science", "science", "All of it").unwrap();
        topic.save(&mut conn).await.unwrap();

        let fetched = Topic::get_by_slug(&mut conn, "science").await.unwrap();
        assert_eq!(fetched.title(), "Science");
        assert!(!fetched.is_active());
    }

    #[tokio::test]
    async fn test_list_filters_active_and_orders_by_title() {
        let db = MemDb::new();
        let mut conn = db.connection();

        for (id, title, slug, active) in [
            (1, "Zoology", "zoology", true),
            (2, "Art", "art", true),
            (3, "Math", "math", false),
        ] {
            let mut topic = Topic::create(Id::new(id), title, slug, "d").unwrap();
            topic.set_active(active).unwrap();
            topic.save(&mut conn).await.unwrap();
        }

        let active = Topic::list_all(&mut conn, Some(true)).await.unwrap();
        let titles: Vec<&str> = active.iter().map(Topic::title).collect();
        assert_eq!(titles, vec!["Art", "Zoology"]);

        let all = Topic::list_all(&mut conn, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
