//! Registered users.

use chrono::{DateTime, Utc};
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
    username: FieldId,
    nickname: FieldId,
    password: FieldId,
    posts_count: FieldId,
    likes_count: FieldId,
    registered_at: FieldId,
}

fn now() -> Value {
    Value::Timestamp(Utc::now())
}

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_.-]+$").unwrap();
    static ref USER: (Schema, Fields) = {
        let mut b = Schema::builder("users");
        let id = b.add_key(FieldSpec::required("id", FieldKind::Id));
        let username = b.add(FieldSpec::required("username", FieldKind::text_max(32)));
        let nickname = b.add(FieldSpec::required("nickname", FieldKind::text_max(64)));
        let password = b.add(FieldSpec::required("password", FieldKind::text_max(255)));
        let posts_count = b.add(
            FieldSpec::required("posts_count", FieldKind::integer_min(0)).with_default(0i64),
        );
        let likes_count = b.add(
            FieldSpec::required("likes_count", FieldKind::integer_min(0)).with_default(0i64),
        );
        let registered_at = b.add(
            FieldSpec::required("registered_at", FieldKind::timestamp_with_timezone())
                .with_default_fn(now),
        );
        b.validator(username, |v| {
            match v.as_str() {
                Some(s) if !USERNAME_RE.is_match(s) => Err(
                    "username can contain only letters, digits, dashes, dots and underscores"
                        .into(),
                ),
                _ => Ok(()),
            }
        });
        b.reserve_as("user");
        (
            b.build(),
            Fields {
                id,
                username,
                nickname,
                password,
                posts_count,
                likes_count,
                registered_at,
            },
        )
    };
}

pub struct User {
    state: EntityState,
}

impl User {
    /// A fresh, unpersisted user. The password is stored as given;
    /// hashing happens at the service boundary.
    pub fn create(id: Id, username: &str, nickname: &str, password: &str) -> Result<Self> {
        let mut state = EntityState::new(&USER.0);
        state.set(USER.1.id, id)?;
        state.set(USER.1.username, username)?;
        state.set(USER.1.nickname, nickname)?;
        state.set(USER.1.password, password)?;
        Ok(Self { state })
    }

    pub fn id(&self) -> Id {
        Id::new(self.state.get(USER.1.id).as_i64().unwrap_or(0))
    }

    pub fn username(&self) -> &str {
        self.state.get(USER.1.username).as_str().unwrap_or("")
    }

    pub fn nickname(&self) -> &str {
        self.state.get(USER.1.nickname).as_str().unwrap_or("")
    }

    pub fn password(&self) -> &str {
        self.state.get(USER.1.password).as_str().unwrap_or("")
    }

    pub fn posts_count(&self) -> i64 {
        self.state.get(USER.1.posts_count).as_i64().unwrap_or(0)
    }

    pub fn likes_count(&self) -> i64 {
        self.state.get(USER.1.likes_count).as_i64().unwrap_or(0)
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.state.get(USER.1.registered_at).as_timestamp()
    }

    pub fn set_nickname(&mut self, nickname: &str) -> Result<()> {
        self.state.set(USER.1.nickname, nickname)
    }

    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.state.set(USER.1.password, password)
    }

    pub async fn get_by_id<C: Connection>(conn: &mut C, id: Id) -> Result<Self> {
        Self::get(conn, &[id.into()]).await
    }

    pub async fn get_by_username<C: Connection>(conn: &mut C, username: &str) -> Result<Self> {
        Self::get_with(conn, Select::table("users").filter_eq("username", username)).await
    }

    /// All users, most recently registered first.
    pub async fn list_all<C: Connection>(conn: &mut C) -> Result<Vec<Self>> {
        Self::list(
            conn,
            Select::table("users").order_by("registered_at", Order::Desc),
        )
        .await
    }

    pub async fn adjust_posts_count<C: Connection>(&self, conn: &mut C, delta: i64) -> Result<()> {
        self.adjust_counter(conn, USER.1.posts_count, delta).await
    }

    pub async fn adjust_likes_count<C: Connection>(&self, conn: &mut C, delta: i64) -> Result<()> {
        self.adjust_counter(conn, USER.1.likes_count, delta).await
    }

    pub(crate) async fn adjust_posts_count_for<C: Connection>(
        conn: &mut C,
        id: Id,
        delta: i64,
    ) -> Result<()> {
        Self::adjust_counter_by(conn, &[id.into()], USER.1.posts_count, delta).await
    }

    pub(crate) async fn adjust_likes_count_for<C: Connection>(
        conn: &mut C,
        id: Id,
        delta: i64,
    ) -> Result<()> {
        Self::adjust_counter_by(conn, &[id.into()], USER.1.likes_count, delta).await
    }
}

// Manual impl so the password never ends up in logs or test output.
impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id())
            .field("username", &self.username())
            .field("nickname", &self.nickname())
            .field("posts_count", &self.posts_count())
            .field("likes_count", &self.likes_count())
            .field("registered_at", &self.registered_at())
            .finish()
    }
}

impl Node for User {
    fn schema() -> &'static Schema {
        &USER.0
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
    fn test_username_validator() {
        assert!(User::create(Id::new(1), "alice_01.x-y", "Alice", "pw").is_ok());

        let err = User::create(Id::new(1), "not ok", "Alice", "pw").unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "username", .. }));

        let err = User::create(Id::new(1), "", "Alice", "pw").unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "username", .. }));
    }

    #[test]
    fn test_debug_output_omits_password() {
        let user = User::create(Id::new(1), "alice", "Alice", "s3cret").unwrap();
        let rendered = format!("{:?}", user);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_save_and_get_by_username() {
        let db = MemDb::new();
        let mut conn = db.connection();

        let mut user = User::create(Id::new(1), "alice", "Alice", "pw").unwrap();
        user.save(&mut conn).await.unwrap();
        assert_eq!(db.count("snowflakes"), 1);

        let fetched = User::get_by_username(&mut conn, "alice").await.unwrap();
        assert_eq!(fetched.id(), Id::new(1));
        assert_eq!(fetched.nickname(), "Alice");
        assert_eq!(fetched.posts_count(), 0);
        assert!(fetched.registered_at().is_some());

        let missing = User::get_by_username(&mut conn, "bob").await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_counter_adjustment() {
        let db = MemDb::new();
        let mut conn = db.connection();

        let mut user = User::create(Id::new(1), "alice", "Alice", "pw").unwrap();
        user.save(&mut conn).await.unwrap();

        user.adjust_likes_count(&mut conn, 2).await.unwrap();
        User::adjust_likes_count_for(&mut conn, Id::new(1), -1)
            .await
            .unwrap();

        let fetched = User::get_by_id(&mut conn, Id::new(1)).await.unwrap();
        assert_eq!(fetched.likes_count(), 1);
    }

    #[tokio::test]
    async fn test_list_all_orders_by_registration() {
        let db = MemDb::new();
        let mut conn = db.connection();

        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            let mut user = User::create(Id::new(id), name, name, "pw").unwrap();
            user.save(&mut conn).await.unwrap();
        }

        let users = User::list_all(&mut conn).await.unwrap();
        assert_eq!(users.len(), 3);
    }
}
