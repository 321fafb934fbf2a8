//! Cursor pagination over a stored, ordered listing.

use storycore::storage::mem::MemDb;
use storycore::storage::sql::{Order, Select};
use storycore::{Id, Listing, Node, Post, StoreError, Topic, User, listing};

/// Seed posts with ids 1..=10 and return them newest-id first,
/// i.e. the sequence [10, 9, 8, 7, 6, 5, 4, 3, 2, 1].
async fn seeded_ids(db: &MemDb) -> Vec<Id> {
    let mut conn = db.connection();

    let mut user = User::create(Id::new(100), "alice", "Alice", "pw").unwrap();
    user.save(&mut conn).await.unwrap();
    let mut topic = Topic::create(Id::new(200), "Science", "science", "d").unwrap();
    topic.save(&mut conn).await.unwrap();

    for id in 1..=10i64 {
        let mut post = Post::create(Id::new(id), Id::new(100), Id::new(200), "x").unwrap();
        post.save(&mut conn).await.unwrap();
    }

    let posts = Post::list(
        &mut conn,
        Select::table("posts").order_by("id", Order::Desc),
    )
    .await
    .unwrap();
    posts.iter().map(Post::id).collect()
}

fn feed() -> Listing {
    Listing::new(1, 100, 10)
}

#[tokio::test]
async fn test_first_page_without_cursor() {
    let db = MemDb::new();
    let ids = seeded_ids(&db).await;

    let page = feed().validate(None, None, Some(3)).unwrap();
    let out = listing::window(ids, |id| *id, page).unwrap();
    assert_eq!(out, vec![Id::new(10), Id::new(9), Id::new(8)]);
}

#[tokio::test]
async fn test_page_before_pivot() {
    let db = MemDb::new();
    let ids = seeded_ids(&db).await;

    let page = feed().validate(Some(Id::new(5)), None, Some(3)).unwrap();
    let out = listing::window(ids, |id| *id, page).unwrap();
    assert_eq!(out, vec![Id::new(8), Id::new(7), Id::new(6)]);
}

#[tokio::test]
async fn test_page_after_pivot() {
    let db = MemDb::new();
    let ids = seeded_ids(&db).await;

    let page = feed().validate(None, Some(Id::new(5)), Some(3)).unwrap();
    let out = listing::window(ids, |id| *id, page).unwrap();
    assert_eq!(out, vec![Id::new(4), Id::new(3), Id::new(2)]);
}

#[tokio::test]
async fn test_oversized_before_window_clips_at_start() {
    let db = MemDb::new();
    let ids = seeded_ids(&db).await;

    let page = feed().validate(Some(Id::new(5)), None, Some(10)).unwrap();
    let out = listing::window(ids, |id| *id, page).unwrap();
    let expected: Vec<Id> = (6..=10).rev().map(Id::new).collect();
    assert_eq!(out, expected);
}

#[tokio::test]
async fn test_unknown_pivot_is_reported() {
    let db = MemDb::new();
    let ids = seeded_ids(&db).await;

    let page = feed().validate(None, Some(Id::new(42)), Some(3)).unwrap();
    let result = listing::window(ids, |id| *id, page);
    assert!(matches!(result, Err(StoreError::PivotNotFound(id)) if id == Id::new(42)));
}

#[test]
fn test_conflicting_cursors_are_rejected() {
    let result = feed().validate(Some(Id::new(1)), Some(Id::new(2)), Some(3));
    assert!(matches!(result, Err(StoreError::InvalidCursor)));
}
