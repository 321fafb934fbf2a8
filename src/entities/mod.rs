//! Concrete entity types of the story-sharing backend: users, topics,
//! posts, likes, and the identifier reservation record. Each type
//! declares its schema once and implements [`crate::node::Node`] for
//! persistence.

pub mod like;
pub mod post;
pub mod reservation;
pub mod topic;
pub mod user;

pub use like::Like;
pub use post::Post;
pub use reservation::Reservation;
pub use topic::Topic;
pub use user::User;
