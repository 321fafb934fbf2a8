//! Snowflake identifiers: 63-bit values encoding generation timestamp,
//! machine id and an intra-millisecond sequence number.

pub mod generator;
pub mod id;
pub mod layout;

pub use generator::SnowflakeGenerator;
pub use id::Id;
pub use layout::SnowflakeLayout;
