pub mod config;
pub mod contacts;
pub mod context;
pub mod db;
pub mod error;
pub mod feed;
pub mod redis;
pub mod schema;
pub mod store;
pub mod types;

pub use crate::config::Config;
pub use crate::contacts::{Contact, ContactBook};
pub use crate::context::DispatchContext;
pub use crate::db::DbPool;
pub use crate::error::{DispatchError, DispatchResult, Violation};
pub use crate::feed::{ChangeFeed, ChangeStream, MemoryFeed, RedisFeed};
pub use crate::redis::RedisPool;
pub use crate::store::{DispatchStore, MemoryStore, PgStore};
