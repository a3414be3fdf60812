//! Durable session/message persistence and the volatile cache used in front of it.
//!
//! The cache is process-local, shared through Redis, or disabled.

mod backends;
mod cache;
mod error;
mod repository;
mod types;

pub mod prelude {
    pub use crate::{
        CacheConfig, ChatMessage, ChatRepository, DisabledCache, InMemoryCache,
        InMemoryChatRepository, PostgresChatRepository, RedisCache, Session, SessionTranscript,
        SqliteChatRepository, StoreConfig, StoreError, StoreErrorKind, VolatileCache,
        create_cache, create_repository,
    };
}

pub use backends::postgres::PostgresChatRepository;
pub use backends::redis_cache::{DEFAULT_REDIS_URL, RedisCache};
pub use backends::sqlite::SqliteChatRepository;
pub use cache::{
    CacheConfig, DisabledCache, InMemoryCache, VolatileCache, create_cache, get_json,
    history_key, online_key, set_json, transcript_key,
};
pub use error::{StoreError, StoreErrorKind};
pub use repository::{ChatRepository, InMemoryChatRepository, StoreConfig, create_repository};
pub use types::{ChatMessage, Session, SessionTranscript, now_micros};
