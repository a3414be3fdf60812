pub(crate) mod postgres;
pub(crate) mod redis_cache;
pub(crate) mod sqlite;
