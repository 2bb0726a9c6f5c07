//! Postgres backend for the storage primitives.

mod load;
mod lock;
mod migrate;
mod store;

pub use load::load_documents;
pub use lock::PgLockGuard;
pub use migrate::migrate;
pub use store::PgStore;
