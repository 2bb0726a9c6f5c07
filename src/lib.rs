pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod model;
pub mod store;
pub mod update;

pub use config::UpdaterConfig;
pub use error::{ErrorKind, StoreError, TickError};
pub use model::{GameState, Report, Town, Travel};
pub use store::{MemoryStore, Store};
pub use update::{TickSummary, Updater};
