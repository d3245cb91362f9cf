pub mod database;
pub mod error;
pub mod history;
pub mod markers;
pub mod memory;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use history::{HistoryQuery, HistoryStore, SqliteHistory};
pub use markers::{MarkerStore, SqliteMarkers};
pub use memory::{MemoryHistory, MemoryMarkers};
