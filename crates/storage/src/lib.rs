pub mod error;
pub mod memory;
pub mod recovery;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use recovery::{RecoveryChannel, RecoveryConfig};
pub use sqlite::SqliteStore;
pub use traits::*;
