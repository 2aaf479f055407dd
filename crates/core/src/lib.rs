pub mod clock;
pub mod entity;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod snapshot;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{Entity, EntityKind, OrderAssignment};
pub use error::CoreError;
pub use field_value::{FieldValue, Fields};
pub use ids::*;
pub use snapshot::Snapshot;
pub use view::{CacheKey, CollectionKey, CollectionScope, CollectionView, DetailKey, Pagination, QueryParams};
