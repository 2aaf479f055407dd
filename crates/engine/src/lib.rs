pub mod cache;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod form;
pub mod history;
pub mod queue;
pub mod reorder;
pub mod transport;

pub use cache::{CachedView, FetchToken, QueryCache};
pub use coordinator::{
    CoordinatorConfig, Dispatch, MutationCoordinator, MutationIntent, MutationTicket, Settlement,
};
pub use debounce::Debounce;
pub use error::EngineError;
pub use form::{
    FormConfig, FormHistoryManager, FormStatus, HistoryEntry, LifecycleAction, LifecycleEvent,
    NavigationChoice, Shortcut,
};
pub use history::History;
pub use queue::MutationQueue;
pub use reorder::{ReorderIntent, Reindexed};
pub use transport::{FailureKind, MutationResponse, Transport, TransportError, TransportRequest};
