use catalog_core::{CoreError, EntityId, EntityKind, MutationId};
use catalog_storage::StorageError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("provisional id {0} cannot be sent to the server")]
    ProvisionalId(EntityId),

    #[error("{0} collections are not orderable")]
    NotOrderable(EntityKind),

    #[error("{0} requires a parent id")]
    MissingParent(EntityKind),

    #[error("unknown mutation: {0}")]
    UnknownMutation(MutationId),

    #[error("another mutation on {kind} collection is in flight")]
    ScopeBusy { kind: EntityKind },

    #[error("server response does not match the {expected} request")]
    ResponseMismatch { expected: &'static str },

    #[error("an optimistic update is already pending")]
    TransactionPending,

    #[error("no optimistic update is pending")]
    NoPendingTransaction,
}
