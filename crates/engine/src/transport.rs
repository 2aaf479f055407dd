//! Contract with the HTTP collaborator that talks to the catalog API.

use catalog_core::{Entity, EntityId, EntityKind, Fields, OrderAssignment};
use thiserror::Error;

/// A rejected request. `status` is the HTTP status when the server answered
/// at all; `None` means the request never got a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No response: offline, DNS, connection reset.
    Network,
    /// 5xx.
    Server,
    /// 4xx. The request itself is wrong; sending it again will not help.
    Validation,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self.status {
            None => FailureKind::Network,
            Some(400..=499) => FailureKind::Validation,
            Some(_) => FailureKind::Server,
        }
    }

    /// Whether offering the user a manual retry makes sense. The engine
    /// itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.kind() != FailureKind::Validation
    }
}

pub trait Transport {
    fn create(
        &mut self,
        kind: EntityKind,
        parent_id: Option<&EntityId>,
        fields: &Fields,
    ) -> Result<Entity, TransportError>;

    fn update(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Entity, TransportError>;

    fn delete(&mut self, kind: EntityKind, id: &EntityId) -> Result<(), TransportError>;

    /// Returns the full sibling list in its new order.
    fn reorder(
        &mut self,
        kind: EntityKind,
        parent_id: &EntityId,
        assignments: &[OrderAssignment],
    ) -> Result<Vec<Entity>, TransportError>;
}

/// A request ready to hand to the transport. Never carries provisional ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    Create {
        kind: EntityKind,
        parent_id: Option<EntityId>,
        fields: Fields,
    },
    Update {
        kind: EntityKind,
        id: EntityId,
        fields: Fields,
    },
    Delete {
        kind: EntityKind,
        id: EntityId,
    },
    Reorder {
        kind: EntityKind,
        parent_id: EntityId,
        assignments: Vec<OrderAssignment>,
    },
}

impl TransportRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Reorder { .. } => "reorder",
        }
    }

    pub fn send(&self, transport: &mut impl Transport) -> Result<MutationResponse, TransportError> {
        match self {
            Self::Create {
                kind,
                parent_id,
                fields,
            } => transport
                .create(*kind, parent_id.as_ref(), fields)
                .map(MutationResponse::Entity),
            Self::Update { kind, id, fields } => transport
                .update(*kind, id, fields)
                .map(MutationResponse::Entity),
            Self::Delete { kind, id } => transport
                .delete(*kind, id)
                .map(|()| MutationResponse::Deleted),
            Self::Reorder {
                kind,
                parent_id,
                assignments,
            } => transport
                .reorder(*kind, parent_id, assignments)
                .map(MutationResponse::Entities),
        }
    }
}

/// What the server answered for a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResponse {
    Entity(Entity),
    Entities(Vec<Entity>),
    Deleted,
}

impl MutationResponse {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn entities(&self) -> Option<&[Entity]> {
        match self {
            Self::Entities(list) => Some(list),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_classified_by_status() {
        let offline = TransportError::network("connection refused");
        assert_eq!(offline.kind(), FailureKind::Network);
        assert!(offline.is_retryable());

        let invalid = TransportError::with_status(422, "title is required");
        assert_eq!(invalid.kind(), FailureKind::Validation);
        assert!(!invalid.is_retryable());

        let down = TransportError::with_status(503, "unavailable");
        assert_eq!(down.kind(), FailureKind::Server);
        assert!(down.is_retryable());
    }

    #[test]
    fn display_includes_status_when_present() {
        assert_eq!(
            TransportError::with_status(404, "level not found").to_string(),
            "level not found (status 404)"
        );
        assert_eq!(TransportError::network("timeout").to_string(), "timeout");
    }
}
