use catalog_core::{CollectionKey, CollectionView, EntityId, EntityKind};
use catalog_engine::{EngineError, MutationCoordinator, MutationIntent, MutationResponse, ReorderIntent};

use crate::server::TestServer;

/// A coordinator wired to a [`TestServer`], with refetches answered after
/// every mutation the way a host's query layer would.
#[derive(Default)]
pub struct TestClient {
    pub server: TestServer,
    pub coordinator: MutationCoordinator,
}

impl TestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(server: TestServer) -> Self {
        Self {
            server,
            coordinator: MutationCoordinator::default(),
        }
    }

    pub fn load(&mut self, key: &CollectionKey) -> bool {
        self.server.load_collection(self.coordinator.cache_mut(), key)
    }

    pub fn view(&self, key: &CollectionKey) -> Option<&CollectionView> {
        self.coordinator.cache().collection(key)
    }

    /// Ids and orders of a cached collection, in display order.
    pub fn orders(&self, key: &CollectionKey) -> Vec<(EntityId, u32)> {
        self.view(key)
            .map(|v| v.items.iter().map(|e| (e.id.clone(), e.order)).collect())
            .unwrap_or_default()
    }

    /// Execute without serving the refetch, leaving the settled view as the
    /// coordinator wrote it.
    pub fn execute(&mut self, intent: MutationIntent) -> Result<MutationResponse, EngineError> {
        self.coordinator.execute(intent, &mut self.server)
    }

    /// Execute and then answer the refetches it requested.
    pub fn run(&mut self, intent: MutationIntent) -> Result<MutationResponse, EngineError> {
        let result = self.execute(intent);
        self.refetch();
        result
    }

    pub fn refetch(&mut self) -> usize {
        self.server.serve_refetches(self.coordinator.cache_mut())
    }

    pub fn reorder(
        &mut self,
        kind: EntityKind,
        parent: &EntityId,
        ordered_ids: Vec<EntityId>,
    ) -> Result<MutationResponse, EngineError> {
        self.execute(ReorderIntent::new(kind, parent.clone(), ordered_ids).into())
    }
}
