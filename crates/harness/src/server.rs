use std::collections::{BTreeMap, VecDeque};

use catalog_core::{
    CacheKey, CollectionKey, CollectionView, DetailKey, Entity, EntityId, EntityKind, Fields,
    OrderAssignment, Pagination,
};
use catalog_engine::{CachedView, QueryCache, Transport, TransportError, TransportRequest};
use uuid::Uuid;

const DEFAULT_LIMIT: u32 = 20;

/// In-memory stand-in for the catalog API.
///
/// Holds the authoritative entities, renumbers siblings densely after every
/// write, and records each request so tests can inspect what was sent.
#[derive(Debug, Default)]
pub struct TestServer {
    entities: BTreeMap<EntityId, Entity>,
    failures: VecDeque<TransportError>,
    requests: Vec<TransportRequest>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert children of `parent` titled `titles`, ordered as given.
    pub fn seed(&mut self, kind: EntityKind, parent: Option<&str>, titles: &[&str]) -> Vec<EntityId> {
        let parent_id = parent.map(EntityId::from);
        let start = self.children(kind, parent_id.as_ref()).len() as u32;
        titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let id = Self::mint_id();
                let entity = Entity::new(id.clone(), kind, parent_id.clone(), start + i as u32 + 1)
                    .with_field("title", *title);
                self.entities.insert(id.clone(), entity);
                id
            })
            .collect()
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Make the next request fail with `error`.
    pub fn fail_next(&mut self, error: TransportError) {
        self.failures.push_back(error);
    }

    pub fn requests(&self) -> &[TransportRequest] {
        &self.requests
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn children(&self, kind: EntityKind, parent: Option<&EntityId>) -> Vec<Entity> {
        let mut out: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| e.kind == kind && e.parent_id.as_ref() == parent)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Serve a collection read, honoring `page` and `limit` params.
    pub fn fetch_collection(&self, key: &CollectionKey) -> CollectionView {
        let all = self.children(key.kind, key.parent_id.as_ref());
        let limit = param(key, "limit").unwrap_or(DEFAULT_LIMIT).max(1);
        let page = param(key, "page").unwrap_or(1).max(1);
        let items = all
            .iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        CollectionView::new(items, Pagination::new(all.len() as u64, page, limit))
    }

    pub fn fetch_detail(&self, key: &DetailKey) -> Option<Entity> {
        self.entities.get(&key.id).filter(|e| e.kind == key.kind).cloned()
    }

    /// Load `key` into `cache` through a fetch token, as a host query would.
    pub fn load_collection(&self, cache: &mut QueryCache, key: &CollectionKey) -> bool {
        let token = cache.begin_fetch(CacheKey::Collection(key.clone()));
        cache.complete_fetch(token, CachedView::Collection(self.fetch_collection(key)))
    }

    /// Answer every refetch the cache has asked for. Returns how many
    /// results were stored.
    pub fn serve_refetches(&self, cache: &mut QueryCache) -> usize {
        let mut stored = 0;
        for key in cache.take_refetch_requests() {
            let view = match &key {
                CacheKey::Collection(k) => Some(CachedView::Collection(self.fetch_collection(k))),
                CacheKey::Detail(k) => self.fetch_detail(k).map(CachedView::Detail),
            };
            let token = cache.begin_fetch(key);
            match view {
                Some(view) => {
                    if cache.complete_fetch(token, view) {
                        stored += 1;
                    }
                }
                None => {
                    cache.cancel_fetch(token.key());
                }
            }
        }
        stored
    }

    fn mint_id() -> EntityId {
        EntityId::new(Uuid::now_v7().to_string())
    }

    fn take_failure(&mut self) -> Result<(), TransportError> {
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn renumber(&mut self, kind: EntityKind, parent: Option<&EntityId>) {
        for (i, sibling) in self.children(kind, parent).into_iter().enumerate() {
            if let Some(entity) = self.entities.get_mut(&sibling.id) {
                entity.order = i as u32 + 1;
            }
        }
    }

    fn remove_subtree(&mut self, id: &EntityId) {
        let children: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.parent_id.as_ref() == Some(id))
            .map(|e| e.id.clone())
            .collect();
        for child in children {
            self.remove_subtree(&child);
        }
        self.entities.remove(id);
    }
}

fn param(key: &CollectionKey, name: &str) -> Option<u32> {
    key.params.get(name).and_then(|v| v.parse().ok())
}

fn reject_provisional(id: &EntityId) -> Result<(), TransportError> {
    if id.is_provisional() {
        return Err(TransportError::with_status(422, format!("unknown id {id}")));
    }
    Ok(())
}

impl Transport for TestServer {
    fn create(
        &mut self,
        kind: EntityKind,
        parent_id: Option<&EntityId>,
        fields: &Fields,
    ) -> Result<Entity, TransportError> {
        self.requests.push(TransportRequest::Create {
            kind,
            parent_id: parent_id.cloned(),
            fields: fields.clone(),
        });
        self.take_failure()?;
        if let Some(parent) = parent_id {
            reject_provisional(parent)?;
        }

        let order = self
            .children(kind, parent_id)
            .last()
            .map_or(1, |e| e.order + 1);
        let mut entity = Entity::new(Self::mint_id(), kind, parent_id.cloned(), order);
        entity.fields = fields.clone();
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    fn update(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Entity, TransportError> {
        self.requests.push(TransportRequest::Update {
            kind,
            id: id.clone(),
            fields: fields.clone(),
        });
        self.take_failure()?;
        reject_provisional(id)?;

        let entity = self
            .entities
            .get_mut(id)
            .filter(|e| e.kind == kind)
            .ok_or_else(|| TransportError::with_status(404, format!("{kind} {id} not found")))?;
        entity.merge_fields(fields);
        Ok(entity.clone())
    }

    fn delete(&mut self, kind: EntityKind, id: &EntityId) -> Result<(), TransportError> {
        self.requests.push(TransportRequest::Delete {
            kind,
            id: id.clone(),
        });
        self.take_failure()?;
        reject_provisional(id)?;

        let parent = self
            .entities
            .get(id)
            .filter(|e| e.kind == kind)
            .map(|e| e.parent_id.clone())
            .ok_or_else(|| TransportError::with_status(404, format!("{kind} {id} not found")))?;
        self.remove_subtree(id);
        self.renumber(kind, parent.as_ref());
        Ok(())
    }

    fn reorder(
        &mut self,
        kind: EntityKind,
        parent_id: &EntityId,
        assignments: &[OrderAssignment],
    ) -> Result<Vec<Entity>, TransportError> {
        self.requests.push(TransportRequest::Reorder {
            kind,
            parent_id: parent_id.clone(),
            assignments: assignments.to_vec(),
        });
        self.take_failure()?;
        for assignment in assignments {
            reject_provisional(&assignment.id)?;
        }

        for assignment in assignments {
            if let Some(entity) = self
                .entities
                .get_mut(&assignment.id)
                .filter(|e| e.kind == kind && e.parent_id.as_ref() == Some(parent_id))
            {
                entity.order = assignment.order;
            }
        }
        self.renumber(kind, Some(parent_id));
        Ok(self.children(kind, Some(parent_id)))
    }
}
