//! Optimistic create/update/delete/reorder against the query cache.
//!
//! Every mutation runs the same transaction: cancel refetches and snapshot
//! the affected views, write the expected result into the cache, then on
//! settlement either keep the server's answer or restore the snapshots.
//! The collection is revalidated either way.
//!
//! Mutations of one collection scope reach the server one at a time, but a
//! queued mutation's optimistic write shows up as soon as it is issued. When
//! the mutation ahead of it settles, queued writes are taken back out, the
//! settlement is applied to the clean views and the queued writes are laid
//! on top again.
//!
//! Hosts with an event loop use [`MutationCoordinator::begin`] and
//! [`MutationCoordinator::settle`] around their own async request;
//! [`MutationCoordinator::execute`] drives a blocking [`Transport`].

use std::collections::HashMap;

use catalog_core::{
    CacheKey, CollectionKey, CollectionScope, CollectionView, DetailKey, Entity, EntityId,
    EntityKind, Fields, MutationId, Pagination, Snapshot,
};
use serde::{Deserialize, Serialize};

use crate::cache::QueryCache;
use crate::error::EngineError;
use crate::queue::MutationQueue;
use crate::reorder::{self, ReorderIntent};
use crate::transport::{MutationResponse, Transport, TransportError, TransportRequest};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Page size assumed for a collection view the coordinator has to build
    /// itself, when the key carries no `limit` param.
    pub default_page_limit: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationIntent {
    Create {
        collection: CollectionKey,
        fields: Fields,
    },
    Update {
        collection: CollectionKey,
        id: EntityId,
        fields: Fields,
    },
    Delete {
        collection: CollectionKey,
        id: EntityId,
    },
    Reorder(ReorderIntent),
}

impl MutationIntent {
    pub fn create(collection: CollectionKey, fields: Fields) -> Self {
        Self::Create { collection, fields }
    }

    pub fn update(collection: CollectionKey, id: impl Into<EntityId>, fields: Fields) -> Self {
        Self::Update {
            collection,
            id: id.into(),
            fields,
        }
    }

    pub fn delete(collection: CollectionKey, id: impl Into<EntityId>) -> Self {
        Self::Delete {
            collection,
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &CollectionKey {
        match self {
            Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
            Self::Reorder(r) => &r.collection,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.collection().kind
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Reorder(_) => "reorder",
        }
    }

    /// The single entity an update or delete targets.
    pub fn target_id(&self) -> Option<&EntityId> {
        match self {
            Self::Update { id, .. } | Self::Delete { id, .. } => Some(id),
            _ => None,
        }
    }

    fn mentions(&self, entity: &EntityId) -> bool {
        match self {
            Self::Update { id, .. } | Self::Delete { id, .. } => id == entity,
            Self::Reorder(r) => r.ordered_ids.contains(entity),
            Self::Create { .. } => false,
        }
    }
}

impl From<ReorderIntent> for MutationIntent {
    fn from(intent: ReorderIntent) -> Self {
        Self::Reorder(intent)
    }
}

/// A started mutation: send `request`, then settle `id` with the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    pub id: MutationId,
    pub request: TransportRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Started(MutationTicket),
    /// Waiting behind another mutation of the same collection scope. Its
    /// optimistic write is already visible; its ticket comes back from the
    /// settlement that releases it.
    Queued(MutationId),
}

impl Dispatch {
    pub fn id(&self) -> MutationId {
        match self {
            Self::Started(ticket) => ticket.id,
            Self::Queued(id) => *id,
        }
    }

    pub fn ticket(self) -> Option<MutationTicket> {
        match self {
            Self::Started(ticket) => Some(ticket),
            Self::Queued(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Settlement {
    pub id: MutationId,
    /// The server's answer, or the error that caused the rollback.
    pub result: Result<MutationResponse, EngineError>,
    /// The queued mutation that started because this one settled.
    pub next: Option<MutationTicket>,
    /// Queued mutations that could not start, e.g. an update of an entity
    /// whose create failed. Their optimistic writes are gone.
    pub rejected: Vec<(MutationId, EngineError)>,
}

/// Cache contents an optimistic write replaced.
#[derive(Debug, Clone, Default)]
struct PriorViews {
    collection: Option<Snapshot<CollectionView>>,
    detail: Option<(DetailKey, Snapshot<Entity>)>,
}

impl PriorViews {
    fn capture(cache: &QueryCache, intent: &MutationIntent) -> Self {
        let key = intent.collection();
        let label = Some(intent.op_name());
        let collection = cache
            .collection(key)
            .map(|view| Snapshot::capture(view, label));
        let detail = intent.target_id().and_then(|target| {
            let detail_key = DetailKey::new(key.kind, target.clone());
            let snapshot = cache.detail(&detail_key).map(|e| Snapshot::capture(e, label))?;
            Some((detail_key, snapshot))
        });
        Self { collection, detail }
    }

    fn restore(&self, cache: &mut QueryCache, key: &CollectionKey) {
        if let Some(snapshot) = &self.collection {
            cache.set_collection(key.clone(), snapshot.restore());
        }
        if let Some((detail, snapshot)) = &self.detail {
            cache.set_detail(detail.clone(), snapshot.restore());
        }
    }
}

/// A mutation whose optimistic write is in the cache, either in flight or
/// waiting for its scope.
struct PendingMutation {
    intent: MutationIntent,
    prior: PriorViews,
    provisional_id: Option<EntityId>,
}

pub struct MutationCoordinator {
    cache: QueryCache,
    queue: MutationQueue<PendingMutation>,
    pending: HashMap<MutationId, PendingMutation>,
    /// Provisional id to server id, kept while a waiting mutation still
    /// names the provisional id.
    resolved_ids: HashMap<EntityId, EntityId>,
    config: CoordinatorConfig,
}

impl Default for MutationCoordinator {
    fn default() -> Self {
        Self::new(QueryCache::new())
    }
}

impl MutationCoordinator {
    pub fn new(cache: QueryCache) -> Self {
        Self::with_config(cache, CoordinatorConfig::default())
    }

    pub fn with_config(cache: QueryCache, config: CoordinatorConfig) -> Self {
        Self {
            cache,
            queue: MutationQueue::new(),
            pending: HashMap::new(),
            resolved_ids: HashMap::new(),
            config,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self, id: MutationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn is_queued(&self, id: MutationId) -> bool {
        self.queue.is_waiting(id)
    }

    // ========================================================================
    // Begin / Apply
    // ========================================================================

    /// Start a mutation, or queue it when its collection scope is busy.
    /// Either way its optimistic write is in the cache when this returns.
    pub fn begin(&mut self, mut intent: MutationIntent) -> Result<Dispatch, EngineError> {
        self.validate(&intent)?;
        let id = MutationId::new();
        let scope = intent.collection().scope();

        if !self.queue.is_busy(&scope) {
            return self.start(id, intent, None).map(Dispatch::Started);
        }

        resolve_ids(&self.resolved_ids, &mut intent);
        self.cancel_fetches(&intent);
        let prior = PriorViews::capture(&self.cache, &intent);
        let provisional_id = apply_optimistic(&mut self.cache, &intent, None);
        tracing::debug!(
            %id,
            op = intent.op_name(),
            kind = %scope.kind,
            waiting = self.queue.waiting_len(&scope) + 1,
            "queued behind in-flight mutation"
        );
        self.queue.enqueue(
            scope,
            id,
            PendingMutation {
                intent,
                prior,
                provisional_id,
            },
        );
        Ok(Dispatch::Queued(id))
    }

    fn validate(&self, intent: &MutationIntent) -> Result<(), EngineError> {
        let key = intent.collection();
        if key.kind.parent().is_some() && key.parent_id.is_none() {
            return Err(EngineError::MissingParent(key.kind));
        }
        if let Some(parent) = &key.parent_id
            && parent.is_provisional()
        {
            return Err(EngineError::ProvisionalId(parent.clone()));
        }
        if matches!(intent, MutationIntent::Reorder(_)) && !key.kind.is_orderable() {
            return Err(EngineError::NotOrderable(key.kind));
        }
        if let Some(id) = intent.target_id()
            && id.is_provisional()
            && !self.resolved_ids.contains_key(id)
            && !self.is_creating(&key.scope(), id)
        {
            return Err(EngineError::ProvisionalId(id.clone()));
        }
        Ok(())
    }

    fn is_creating(&self, scope: &CollectionScope, provisional: &EntityId) -> bool {
        let creates = |p: &PendingMutation| p.provisional_id.as_ref() == Some(provisional);
        self.pending.values().any(creates) || self.queue.waiting_payloads(scope).any(creates)
    }

    fn cancel_fetches(&mut self, intent: &MutationIntent) {
        let key = intent.collection();
        self.cache.cancel_fetch(&CacheKey::Collection(key.clone()));
        if let Some(target) = intent.target_id() {
            self.cache
                .cancel_fetch(&CacheKey::Detail(DetailKey::new(key.kind, target.clone())));
        }
    }

    fn start(
        &mut self,
        id: MutationId,
        mut intent: MutationIntent,
        provisional: Option<EntityId>,
    ) -> Result<MutationTicket, EngineError> {
        resolve_ids(&self.resolved_ids, &mut intent);
        if let Some(target) = intent.target_id()
            && target.is_provisional()
        {
            return Err(EngineError::ProvisionalId(target.clone()));
        }

        self.cancel_fetches(&intent);
        let request = self.request_for(id, &intent)?;
        let prior = PriorViews::capture(&self.cache, &intent);
        let provisional_id = apply_optimistic(&mut self.cache, &intent, provisional);

        tracing::debug!(
            %id,
            op = intent.op_name(),
            kind = %intent.kind(),
            optimistic = prior.collection.is_some(),
            "mutation started"
        );

        self.queue.activate(intent.collection().scope(), id);
        self.pending.insert(
            id,
            PendingMutation {
                intent,
                prior,
                provisional_id,
            },
        );

        Ok(MutationTicket { id, request })
    }

    fn request_for(&self, id: MutationId, intent: &MutationIntent) -> Result<TransportRequest, EngineError> {
        let key = intent.collection();
        let kind = key.kind;
        let request = match intent {
            MutationIntent::Create { collection, fields } => TransportRequest::Create {
                kind,
                parent_id: collection.parent_id.clone(),
                fields: fields.clone(),
            },
            MutationIntent::Update { id: target, fields, .. } => TransportRequest::Update {
                kind,
                id: target.clone(),
                fields: fields.clone(),
            },
            MutationIntent::Delete { id: target, .. } => TransportRequest::Delete {
                kind,
                id: target.clone(),
            },
            MutationIntent::Reorder(r) => {
                let parent_id = r
                    .collection
                    .parent_id
                    .clone()
                    .ok_or(EngineError::MissingParent(kind))?;
                let assignments = match self.cache.collection(key) {
                    Some(view) => {
                        let out = reorder::reindex(&view.items, &r.ordered_ids);
                        if !out.dropped.is_empty() {
                            tracing::warn!(%id, dropped = ?out.dropped, "reorder names ids missing from the collection");
                        }
                        if !out.unlisted.is_empty() {
                            tracing::warn!(%id, unlisted = ?out.unlisted, "reorder omits collection members, keeping them last");
                        }
                        out.assignments
                    }
                    None => {
                        tracing::debug!(%id, %kind, "collection not cached, sending orders as listed");
                        reorder::assignments_for(&r.ordered_ids)
                    }
                };
                TransportRequest::Reorder {
                    kind,
                    parent_id,
                    assignments,
                }
            }
        };
        Ok(request)
    }

    // ========================================================================
    // Settle
    // ========================================================================

    /// Settle a started mutation with the transport's outcome.
    ///
    /// Only an unknown `id` is an error here; a failed mutation is reported
    /// through [`Settlement::result`] after its rollback.
    pub fn settle(
        &mut self,
        id: MutationId,
        outcome: Result<MutationResponse, TransportError>,
    ) -> Result<Settlement, EngineError> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or(EngineError::UnknownMutation(id))?;
        let key = pending.intent.collection().clone();
        let scope = key.scope();

        self.strip_waiting(&scope);

        let result = match outcome {
            Ok(response) => match self.commit(&pending, response) {
                Ok(response) => {
                    tracing::debug!(%id, op = pending.intent.op_name(), "mutation committed");
                    Ok(response)
                }
                Err(err) => {
                    tracing::warn!(%id, error = %err, "rolling back mutation");
                    pending.prior.restore(&mut self.cache, &key);
                    Err(err)
                }
            },
            Err(err) => {
                tracing::warn!(
                    %id,
                    op = pending.intent.op_name(),
                    status = ?err.status,
                    error = %err,
                    "rolling back mutation"
                );
                pending.prior.restore(&mut self.cache, &key);
                Err(EngineError::Transport(err))
            }
        };

        self.cache.revalidate(CacheKey::Collection(key));

        let (next, rejected) = self.advance(&scope);
        self.reapply_waiting(&scope);
        self.prune_resolved_ids();
        Ok(Settlement {
            id,
            result,
            next,
            rejected,
        })
    }

    fn commit(
        &mut self,
        pending: &PendingMutation,
        response: MutationResponse,
    ) -> Result<MutationResponse, EngineError> {
        let key = pending.intent.collection();
        let kind = key.kind;
        let mismatch = EngineError::ResponseMismatch {
            expected: pending.intent.op_name(),
        };

        match (&pending.intent, &response) {
            (MutationIntent::Create { .. }, MutationResponse::Entity(created)) => {
                let provisional = pending.provisional_id.as_ref();
                let cached = self.cache.update_collection(key, |view| {
                    let slot = provisional.and_then(|tmp| view.items.iter().position(|e| &e.id == tmp));
                    match slot {
                        Some(i) => view.items[i] = created.clone(),
                        None if !view.contains(&created.id) => {
                            view.items.push(created.clone());
                            view.pagination = view.pagination.with_total(view.pagination.total + 1);
                        }
                        None => {}
                    }
                    view.sort_by_order();
                });
                if !cached {
                    let limit = self.page_limit(key);
                    self.cache
                        .set_collection(key.clone(), CollectionView::from_items(vec![created.clone()], limit));
                }
                let detail = DetailKey::new(kind, created.id.clone());
                self.cache.set_detail(detail.clone(), created.clone());
                self.cache.invalidate(&CacheKey::Detail(detail));
                if let Some(tmp) = provisional {
                    self.resolved_ids.insert(tmp.clone(), created.id.clone());
                }
                self.invalidate_parent_detail(key);
            }

            (MutationIntent::Update { .. }, MutationResponse::Entity(updated)) => {
                self.cache.update_collection(key, |view| {
                    if let Some(item) = view.items.iter_mut().find(|e| e.id == updated.id) {
                        *item = updated.clone();
                    }
                    view.sort_by_order();
                });
                let detail = DetailKey::new(kind, updated.id.clone());
                self.cache.set_detail(detail.clone(), updated.clone());
                self.cache.invalidate(&CacheKey::Detail(detail));
            }

            (MutationIntent::Delete { id, .. }, MutationResponse::Deleted) => {
                let removed_order = pending
                    .prior
                    .collection
                    .as_ref()
                    .and_then(|s| s.state().get(id))
                    .map(|e| e.order);
                self.cache.update_collection(key, |view| {
                    view.items.retain(|e| &e.id != id);
                    // the server closes the gap left by the deleted sibling
                    if let Some(removed) = removed_order
                        && kind.is_orderable()
                    {
                        for item in view.items.iter_mut().filter(|e| e.order > removed) {
                            item.order -= 1;
                        }
                    }
                });
                self.cache.remove(&CacheKey::Detail(DetailKey::new(kind, id.clone())));
                if let Some(child) = kind.child() {
                    self.cache.invalidate_scope(&CollectionScope {
                        kind: child,
                        parent_id: Some(id.clone()),
                    });
                }
                self.invalidate_parent_detail(key);
            }

            (MutationIntent::Reorder(_), MutationResponse::Entities(list)) => {
                let mut ordered = list.clone();
                ordered.sort_by_key(|e| e.order);
                let total = ordered.len() as u64;
                self.cache.update_collection(key, |view| {
                    view.items = page_window(&ordered, &view.pagination);
                    view.pagination = view.pagination.with_total(total);
                });
                for entity in ordered {
                    self.cache.set_detail(DetailKey::new(kind, entity.id.clone()), entity);
                }
            }

            _ => return Err(mismatch),
        }

        if let Some(view) = self.cache.collection(key) {
            let duplicates = view.duplicate_orders();
            if !duplicates.is_empty() {
                tracing::warn!(%kind, ?duplicates, "siblings share order values");
            }
        }
        self.cache.invalidate_scope(&key.scope());

        Ok(response)
    }

    fn invalidate_parent_detail(&mut self, key: &CollectionKey) {
        if let (Some(parent_kind), Some(parent_id)) = (key.kind.parent(), &key.parent_id) {
            self.cache
                .invalidate(&CacheKey::Detail(DetailKey::new(parent_kind, parent_id.clone())));
        }
    }

    fn page_limit(&self, key: &CollectionKey) -> u32 {
        key.params
            .get("limit")
            .and_then(|l| l.parse().ok())
            .unwrap_or(self.config.default_page_limit)
    }

    /// Take the optimistic writes of waiting mutations back out of the
    /// cache, newest first, leaving the views the active mutation produced.
    fn strip_waiting(&mut self, scope: &CollectionScope) {
        let waiting: Vec<&PendingMutation> = self.queue.waiting_payloads(scope).collect();
        for queued in waiting.into_iter().rev() {
            queued.prior.restore(&mut self.cache, queued.intent.collection());
        }
    }

    /// Lay the optimistic writes of waiting mutations back over the settled
    /// views, oldest first.
    fn reapply_waiting(&mut self, scope: &CollectionScope) {
        for queued in self.queue.waiting_payloads_mut(scope) {
            resolve_ids(&self.resolved_ids, &mut queued.intent);
            queued.prior = PriorViews::capture(&self.cache, &queued.intent);
            queued.provisional_id =
                apply_optimistic(&mut self.cache, &queued.intent, queued.provisional_id.take());
        }
    }

    fn prune_resolved_ids(&mut self) {
        let pending = &self.pending;
        let queue = &self.queue;
        self.resolved_ids.retain(|tmp, _| {
            pending.values().any(|p| p.intent.mentions(tmp))
                || queue.all_waiting().any(|q| q.intent.mentions(tmp))
        });
    }

    /// Start the next queued mutation of `scope`, skipping any that cannot
    /// start.
    fn advance(&mut self, scope: &CollectionScope) -> (Option<MutationTicket>, Vec<(MutationId, EngineError)>) {
        let mut rejected = Vec::new();
        while let Some((id, queued)) = self.queue.release(scope) {
            match self.start(id, queued.intent, queued.provisional_id) {
                Ok(ticket) => return (Some(ticket), rejected),
                Err(err) => {
                    tracing::warn!(%id, error = %err, "queued mutation could not start");
                    rejected.push((id, err));
                }
            }
        }
        (None, rejected)
    }

    // ========================================================================
    // Blocking execution
    // ========================================================================

    /// Run a mutation to settlement over a blocking transport. Refuses with
    /// [`EngineError::ScopeBusy`] instead of queueing.
    pub fn execute(
        &mut self,
        intent: MutationIntent,
        transport: &mut impl Transport,
    ) -> Result<MutationResponse, EngineError> {
        let scope = intent.collection().scope();
        if self.queue.is_busy(&scope) {
            return Err(EngineError::ScopeBusy { kind: scope.kind });
        }
        let ticket = match self.begin(intent)? {
            Dispatch::Started(ticket) => ticket,
            Dispatch::Queued(_) => return Err(EngineError::ScopeBusy { kind: scope.kind }),
        };
        let outcome = ticket.request.send(transport);
        let settlement = self.settle(ticket.id, outcome)?;
        self.drive(settlement.next, transport);
        settlement.result
    }

    fn drive(&mut self, mut next: Option<MutationTicket>, transport: &mut impl Transport) {
        while let Some(ticket) = next.take() {
            let outcome = ticket.request.send(transport);
            match self.settle(ticket.id, outcome) {
                Ok(settlement) => {
                    if let Err(err) = &settlement.result {
                        tracing::warn!(id = %settlement.id, error = %err, "queued mutation failed");
                    }
                    next = settlement.next;
                }
                Err(err) => tracing::warn!(error = %err, "failed to settle queued mutation"),
            }
        }
    }
}

fn resolve_ids(resolved: &HashMap<EntityId, EntityId>, intent: &mut MutationIntent) {
    let swap = |id: &mut EntityId| {
        if let Some(real) = resolved.get(id) {
            *id = real.clone();
        }
    };
    match intent {
        MutationIntent::Update { id, .. } | MutationIntent::Delete { id, .. } => swap(id),
        MutationIntent::Reorder(r) => r.ordered_ids.iter_mut().for_each(swap),
        MutationIntent::Create { .. } => {}
    }
}

/// Write the expected result of `intent` into the cache. A create reuses
/// `provisional` when given, and returns the provisional id it placed in a
/// cached view. Applying the same intent twice leaves the views unchanged.
fn apply_optimistic(
    cache: &mut QueryCache,
    intent: &MutationIntent,
    provisional: Option<EntityId>,
) -> Option<EntityId> {
    let key = intent.collection();
    let kind = key.kind;
    match intent {
        MutationIntent::Create { collection, fields } => {
            let tmp = provisional.unwrap_or_else(EntityId::provisional);
            let parent_id = collection.parent_id.clone();
            let placed = cache.update_collection(key, |view| {
                if view.contains(&tmp) {
                    return;
                }
                view.items.push(Entity {
                    id: tmp.clone(),
                    kind,
                    parent_id,
                    order: view.max_order().saturating_add(1),
                    fields: fields.clone(),
                });
                view.pagination = view.pagination.with_total(view.pagination.total + 1);
            });
            placed.then_some(tmp)
        }

        MutationIntent::Update { id: target, fields, .. } => {
            cache.update_collection(key, |view| {
                if let Some(item) = view.items.iter_mut().find(|e| &e.id == target) {
                    item.merge_fields(fields);
                }
            });
            cache.update_detail(&DetailKey::new(kind, target.clone()), |e| e.merge_fields(fields));
            None
        }

        MutationIntent::Delete { id: target, .. } => {
            cache.update_collection(key, |view| {
                let before = view.items.len();
                view.items.retain(|e| &e.id != target);
                if view.items.len() < before {
                    let total = view.pagination.total.saturating_sub(1);
                    view.pagination = view.pagination.with_total(total);
                }
            });
            None
        }

        MutationIntent::Reorder(r) => {
            cache.update_collection(key, |view| {
                view.items = reorder::reindex(&view.items, &r.ordered_ids).items;
            });
            None
        }
    }
}

/// The part of `all` that a view paginated as `pagination` shows.
fn page_window(all: &[Entity], pagination: &Pagination) -> Vec<Entity> {
    let limit = pagination.limit as usize;
    if limit == 0 {
        return all.to_vec();
    }
    let skip = (pagination.page.max(1) as usize - 1).saturating_mul(limit);
    all.iter().skip(skip).take(limit).cloned().collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::FieldValue;

    fn levels() -> CollectionKey {
        CollectionKey::new(EntityKind::Level, Some("c1".into()))
    }

    fn level(id: &str, order: u32) -> Entity {
        Entity::new(id, EntityKind::Level, Some("c1".into()), order).with_field("title", id)
    }

    fn seeded() -> MutationCoordinator {
        let mut cache = QueryCache::new();
        cache.set_collection(
            levels(),
            CollectionView::from_items(vec![level("A", 1), level("B", 2), level("C", 3)], 20),
        );
        cache.set_detail(DetailKey::new(EntityKind::Level, "B"), level("B", 2));
        MutationCoordinator::new(cache)
    }

    fn title(value: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".into(), FieldValue::from(value));
        fields
    }

    fn order_pairs(view: &CollectionView) -> Vec<(String, u32)> {
        view.items.iter().map(|e| (e.id.to_string(), e.order)).collect()
    }

    #[test]
    fn optimistic_create_appends_provisional_entity() -> Result<(), EngineError> {
        let mut coord = seeded();
        let ticket = coord
            .begin(MutationIntent::create(levels(), title("D")))?
            .ticket()
            .expect("started");

        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.items.len(), 4);
        let last = &view.items[3];
        assert!(last.is_provisional());
        assert_eq!(last.order, 4);
        assert_eq!(view.pagination.total, 4);

        match &ticket.request {
            TransportRequest::Create { parent_id, fields, .. } => {
                assert_eq!(parent_id.as_ref().map(EntityId::as_str), Some("c1"));
                assert_eq!(fields, &title("D"));
            }
            other => panic!("unexpected request {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn create_success_replaces_provisional_with_server_entity() -> Result<(), EngineError> {
        let mut coord = seeded();
        let ticket = coord
            .begin(MutationIntent::create(levels(), title("D")))?
            .ticket()
            .expect("started");
        let provisional = coord.cache().collection(&levels()).expect("cached").items[3].id.clone();

        let settlement = coord.settle(ticket.id, Ok(MutationResponse::Entity(level("D", 4))))?;
        assert!(settlement.result.is_ok());

        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["A".into(), "B".into(), "C".into(), "D".into()]);
        assert!(view.items.iter().all(|e| !e.is_provisional()));
        assert!(!view.contains(&provisional));
        assert!(coord.resolved_ids.is_empty(), "nothing waits on the provisional id");
        assert!(coord.cache().detail(&DetailKey::new(EntityKind::Level, "D")).is_some());
        assert!(coord.cache().is_stale(&levels().into()));
        Ok(())
    }

    #[test]
    fn failed_update_restores_collection_and_detail() -> Result<(), EngineError> {
        let mut coord = seeded();
        let before_view = coord.cache().collection(&levels()).cloned();
        let before_detail = coord.cache().detail(&DetailKey::new(EntityKind::Level, "B")).cloned();

        let ticket = coord
            .begin(MutationIntent::update(levels(), "B", title("Beta")))?
            .ticket()
            .expect("started");
        assert_eq!(
            coord
                .cache()
                .detail(&DetailKey::new(EntityKind::Level, "B"))
                .and_then(|e| e.field("title")),
            Some(&FieldValue::from("Beta"))
        );

        let settlement = coord.settle(ticket.id, Err(TransportError::with_status(422, "too long")))?;
        assert!(matches!(settlement.result, Err(EngineError::Transport(_))));
        assert_eq!(coord.cache().collection(&levels()).cloned(), before_view);
        assert_eq!(
            coord.cache().detail(&DetailKey::new(EntityKind::Level, "B")).cloned(),
            before_detail
        );
        Ok(())
    }

    #[test]
    fn delete_filters_then_drops_detail() -> Result<(), EngineError> {
        let mut coord = seeded();
        let ticket = coord
            .begin(MutationIntent::delete(levels(), "B"))?
            .ticket()
            .expect("started");
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["A".into(), "C".into()]);
        assert_eq!(view.pagination.total, 2);

        coord.settle(ticket.id, Ok(MutationResponse::Deleted))?;
        assert!(coord.cache().detail(&DetailKey::new(EntityKind::Level, "B")).is_none());
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(order_pairs(view), vec![("A".into(), 1), ("C".into(), 2)]);
        Ok(())
    }

    #[test]
    fn reorder_scenario_applies_then_rolls_back() -> Result<(), EngineError> {
        let mut coord = seeded();
        let intent = ReorderIntent::new(EntityKind::Level, "c1", vec!["C".into(), "A".into(), "B".into()]);
        let ticket = coord.begin(intent.into())?.ticket().expect("started");

        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(
            order_pairs(view),
            vec![("C".into(), 1), ("A".into(), 2), ("B".into(), 3)]
        );

        coord.settle(ticket.id, Err(TransportError::with_status(500, "boom")))?;
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(
            order_pairs(view),
            vec![("A".into(), 1), ("B".into(), 2), ("C".into(), 3)]
        );
        Ok(())
    }

    #[test]
    fn cold_create_skips_optimistic_apply() -> Result<(), EngineError> {
        let mut coord = MutationCoordinator::default();
        let ticket = coord
            .begin(MutationIntent::create(levels(), title("Only")))?
            .ticket()
            .expect("started");
        assert!(coord.cache().collection(&levels()).is_none());

        coord.settle(ticket.id, Ok(MutationResponse::Entity(level("X", 1))))?;
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.items, vec![level("X", 1)]);
        Ok(())
    }

    #[test]
    fn second_mutation_on_scope_is_queued() -> Result<(), EngineError> {
        let mut coord = seeded();
        let first = coord.begin(MutationIntent::update(levels(), "A", title("Alpha")))?;
        let second = coord.begin(MutationIntent::update(levels(), "C", title("Gamma")))?;
        assert!(matches!(second, Dispatch::Queued(_)));
        assert!(coord.is_queued(second.id()));

        // the queued update is visible before it reaches the server
        assert_eq!(title_of(&coord, "C"), Some(FieldValue::from("Gamma")));

        let settlement = coord.settle(first.id(), Ok(MutationResponse::Entity(level("A", 1).with_field("title", "Alpha"))))?;
        let next = settlement.next.expect("released");
        assert_eq!(next.id, second.id());
        assert!(coord.is_in_flight(second.id()));
        assert_eq!(title_of(&coord, "A"), Some(FieldValue::from("Alpha")));
        assert_eq!(title_of(&coord, "C"), Some(FieldValue::from("Gamma")));
        Ok(())
    }

    fn title_of(coord: &MutationCoordinator, id: &str) -> Option<FieldValue> {
        coord
            .cache()
            .collection(&levels())
            .and_then(|v| v.get(&id.into()))
            .and_then(|e| e.field("title").cloned())
    }

    #[test]
    fn queued_delete_hides_the_row_at_once() -> Result<(), EngineError> {
        let mut coord = seeded();
        let first = coord.begin(MutationIntent::delete(levels(), "A"))?;
        let second = coord.begin(MutationIntent::delete(levels(), "B"))?;
        assert!(matches!(second, Dispatch::Queued(_)));

        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["C".into()]);
        assert_eq!(view.pagination.total, 1);

        let settlement = coord.settle(first.id(), Ok(MutationResponse::Deleted))?;
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["C".into()]);

        let next = settlement.next.expect("released");
        coord.settle(next.id, Ok(MutationResponse::Deleted))?;
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(order_pairs(view), vec![("C".into(), 1)]);
        Ok(())
    }

    #[test]
    fn rollback_ahead_of_queue_keeps_queued_writes() -> Result<(), EngineError> {
        let mut coord = seeded();
        let first = coord.begin(MutationIntent::update(levels(), "A", title("Alpha")))?;
        let second = coord.begin(MutationIntent::delete(levels(), "C"))?;
        assert!(matches!(second, Dispatch::Queued(_)));

        let settlement = coord.settle(first.id(), Err(TransportError::with_status(500, "boom")))?;
        assert!(settlement.result.is_err());
        assert_eq!(title_of(&coord, "A"), Some(FieldValue::from("A")));
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["A".into(), "B".into()]);
        assert_eq!(view.pagination.total, 2);

        // the released delete rolls back to the view the failed update left
        let next = settlement.next.expect("released");
        coord.settle(next.id, Err(TransportError::network("offline")))?;
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(
            order_pairs(view),
            vec![("A".into(), 1), ("B".into(), 2), ("C".into(), 3)]
        );
        assert_eq!(title_of(&coord, "A"), Some(FieldValue::from("A")));
        Ok(())
    }

    #[test]
    fn queued_detail_write_survives_and_rolls_back() -> Result<(), EngineError> {
        let mut coord = seeded();
        let detail = DetailKey::new(EntityKind::Level, "B");
        let first = coord.begin(MutationIntent::update(levels(), "A", title("Alpha")))?;
        coord.begin(MutationIntent::update(levels(), "B", title("Beta")))?;
        let detail_title = |coord: &MutationCoordinator| {
            coord.cache().detail(&detail).and_then(|e| e.field("title").cloned())
        };
        assert_eq!(detail_title(&coord), Some(FieldValue::from("Beta")));

        let settlement = coord.settle(first.id(), Ok(MutationResponse::Entity(level("A", 1).with_field("title", "Alpha"))))?;
        assert_eq!(detail_title(&coord), Some(FieldValue::from("Beta")));

        let next = settlement.next.expect("released");
        coord.settle(next.id, Err(TransportError::with_status(422, "taken")))?;
        assert_eq!(detail_title(&coord), Some(FieldValue::from("B")));
        assert_eq!(title_of(&coord, "A"), Some(FieldValue::from("Alpha")));
        Ok(())
    }

    #[test]
    fn create_next_to_maximal_order_does_not_overflow() -> Result<(), EngineError> {
        let mut cache = QueryCache::new();
        cache.set_collection(levels(), CollectionView::from_items(vec![level("A", u32::MAX)], 20));
        let mut coord = MutationCoordinator::new(cache);
        coord.begin(MutationIntent::create(levels(), title("B")))?;

        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.items[1].order, u32::MAX);
        Ok(())
    }

    #[test]
    fn reorder_commit_keeps_the_page_window() -> Result<(), EngineError> {
        let page = levels().with_param("page", "1").with_param("limit", "2");
        let mut cache = QueryCache::new();
        cache.set_collection(
            page.clone(),
            CollectionView::new(vec![level("A", 1), level("B", 2)], Pagination::new(3, 1, 2)),
        );
        let mut coord = MutationCoordinator::new(cache);
        let intent = ReorderIntent {
            collection: page.clone(),
            ordered_ids: vec!["B".into(), "A".into()],
        };
        let ticket = coord.begin(intent.into())?.ticket().expect("started");

        let server = vec![level("C", 1), level("B", 2), level("A", 3)];
        coord.settle(ticket.id, Ok(MutationResponse::Entities(server)))?;
        let view = coord.cache().collection(&page).expect("cached");
        assert_eq!(order_pairs(view), vec![("C".into(), 1), ("B".into(), 2)]);
        assert_eq!(view.pagination, Pagination::new(3, 1, 2));
        assert!(coord.cache().detail(&DetailKey::new(EntityKind::Level, "A")).is_some());
        Ok(())
    }

    #[test]
    fn provisional_parent_is_refused() {
        let mut coord = MutationCoordinator::default();
        let key = CollectionKey::new(EntityKind::Level, Some(EntityId::provisional()));
        assert!(matches!(
            coord.begin(MutationIntent::create(key, title("x"))),
            Err(EngineError::ProvisionalId(_))
        ));
    }

    #[test]
    fn provisional_ids_are_rejected_unless_being_created() -> Result<(), EngineError> {
        let mut coord = seeded();
        let err = coord
            .begin(MutationIntent::delete(levels(), EntityId::provisional()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ProvisionalId(_)));
        Ok(())
    }

    #[test]
    fn update_of_pending_create_is_rewritten_to_server_id() -> Result<(), EngineError> {
        let mut coord = seeded();
        let create = coord
            .begin(MutationIntent::create(levels(), title("D")))?
            .ticket()
            .expect("started");
        let tmp = coord.cache().collection(&levels()).expect("cached").items[3].id.clone();

        let update = coord.begin(MutationIntent::update(levels(), tmp, title("Delta")))?;
        assert!(matches!(update, Dispatch::Queued(_)));

        assert_eq!(
            coord.cache().collection(&levels()).expect("cached").items[3].field("title"),
            Some(&FieldValue::from("Delta"))
        );

        let settlement = coord.settle(create.id, Ok(MutationResponse::Entity(level("D", 4))))?;
        let next = settlement.next.expect("released");
        match next.request {
            TransportRequest::Update { id, .. } => assert_eq!(id.as_str(), "D"),
            other => panic!("unexpected request {other:?}"),
        }
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.get(&"D".into()).and_then(|e| e.field("title")), Some(&FieldValue::from("Delta")));
        assert!(coord.resolved_ids.is_empty());
        Ok(())
    }

    #[test]
    fn update_of_failed_create_is_rejected_on_release() -> Result<(), EngineError> {
        let mut coord = seeded();
        let create = coord
            .begin(MutationIntent::create(levels(), title("D")))?
            .ticket()
            .expect("started");
        let tmp = coord.cache().collection(&levels()).expect("cached").items[3].id.clone();
        let update = coord.begin(MutationIntent::update(levels(), tmp, title("Delta")))?;

        let settlement = coord.settle(create.id, Err(TransportError::network("offline")))?;
        assert!(settlement.next.is_none());
        assert_eq!(settlement.rejected.len(), 1);
        assert_eq!(settlement.rejected[0].0, update.id());
        let view = coord.cache().collection(&levels()).expect("cached");
        assert_eq!(view.ids(), vec!["A".into(), "B".into(), "C".into()]);
        Ok(())
    }

    #[test]
    fn reorder_of_courses_is_refused() {
        let mut coord = MutationCoordinator::default();
        let intent = ReorderIntent {
            collection: CollectionKey::new(EntityKind::Course, None),
            ordered_ids: vec!["x".into()],
        };
        assert!(matches!(
            coord.begin(intent.into()),
            Err(EngineError::NotOrderable(EntityKind::Course))
        ));
    }

    #[test]
    fn missing_parent_is_refused() {
        let mut coord = MutationCoordinator::default();
        let key = CollectionKey::new(EntityKind::Lesson, None);
        assert!(matches!(
            coord.begin(MutationIntent::create(key, Fields::new())),
            Err(EngineError::MissingParent(EntityKind::Lesson))
        ));
    }

    #[test]
    fn mismatched_response_rolls_back() -> Result<(), EngineError> {
        let mut coord = seeded();
        let before = coord.cache().collection(&levels()).cloned();
        let ticket = coord
            .begin(MutationIntent::delete(levels(), "A"))?
            .ticket()
            .expect("started");
        let settlement = coord.settle(ticket.id, Ok(MutationResponse::Entities(vec![])))?;
        assert!(matches!(
            settlement.result,
            Err(EngineError::ResponseMismatch { expected: "delete" })
        ));
        assert_eq!(coord.cache().collection(&levels()).cloned(), before);
        Ok(())
    }

    #[test]
    fn settling_unknown_mutation_is_an_error() {
        let mut coord = MutationCoordinator::default();
        assert!(matches!(
            coord.settle(MutationId::new(), Ok(MutationResponse::Deleted)),
            Err(EngineError::UnknownMutation(_))
        ));
    }
}
