use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};
use crate::ids::EntityId;

/// Query parameters of a list request (page, limit, search, ...), ordered so
/// that equal parameter sets produce equal keys.
pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        Self {
            total,
            page,
            limit,
            total_pages: pages_for(total, limit),
        }
    }

    /// Same page and limit with a different total.
    pub fn with_total(&self, total: u64) -> Self {
        Self::new(total, self.page, self.limit)
    }
}

fn pages_for(total: u64, limit: u32) -> u32 {
    if limit == 0 {
        return 0;
    }
    total.div_ceil(limit as u64) as u32
}

/// A cached page of siblings sharing one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    pub items: Vec<Entity>,
    pub pagination: Pagination,
}

impl CollectionView {
    pub fn new(items: Vec<Entity>, pagination: Pagination) -> Self {
        Self { items, pagination }
    }

    /// A single-page view holding exactly `items`.
    pub fn from_items(items: Vec<Entity>, limit: u32) -> Self {
        let total = items.len() as u64;
        Self {
            items,
            pagination: Pagination::new(total, 1, limit),
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.items.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.items.iter().map(|e| e.id.clone()).collect()
    }

    pub fn max_order(&self) -> u32 {
        self.items.iter().map(|e| e.order).max().unwrap_or(0)
    }

    /// Stable sort by `order`, so ties keep their current relative position.
    pub fn sort_by_order(&mut self) {
        self.items.sort_by_key(|e| e.order);
    }

    /// `order` values that appear on more than one item.
    pub fn duplicate_orders(&self) -> Vec<u32> {
        let mut seen = BTreeMap::new();
        for item in &self.items {
            *seen.entry(item.order).or_insert(0usize) += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(order, _)| order)
            .collect()
    }

    /// True when orders run 1, 2, 3, ... in item sequence.
    pub fn has_dense_order(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(i, e)| e.order as usize == i + 1)
    }
}

/// Identifies every list view of one parent's children, across query params.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionScope {
    pub kind: EntityKind,
    pub parent_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    pub kind: EntityKind,
    pub parent_id: Option<EntityId>,
    pub params: QueryParams,
}

impl CollectionKey {
    pub fn new(kind: EntityKind, parent_id: Option<EntityId>) -> Self {
        Self {
            kind,
            parent_id,
            params: QueryParams::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn scope(&self) -> CollectionScope {
        CollectionScope {
            kind: self.kind,
            parent_id: self.parent_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetailKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl DetailKey {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self { kind, id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    Collection(CollectionKey),
    Detail(DetailKey),
}

impl From<CollectionKey> for CacheKey {
    fn from(key: CollectionKey) -> Self {
        CacheKey::Collection(key)
    }
}

impl From<DetailKey> for CacheKey {
    fn from(key: DetailKey) -> Self {
        CacheKey::Detail(key)
    }
}
