//! Turning a desired id sequence into dense 1-based order assignments.

use std::collections::HashMap;

use catalog_core::{CollectionKey, Entity, EntityId, EntityKind, OrderAssignment};

/// A reordering gesture: the ids of one parent's children in their new
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderIntent {
    pub collection: CollectionKey,
    pub ordered_ids: Vec<EntityId>,
}

impl ReorderIntent {
    pub fn new(kind: EntityKind, parent_id: impl Into<EntityId>, ordered_ids: Vec<EntityId>) -> Self {
        Self {
            collection: CollectionKey::new(kind, Some(parent_id.into())),
            ordered_ids,
        }
    }

    /// The intent produced by dragging the item at `from` to `to` in
    /// `current`. Out-of-range indices leave the sequence as it is.
    pub fn from_move(collection: CollectionKey, current: &[EntityId], from: usize, to: usize) -> Self {
        Self {
            collection,
            ordered_ids: move_item(current, from, to),
        }
    }
}

pub fn move_item(ids: &[EntityId], from: usize, to: usize) -> Vec<EntityId> {
    let mut out = ids.to_vec();
    if from >= out.len() || to >= out.len() || from == to {
        return out;
    }
    let item = out.remove(from);
    out.insert(to, item);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reindexed {
    /// Entities in their new sequence with `order` rewritten.
    pub items: Vec<Entity>,
    /// What to send to the server. Provisional ids are left out.
    pub assignments: Vec<OrderAssignment>,
    /// Requested ids that are not in the collection.
    pub dropped: Vec<EntityId>,
    /// Collection members the request did not mention. They keep their
    /// relative order after the requested ones.
    pub unlisted: Vec<EntityId>,
}

/// Keep the last occurrence of every id: when an id appears twice, its later
/// position wins.
pub fn dedupe_last_wins(ids: &[EntityId]) -> Vec<EntityId> {
    let mut last = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        last.insert(id, i);
    }
    ids.iter()
        .enumerate()
        .filter(|(i, id)| last.get(id) == Some(i))
        .map(|(_, id)| id.clone())
        .collect()
}

/// Reindex `current` into the sequence given by `desired`.
pub fn reindex(current: &[Entity], desired: &[EntityId]) -> Reindexed {
    let lookup: HashMap<&EntityId, &Entity> = current.iter().map(|e| (&e.id, e)).collect();
    let mut out = Reindexed::default();
    let mut placed = Vec::with_capacity(current.len());

    for id in dedupe_last_wins(desired) {
        match lookup.get(&id) {
            Some(entity) => placed.push((*entity).clone()),
            None => out.dropped.push(id),
        }
    }

    for entity in current {
        if !placed.iter().any(|p| p.id == entity.id) {
            out.unlisted.push(entity.id.clone());
            placed.push(entity.clone());
        }
    }

    for (i, mut entity) in placed.into_iter().enumerate() {
        entity.order = i as u32 + 1;
        if !entity.is_provisional() {
            out.assignments.push(OrderAssignment {
                id: entity.id.clone(),
                order: entity.order,
            });
        }
        out.items.push(entity);
    }

    out
}

/// Assignments straight from the desired sequence, for when nothing is
/// cached to check it against.
pub fn assignments_for(desired: &[EntityId]) -> Vec<OrderAssignment> {
    dedupe_last_wins(desired)
        .into_iter()
        .filter(|id| !id.is_provisional())
        .enumerate()
        .map(|(i, id)| OrderAssignment {
            id,
            order: i as u32 + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level(id: &str, order: u32) -> Entity {
        Entity::new(id, EntityKind::Level, Some("c1".into()), order)
    }

    fn ids(list: &[&str]) -> Vec<EntityId> {
        list.iter().map(|s| EntityId::from(*s)).collect()
    }

    fn pairs(items: &[Entity]) -> Vec<(String, u32)> {
        items.iter().map(|e| (e.id.to_string(), e.order)).collect()
    }

    #[test]
    fn moves_last_to_front() {
        let current = vec![level("A", 1), level("B", 2), level("C", 3)];
        let out = reindex(&current, &ids(&["C", "A", "B"]));
        assert_eq!(
            pairs(&out.items),
            vec![("C".into(), 1), ("A".into(), 2), ("B".into(), 3)]
        );
        assert_eq!(out.assignments.len(), 3);
        assert!(out.dropped.is_empty());
        assert!(out.unlisted.is_empty());
    }

    #[test]
    fn unknown_ids_are_dropped() {
        let current = vec![level("A", 1), level("B", 2)];
        let out = reindex(&current, &ids(&["B", "ghost", "A"]));
        assert_eq!(pairs(&out.items), vec![("B".into(), 1), ("A".into(), 2)]);
        assert_eq!(out.dropped, ids(&["ghost"]));
    }

    #[test]
    fn later_duplicate_wins() {
        let current = vec![level("A", 1), level("B", 2), level("C", 3)];
        let out = reindex(&current, &ids(&["A", "B", "C", "A"]));
        assert_eq!(
            pairs(&out.items),
            vec![("B".into(), 1), ("C".into(), 2), ("A".into(), 3)]
        );
    }

    #[test]
    fn unlisted_members_follow_in_current_order() {
        let current = vec![level("A", 1), level("B", 2), level("C", 3)];
        let out = reindex(&current, &ids(&["C"]));
        assert_eq!(
            pairs(&out.items),
            vec![("C".into(), 1), ("A".into(), 2), ("B".into(), 3)]
        );
        assert_eq!(out.unlisted, ids(&["A", "B"]));
    }

    #[test]
    fn provisional_items_are_positioned_but_not_sent() {
        let tmp = EntityId::provisional();
        let current = vec![
            level("A", 1),
            Entity::new(tmp.clone(), EntityKind::Level, Some("c1".into()), 2),
        ];
        let out = reindex(&current, &[tmp.clone(), EntityId::from("A")]);
        assert_eq!(out.items[0].id, tmp);
        assert_eq!(
            out.assignments,
            vec![OrderAssignment {
                id: "A".into(),
                order: 2
            }]
        );
    }

    #[test]
    fn move_item_matches_drag_semantics() {
        let list = ids(&["A", "B", "C", "D"]);
        assert_eq!(move_item(&list, 0, 2), ids(&["B", "C", "A", "D"]));
        assert_eq!(move_item(&list, 3, 0), ids(&["D", "A", "B", "C"]));
        assert_eq!(move_item(&list, 1, 9), list);
    }

    #[test]
    fn cold_assignments_are_dense() {
        let out = assignments_for(&ids(&["X", "Y", "X"]));
        assert_eq!(
            out,
            vec![
                OrderAssignment { id: "Y".into(), order: 1 },
                OrderAssignment { id: "X".into(), order: 2 },
            ]
        );
    }

    proptest! {
        #[test]
        fn reindexed_orders_are_dense_and_complete(
            n in 1usize..12,
            picks in prop::collection::vec(0usize..16, 0..20),
        ) {
            let current: Vec<Entity> = (0..n)
                .map(|i| level(&format!("e{i}"), i as u32 + 1))
                .collect();
            let desired: Vec<EntityId> = picks.iter().map(|i| EntityId::from(format!("e{i}"))).collect();

            let out = reindex(&current, &desired);

            prop_assert_eq!(out.items.len(), n);
            for (i, item) in out.items.iter().enumerate() {
                prop_assert_eq!(item.order as usize, i + 1);
            }
            let mut seen: Vec<_> = out.items.iter().map(|e| e.id.clone()).collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), n);
        }
    }
}
