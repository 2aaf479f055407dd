use std::collections::{HashMap, VecDeque};

use catalog_core::{CollectionScope, MutationId};

/// Serializes mutations per collection scope: at most one is in flight for a
/// given parent's children, the rest wait in issue order.
#[derive(Debug)]
pub struct MutationQueue<P> {
    active: HashMap<CollectionScope, MutationId>,
    waiting: HashMap<CollectionScope, VecDeque<(MutationId, P)>>,
}

impl<P> Default for MutationQueue<P> {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            waiting: HashMap::new(),
        }
    }
}

impl<P> MutationQueue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self, scope: &CollectionScope) -> bool {
        self.active.contains_key(scope)
    }

    pub fn activate(&mut self, scope: CollectionScope, id: MutationId) {
        self.active.insert(scope, id);
    }

    pub fn enqueue(&mut self, scope: CollectionScope, id: MutationId, payload: P) {
        self.waiting.entry(scope).or_default().push_back((id, payload));
    }

    pub fn waiting_len(&self, scope: &CollectionScope) -> usize {
        self.waiting.get(scope).map_or(0, VecDeque::len)
    }

    pub fn is_waiting(&self, id: MutationId) -> bool {
        self.waiting
            .values()
            .any(|q| q.iter().any(|(queued, _)| *queued == id))
    }

    /// Payloads waiting on `scope`, in issue order.
    pub fn waiting_payloads(&self, scope: &CollectionScope) -> impl Iterator<Item = &P> {
        self.waiting.get(scope).into_iter().flatten().map(|(_, p)| p)
    }

    pub fn waiting_payloads_mut(&mut self, scope: &CollectionScope) -> impl Iterator<Item = &mut P> {
        self.waiting.get_mut(scope).into_iter().flatten().map(|(_, p)| p)
    }

    /// Payloads waiting on any scope.
    pub fn all_waiting(&self) -> impl Iterator<Item = &P> {
        self.waiting.values().flatten().map(|(_, p)| p)
    }

    /// Release `scope` after its active mutation settled and hand back the
    /// next waiting mutation, if any. The caller activates it.
    pub fn release(&mut self, scope: &CollectionScope) -> Option<(MutationId, P)> {
        self.active.remove(scope);
        let next = self.waiting.get_mut(scope).and_then(VecDeque::pop_front);
        if self.waiting.get(scope).is_some_and(VecDeque::is_empty) {
            self.waiting.remove(scope);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::EntityKind;

    fn scope(parent: &str) -> CollectionScope {
        CollectionScope {
            kind: EntityKind::Module,
            parent_id: Some(parent.into()),
        }
    }

    #[test]
    fn waiting_mutations_are_released_in_issue_order() {
        let mut queue = MutationQueue::new();
        let first = MutationId::new();
        let second = MutationId::new();
        let third = MutationId::new();

        queue.activate(scope("s1"), first);
        queue.enqueue(scope("s1"), second, "second");
        queue.enqueue(scope("s1"), third, "third");
        assert!(queue.is_busy(&scope("s1")));
        assert_eq!(queue.waiting_len(&scope("s1")), 2);
        assert!(queue.is_waiting(second));

        let (id, payload) = queue.release(&scope("s1")).unwrap();
        assert_eq!((id, payload), (second, "second"));
        assert!(!queue.is_busy(&scope("s1")));
        queue.activate(scope("s1"), id);

        let (id, _) = queue.release(&scope("s1")).unwrap();
        assert_eq!(id, third);
        assert!(queue.release(&scope("s1")).is_none());
    }

    #[test]
    fn waiting_payloads_can_be_rewritten_in_place() {
        let mut queue = MutationQueue::new();
        queue.activate(scope("s1"), MutationId::new());
        queue.enqueue(scope("s1"), MutationId::new(), 1);
        queue.enqueue(scope("s1"), MutationId::new(), 2);
        queue.enqueue(scope("s2"), MutationId::new(), 3);

        for payload in queue.waiting_payloads_mut(&scope("s1")) {
            *payload *= 10;
        }
        let s1: Vec<i32> = queue.waiting_payloads(&scope("s1")).copied().collect();
        assert_eq!(s1, vec![10, 20]);
        let mut all: Vec<i32> = queue.all_waiting().copied().collect();
        all.sort();
        assert_eq!(all, vec![3, 10, 20]);
    }

    #[test]
    fn scopes_are_independent() {
        let mut queue: MutationQueue<()> = MutationQueue::new();
        queue.activate(scope("s1"), MutationId::new());
        assert!(!queue.is_busy(&scope("s2")));
    }
}
