use std::collections::VecDeque;

use catalog_core::Snapshot;

/// Linear undo history with a cursor.
///
/// Entries before the cursor can be undone to, entries after it redone to.
/// Pushing while not at the newest entry drops everything after the cursor.
/// The oldest entry is evicted once the bound is exceeded.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<Snapshot<T>>,
    current: Option<usize>,
    max_depth: usize,
}

impl<T> History<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            current: None,
            max_depth: max_depth.max(1),
        }
    }

    pub fn push(&mut self, snapshot: Snapshot<T>) {
        if let Some(current) = self.current {
            self.entries.truncate(current + 1);
        }
        self.entries.push_back(snapshot);
        // Enforce depth limit by dropping oldest entry
        if self.entries.len() > self.max_depth {
            self.entries.pop_front();
        }
        self.current = Some(self.entries.len() - 1);
    }

    /// Step the cursor back and return the entry it lands on.
    pub fn undo(&mut self) -> Option<&Snapshot<T>> {
        let current = self.current.filter(|&c| c > 0)?;
        self.current = Some(current - 1);
        self.entries.get(current - 1)
    }

    pub fn redo(&mut self) -> Option<&Snapshot<T>> {
        let next = self.current.map(|c| c + 1).filter(|&n| n < self.entries.len())?;
        self.current = Some(next);
        self.entries.get(next)
    }

    pub fn can_undo(&self) -> bool {
        self.current.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.current.is_some_and(|c| c + 1 < self.entries.len())
    }

    pub fn current(&self) -> Option<&Snapshot<T>> {
        self.current.and_then(|c| self.entries.get(c))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn entries(&self) -> impl Iterator<Item = &Snapshot<T>> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(n: i32) -> Snapshot<i32> {
        Snapshot::capture(&n, None)
    }

    fn states(history: &History<i32>) -> Vec<i32> {
        history.entries().map(|s| *s.state()).collect()
    }

    #[test]
    fn undo_redo_walks_the_cursor() {
        let mut history = History::new(10);
        history.push(snap(1));
        history.push(snap(2));
        history.push(snap(3));

        assert_eq!(history.undo().map(|s| *s.state()), Some(2));
        assert_eq!(history.undo().map(|s| *s.state()), Some(1));
        assert!(history.undo().is_none());
        assert!(!history.can_undo());

        assert_eq!(history.redo().map(|s| *s.state()), Some(2));
        assert_eq!(history.redo().map(|s| *s.state()), Some(3));
        assert!(history.redo().is_none());
    }

    #[test]
    fn push_after_undo_discards_redo_tail() {
        let mut history = History::new(10);
        history.push(snap(1));
        history.push(snap(2));
        history.push(snap(3));
        history.undo();
        history.undo();

        history.push(snap(9));
        assert_eq!(states(&history), vec![1, 9]);
        assert!(!history.can_redo());
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let mut history = History::new(3);
        for n in 1..=5 {
            history.push(snap(n));
        }
        assert_eq!(states(&history), vec![3, 4, 5]);
        assert_eq!(history.current_index(), Some(2));
    }

    #[test]
    fn zero_depth_is_treated_as_one() {
        let mut history = History::new(0);
        history.push(snap(1));
        history.push(snap(2));
        assert_eq!(states(&history), vec![2]);
        assert!(!history.can_undo());
    }

    #[test]
    fn empty_history_has_nothing_to_do() {
        let mut history: History<i32> = History::new(5);
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert!(history.current().is_none());
    }
}
