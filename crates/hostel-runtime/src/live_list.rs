//! Locally mirrored, most-recent-first row lists.

use hostel_core::models::Identified;

use crate::relay::ChangeEvent;

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// An ordered copy of a remote table kept current by change events.
///
/// New rows go to the front. A bounded list drops from the back once it
/// holds `capacity` rows. An optional filter decides membership: rows that
/// fail it are never inserted, and an update that makes a row fail it
/// removes the row.
pub struct LiveList<T> {
    items: Vec<T>,
    capacity: Option<usize>,
    filter: Option<Filter<T>>,
}

impl<T: Identified> LiveList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            capacity: None,
            filter: None,
        }
    }

    /// A list holding at most `capacity` rows.
    pub fn bounded(items: Vec<T>, capacity: usize) -> Self {
        let mut list = Self::new(items);
        list.capacity = Some(capacity);
        list.trim();
        list
    }

    /// Restrict membership to rows matching `filter`, dropping current
    /// rows that do not.
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.items.retain(|row| filter(row));
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|row| row.id() == id)
    }

    /// Apply one change. Returns `true` when the list changed.
    pub fn apply(&mut self, event: ChangeEvent<T>) -> bool {
        match event {
            ChangeEvent::Insert(row) => self.insert(row),
            ChangeEvent::Update(row) => self.update(row),
            ChangeEvent::Delete { id } => self.remove(&id),
        }
    }

    /// Prepend `row`. A row already present under the same id moves to the
    /// front with its new content.
    pub fn insert(&mut self, row: T) -> bool {
        if !self.accepts(&row) {
            return false;
        }
        self.items.retain(|existing| existing.id() != row.id());
        self.items.insert(0, row);
        self.trim();
        true
    }

    /// Replace the row with the same id in place. Unknown ids are ignored.
    pub fn update(&mut self, row: T) -> bool {
        let Some(pos) = self.position(row.id()) else {
            return false;
        };
        if self.accepts(&row) {
            self.items[pos] = row;
        } else {
            self.items.remove(pos);
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    fn accepts(&self, row: &T) -> bool {
        self.filter.as_ref().map_or(true, |f| f(row))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|row| row.id() == id)
    }

    fn trim(&mut self) {
        if let Some(cap) = self.capacity {
            self.items.truncate(cap);
        }
    }
}

impl<T: Clone + Identified> LiveList<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        open: bool,
    }

    impl Identified for Row {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn row(id: &str) -> Row {
        Row {
            id: id.to_string(),
            open: true,
        }
    }

    fn ids<T: Identified>(list: &LiveList<T>) -> Vec<&str> {
        list.items().iter().map(|r| r.id()).collect()
    }

    // ── insert ──

    #[test]
    fn test_insert_prepends() {
        let mut list = LiveList::new(vec![row("a")]);
        assert!(list.insert(row("b")));
        assert_eq!(ids(&list), ["b", "a"]);
    }

    #[test]
    fn test_bounded_list_keeps_most_recent() {
        let mut list = LiveList::bounded(Vec::new(), 3);
        for id in ["1", "2", "3", "4"] {
            list.insert(row(id));
        }
        assert_eq!(list.len(), 3);
        assert_eq!(ids(&list), ["4", "3", "2"]);
    }

    #[test]
    fn test_bounded_trims_initial_rows() {
        let list = LiveList::bounded(vec![row("a"), row("b"), row("c")], 2);
        assert_eq!(ids(&list), ["a", "b"]);
    }

    #[test]
    fn test_duplicate_insert_moves_row_to_front() {
        let mut list = LiveList::new(vec![row("a"), row("b")]);
        list.insert(row("b"));
        assert_eq!(ids(&list), ["b", "a"]);
    }

    // ── update ──

    #[test]
    fn test_update_replaces_in_place() {
        let mut list = LiveList::new(vec![row("a"), row("b")]);
        let changed = Row {
            id: "b".to_string(),
            open: false,
        };
        assert!(list.update(changed.clone()));
        assert_eq!(list.get("b"), Some(&changed));
        assert_eq!(ids(&list), ["a", "b"]);
    }

    #[test]
    fn test_update_of_unknown_id_is_noop() {
        let mut list = LiveList::new(vec![row("a")]);
        assert!(!list.update(row("zzz")));
        assert_eq!(ids(&list), ["a"]);
    }

    // ── delete ──

    #[test]
    fn test_delete_removes_by_id() {
        let mut list = LiveList::new(vec![row("a"), row("b")]);
        assert!(list.apply(ChangeEvent::Delete { id: "a".to_string() }));
        assert!(!list.apply(ChangeEvent::Delete { id: "a".to_string() }));
        assert_eq!(ids(&list), ["b"]);
    }

    // ── filter ──

    #[test]
    fn test_filter_rejects_inserts_and_drops_updated_rows() {
        let closed = |id: &str| Row {
            id: id.to_string(),
            open: false,
        };
        let mut list =
            LiveList::new(vec![row("a"), closed("b")]).with_filter(|r: &Row| r.open);
        assert_eq!(ids(&list), ["a"]);

        assert!(!list.insert(closed("c")));
        assert!(list.update(closed("a")));
        assert!(list.is_empty());
    }
}
