//! Handle-based listener registries.
//!
//! Every observable piece of state hands out a [`ListenerId`] on subscribe and
//! takes it back on unsubscribe, so callers never rely on closure identity.

use std::rc::Rc;

/// Opaque handle identifying one subscription within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An ordered list of listeners with stable subscription handles.
///
/// Notification passes iterate over a snapshot, so listeners are free to
/// subscribe or unsubscribe (including themselves) while being notified.
pub(crate) struct Listeners<T: ?Sized> {
    entries: Vec<(ListenerId, Rc<T>)>,
    next_id: u64,
}

impl<T: ?Sized> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn subscribe(&mut self, listener: Rc<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Returns false if the handle was already removed or belongs elsewhere.
    pub(crate) fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Copy of the current listener list, in subscription order.
    pub(crate) fn snapshot(&self) -> Vec<Rc<T>> {
        self.entries.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut listeners: Listeners<dyn Fn()> = Listeners::new();
        let a = listeners.subscribe(Rc::new(|| {}));
        let b = listeners.subscribe(Rc::new(|| {}));
        assert_eq!(listeners.snapshot().len(), 2);

        assert!(listeners.unsubscribe(a));
        assert!(!listeners.unsubscribe(a));
        assert_eq!(listeners.snapshot().len(), 1);

        assert!(listeners.unsubscribe(b));
        assert!(listeners.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let count = Rc::new(Cell::new(0));
        let mut listeners: Listeners<dyn Fn()> = Listeners::new();
        let counter = Rc::clone(&count);
        listeners.subscribe(Rc::new(move || counter.set(counter.get() + 1)));

        let snapshot = listeners.snapshot();
        let counter = Rc::clone(&count);
        listeners.subscribe(Rc::new(move || counter.set(counter.get() + 10)));

        for l in &snapshot {
            l();
        }
        assert_eq!(count.get(), 1);
    }
}
