//! Multi-document coordination.
//!
//! `DocumentManager` owns the list of open documents and the never-null
//! "current document" pointer. Its hardest job is the current-document
//! transition: every listener must observe a contiguous chain of selections.
//! If a listener later sees "now B", it must previously have seen
//! "was A, now B", never a jump straight to an unrelated document. A lock
//! flag plus a single pending slot (last write wins) defers switches
//! requested during a notification pass; deferred switches replay one at a
//! time in an explicit loop once the pass completes.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::document::Document;
use crate::shape::Shape;
use crate::storage::{self, StorageError, StorageResult};
use crate::subscription::{ListenerId, Listeners};

type DocumentListener = dyn Fn(&Document);
type DocumentSelectedListener = dyn Fn(&Document, &Document);
type ClosePolicy = dyn Fn(&Document) -> bool;

struct ManagerState {
    documents: Vec<Document>,
    current: Document,
    selection_listeners: Listeners<DocumentSelectedListener>,
    created_listeners: Listeners<DocumentListener>,
    closed_listeners: Listeners<DocumentListener>,
    saved_listeners: Listeners<DocumentListener>,
    // A current-document pass is iterating; switches requested now are
    // remembered in pending_selection and replayed afterwards.
    selection_locked: bool,
    pending_selection: Option<Document>,
    close_policy: Option<Rc<ClosePolicy>>,
}

/// The registry of open documents. Cheap-clone handle; construct one per
/// editing context and pass it to every collaborator.
pub struct DocumentManager {
    inner: Rc<RefCell<ManagerState>>,
}

impl Clone for DocumentManager {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl DocumentManager {
    /// Create a manager with one blank untitled document open and current.
    pub fn new() -> Self {
        let initial = Document::new();
        Self {
            inner: Rc::new(RefCell::new(ManagerState {
                documents: vec![initial.clone()],
                current: initial,
                selection_listeners: Listeners::new(),
                created_listeners: Listeners::new(),
                closed_listeners: Listeners::new(),
                saved_listeners: Listeners::new(),
                selection_locked: false,
                pending_selection: None,
                close_policy: None,
            })),
        }
    }

    /// The current document. Never null: closing the last document installs
    /// a fresh blank one first.
    pub fn current_document(&self) -> Document {
        self.inner.borrow().current.clone()
    }

    /// Snapshot of the open documents, in open order.
    pub fn documents(&self) -> Vec<Document> {
        self.inner.borrow().documents.clone()
    }

    pub fn document_count(&self) -> usize {
        self.inner.borrow().documents.len()
    }

    /// Install the predicate consulted before any document closes. Returning
    /// false declines the close; this is where "save changes?" prompts live.
    pub fn set_close_policy(&self, policy: impl Fn(&Document) -> bool + 'static) {
        self.inner.borrow_mut().close_policy = Some(Rc::new(policy));
    }

    /// Make `document` current and notify selection listeners with the
    /// (old, new) pair.
    ///
    /// No-op when already current. When called from inside a selection pass,
    /// the request is deferred: it becomes the next transition once the pass
    /// completes, so listeners always see contiguous (old, new) chains. A
    /// later deferred request supersedes an earlier one.
    pub fn set_current(&self, document: &Document) {
        {
            let mut state = self.inner.borrow_mut();
            assert!(
                state.documents.contains(document),
                "document is not open in this manager"
            );
            if state.current == *document {
                return;
            }
            if state.selection_locked {
                state.pending_selection = Some(document.clone());
                return;
            }
        }

        let mut next = document.clone();
        loop {
            let (old, listeners) = {
                let mut state = self.inner.borrow_mut();
                state.selection_locked = true;
                state.pending_selection = None;
                let old = std::mem::replace(&mut state.current, next.clone());
                (old, state.selection_listeners.snapshot())
            };
            log::debug!(
                "selecting document {:?} (was {:?})",
                next.file_name(),
                old.file_name()
            );
            for listener in &listeners {
                listener(&old, &next);
            }

            let pending = {
                let mut state = self.inner.borrow_mut();
                state.selection_locked = false;
                state.pending_selection.take()
            };
            match pending {
                Some(replay) if replay != next => next = replay,
                _ => break,
            }
        }
    }

    /// Create, register, and select a new blank document with a unique
    /// untitled name (`Untitled`, `Untitled1`, `Untitled2`, ...).
    pub fn new_document(&self) -> Document {
        let document = Document::new();
        let created_listeners = {
            let mut state = self.inner.borrow_mut();
            document.set_file_name(unique_untitled_name(&state.documents));
            if state.documents.is_empty() {
                // Creation listeners assume a current document always exists.
                state.current = document.clone();
            }
            state.documents.push(document.clone());
            state.created_listeners.snapshot()
        };
        log::debug!("created document {:?}", document.file_name());
        for listener in created_listeners {
            listener(&document);
        }
        self.set_current(&document);
        document
    }

    /// Open the document stored at `path`. If a document with the same file
    /// is already open, it is selected instead and `Ok(None)` is returned.
    /// A failed load leaves the manager untouched.
    pub fn open_document(&self, path: &Path) -> Result<Option<Document>, StorageError> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let existing = {
            let state = self.inner.borrow();
            state
                .documents
                .iter()
                .find(|d| {
                    d.file_path()
                        .is_some_and(|p| fs::canonicalize(&p).unwrap_or(p) == canonical)
                })
                .cloned()
        };
        if let Some(existing) = existing {
            log::debug!("{} is already open, selecting it", path.display());
            self.set_current(&existing);
            return Ok(None);
        }

        let document = storage::load_document(path)?;
        self.inner.borrow_mut().documents.push(document.clone());
        self.set_current(&document);
        Ok(Some(document))
    }

    /// Save a previously saved document to its own path.
    pub fn save_document(&self, document: &Document) -> StorageResult<()> {
        let path = document.file_path().expect("document has no file path");
        self.save_document_as(document, &path)
    }

    /// Save a document to `path`, adopt the path, clear the unsaved-changes
    /// flag, and fire the saved broadcast.
    pub fn save_document_as(&self, document: &Document, path: &Path) -> StorageResult<()> {
        storage::save_document(document, path)?;
        document.set_file_path(path);
        document.mark_saved();

        let listeners = self.inner.borrow().saved_listeners.snapshot();
        for listener in listeners {
            listener(document);
        }
        Ok(())
    }

    /// Close a document. Returns false (and closes nothing) when the close
    /// policy declines, or when the document is current while a selection
    /// pass is running. Closing the last remaining document first creates a
    /// fresh blank one, so the open list is never empty.
    pub fn close_document(&self, document: &Document) -> bool {
        assert!(
            self.inner.borrow().documents.contains(document),
            "document is not open in this manager"
        );

        let policy = self.inner.borrow().close_policy.clone();
        if let Some(policy) = policy {
            if !policy(document) {
                log::debug!("close of {:?} declined by policy", document.file_name());
                return false;
            }
        }

        {
            let state = self.inner.borrow();
            if state.selection_locked && state.current == *document {
                // Removing the current document mid-pass would break the
                // contiguous-selection guarantee.
                return false;
            }
        }

        if self.inner.borrow().documents.len() == 1 {
            self.new_document();
        } else if self.inner.borrow().current == *document {
            let neighbor = {
                let state = self.inner.borrow();
                let index = state
                    .documents
                    .iter()
                    .position(|d| d == document)
                    .expect("checked above");
                if index + 1 < state.documents.len() {
                    state.documents[index + 1].clone()
                } else {
                    state.documents[index - 1].clone()
                }
            };
            self.set_current(&neighbor);
        }

        if self.inner.borrow().current == *document {
            // A selection listener re-selected the closing document.
            return false;
        }

        let closed_listeners = {
            let mut state = self.inner.borrow_mut();
            state.documents.retain(|d| d != document);
            if state.pending_selection.as_ref() == Some(document) {
                state.pending_selection = None;
            }
            state.closed_listeners.snapshot()
        };
        log::debug!("closed document {:?}", document.file_name());
        for listener in closed_listeners {
            listener(document);
        }
        true
    }

    /// Close every open document, consulting the close policy for each.
    /// Aborts on the first refusal (already-closed documents stay closed)
    /// and returns false. On full success exactly one fresh blank document
    /// remains selected.
    pub fn close_all_documents(&self) -> bool {
        let documents = self.inner.borrow().documents.clone();
        for document in &documents {
            if !self.close_document(document) {
                return false;
            }
        }
        true
    }

    // --- listeners ---

    /// Subscribe to current-document transitions. The callback receives the
    /// (old, new) pair.
    pub fn on_document_selected(
        &self,
        listener: impl Fn(&Document, &Document) + 'static,
    ) -> ListenerId {
        self.inner
            .borrow_mut()
            .selection_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_document_selected(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().selection_listeners.unsubscribe(id)
    }

    pub fn on_document_created(&self, listener: impl Fn(&Document) + 'static) -> ListenerId {
        self.inner
            .borrow_mut()
            .created_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_document_created(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().created_listeners.unsubscribe(id)
    }

    pub fn on_document_closed(&self, listener: impl Fn(&Document) + 'static) -> ListenerId {
        self.inner
            .borrow_mut()
            .closed_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_document_closed(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().closed_listeners.unsubscribe(id)
    }

    pub fn on_document_saved(&self, listener: impl Fn(&Document) + 'static) -> ListenerId {
        self.inner
            .borrow_mut()
            .saved_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_document_saved(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().saved_listeners.unsubscribe(id)
    }
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

fn unique_untitled_name(documents: &[Document]) -> String {
    let names: Vec<String> = documents.iter().map(|d| d.file_name()).collect();
    let mut candidate = "Untitled".to_string();
    let mut increment = 0u32;
    while names.contains(&candidate) {
        increment += 1;
        candidate = format!("Untitled{increment}");
    }
    candidate
}

struct Attachment {
    document: Document,
    listener: ListenerId,
}

/// A selection subscription that always tracks the *current* document.
///
/// Subscribe once; the binding detaches from the outgoing document and
/// reattaches to the incoming one on every current-document transition,
/// invoking the callback with the new document's selection so observers can
/// refresh. Dropping the binding detaches from both the manager and the
/// currently attached document.
pub struct SelectionBinding {
    manager: DocumentManager,
    manager_listener: ListenerId,
    attached: Rc<RefCell<Attachment>>,
}

impl SelectionBinding {
    pub fn new(
        manager: &DocumentManager,
        callback: impl Fn(Option<&Shape>) + 'static,
    ) -> Self {
        let callback: Rc<dyn Fn(Option<&Shape>)> = Rc::new(callback);

        let document = manager.current_document();
        let listener = {
            let callback = Rc::clone(&callback);
            document.on_selection_changed(move |selected| callback(selected))
        };
        let attached = Rc::new(RefCell::new(Attachment { document, listener }));

        let manager_listener = manager.on_document_selected({
            let attached = Rc::clone(&attached);
            let callback = Rc::clone(&callback);
            move |_old, new| {
                {
                    let mut slot = attached.borrow_mut();
                    slot.document.unsubscribe_selection(slot.listener);
                    let rebind = Rc::clone(&callback);
                    slot.listener = new.on_selection_changed(move |selected| rebind(selected));
                    slot.document = new.clone();
                }
                callback(new.selected_shape().as_ref());
            }
        });

        Self {
            manager: manager.clone(),
            manager_listener,
            attached,
        }
    }
}

impl Drop for SelectionBinding {
    fn drop(&mut self) {
        self.manager
            .unsubscribe_document_selected(self.manager_listener);
        let slot = self.attached.borrow();
        slot.document.unsubscribe_selection(slot.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeId;
    use std::cell::Cell;
    use tempfile::tempdir;

    #[test]
    fn test_starts_with_one_untitled_document() {
        let manager = DocumentManager::new();
        assert_eq!(manager.document_count(), 1);
        assert_eq!(manager.current_document().file_name(), "Untitled");
    }

    #[test]
    fn test_unique_untitled_names() {
        let manager = DocumentManager::new();
        // "Untitled" exists; the next document probes past it.
        assert_eq!(manager.new_document().file_name(), "Untitled1");
        assert_eq!(manager.new_document().file_name(), "Untitled2");
        assert_eq!(manager.new_document().file_name(), "Untitled3");
        assert_eq!(manager.new_document().file_name(), "Untitled4");
    }

    #[test]
    fn test_new_document_becomes_current() {
        let manager = DocumentManager::new();
        let doc = manager.new_document();
        assert_eq!(manager.current_document(), doc);
    }

    #[test]
    fn test_set_current_notifies_old_and_new() {
        let manager = DocumentManager::new();
        let a = manager.current_document();
        let b = manager.new_document();
        manager.set_current(&a);

        let pairs: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&pairs);
        manager.on_document_selected(move |old, new| {
            log.borrow_mut().push((old.file_name(), new.file_name()));
        });

        manager.set_current(&b);
        manager.set_current(&b); // no-op
        assert_eq!(
            *pairs.borrow(),
            vec![("Untitled".to_string(), "Untitled1".to_string())]
        );
    }

    #[test]
    fn test_reentrant_switch_preserves_contiguity() {
        let manager = DocumentManager::new();
        let a = manager.current_document();
        let b = manager.new_document();
        let c = manager.new_document();
        manager.set_current(&a);

        let pairs: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&pairs);
        let chain = manager.clone();
        let target = c.clone();
        let fired = Rc::new(Cell::new(false));
        manager.on_document_selected(move |old, new| {
            log.borrow_mut().push((old.file_name(), new.file_name()));
            if new == &b && !fired.get() {
                fired.set(true);
                // Deferred until the in-progress pass completes.
                chain.set_current(&target);
            }
        });

        manager.set_current(&manager.documents()[1].clone());
        assert_eq!(
            *pairs.borrow(),
            vec![
                ("Untitled".to_string(), "Untitled1".to_string()),
                ("Untitled1".to_string(), "Untitled2".to_string()),
            ]
        );
        assert_eq!(manager.current_document(), c);
    }

    #[test]
    fn test_deferred_switch_last_write_wins() {
        let manager = DocumentManager::new();
        let b = manager.new_document();
        let c = manager.new_document();
        let d = manager.new_document();
        manager.set_current(&manager.documents()[0].clone());

        let pairs: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&pairs);
        let chain = manager.clone();
        let fired = Rc::new(Cell::new(false));
        let (first, second) = (c.clone(), d.clone());
        manager.on_document_selected(move |_, new| {
            log.borrow_mut().push(new.file_name());
            if !fired.get() {
                fired.set(true);
                chain.set_current(&first);
                chain.set_current(&second); // supersedes the previous request
            }
        });

        manager.set_current(&b);
        assert_eq!(
            *pairs.borrow(),
            vec!["Untitled1".to_string(), "Untitled3".to_string()]
        );
        assert_eq!(manager.current_document(), d);
    }

    #[test]
    fn test_close_policy_can_decline() {
        let manager = DocumentManager::new();
        let doc = manager.new_document();
        manager.set_close_policy(|_| false);

        assert!(!manager.close_document(&doc));
        assert_eq!(manager.document_count(), 2);
    }

    #[test]
    fn test_close_last_document_installs_fresh_one() {
        let manager = DocumentManager::new();
        let original = manager.current_document();

        assert!(manager.close_document(&original));
        assert_eq!(manager.document_count(), 1);
        let fresh = manager.current_document();
        assert_ne!(fresh, original);
        assert_eq!(fresh.file_name(), "Untitled1");
        assert!(!fresh.has_unsaved_changes());
    }

    #[test]
    fn test_close_current_selects_neighbor() {
        let manager = DocumentManager::new();
        let a = manager.current_document();
        let b = manager.new_document();
        manager.set_current(&a);

        assert!(manager.close_document(&a));
        assert_eq!(manager.current_document(), b);
        assert_eq!(manager.document_count(), 1);
    }

    #[test]
    fn test_close_refused_while_current_and_pass_active() {
        let manager = DocumentManager::new();
        let a = manager.current_document();
        let b = manager.new_document();
        manager.set_current(&a);

        let refused = Rc::new(Cell::new(None));
        let chain = manager.clone();
        let result = Rc::clone(&refused);
        let target = b.clone();
        manager.on_document_selected(move |_, new| {
            if new == &target && result.get().is_none() {
                result.set(Some(chain.close_document(&target)));
            }
        });

        manager.set_current(&b);
        assert_eq!(refused.get(), Some(false));
        assert_eq!(manager.document_count(), 2);
    }

    #[test]
    fn test_close_all_ends_with_one_fresh_document() {
        let manager = DocumentManager::new();
        let originals = [
            manager.current_document(),
            manager.new_document(),
            manager.new_document(),
        ];

        let closed = Rc::new(Cell::new(0));
        let count = Rc::clone(&closed);
        manager.on_document_closed(move |_| count.set(count.get() + 1));

        assert!(manager.close_all_documents());
        assert_eq!(closed.get(), 3);
        assert_eq!(manager.document_count(), 1);
        let fresh = manager.current_document();
        assert!(originals.iter().all(|d| *d != fresh));
    }

    #[test]
    fn test_close_all_aborts_on_first_refusal() {
        let manager = DocumentManager::new();
        let a = manager.current_document();
        let b = manager.new_document();
        let c = manager.new_document();

        let blocked = b.clone();
        manager.set_close_policy(move |doc| *doc != blocked);

        assert!(!manager.close_all_documents());
        let remaining = manager.documents();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&a));
        assert!(remaining.contains(&b));
        assert!(remaining.contains(&c));
    }

    #[test]
    fn test_save_document_fires_broadcast_and_clears_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boxes.json");

        let manager = DocumentManager::new();
        let doc = manager.current_document();
        doc.add_shape(Shape::new(0.1, 0.1, 0.2, 0.2));
        assert!(doc.has_unsaved_changes());

        let saved = Rc::new(Cell::new(0));
        let count = Rc::clone(&saved);
        manager.on_document_saved(move |_| count.set(count.get() + 1));

        manager.save_document_as(&doc, &path).unwrap();
        assert_eq!(saved.get(), 1);
        assert!(!doc.has_unsaved_changes());
        assert_eq!(doc.file_name(), "boxes.json");
        assert_eq!(doc.file_path(), Some(path));
    }

    #[test]
    fn test_open_selects_already_open_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let manager = DocumentManager::new();
        let doc = manager.current_document();
        doc.add_shape(Shape::new(0.1, 0.1, 0.2, 0.2));
        manager.save_document_as(&doc, &path).unwrap();
        manager.new_document();

        let reopened = manager.open_document(&path).unwrap();
        assert!(reopened.is_none());
        assert_eq!(manager.current_document(), doc);
        assert_eq!(manager.document_count(), 2);
    }

    #[test]
    fn test_open_loads_and_selects_new_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.json");

        let writer = DocumentManager::new();
        let source = writer.current_document();
        source.add_shape(Shape::new(0.1, 0.2, 0.3, 0.4));
        writer.save_document_as(&source, &path).unwrap();

        let manager = DocumentManager::new();
        let opened = manager.open_document(&path).unwrap().unwrap();
        assert_eq!(opened.shape_count(), 1);
        assert_eq!(manager.current_document(), opened);
        assert_eq!(manager.document_count(), 2);
    }

    #[test]
    fn test_failed_open_leaves_manager_untouched() {
        let dir = tempdir().unwrap();
        let manager = DocumentManager::new();
        let current = manager.current_document();

        let result = manager.open_document(&dir.path().join("missing.json"));
        assert!(result.is_err());
        assert_eq!(manager.document_count(), 1);
        assert_eq!(manager.current_document(), current);
    }

    #[test]
    fn test_selection_binding_tracks_current_document() {
        let manager = DocumentManager::new();
        let a = manager.current_document();

        let seen: Rc<RefCell<Vec<Option<ShapeId>>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let binding =
            SelectionBinding::new(&manager, move |s| log.borrow_mut().push(s.map(Shape::id)));

        let first = Shape::new(0.1, 0.1, 0.2, 0.2);
        let first_id = first.id();
        a.add_shape(first);

        // Switching documents rebinds and reports the new selection.
        let b = manager.new_document();
        let second = Shape::new(0.3, 0.3, 0.2, 0.2);
        let second_id = second.id();
        b.add_shape(second);

        // The outgoing document is no longer observed.
        a.set_selection(None);

        assert_eq!(
            *seen.borrow(),
            vec![Some(first_id), None, Some(second_id)]
        );

        drop(binding);
        b.set_selection(None);
        assert_eq!(seen.borrow().len(), 3);
    }
}
