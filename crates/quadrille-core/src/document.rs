//! A single open document: shapes, selection, undo history, and the
//! transient resize preview.
//!
//! `Document` is a cheap-clone handle over shared state. All listener
//! dispatch happens with the state unborrowed, so callbacks may synchronously
//! call back into the same document. Selection notification is guarded by an
//! epoch counter: a listener that changes the selection mid-pass supersedes
//! the pass, and the remaining listeners only ever see the newest value.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use uuid::Uuid;

use crate::shape::{Bounds, Shape, ShapeId};
use crate::subscription::{ListenerId, Listeners};
use crate::undo::{DocumentView, UndoAction, UndoDirection, UndoStack};

/// Unique identifier for an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying the collaborator driving a resize preview session.
///
/// Only the driver that started a preview may keep updating it; any driver
/// may cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverId(pub Uuid);

impl DriverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DriverId {
    fn default() -> Self {
        Self::new()
    }
}

/// The transient, uncommitted coordinates shown during an interactive drag.
///
/// Width and height may be negative while dragging up or left; commit
/// normalizes before anything reaches the undo history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizePreview {
    pub driver: DriverId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Resize preview notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeEvent {
    /// A preview session began. Fired once per activation.
    Started { driver: DriverId },
    /// The preview coordinates changed. Fired on every update.
    Changed {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// The preview was abandoned, by its driver or any other.
    Cancelled { driver: DriverId },
}

type SelectionListener = dyn Fn(Option<&Shape>);
type ResizeListener = dyn Fn(&ResizeEvent);
type UndoListener = dyn Fn(&UndoAction, UndoDirection);

struct DocumentState {
    id: DocumentId,
    shapes: Vec<Shape>,
    selection: Option<usize>,
    undo: UndoStack,
    file_path: Option<PathBuf>,
    file_name: String,
    unsaved_changes: bool,
    resize: Option<ResizePreview>,
    selection_listeners: Listeners<SelectionListener>,
    resize_listeners: Listeners<ResizeListener>,
    undo_listeners: Listeners<UndoListener>,
    selection_epoch: u64,
}

impl DocumentState {
    fn index_of(&self, id: ShapeId) -> Option<usize> {
        self.shapes.iter().position(|s| s.id() == id)
    }

    fn selected_shape(&self) -> Option<&Shape> {
        self.selection.map(|index| &self.shapes[index])
    }
}

/// An open document. Cloning the handle shares the underlying state;
/// equality is handle identity, never field values.
pub struct Document {
    inner: Rc<RefCell<DocumentState>>,
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Document {}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Document")
            .field("id", &state.id)
            .field("file_name", &state.file_name)
            .field("shapes", &state.shapes.len())
            .finish()
    }
}

impl Document {
    /// Create a new, untitled, empty document.
    pub fn new() -> Self {
        Self::from_shapes(Vec::new())
    }

    /// Rebuild a document from a persisted shape list. Selection, undo
    /// history, and the resize preview always start empty.
    pub fn from_shapes(shapes: Vec<Shape>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DocumentState {
                id: DocumentId::new(),
                shapes,
                selection: None,
                undo: UndoStack::new(),
                file_path: None,
                file_name: "Untitled".to_string(),
                unsaved_changes: false,
                resize: None,
                selection_listeners: Listeners::new(),
                resize_listeners: Listeners::new(),
                undo_listeners: Listeners::new(),
                selection_epoch: 0,
            })),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.inner.borrow().id
    }

    // --- file metadata ---

    pub fn file_name(&self) -> String {
        self.inner.borrow().file_name.clone()
    }

    /// Rename a document that has never been saved. Documents with a file
    /// path take their name from the path.
    pub fn set_file_name(&self, name: impl Into<String>) {
        let mut state = self.inner.borrow_mut();
        assert!(
            state.file_path.is_none(),
            "named documents take their name from the file path"
        );
        state.file_name = name.into();
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.inner.borrow().file_path.clone()
    }

    pub fn set_file_path(&self, path: &Path) {
        let mut state = self.inner.borrow_mut();
        state.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        state.file_path = Some(path.to_path_buf());
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.borrow().unsaved_changes
    }

    /// Call when the document has been written to disk.
    pub fn mark_saved(&self) {
        self.inner.borrow_mut().unsaved_changes = false;
    }

    // --- shape access ---

    /// Snapshot of the shape list, in insertion (= z) order.
    pub fn shapes(&self) -> Vec<Shape> {
        self.inner.borrow().shapes.clone()
    }

    pub fn shape_count(&self) -> usize {
        self.inner.borrow().shapes.len()
    }

    pub fn shape(&self, id: ShapeId) -> Option<Shape> {
        let state = self.inner.borrow();
        state.index_of(id).map(|index| state.shapes[index].clone())
    }

    pub fn selected_shape(&self) -> Option<Shape> {
        self.inner.borrow().selected_shape().cloned()
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.inner.borrow().selection
    }

    // --- undo-recorded mutations ---

    /// Add a shape, recording an undoable create. The new shape becomes the
    /// selection.
    pub fn add_shape(&self, shape: Shape) {
        assert!(
            self.inner.borrow().index_of(shape.id()).is_none(),
            "shape already in document"
        );
        self.execute(UndoAction::Create {
            shape,
            creating: true,
        });
        self.notify_selection();
    }

    /// Remove a shape, recording an undoable delete.
    pub fn remove_shape(&self, id: ShapeId) {
        let action = {
            let state = self.inner.borrow();
            let index = state.index_of(id).expect("shape not in document");
            UndoAction::Create {
                shape: state.shapes[index].clone(),
                creating: false,
            }
        };
        let selection_changed = self.execute(action);
        if selection_changed {
            self.notify_selection();
        }
    }

    /// Rename a shape, recording an undoable rename.
    pub fn rename_shape(&self, id: ShapeId, new_name: impl Into<String>) {
        let action = {
            let state = self.inner.borrow();
            let index = state.index_of(id).expect("shape not in document");
            UndoAction::Rename {
                shape: id,
                old_name: state.shapes[index].name.clone(),
                new_name: new_name.into(),
            }
        };
        self.execute(action);
    }

    /// Commit new bounds for a shape, recording an undoable resize. Callers
    /// are expected to pass normalized, rounded bounds; committed history
    /// never contains negative extents.
    pub fn resize_shape(&self, id: ShapeId, new: Bounds) {
        let action = {
            let state = self.inner.borrow();
            let index = state.index_of(id).expect("shape not in document");
            UndoAction::Resize {
                shape: id,
                old: state.shapes[index].bounds(),
                new,
            }
        };
        self.execute(action);
    }

    // --- selection ---

    /// Select a shape by id, or clear the selection with `None`.
    pub fn set_selection(&self, id: Option<ShapeId>) {
        {
            let mut state = self.inner.borrow_mut();
            let index = id.map(|id| state.index_of(id).expect("shape not in document"));
            state.selection = index;
        }
        self.notify_selection();
    }

    /// Select the shape at a z-order index.
    pub fn set_selection_index(&self, index: usize) {
        {
            let mut state = self.inner.borrow_mut();
            assert!(index < state.shapes.len(), "selection index out of range");
            state.selection = Some(index);
        }
        self.notify_selection();
    }

    /// Move a shape to a new z-order index. The selection keeps tracking the
    /// same shape across the reorder. Not undo-recorded.
    pub fn set_position(&self, id: ShapeId, new_index: usize) {
        let moved = {
            let mut state = self.inner.borrow_mut();
            assert!(new_index < state.shapes.len(), "index out of range");
            let old_index = state.index_of(id).expect("shape not in document");
            if old_index == new_index {
                false
            } else {
                let selected_id = state.selected_shape().map(Shape::id);
                let shape = state.shapes.remove(old_index);
                state.shapes.insert(new_index, shape);
                state.selection = selected_id
                    .map(|sid| state.index_of(sid).expect("selected shape still present"));
                true
            }
        };
        if moved {
            self.notify_selection();
        }
    }

    // --- resize preview ---

    /// Begin or update the resize preview. The first call of a session
    /// requires a selection and fires `Started` once; every call fires
    /// `Changed`. Only the driver that started the session may update it.
    pub fn set_temp_resize(&self, driver: DriverId, x: f64, y: f64, width: f64, height: f64) {
        let (listeners, started) = {
            let mut state = self.inner.borrow_mut();
            let started = state.resize.is_none();
            if started {
                assert!(
                    state.selection.is_some(),
                    "resize preview requires a selection"
                );
                state.resize = Some(ResizePreview {
                    driver,
                    x,
                    y,
                    width,
                    height,
                });
            } else {
                let preview = state.resize.as_mut().expect("checked above");
                debug_assert_eq!(
                    preview.driver, driver,
                    "resize preview is driven by another source"
                );
                preview.x = x;
                preview.y = y;
                preview.width = width;
                preview.height = height;
            }
            (state.resize_listeners.snapshot(), started)
        };
        if started {
            for listener in &listeners {
                listener(&ResizeEvent::Started { driver });
            }
        }
        for listener in &listeners {
            listener(&ResizeEvent::Changed {
                x,
                y,
                width,
                height,
            });
        }
    }

    /// Abandon the resize preview. Any driver may cancel, and all overlay
    /// listeners are told who did; cancelling with no active preview still
    /// notifies, so field edits can clear a stale overlay unconditionally.
    pub fn cancel_temp_resize(&self, driver: DriverId) {
        let listeners = {
            let mut state = self.inner.borrow_mut();
            state.resize = None;
            state.resize_listeners.snapshot()
        };
        for listener in &listeners {
            listener(&ResizeEvent::Cancelled { driver });
        }
    }

    /// Turn the preview into a committed, undoable resize of the selected
    /// shape: normalize negative extents, round to 3 decimals, cancel the
    /// overlay, then record the action. Returns the committed bounds.
    pub fn commit_temp_resize(&self, driver: DriverId) -> Bounds {
        let preview = {
            let state = self.inner.borrow();
            let preview = state.resize.expect("no resize preview to commit");
            debug_assert_eq!(
                preview.driver, driver,
                "resize preview is driven by another source"
            );
            preview
        };
        let bounds = Bounds::new(preview.x, preview.y, preview.width, preview.height)
            .normalized()
            .rounded();

        self.cancel_temp_resize(driver);

        let selected = self
            .selected_shape()
            .expect("resize preview requires a selection");
        self.resize_shape(selected.id(), bounds);
        bounds
    }

    pub fn has_temp_resize(&self) -> bool {
        self.inner.borrow().resize.is_some()
    }

    pub fn resize_preview(&self) -> Option<ResizePreview> {
        self.inner.borrow().resize
    }

    // --- undo history ---

    pub fn can_undo(&self) -> bool {
        self.inner.borrow().undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.borrow().undo.can_redo()
    }

    /// Revert the most recent action. Panics when nothing can be undone;
    /// callers gate on [`Document::can_undo`].
    pub fn undo(&self) {
        let (action, selection_changed) = {
            let mut state = self.inner.borrow_mut();
            let state = &mut *state;
            let mut dirty = false;
            let mut view = DocumentView {
                shapes: &mut state.shapes,
                selection: &mut state.selection,
                selection_dirty: &mut dirty,
            };
            let action = state.undo.undo(&mut view);
            state.unsaved_changes = true;
            (action, dirty)
        };
        self.notify_undo(&action, UndoDirection::Revert);
        if selection_changed {
            self.notify_selection();
        }
    }

    /// Re-apply the most recently undone action. Panics when nothing can be
    /// redone.
    pub fn redo(&self) {
        let (action, selection_changed) = {
            let mut state = self.inner.borrow_mut();
            let state = &mut *state;
            let mut dirty = false;
            let mut view = DocumentView {
                shapes: &mut state.shapes,
                selection: &mut state.selection,
                selection_dirty: &mut dirty,
            };
            let action = state.undo.redo(&mut view);
            state.unsaved_changes = true;
            (action, dirty)
        };
        self.notify_undo(&action, UndoDirection::Apply);
        if selection_changed {
            self.notify_selection();
        }
    }

    /// Drop the whole undo history without reverting anything. Used when a
    /// document's content is replaced wholesale, never as revert-to-saved.
    pub fn clear_history(&self) {
        self.inner.borrow_mut().undo.clear();
    }

    // --- listeners ---

    /// Subscribe to selection changes. The callback receives the currently
    /// selected shape, or `None`.
    pub fn on_selection_changed(
        &self,
        listener: impl Fn(Option<&Shape>) + 'static,
    ) -> ListenerId {
        self.inner
            .borrow_mut()
            .selection_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_selection(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().selection_listeners.unsubscribe(id)
    }

    /// Subscribe to resize preview events.
    pub fn on_resize_preview(&self, listener: impl Fn(&ResizeEvent) + 'static) -> ListenerId {
        self.inner
            .borrow_mut()
            .resize_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_resize_preview(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().resize_listeners.unsubscribe(id)
    }

    /// Subscribe to undo history changes: fired after every push, undo, and
    /// redo with the affected action and direction.
    pub fn on_undo_applied(
        &self,
        listener: impl Fn(&UndoAction, UndoDirection) + 'static,
    ) -> ListenerId {
        self.inner
            .borrow_mut()
            .undo_listeners
            .subscribe(Rc::new(listener))
    }

    pub fn unsubscribe_undo_applied(&self, id: ListenerId) -> bool {
        self.inner.borrow_mut().undo_listeners.unsubscribe(id)
    }

    // --- internals ---

    /// Push an action, execute it, flag unsaved changes, and notify undo
    /// listeners. Returns whether the raw mutation changed the selection and
    /// a selection pass is still owed.
    fn execute(&self, action: UndoAction) -> bool {
        let (applied, selection_changed) = {
            let mut state = self.inner.borrow_mut();
            let state = &mut *state;
            let mut dirty = false;
            let mut view = DocumentView {
                shapes: &mut state.shapes,
                selection: &mut state.selection,
                selection_dirty: &mut dirty,
            };
            let applied = state.undo.push(action, &mut view);
            state.unsaved_changes = true;
            (applied, dirty)
        };
        self.notify_undo(&applied, UndoDirection::Apply);
        selection_changed
    }

    fn notify_undo(&self, action: &UndoAction, direction: UndoDirection) {
        let listeners = self.inner.borrow().undo_listeners.snapshot();
        for listener in listeners {
            listener(action, direction);
        }
    }

    fn notify_selection(&self) {
        let (listeners, selected, epoch) = {
            let mut state = self.inner.borrow_mut();
            // Starting a pass supersedes any pass currently iterating.
            state.selection_epoch += 1;
            let epoch = state.selection_epoch;
            let selected = state.selected_shape().cloned();
            (state.selection_listeners.snapshot(), selected, epoch)
        };
        for listener in listeners {
            if self.inner.borrow().selection_epoch != epoch {
                // A listener changed the selection; the newer pass has
                // already delivered the fresh value.
                break;
            }
            listener(selected.as_ref());
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
