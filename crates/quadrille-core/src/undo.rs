//! Command-pattern undo history.
//!
//! Every document mutation is captured as an [`UndoAction`] holding a snapshot
//! of the prior state, so each action can be applied and reverted on its own.
//! Actions execute against a [`DocumentView`], a restricted proxy that only
//! performs raw shape-list edits and cannot record new actions, which is what
//! keeps an action's execution from recursing back into the history.

use crate::shape::{Bounds, Shape, ShapeId};

/// Whether an action was just applied (push/redo) or reverted (undo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoDirection {
    Apply,
    Revert,
}

/// A reversible document mutation.
///
/// Each variant snapshots the prior state at construction time rather than
/// referencing the previous action, so undo/redo of any one action is
/// independent and idempotent. Applying or reverting out of order trips the
/// pre-state assertions and panics; that is a programming error, not a
/// recoverable condition.
#[derive(Debug, Clone)]
pub enum UndoAction {
    /// Shape creation when `creating`, deletion otherwise. The stored shape
    /// carries the identity that re-insertion restores.
    Create { shape: Shape, creating: bool },
    /// Shape rename with both names captured.
    Rename {
        shape: ShapeId,
        old_name: String,
        new_name: String,
    },
    /// Committed (normalized, rounded) bounds change.
    Resize {
        shape: ShapeId,
        old: Bounds,
        new: Bounds,
    },
}

impl UndoAction {
    pub(crate) fn apply(&self, view: &mut DocumentView<'_>) {
        match self {
            UndoAction::Create {
                shape,
                creating: true,
            } => view.insert_shape(shape.clone()),
            UndoAction::Create {
                shape,
                creating: false,
            } => view.remove_shape(shape.id()),
            UndoAction::Rename {
                shape,
                old_name,
                new_name,
            } => {
                let target = view.shape_mut(*shape);
                assert_eq!(target.name, *old_name, "rename applied out of order");
                target.name = new_name.clone();
            }
            UndoAction::Resize { shape, old, new } => {
                let target = view.shape_mut(*shape);
                assert_eq!(target.bounds(), *old, "resize applied out of order");
                target.set_bounds(*new);
            }
        }
    }

    pub(crate) fn revert(&self, view: &mut DocumentView<'_>) {
        match self {
            UndoAction::Create {
                shape,
                creating: true,
            } => view.remove_shape(shape.id()),
            UndoAction::Create {
                shape,
                creating: false,
            } => view.insert_shape(shape.clone()),
            UndoAction::Rename {
                shape,
                old_name,
                new_name,
            } => {
                let target = view.shape_mut(*shape);
                assert_eq!(target.name, *new_name, "rename reverted out of order");
                target.name = old_name.clone();
            }
            UndoAction::Resize { shape, old, new } => {
                let target = view.shape_mut(*shape);
                assert_eq!(target.bounds(), *new, "resize reverted out of order");
                target.set_bounds(*old);
            }
        }
    }
}

/// Restricted mutation surface handed to actions.
///
/// Raw inserts select the inserted shape; raw removes clear the selection if
/// the removed shape was selected (flagging a deferred selection event) and
/// otherwise shift it so it keeps tracking the same shape.
pub(crate) struct DocumentView<'a> {
    pub(crate) shapes: &'a mut Vec<Shape>,
    pub(crate) selection: &'a mut Option<usize>,
    pub(crate) selection_dirty: &'a mut bool,
}

impl DocumentView<'_> {
    fn index_of(&self, id: ShapeId) -> Option<usize> {
        self.shapes.iter().position(|s| s.id() == id)
    }

    fn insert_shape(&mut self, shape: Shape) {
        debug_assert!(self.index_of(shape.id()).is_none());
        self.shapes.push(shape);
        *self.selection = Some(self.shapes.len() - 1);
    }

    fn remove_shape(&mut self, id: ShapeId) {
        let index = self.index_of(id).expect("shape not in document");
        match *self.selection {
            Some(selected) if selected == index => {
                *self.selection = None;
                *self.selection_dirty = true;
            }
            Some(selected) if selected > index => {
                // Keep the selection on the same shape as indices shift.
                *self.selection = Some(selected - 1);
            }
            _ => {}
        }
        self.shapes.remove(index);
    }

    fn shape_mut(&mut self, id: ShapeId) -> &mut Shape {
        self.shapes
            .iter_mut()
            .find(|s| s.id() == id)
            .expect("shape not in document")
    }
}

/// A linear, truncating history of [`UndoAction`]s with a cursor.
///
/// The cursor points at the most recently applied action; `None` means
/// nothing has been done yet. Actions past the cursor are the redo branch and
/// are abandoned by the next push. The stack always reaches a consistent
/// cursor position before executing an action, so listener code triggered by
/// the execution can inspect `can_undo`/`can_redo` safely.
pub struct UndoStack {
    actions: Vec<UndoAction>,
    cursor: Option<usize>,
}

impl UndoStack {
    pub(crate) fn new() -> Self {
        Self {
            actions: Vec::new(),
            cursor: None,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn can_redo(&self) -> bool {
        match self.cursor {
            Some(cursor) => cursor + 1 < self.actions.len(),
            None => !self.actions.is_empty(),
        }
    }

    /// Number of recorded actions (undo and redo branches together).
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Truncate the redo branch, record the action, then execute it. Returns
    /// a copy of the action for notification.
    pub(crate) fn push(&mut self, action: UndoAction, view: &mut DocumentView<'_>) -> UndoAction {
        let keep = self.cursor.map_or(0, |c| c + 1);
        self.actions.truncate(keep);
        self.actions.push(action);
        self.cursor = Some(self.actions.len() - 1);

        // Execute last, so the stack is consistent while the action runs.
        let action = self.actions.last().expect("just pushed").clone();
        action.apply(view);
        action
    }

    /// Revert the action under the cursor. Panics when nothing can be undone.
    pub(crate) fn undo(&mut self, view: &mut DocumentView<'_>) -> UndoAction {
        assert!(self.can_undo(), "no actions to undo");
        let index = self.cursor.expect("checked by can_undo");
        self.cursor = index.checked_sub(1);

        let action = self.actions[index].clone();
        action.revert(view);
        action
    }

    /// Re-apply the action past the cursor. Panics when nothing can be redone.
    pub(crate) fn redo(&mut self, view: &mut DocumentView<'_>) -> UndoAction {
        assert!(self.can_redo(), "no actions to redo");
        let index = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(index);

        let action = self.actions[index].clone();
        action.apply(view);
        action
    }

    /// Empty the stack WITHOUT executing any inversions. Only for discarding
    /// a whole document's history, never as a revert-to-saved operation.
    pub(crate) fn clear(&mut self) {
        self.actions.clear();
        self.cursor = None;
    }
}
