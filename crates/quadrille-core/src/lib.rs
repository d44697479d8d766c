//! Quadrille Core Library
//!
//! Document model, undo history, and multi-document coordination for the
//! Quadrille rectangle editor.

pub mod document;
pub mod manager;
pub mod shape;
pub mod storage;
pub mod subscription;
pub mod undo;

pub use document::{Document, DocumentId, DriverId, ResizeEvent, ResizePreview};
pub use manager::{DocumentManager, SelectionBinding};
pub use shape::{round3, Bounds, Shape, ShapeId};
pub use storage::{load_document, save_document, StorageError, StorageResult};
pub use subscription::ListenerId;
pub use undo::{UndoAction, UndoDirection, UndoStack};
