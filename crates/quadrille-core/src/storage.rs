//! Document persistence.
//!
//! The on-disk format is a JSON object with a single `rectangles` field
//! holding the shape list. Selection, undo history, and the resize preview
//! are never persisted; a loaded document always starts with all of them
//! empty. Unknown top-level fields are skipped on read so newer files stay
//! loadable.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Document;
use crate::shape::Shape;

/// Persistence errors. These belong to the I/O boundary; a failed load never
/// mutates any in-memory document.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid document: {0}")]
    Format(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The persisted document shape: `{"rectangles": [...]}`.
#[derive(Serialize, Deserialize)]
struct DocumentFile {
    rectangles: Vec<Shape>,
}

/// Load a document from disk. The returned document carries the file path
/// and name; its selection and history start empty.
pub fn load_document(path: &Path) -> StorageResult<Document> {
    let json = fs::read_to_string(path)?;
    let file: DocumentFile = serde_json::from_str(&json)?;
    log::debug!(
        "loaded {} shape(s) from {}",
        file.rectangles.len(),
        path.display()
    );

    let document = Document::from_shapes(file.rectangles);
    document.set_file_path(path);
    Ok(document)
}

/// Write a document's shape list to disk. Does not touch the document's
/// unsaved-changes flag or file path; the manager owns that bookkeeping.
pub fn save_document(document: &Document, path: &Path) -> StorageResult<()> {
    let file = DocumentFile {
        rectangles: document.shapes(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    log::debug!(
        "saved {} shape(s) to {}",
        file.rectangles.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Bounds;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layout.json");

        let doc = Document::new();
        let mut named = Shape::new(0.1, 0.2, 0.3, 0.4);
        named.name = "Header".to_string();
        doc.add_shape(named);
        doc.add_shape(Shape::new(0.5, 0.5, 0.25, 0.25));

        save_document(&doc, &path).unwrap();
        let loaded = load_document(&path).unwrap();

        let original = doc.shapes();
        let reloaded = loaded.shapes();
        assert_eq!(reloaded.len(), original.len());
        for (a, b) in original.iter().zip(&reloaded) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.bounds(), b.bounds());
        }
        assert_eq!(loaded.file_name(), "layout.json");
        assert_eq!(loaded.file_path(), Some(path));
        assert_eq!(loaded.selected_index(), None);
        assert!(!loaded.can_undo());
        assert!(!loaded.has_unsaved_changes());
    }

    #[test]
    fn test_properties_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props.json");

        let doc = Document::new();
        let mut shape = Shape::new(0.1, 0.1, 0.2, 0.2);
        let mut properties = std::collections::BTreeMap::new();
        properties.insert("fill".to_string(), serde_json::json!("#336699"));
        properties.insert("locked".to_string(), serde_json::json!(true));
        shape.properties = Some(properties.clone());
        doc.add_shape(shape);

        save_document(&doc, &path).unwrap();
        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.shapes()[0].properties, Some(properties));
    }

    #[test]
    fn test_unknown_top_level_fields_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extra.json");
        fs::write(
            &path,
            r#"{"version": 7, "rectangles": [{"name": "A", "x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4}]}"#,
        )
        .unwrap();

        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.shape_count(), 1);
        assert_eq!(loaded.shapes()[0].bounds(), Bounds::new(0.1, 0.2, 0.3, 0.4));
    }

    #[test]
    fn test_missing_rectangles_field_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"shapes": []}"#).unwrap();

        assert!(matches!(
            load_document(&path),
            Err(StorageError::Format(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(load_document(&path), Err(StorageError::Io(_))));
    }
}
