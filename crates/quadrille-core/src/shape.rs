//! Rectangle shapes with normalized coordinates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Shape identifier. Two shapes with identical fields are still distinct
/// entities; identity follows this handle, not the field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub Uuid);

impl ShapeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position-and-extent quadruple in normalized [0, 1] coordinates.
///
/// Width and height may be transiently negative during an interactive drag;
/// committed bounds are normalized and rounded first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Fold negative extents back into the origin so width/height are
    /// non-negative: `x' = min(x, x + w)`, `w' = |w|`, same for y/h.
    pub fn normalized(self) -> Self {
        Self {
            x: self.x.min(self.x + self.width),
            y: self.y.min(self.y + self.height),
            width: self.width.abs(),
            height: self.height.abs(),
        }
    }

    /// Round every coordinate to 3 decimal places, the precision stored in
    /// documents and undo history.
    pub fn rounded(self) -> Self {
        Self {
            x: round3(self.x),
            y: round3(self.y),
            width: round3(self.width),
            height: round3(self.height),
        }
    }
}

/// Round a normalized coordinate to 3 decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// A named rectangle with an open property bag.
///
/// All coordinates are ratios of the document extent (0 <= coord <= 1).
/// The serialized form is `{name, x, y, width, height}` with `properties`
/// omitted when absent; the id is in-memory identity only and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    #[serde(skip)]
    id: ShapeId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<BTreeMap<String, serde_json::Value>>,
}

impl Shape {
    /// Create a new shape with the given bounds and an empty name.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: ShapeId::new(),
            name: String::new(),
            x,
            y,
            width,
            height,
            properties: None,
        }
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.x, self.y, self.width, self.height)
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.x = bounds.x;
        self.y = bounds.y;
        self.width = bounds.width;
        self.height = bounds.height;
    }

    /// Human-readable label: the name, or the bounds when the name is blank.
    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            format!(
                "(x:{:.3}, y:{:.3}, w:{:.3}, h:{:.3})",
                self.x, self.y, self.width, self.height
            )
        } else {
            self.name.clone()
        }
    }
}

impl Default for Shape {
    /// An all-zero shape.
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_with_equal_fields_are_distinct() {
        let a = Shape::new(0.1, 0.2, 0.3, 0.4);
        let b = Shape::new(0.1, 0.2, 0.3, 0.4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_preserves_identity() {
        let a = Shape::new(0.1, 0.2, 0.3, 0.4);
        let b = a.clone();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_normalize_negative_extents() {
        let bounds = Bounds::new(0.5, 0.5, -0.2, -0.1).normalized().rounded();
        assert_eq!(bounds, Bounds::new(0.3, 0.4, 0.2, 0.1));
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.123456), 0.123);
        assert_eq!(round3(0.9995), 1.0);
        assert_eq!(round3(-0.0004), 0.0);
    }

    #[test]
    fn test_label_falls_back_to_bounds() {
        let mut shape = Shape::new(0.1, 0.2, 0.3, 0.4);
        assert_eq!(shape.label(), "(x:0.100, y:0.200, w:0.300, h:0.400)");
        shape.name = "Header".to_string();
        assert_eq!(shape.label(), "Header");
    }

    #[test]
    fn test_serialized_form_omits_id_and_empty_properties() {
        let shape = Shape::new(0.1, 0.2, 0.3, 0.4);
        let json = serde_json::to_value(&shape).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("name"));
        assert!(!object.contains_key("id"));
        assert!(!object.contains_key("properties"));
    }

    #[test]
    fn test_deserialized_shapes_get_fresh_ids() {
        let shape = Shape::new(0.1, 0.2, 0.3, 0.4);
        let json = serde_json::to_string(&shape).unwrap();
        let a: Shape = serde_json::from_str(&json).unwrap();
        let b: Shape = serde_json::from_str(&json).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.bounds(), shape.bounds());
    }
}
