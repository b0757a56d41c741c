//! Shape handles and markers attached to bodies.
//!
//! Shape geometry itself lives in the collision/visualization layers; this
//! module only defines the handle type bodies own. A shape shared between a
//! body's visual and collision lists is held by `Rc`, so it is freed exactly
//! once when the last list holding it is dropped.

use arbor_math::{SpatialTransform, Vec3};

/// A geometric shape attached to a body, addressed by reference-counted
/// handle (`Rc<Shape>`) from the visual and/or collision lists.
#[derive(Debug, Clone)]
pub struct Shape {
    /// Human-readable name.
    pub name: String,
    /// Pose of the shape in the owning body's frame.
    pub offset: SpatialTransform,
}

impl Shape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset: SpatialTransform::identity(),
        }
    }

    pub fn with_offset(name: impl Into<String>, offset: SpatialTransform) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

/// A named point of interest fixed in a body's frame.
#[derive(Debug, Clone)]
pub struct Marker {
    /// Human-readable name.
    pub name: String,
    /// Position in the owning body's frame.
    pub offset: Vec3,
}

impl Marker {
    pub fn new(name: impl Into<String>, offset: Vec3) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}
