use serde::{Deserialize, Serialize};
use std::fmt;

/// The three orthogonal view axes. Every view is bound to exactly one axis for
/// its whole lifetime and every event carries it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Normal along X, shows the Y/Z plane.
    Sagittal,
    /// Normal along Y, shows the X/Z plane.
    Coronal,
    /// Normal along Z, shows the X/Y plane.
    Axial,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Sagittal, Axis::Coronal, Axis::Axial];

    /// Position of the axis in (x, y, z) ordered arrays.
    pub const fn index(self) -> usize {
        match self {
            Axis::Sagittal => 0,
            Axis::Coronal => 1,
            Axis::Axial => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Axis::Sagittal => "Sagittal",
            Axis::Coronal => "Coronal",
            Axis::Axial => "Axial",
        }
    }

    /// The two (x, y, z) positions spanning the view plane, as (horizontal, vertical).
    pub const fn in_plane(self) -> (usize, usize) {
        match self {
            // Looking down X-axis: Y is width, Z is height
            Axis::Sagittal => (1, 2),
            // Looking down Y-axis: X is width, Z is height
            Axis::Coronal => (0, 2),
            // Looking down Z-axis: X is width, Y is height
            Axis::Axial => (0, 1),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Resample non-axial slices so that they keep the physical aspect ratio.
    Bilinear,
    #[default]
    None,
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Which half of the window/level pair a control edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowLevelComponent {
    Window,
    Level,
}
