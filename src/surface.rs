//! Hooks implemented by the rendering and UI layers.
//!
//! The controller calls these synchronously. Any of them may synchronously
//! call back into the controller (a slider emitting its value-changed signal,
//! a viewer reporting its new slice); such echoes are swallowed by the
//! controller.

use crate::annotation::Annotations;
use crate::coords::WorldPoint;
use crate::enums::Axis;
use crate::overlay::{DisplayWindow, OverlayHandle};
use crate::view_state::WindowLevel;
use crate::volume::VolumeGrid;

use std::rc::Weak;

/// Position in a view's screen space, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPos {
    pub x: f64,
    pub y: f64,
}

impl ScreenPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A 2-D slice viewer bound to one axis.
pub trait SliceSurface {
    /// Binds the surface to a volume, or unbinds it with `None`. The surface
    /// must not keep the volume alive.
    fn attach_volume(&mut self, volume: Option<Weak<VolumeGrid>>);

    fn set_slice(&mut self, index: usize);

    fn set_window_level(&mut self, window_level: WindowLevel);

    /// Binds the overlay to display, or removes it with `None`.
    fn attach_overlay(&mut self, overlay: Option<OverlayHandle>);

    fn set_overlay_window(&mut self, window: Option<DisplayWindow>);

    fn set_annotations(&mut self, annotations: &Annotations);

    /// Resolves a screen position to a world point, `None` on a miss.
    fn pick(&self, position: ScreenPos) -> Option<WorldPoint>;

    fn render(&mut self);
}

/// A slider selecting the slice of one view.
pub trait SliceControl {
    fn set_range(&mut self, min: usize, max: usize);

    fn set_value(&mut self, value: usize);
}

/// A pair of sliders for window width and level.
pub trait WindowLevelControl {
    fn set_window_level(&mut self, window_level: WindowLevel);
}

/// The 3-D view showing the three orthogonal planes.
pub trait CompositeView {
    fn attach_volume(&mut self, volume: Option<Weak<VolumeGrid>>);

    fn set_plane(&mut self, axis: Axis, index: usize);

    fn set_window_level(&mut self, window_level: WindowLevel);

    fn render(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryLevel {
    Information,
    Warning,
    Error,
}

/// Receives user-visible advisories (message boxes, status lines).
pub trait AdvisorySink {
    fn advise(&mut self, level: AdvisoryLevel, message: &str);
}

/// Discards advisories; they are still logged.
pub struct NoAdvisories;

impl AdvisorySink for NoAdvisories {
    fn advise(&mut self, _level: AdvisoryLevel, _message: &str) {}
}
