//! An off-screen [`SliceSurface`] that renders frames into memory.

use crate::annotation::Annotations;
use crate::coords::{WorldPoint, indices_to_world};
use crate::enums::{Axis, Interpolation};
use crate::overlay::{DisplayWindow, OverlayHandle, composite};
use crate::surface::{ScreenPos, SliceSurface};
use crate::view_state::WindowLevel;
use crate::volume::VolumeGrid;

use image::{ImageResult, RgbaImage};
use std::cell::{Ref, RefCell};
use std::path::Path;
use std::rc::{Rc, Weak};
use tracing::trace;

#[derive(Default)]
struct Snapshot {
    volume: Option<Weak<VolumeGrid>>,
    slice: usize,
    window_level: Option<WindowLevel>,
    overlay: Option<OverlayHandle>,
    overlay_window: Option<DisplayWindow>,
    annotations: Option<Annotations>,
    frame: Option<RgbaImage>,
    renders: usize,
}

/// Renders the current slice, with the overlay composited on top. With
/// [`Interpolation::None`] one screen pixel is one voxel; with
/// [`Interpolation::Bilinear`] the slice is resampled to its physical aspect.
/// Clones share the same frame, so one clone can be bound to the controller
/// while another is kept to read the result.
#[derive(Clone)]
pub struct SnapshotSurface {
    axis: Axis,
    interpolation: Interpolation,
    state: Rc<RefCell<Snapshot>>,
}

impl SnapshotSurface {
    pub fn new(axis: Axis) -> Self {
        Self::with_interpolation(axis, Interpolation::None)
    }

    pub fn with_interpolation(axis: Axis, interpolation: Interpolation) -> Self {
        Self {
            axis,
            interpolation,
            state: Rc::default(),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// The last rendered frame.
    pub fn frame(&self) -> Option<Ref<'_, RgbaImage>> {
        Ref::filter_map(self.state.borrow(), |s| s.frame.as_ref()).ok()
    }

    pub fn annotations(&self) -> Option<Annotations> {
        self.state.borrow().annotations.clone()
    }

    pub fn render_count(&self) -> usize {
        self.state.borrow().renders
    }

    /// Writes the last frame; `Ok(false)` when nothing was rendered yet.
    pub fn save(&self, path: impl AsRef<Path>) -> ImageResult<bool> {
        match self.frame() {
            Some(frame) => frame.save(path).map(|_| true),
            None => Ok(false),
        }
    }
}

impl SliceSurface for SnapshotSurface {
    fn attach_volume(&mut self, volume: Option<Weak<VolumeGrid>>) {
        let mut state = self.state.borrow_mut();
        state.volume = volume;
        state.frame = None;
    }

    fn set_slice(&mut self, index: usize) {
        self.state.borrow_mut().slice = index;
    }

    fn set_window_level(&mut self, window_level: WindowLevel) {
        self.state.borrow_mut().window_level = Some(window_level);
    }

    fn attach_overlay(&mut self, overlay: Option<OverlayHandle>) {
        self.state.borrow_mut().overlay = overlay;
    }

    fn set_overlay_window(&mut self, window: Option<DisplayWindow>) {
        self.state.borrow_mut().overlay_window = window;
    }

    fn set_annotations(&mut self, annotations: &Annotations) {
        self.state.borrow_mut().annotations = Some(annotations.clone());
    }

    /// Screen pixels of the rendered frame map back to voxels of the current
    /// plane, horizontal and vertical as in [`Axis::in_plane`].
    fn pick(&self, position: ScreenPos) -> Option<WorldPoint> {
        let state = self.state.borrow();
        let volume = state.volume.as_ref()?.upgrade()?;
        let (horizontal, vertical) = self.axis.in_plane();
        let dimensions = volume.dimensions();
        let (width, height) = volume.output_dimensions(self.axis, self.interpolation);

        if !(0.0..width as f64).contains(&position.x) || !(0.0..height as f64).contains(&position.y) {
            return None;
        }
        let to_voxel = |screen: f64, screen_extent: u32, extent: usize| {
            let voxel = (screen * extent as f64 / screen_extent as f64).floor() as i64;
            voxel.min(extent as i64 - 1)
        };

        let mut indices = [0_i64; 3];
        indices[horizontal] = to_voxel(position.x, width, dimensions[horizontal]);
        indices[vertical] = to_voxel(position.y, height, dimensions[vertical]);
        indices[self.axis.index()] = state.slice as i64;
        Some(indices_to_world(indices, volume.origin(), volume.spacing()))
    }

    fn render(&mut self) {
        let mut state = self.state.borrow_mut();
        state.renders += 1;

        let Some(volume) = state.volume.as_ref().and_then(Weak::upgrade) else {
            state.frame = None;
            return;
        };
        let window_level = state.window_level.unwrap_or_else(|| {
            let (lo, hi) = volume.scalar_range();
            WindowLevel::new(hi - lo, (hi + lo) / 2.0, 1.0)
        });
        let Some(base) = volume.render_slice(state.slice, self.axis, window_level, self.interpolation)
        else {
            state.frame = None;
            return;
        };
        let overlay = match (&state.overlay, &state.overlay_window) {
            (Some(handle), Some(window)) => handle.colorize(self.axis, window),
            _ => None,
        };
        trace!(axis = %self.axis, slice = state.slice, overlay = overlay.is_some(), "Rendered snapshot");
        state.frame = Some(composite(&base, overlay.as_ref()));
    }
}
