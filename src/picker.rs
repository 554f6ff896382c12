use crate::coords::{WorldPoint, clamp_index, world_to_indices};
use crate::enums::Axis;
use crate::surface::ScreenPos;
use crate::sync::SyncController;
use crate::volume::VolumeGrid;

use tracing::{debug, trace};

/// Cross-hair navigation: a click in one view moves all three views to the
/// voxel under the cursor.
pub struct CrosshairPicker;

impl CrosshairPicker {
    /// Voxel indices (x, y, z) of `point`, clamped into the volume.
    pub fn target_indices(volume: &VolumeGrid, point: WorldPoint) -> [usize; 3] {
        let indices = world_to_indices(point, volume.origin(), volume.spacing());
        let dimensions = volume.dimensions();
        std::array::from_fn(|i| clamp_index(indices[i], 0, dimensions[i] as i64 - 1) as usize)
    }

    /// Resolves a click at `position` in the view of `axis` and requests the
    /// resulting slice on every axis, the clicked one included. Returns the
    /// target indices, or `None` when the pick missed or no volume is loaded.
    pub fn handle_pick(
        controller: &SyncController,
        axis: Axis,
        position: ScreenPos,
    ) -> Option<[usize; 3]> {
        let Some(point) = controller.pick(axis, position) else {
            trace!(%axis, ?position, "Pick missed");
            return None;
        };
        let targets = controller.with_session(|session| Self::target_indices(session.volume(), point))?;
        debug!(%axis, ?point, ?targets, "Cross-hair moved");

        for target_axis in Axis::ALL {
            controller.request_slice_change(target_axis, targets[target_axis.index()] as i64);
        }
        Some(targets)
    }
}
