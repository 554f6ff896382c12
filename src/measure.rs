//! Two-point distance measurement within one view.

use crate::coords::{WorldPoint, distance};
use crate::enums::Axis;

/// A completed measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub axis: Axis,
    pub start: WorldPoint,
    pub end: WorldPoint,
}

impl Measurement {
    /// Length in world units (millimetres for DICOM data).
    pub fn length(&self) -> f64 {
        distance(self.start, self.end)
    }
}

#[derive(Debug, Default)]
pub struct DistanceTool {
    enabled: bool,
    pending: Option<(Axis, WorldPoint)>,
    last: Option<Measurement>,
}

impl DistanceTool {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning the tool off (or on again) discards any measurement.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.last = None;
    }

    /// Places the next endpoint. The second point in the same view completes a
    /// measurement; a point in another view, or after a completed measurement,
    /// starts a new one.
    pub fn place(&mut self, axis: Axis, point: WorldPoint) -> Option<Measurement> {
        if !self.enabled {
            return None;
        }
        match self.pending.take() {
            Some((pending_axis, start)) if pending_axis == axis => {
                let measurement = Measurement {
                    axis,
                    start,
                    end: point,
                };
                self.last = Some(measurement);
                Some(measurement)
            }
            _ => {
                self.last = None;
                self.pending = Some((axis, point));
                None
            }
        }
    }

    pub fn last(&self) -> Option<&Measurement> {
        self.last.as_ref()
    }
}
