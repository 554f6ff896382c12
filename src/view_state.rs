use crate::coords::clamp_index;
use crate::enums::Axis;

/// Contrast mapping: `window` is the width of the displayed scalar range,
/// `level` its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLevel {
    pub window: f64,
    pub level: f64,
}

impl WindowLevel {
    /// Builds a window/level pair, raising non-positive (or NaN) widths to
    /// `min_window`.
    pub fn new(window: f64, level: f64, min_window: f64) -> Self {
        let window = if window.is_nan() || window < min_window {
            min_window
        } else {
            window
        };
        Self { window, level }
    }

    /// Lower and upper scalar bounds of the window.
    pub fn range(&self) -> (f64, f64) {
        let half = self.window / 2.0;
        (self.level - half, self.level + half)
    }

    /// Maps a scalar to an 8-bit display intensity.
    #[inline]
    pub fn map_to_u8(&self, value: f64) -> u8 {
        let (lower, _) = self.range();
        (((value - lower) / self.window) * 255.0).clamp(0.0, 255.0) as u8
    }
}

/// Slice and contrast state of one orthogonal view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    axis: Axis,
    slice: usize,
    slice_min: usize,
    slice_max: usize,
    pub(crate) window_level: WindowLevel,
}

impl ViewState {
    /// Creates the state for a volume with `extent` slices along `axis`,
    /// positioned on the middle slice.
    pub(crate) fn new(axis: Axis, extent: usize, window_level: WindowLevel) -> Self {
        let slice_max = extent.saturating_sub(1);
        let slice = clamp_index((extent / 2) as i64, 0, slice_max as i64) as usize;
        Self {
            axis,
            slice,
            slice_min: 0,
            slice_max,
            window_level,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn slice_min(&self) -> usize {
        self.slice_min
    }

    pub fn slice_max(&self) -> usize {
        self.slice_max
    }

    pub fn window_level(&self) -> WindowLevel {
        self.window_level
    }

    pub(crate) fn clamp(&self, index: i64) -> usize {
        clamp_index(index, self.slice_min as i64, self.slice_max as i64) as usize
    }

    /// Moves to `index` (clamped). Returns whether the slice actually changed.
    pub(crate) fn set_slice(&mut self, index: i64) -> bool {
        let clamped = self.clamp(index);
        if clamped == self.slice {
            return false;
        }
        self.slice = clamped;
        true
    }
}
