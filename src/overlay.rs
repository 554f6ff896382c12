//! Label-mask overlay: discrete color lookup, per-view display windows and
//! compositing over grayscale slices.

use crate::enums::Axis;
use crate::volume::{LabelVolume, VolumeGrid};

use image::{GrayImage, ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Colors used for labels 1, 2, 3, ... (wrapping) and their common opacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub palette: Vec<[u8; 3]>,
    pub alpha: f64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            palette: vec![
                [255, 0, 0],
                [0, 255, 0],
                [0, 0, 255],
                [255, 255, 0],
                [0, 255, 255],
                [255, 0, 255],
                [255, 128, 0],
                [128, 0, 255],
            ],
            alpha: 0.7,
        }
    }
}

/// Label → RGBA table. Entry 0 is fully transparent.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorLookup {
    table: Vec<Rgba<u8>>,
}

impl ColorLookup {
    pub fn build(max_label: u16, style: &OverlayStyle) -> Self {
        let alpha = (style.alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
        let table = (0..=max_label as usize)
            .map(|label| match (label, style.palette.len()) {
                (0, _) | (_, 0) => Rgba([0, 0, 0, 0]),
                (label, n) => {
                    let [r, g, b] = style.palette[(label - 1) % n];
                    Rgba([r, g, b, alpha])
                }
            })
            .collect();
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Color of `label`; labels beyond the table are transparent.
    #[inline]
    pub fn color(&self, label: u16) -> Rgba<u8> {
        self.table
            .get(label as usize)
            .copied()
            .unwrap_or(Rgba([0, 0, 0, 0]))
    }
}

/// Inclusive voxel bounds, (x, y, z), of the labels shown in one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl DisplayWindow {
    /// Full in-plane extent, single voxel at `slice` along the view normal.
    /// `None` when `slice` lies outside `dimensions`.
    pub fn for_slice(axis: Axis, slice: usize, dimensions: [usize; 3]) -> Option<Self> {
        let normal = axis.index();
        if slice >= dimensions[normal] || dimensions.contains(&0) {
            return None;
        }
        let mut min = [0; 3];
        let mut max = dimensions.map(|d| d - 1);
        min[normal] = slice;
        max[normal] = slice;
        Some(Self { min, max })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub volume: [usize; 3],
    pub mask: [usize; 3],
}

impl fmt::Display for DimensionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [vx, vy, vz] = self.volume;
        let [mx, my, mz] = self.mask;
        write!(
            f,
            "Mask dimensions {mx}x{my}x{mz} do not match volume dimensions {vx}x{vy}x{vz}; the overlay may be misplaced"
        )
    }
}

/// Non-owning view of a loaded overlay, handed to rendering surfaces.
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    labels: Weak<LabelVolume>,
    lookup: ColorLookup,
}

impl OverlayHandle {
    /// Colors the labels inside `window` for a view along `axis`. `None` once
    /// the overlay has been discarded or when the window is not a slice of it.
    pub fn colorize(&self, axis: Axis, window: &DisplayWindow) -> Option<RgbaImage> {
        let labels = self.labels.upgrade()?;
        let plane = labels.get_slice_from_axis(window.min[axis.index()], axis)?;
        let (height, width) = plane.dim();
        let lookup = &self.lookup;
        let plane = &plane;
        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| (0..width).flat_map(move |x| lookup.color(plane[[y, x]]).0))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}

pub struct MaskOverlayPipeline {
    labels: Rc<LabelVolume>,
    lookup: ColorLookup,
    windows: [Option<DisplayWindow>; 3],
    mismatch: Option<DimensionMismatch>,
}

impl MaskOverlayPipeline {
    /// Prepares an overlay for `labels` on top of `volume`. A dimension
    /// mismatch is recorded (see [`Self::mismatch`]) and the overlay keeps
    /// using the label volume's own geometry.
    pub fn load(labels: LabelVolume, volume: &VolumeGrid, style: &OverlayStyle) -> Self {
        let mismatch = (!volume.same_dimensions(&labels)).then(|| DimensionMismatch {
            volume: volume.dimensions(),
            mask: labels.dimensions(),
        });
        if let Some(mismatch) = &mismatch {
            warn!(%mismatch, "Degenerate mask overlay");
        }

        let max_label = labels.data().iter().copied().max().unwrap_or(0);
        let lookup = ColorLookup::build(max_label, style);
        debug!(max_label, table = lookup.len(), "Built overlay color lookup");

        Self {
            labels: Rc::new(labels),
            lookup,
            windows: [None; 3],
            mismatch,
        }
    }

    /// Recomputes the display window of `axis` for `slice`.
    pub fn set_slice_window(&mut self, axis: Axis, slice: usize) -> Option<DisplayWindow> {
        let window = DisplayWindow::for_slice(axis, slice, self.labels.dimensions());
        self.windows[axis.index()] = window;
        window
    }

    pub fn display_window(&self, axis: Axis) -> Option<DisplayWindow> {
        self.windows[axis.index()]
    }

    pub fn mismatch(&self) -> Option<&DimensionMismatch> {
        self.mismatch.as_ref()
    }

    pub fn lookup(&self) -> &ColorLookup {
        &self.lookup
    }

    pub fn labels(&self) -> &LabelVolume {
        &self.labels
    }

    pub fn handle(&self) -> OverlayHandle {
        OverlayHandle {
            labels: Rc::downgrade(&self.labels),
            lookup: self.lookup.clone(),
        }
    }
}

/// Alpha-blends `overlay` over a grayscale slice. Only the region both images
/// cover is blended.
pub fn composite(base: &GrayImage, overlay: Option<&RgbaImage>) -> RgbaImage {
    let (width, height) = base.dimensions();
    let pixel_data: Vec<u8> = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..width).flat_map(move |x| {
                let gray = base.get_pixel(x, y).0[0];
                let blended = overlay
                    .and_then(|o| o.get_pixel_checked(x, y))
                    .map(|&Rgba([r, g, b, a])| {
                        let a = a as f32 / 255.0;
                        let mix = |c: u8| (c as f32 * a + gray as f32 * (1.0 - a)).round() as u8;
                        [mix(r), mix(g), mix(b)]
                    })
                    .unwrap_or([gray; 3]);
                [blended[0], blended[1], blended[2], 255]
            })
        })
        .collect();
    ImageBuffer::from_raw(width, height, pixel_data).unwrap_or_else(|| RgbaImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn labels(dimensions: [usize; 3], buffer: Vec<u16>) -> LabelVolume {
        VolumeGrid::from_vec(dimensions, [1.0; 3], [0.0; 3], buffer).expect("valid labels")
    }

    fn volume(dimensions: [usize; 3]) -> VolumeGrid {
        let len: usize = dimensions.iter().product();
        VolumeGrid::from_vec(dimensions, [1.0; 3], [0.0; 3], vec![0; len]).expect("valid volume")
    }

    #[test]
    fn lookup_has_transparent_background_and_palette_entries() {
        let lookup = ColorLookup::build(3, &OverlayStyle::default());
        assert_eq!(lookup.len(), 4);
        assert_eq!(lookup.color(0), Rgba([0, 0, 0, 0]));
        assert_eq!(lookup.color(1), Rgba([255, 0, 0, 179]));
        assert_eq!(lookup.color(2), Rgba([0, 255, 0, 179]));
        assert_eq!(lookup.color(3), Rgba([0, 0, 255, 179]));
        assert_eq!(lookup.color(9), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn palette_wraps_for_many_labels() {
        let style = OverlayStyle::default();
        let lookup = ColorLookup::build(9, &style);
        assert_eq!(lookup.color(9).0[..3], style.palette[0]);
    }

    #[test]
    fn slice_window_spans_plane_and_one_voxel_along_normal() {
        let window = DisplayWindow::for_slice(Axis::Coronal, 3, [10, 8, 6]).expect("in range");
        assert_eq!(window.min, [0, 3, 0]);
        assert_eq!(window.max, [9, 3, 5]);
        assert_eq!(DisplayWindow::for_slice(Axis::Axial, 6, [10, 8, 6]), None);
    }

    #[test]
    fn matching_mask_has_no_mismatch() {
        let pipeline = MaskOverlayPipeline::load(
            labels([2, 2, 2], vec![0, 1, 2, 0, 0, 0, 0, 1]),
            &volume([2, 2, 2]),
            &OverlayStyle::default(),
        );
        assert!(pipeline.mismatch().is_none());
        assert_eq!(pipeline.lookup().len(), 3);
    }

    #[test]
    fn mismatched_mask_is_degenerate_but_usable() {
        let mut pipeline = MaskOverlayPipeline::load(
            labels([2, 2, 1], vec![1, 0, 0, 1]),
            &volume([4, 4, 4]),
            &OverlayStyle::default(),
        );
        let mismatch = pipeline.mismatch().copied().expect("mismatch recorded");
        assert_eq!(mismatch.mask, [2, 2, 1]);
        assert!(pipeline.set_slice_window(Axis::Axial, 0).is_some());
        assert!(pipeline.set_slice_window(Axis::Axial, 2).is_none());
        assert_eq!(pipeline.display_window(Axis::Axial), None);
    }

    #[test]
    fn colorize_follows_the_window() {
        let mut pipeline = MaskOverlayPipeline::load(
            labels([2, 1, 2], vec![0, 1, 2, 0]),
            &volume([2, 1, 2]),
            &OverlayStyle::default(),
        );
        let handle = pipeline.handle();
        let window = pipeline.set_slice_window(Axis::Axial, 1).expect("in range");
        let image = handle.colorize(Axis::Axial, &window).expect("overlay alive");
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0[..3], [0, 255, 0]);
        assert_eq!(image.get_pixel(1, 0).0[3], 0);

        drop(pipeline);
        assert!(handle.colorize(Axis::Axial, &window).is_none());
    }

    #[test]
    fn composite_blends_only_labelled_pixels() {
        let base = GrayImage::from_pixel(2, 1, Luma([100]));
        let mut overlay = RgbaImage::new(2, 1);
        overlay.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let out = composite(&base, Some(&overlay));
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [100, 100, 100, 255]);
        assert_eq!(composite(&base, None).get_pixel(0, 0).0, [100, 100, 100, 255]);
    }
}
