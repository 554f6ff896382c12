use crate::enums::{Axis, Interpolation};
use crate::interpolator::Interpolator;
use crate::view_state::WindowLevel;

use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Voxel buffer holds {actual} samples, dimensions require {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("Volume dimensions must be positive: {0:?}")]
    EmptyDimension([usize; 3]),

    #[error("Voxel spacing must be positive and finite: {0:?}")]
    InvalidSpacing([f64; 3]),
}

/// An immutable 3-D scalar grid with physical geometry.
///
/// Samples are stored as `(depth, height, width)`, i.e. indexed `[z, y, x]`
/// with x varying fastest. Geometry (`spacing`, `origin`) is given in
/// (x, y, z) order.
#[derive(Debug, Clone)]
pub struct VolumeGrid<T = i16> {
    data: Array3<T>,
    spacing: [f64; 3],
    origin: [f64; 3],
}

/// A grid of class labels, 0 being background.
pub type LabelVolume = VolumeGrid<u16>;

impl<T> VolumeGrid<T> {
    pub fn new(data: Array3<T>, spacing: [f64; 3], origin: [f64; 3]) -> Result<Self, GridError> {
        let (depth, height, width) = data.dim();
        if depth == 0 || height == 0 || width == 0 {
            return Err(GridError::EmptyDimension([width, height, depth]));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GridError::InvalidSpacing(spacing));
        }
        Ok(Self {
            data,
            spacing,
            origin,
        })
    }

    /// Builds a grid from a row-major buffer of `nx * ny * nz` samples.
    pub fn from_vec(
        dimensions: [usize; 3],
        spacing: [f64; 3],
        origin: [f64; 3],
        buffer: Vec<T>,
    ) -> Result<Self, GridError> {
        let [nx, ny, nz] = dimensions;
        let expected = nx * ny * nz;
        if buffer.len() != expected {
            return Err(GridError::BufferLength {
                expected,
                actual: buffer.len(),
            });
        }
        let data = Array3::from_shape_vec((nz, ny, nx), buffer).map_err(|_| {
            GridError::BufferLength {
                expected,
                actual: expected,
            }
        })?;
        Self::new(data, spacing, origin)
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Dimensions in (x, y, z) order.
    pub fn dimensions(&self) -> [usize; 3] {
        let (depth, height, width) = self.data.dim();
        [width, height, depth]
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    /// Number of slices along the normal of `axis`.
    pub fn extent(&self, axis: Axis) -> usize {
        self.dimensions()[axis.index()]
    }

    pub fn voxel(&self, [x, y, z]: [usize; 3]) -> Option<&T> {
        self.data.get([z, y, x])
    }

    pub fn same_dimensions<U>(&self, other: &VolumeGrid<U>) -> bool {
        self.dimensions() == other.dimensions()
    }

    /// The 2-D plane at `index` along `axis`, rows running along the vertical
    /// in-plane axis (see [`Axis::in_plane`]).
    pub fn get_slice_from_axis(&self, index: usize, axis: Axis) -> Option<ArrayView2<'_, T>> {
        if !self.is_valid_index(index, axis) {
            return None;
        }
        let slice = match axis {
            Axis::Axial => self.data.slice(s![index, .., ..]),
            Axis::Coronal => self.data.slice(s![.., index, ..]),
            Axis::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    fn is_valid_index(&self, index: usize, axis: Axis) -> bool {
        index < self.extent(axis)
    }
}

impl<T> VolumeGrid<T>
where
    T: Copy + Into<f64> + Send + Sync,
{
    /// Minimum and maximum sample value.
    pub fn scalar_range(&self) -> (f64, f64) {
        self.data
            .iter()
            .map(|&v| Into::<f64>::into(v))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Renders one slice through `window_level` into an 8-bit image.
    pub fn render_slice(
        &self,
        index: usize,
        axis: Axis,
        window_level: WindowLevel,
        interpolation: Interpolation,
    ) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, axis)?;

        match interpolation {
            Interpolation::None => Self::slice_to_image(&slice, window_level),
            Interpolation::Bilinear => {
                let (width, height) = self.output_dimensions(axis, interpolation);
                let (slice_height, slice_width) = slice.dim();
                if (width as usize, height as usize) == (slice_width, slice_height) {
                    return Self::slice_to_image(&slice, window_level);
                }
                Self::interpolate_slice(&slice, width, height, window_level)
            }
        }
    }

    /// (width, height) of the image [`render_slice`](Self::render_slice)
    /// produces for `axis`.
    pub fn output_dimensions(&self, axis: Axis, interpolation: Interpolation) -> (u32, u32) {
        let dimensions = match interpolation {
            Interpolation::None => self.dimensions().map(|d| d as u32),
            Interpolation::Bilinear => {
                Interpolator::get_isotropic_dimensions(self.spacing, self.dimensions())
            }
        };
        let (horizontal, vertical) = axis.in_plane();
        (dimensions[horizontal], dimensions[vertical])
    }

    fn slice_to_image(slice: &ArrayView2<'_, T>, window_level: WindowLevel) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| (0..width).map(move |x| window_level.map_to_u8(slice[[y, x]].into())))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn interpolate_slice(
        slice: &ArrayView2<'_, T>,
        width: u32,
        height: u32,
        window_level: WindowLevel,
    ) -> Option<GrayImage> {
        let samples = slice.mapv(|v| Into::<f64>::into(v) as f32);
        let samples = samples.view();
        let (slice_height, slice_width) = samples.dim();

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    // Normalized coordinates with half-pixel offset
                    let norm_x = (x as f32 + 0.5) / width as f32;
                    let norm_y = (y as f32 + 0.5) / height as f32;

                    let src_x = (norm_x * slice_width as f32 - 0.5).clamp(0.0, (slice_width - 1) as f32);
                    let src_y = (norm_y * slice_height as f32 - 0.5).clamp(0.0, (slice_height - 1) as f32);

                    let value = Interpolator::bilinear_interpolate(&samples, src_y, src_x);
                    window_level.map_to_u8(value as f64)
                })
            })
            .collect();

        ImageBuffer::from_raw(width, height, pixel_data)
    }
}
