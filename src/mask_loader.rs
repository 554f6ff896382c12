use crate::{
    enums::SortBy,
    volume::{LabelVolume, VolumeGrid},
    volume_loader::VolumeLoader,
};

use nifti::{NiftiObject, NiftiVolume, RandomAccessNiftiVolume, ReaderOptions};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MaskLoaderError {
    #[error("Unsupported mask format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read mask: {0}")]
    ReadError(String),
}

/// Produces label volumes for the overlay. Geometry compatibility with the
/// open volume is checked by the overlay, not here.
pub trait MaskSource {
    fn load(&self, path: &Path) -> Result<LabelVolume, MaskLoaderError>;
}

/// Reads label masks from NIfTI files (`.nii`, `.nii.gz`) or from a
/// directory holding a DICOM series.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskLoader;

impl MaskSource for MaskLoader {
    fn load(&self, path: &Path) -> Result<LabelVolume, MaskLoaderError> {
        let labels = if path.is_dir() {
            Self::load_dicom_directory(path)?
        } else if Self::is_nifti(path) {
            Self::load_nifti(path)?
        } else {
            return Err(MaskLoaderError::UnsupportedFormat(path.display().to_string()));
        };
        info!(path = %path.display(), dimensions = ?labels.dimensions(), "Read mask");
        Ok(labels)
    }
}

impl MaskLoader {
    fn is_nifti(path: &Path) -> bool {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        name.ends_with(".nii") || name.ends_with(".nii.gz")
    }

    pub fn load_nifti(path: &Path) -> Result<LabelVolume, MaskLoaderError> {
        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|err| MaskLoaderError::ReadError(format!("{}: {err}", path.display())))?;
        let header = object.header();
        let volume = object.volume();

        let dim = volume.dim();
        let extent = |i: usize| dim.get(i).copied().unwrap_or(1).max(1) as usize;
        let (nx, ny, nz) = (extent(0), extent(1), extent(2));
        debug!(nx, ny, nz, data_type = ?volume.data_type(), "Decoding NIfTI labels");

        let mut labels = Vec::with_capacity(nx * ny * nz);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let coords = Self::voxel_coords(dim.len(), [x, y, z]);
                    let value = volume
                        .get_f64(&coords)
                        .map_err(|err| MaskLoaderError::ReadError(err.to_string()))?;
                    labels.push(to_label(value));
                }
            }
        }

        let spacing = std::array::from_fn(|i| {
            let pixdim = header.pixdim[i + 1].abs() as f64;
            if pixdim > 0.0 { pixdim } else { 1.0 }
        });
        let origin = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];
        VolumeGrid::from_vec([nx, ny, nz], spacing, origin, labels)
            .map_err(|err| MaskLoaderError::ReadError(err.to_string()))
    }

    /// Coordinates for a volume of `dimensionality` axes; trailing axes sit at 0.
    fn voxel_coords(dimensionality: usize, [x, y, z]: [usize; 3]) -> Vec<u16> {
        let mut coords = vec![0_u16; dimensionality.max(1)];
        for (slot, value) in coords.iter_mut().zip([x, y, z]) {
            *slot = value as u16;
        }
        coords
    }

    pub fn load_dicom_directory(path: &Path) -> Result<LabelVolume, MaskLoaderError> {
        let loaded = VolumeLoader::load_from_directory(path, SortBy::default())
            .map_err(|err| MaskLoaderError::ReadError(err.to_string()))?;
        let volume = loaded.volume;
        let labels = volume.data().mapv(|v| v.max(0) as u16);
        VolumeGrid::new(labels, volume.spacing(), volume.origin())
            .map_err(|err| MaskLoaderError::ReadError(err.to_string()))
    }
}

/// Rounds a stored sample to a label; negative and NaN samples are background.
fn to_label(value: f64) -> u16 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        value.round().min(u16::MAX as f64) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_loader::tests::slice_object;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::tags;

    fn put_i16(header: &mut [u8], at: usize, value: i16) {
        header[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_f32(header: &mut [u8], at: usize, value: f32) {
        header[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// A single-file NIfTI-1 volume of 3 x 2 x 2 uint8 samples where the
    /// voxel (x, y, z) holds x + 3y + 6z.
    fn write_nifti(path: &Path) {
        let mut bytes = vec![0_u8; 352];
        bytes[0..4].copy_from_slice(&348_i32.to_le_bytes());
        for (i, dim) in [3_i16, 3, 2, 2, 1, 1, 1, 1].into_iter().enumerate() {
            put_i16(&mut bytes, 40 + 2 * i, dim);
        }
        put_i16(&mut bytes, 70, 2);
        put_i16(&mut bytes, 72, 8);
        for (i, pixdim) in [1.0_f32, 0.5, 1.5, 2.0].into_iter().enumerate() {
            put_f32(&mut bytes, 76 + 4 * i, pixdim);
        }
        put_f32(&mut bytes, 108, 352.0);
        put_f32(&mut bytes, 112, 1.0);
        put_i16(&mut bytes, 252, 1);
        put_f32(&mut bytes, 268, -5.0);
        put_f32(&mut bytes, 272, 10.0);
        put_f32(&mut bytes, 276, 20.0);
        bytes[344..348].copy_from_slice(b"n+1\0");
        bytes.extend(0_u8..12);
        std::fs::write(path, bytes).expect("write nifti");
    }

    #[test]
    fn reads_nifti_labels_in_x_fastest_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mask.nii");
        write_nifti(&path);

        let labels = MaskLoader.load(&path).expect("mask loads");
        assert_eq!(labels.dimensions(), [3, 2, 2]);
        assert_eq!(labels.spacing(), [0.5, 1.5, 2.0]);
        assert_eq!(labels.origin(), [-5.0, 10.0, 20.0]);
        assert_eq!(labels.voxel([1, 0, 0]), Some(&1));
        assert_eq!(labels.voxel([0, 1, 0]), Some(&3));
        assert_eq!(labels.voxel([0, 0, 1]), Some(&6));
        assert_eq!(labels.voxel([2, 1, 1]), Some(&11));
    }

    #[test]
    fn dicom_directory_masks_clamp_negative_samples_to_background() {
        let dir = tempfile::tempdir().expect("temp dir");
        for (instance, fill) in [(1, 2_u16), (2, 7)] {
            let mut object = slice_object("1.2.7", instance, f64::from(instance), fill);
            object.put(DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-5")));
            object.put(DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")));
            object
                .write_to_file(dir.path().join(format!("{instance}.dcm")))
                .expect("write dicom");
        }

        let labels = MaskLoader.load(dir.path()).expect("mask loads");
        assert_eq!(labels.dimensions(), [3, 2, 2]);
        assert_eq!(labels.voxel([0, 0, 0]), Some(&0));
        assert_eq!(labels.voxel([2, 1, 1]), Some(&2));
    }

    #[test]
    fn samples_round_to_labels() {
        assert_eq!(to_label(2.0), 2);
        assert_eq!(to_label(0.9999), 1);
        assert_eq!(to_label(-3.0), 0);
        assert_eq!(to_label(f64::NAN), 0);
        assert_eq!(to_label(1e9), u16::MAX);
    }

    #[test]
    fn coordinates_pad_and_truncate_to_dimensionality() {
        assert_eq!(MaskLoader::voxel_coords(4, [1, 2, 3]), vec![1, 2, 3, 0]);
        assert_eq!(MaskLoader::voxel_coords(2, [1, 2, 0]), vec![1, 2]);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mask.png");
        std::fs::write(&path, b"png").expect("write file");
        assert!(matches!(
            MaskLoader.load(&path),
            Err(MaskLoaderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn unreadable_nifti_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mask.nii");
        std::fs::write(&path, b"not a nifti header").expect("write file");
        assert!(matches!(MaskLoader.load(&path), Err(MaskLoaderError::ReadError(_))));
    }

    #[test]
    fn empty_dicom_directory_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(MaskLoader.load(dir.path()), Err(MaskLoaderError::ReadError(_))));
    }
}
