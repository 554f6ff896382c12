use crate::{enums::SortBy, identity::PatientIdentity, volume::GridError, volume::VolumeGrid};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No DICOM series found")]
    NoSeriesFound,

    #[error("Failed to read series: {0}")]
    ReadError(String),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Invalid volume geometry: {0}")]
    Grid(#[from] GridError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A loaded volume together with the identity of the patient it belongs to.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub volume: VolumeGrid,
    pub identity: PatientIdentity,
}

/// Produces volumes for the navigator. Implemented by the DICOM loader; other
/// sources (test fixtures, other formats) plug in here.
pub trait VolumeSource {
    fn load(&self, path: &Path) -> Result<LoadedSeries, VolumeLoaderError>;
}

/// Loads the first DICOM series of a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomDirectorySource {
    pub sort_by: SortBy,
}

impl VolumeSource for DicomDirectorySource {
    fn load(&self, path: &Path) -> Result<LoadedSeries, VolumeLoaderError> {
        VolumeLoader::load_from_directory(path, self.sort_by)
    }
}

struct SliceRecord {
    order: Option<f64>,
    position: Option<[f64; 3]>,
    image: Array2<i16>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// The objects are grouped by Series Instance UID and only the first
    /// series (in UID order) is assembled.
    ///
    /// # Errors
    ///
    /// Returns error if no decodable images are found or dimensions are
    /// inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<LoadedSeries, VolumeLoaderError> {
        let series = Self::first_series(dicom_objects).ok_or(VolumeLoaderError::NoSeriesFound)?;

        let mut records: Vec<_> = series
            .iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, &sort_by))
            .collect();

        if records.is_empty() {
            return Err(VolumeLoaderError::ReadError(
                "no decodable images in series".to_string(),
            ));
        }
        if records.len() < series.len() {
            warn!(
                skipped = series.len() - records.len(),
                "Skipped undecodable images"
            );
        }

        Self::sort_slices(&mut records, sort_by);
        Self::validate_dimensions(&records)?;

        let (x_spacing, y_spacing) =
            Self::get_pixel_spacing(&series).ok_or(VolumeLoaderError::MissingSpacing)?;
        let z_spacing = Self::get_slice_spacing(&records, &series);
        let origin = records[0].position.unwrap_or([0.0; 3]);

        let volume_array = Self::build_volume_array(&records);
        let volume = VolumeGrid::new(volume_array, [x_spacing, y_spacing, z_spacing], origin)?;
        let identity = PatientIdentity::from_dicom(series[0]);

        info!(
            slices = records.len(),
            dimensions = ?volume.dimensions(),
            "Loaded DICOM series"
        );
        Ok(LoadedSeries { volume, identity })
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<LoadedSeries, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .iter()
            .map(|path| {
                open_file(path.as_ref()).map_err(|err| {
                    VolumeLoaderError::ReadError(format!("{}: {err}", path.as_ref().display()))
                })
            })
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedSeries, VolumeLoaderError> {
        let paths = Self::dicom_files(path.as_ref())?;

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoSeriesFound);
        }
        debug!(files = paths.len(), dir = %path.as_ref().display(), "Reading DICOM directory");

        Self::load_from_file_paths(&paths, sort_by)
    }

    pub(crate) fn dicom_files(path: &Path) -> Result<Vec<PathBuf>, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Groups objects by Series Instance UID and returns the lowest one.
    /// Objects without a UID form a group of their own that is only used
    /// when no object carries one.
    fn first_series(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Option<Vec<&FileDicomObject<InMemDicomObject>>> {
        let mut series: BTreeMap<(bool, String), Vec<_>> = BTreeMap::new();
        for dicom_object in dicom_objects {
            let uid = dicom_object
                .element(tags::SERIES_INSTANCE_UID)
                .ok()
                .and_then(|e| e.to_str().ok())
                .map(|uid| uid.trim_end_matches(['\0', ' ']).to_string())
                .filter(|uid| !uid.is_empty());
            let key = match uid {
                Some(uid) => (false, uid),
                None => (true, String::new()),
            };
            series.entry(key).or_default().push(dicom_object);
        }
        if series.len() > 1 {
            debug!(series = series.len(), "Directory holds several series, using the first");
        }
        series.into_values().next()
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<SliceRecord> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image = Self::decode_image(dicom_object)?;
        let position = Self::get_position(dicom_object);
        Some(SliceRecord {
            order,
            position,
            image,
        })
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<[f64; 3]> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        (pos.len() >= 3).then(|| [pos[0], pos[1], pos[2]])
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f64>> {
        match sort_by {
            SortBy::ImagePositionPatient => Some(Self::get_position(dicom_object).map(|p| p[2])),
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float64()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(f64::from);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// Decodes the first frame through the modality LUT. Samples are read
    /// as `i32` so that unsigned 16-bit data decodes, then saturated into
    /// the voxel type.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<i16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let frame = pixel_data
            .to_ndarray_with_options::<i32>(&options)
            .ok()?
            .slice_move(s![0, .., .., 0]);

        let saturated = frame
            .iter()
            .filter(|&&v| v > i32::from(i16::MAX) || v < i32::from(i16::MIN))
            .count();
        if saturated > 0 {
            warn!(saturated, "Samples outside the 16-bit signed range were clamped");
        }
        Some(frame.mapv(saturate_voxel))
    }

    fn sort_slices(records: &mut [SliceRecord], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            records.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(records: &[SliceRecord]) -> Result<(), VolumeLoaderError> {
        let first_dim = records[0].image.dim();
        if records.iter().any(|r| r.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(records: &[SliceRecord]) -> Array3<i16> {
        let (height, width) = records[0].image.dim();
        let depth = records.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        for (i, record) in records.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&record.image);
        }

        volume
    }

    /// (column spacing, row spacing), i.e. (x, y).
    fn get_pixel_spacing(series: &[&FileDicomObject<InMemDicomObject>]) -> Option<(f64, f64)> {
        series.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;
            match pixel_spacing.as_slice() {
                [row, column, ..] => Some((*column, *row)),
                _ => None,
            }
        })
    }

    /// Distance between the first two slice positions, falling back to the
    /// slice thickness and finally to 1.
    fn get_slice_spacing(
        records: &[SliceRecord],
        series: &[&FileDicomObject<InMemDicomObject>],
    ) -> f64 {
        let from_positions = match records {
            [first, second, ..] => first
                .position
                .zip(second.position)
                .map(|(a, b)| crate::coords::distance(a, b)),
            _ => None,
        };
        from_positions
            .filter(|gap| *gap > 0.0)
            .or_else(|| {
                series.iter().find_map(|dicom_object| {
                    dicom_object
                        .element(tags::SLICE_THICKNESS)
                        .ok()?
                        .to_float64()
                        .ok()
                })
            })
            .filter(|gap| *gap > 0.0)
            .unwrap_or(1.0)
    }
}

fn saturate_voxel(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
    use dicom::object::FileMetaTableBuilder;

    pub(crate) fn slice_object(series_uid: &str, instance: i32, z: f64, fill: u16) -> FileDicomObject<InMemDicomObject> {
        let pixels: Vec<u16> = vec![fill; 6];
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JANE")),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from(instance.to_string())),
            DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, dicom_value!(F64, [-10.0, -20.0, z])),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(F64, [0.5, 0.75])),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(3_u16)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.into())),
        ])
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                .media_storage_sop_instance_uid(format!("1.2.3.{instance}")),
        )
        .expect("valid file meta")
    }

    #[test]
    fn assembles_first_series_sorted_by_position() {
        let objects = vec![
            slice_object("1.2.9", 1, 0.0, 900),
            slice_object("1.2.5", 2, 5.0, 20),
            slice_object("1.2.5", 1, 2.5, 10),
        ];
        let loaded = VolumeLoader::load_from_dicom_objects(&objects, SortBy::ImagePositionPatient)
            .expect("series loads");

        assert_eq!(loaded.volume.dimensions(), [3, 2, 2]);
        assert_eq!(loaded.volume.spacing(), [0.75, 0.5, 2.5]);
        assert_eq!(loaded.volume.origin(), [-10.0, -20.0, 2.5]);
        assert_eq!(loaded.volume.voxel([0, 0, 0]), Some(&10));
        assert_eq!(loaded.volume.voxel([2, 1, 1]), Some(&20));
        assert_eq!(loaded.identity.name, "DOE JANE");
        assert_eq!(loaded.identity.id, "N/A");
    }

    #[test]
    fn unsigned_samples_above_signed_range_saturate() {
        let objects = vec![slice_object("1.2.5", 1, 0.0, 40_000), slice_object("1.2.5", 2, 1.0, 32_767)];
        let loaded = VolumeLoader::load_from_dicom_objects(&objects, SortBy::ImagePositionPatient)
            .expect("series loads");

        assert_eq!(loaded.volume.voxel([0, 0, 0]), Some(&i16::MAX));
        assert_eq!(loaded.volume.voxel([2, 1, 1]), Some(&i16::MAX));
        assert_eq!(saturate_voxel(-40_000), i16::MIN);
    }

    #[test]
    fn objects_without_series_uid_do_not_take_over_selection() {
        let mut stray = slice_object("1.2.1", 1, 9.0, 900);
        assert!(stray.remove_element(tags::SERIES_INSTANCE_UID));
        let objects = vec![stray, slice_object("1.2.5", 1, 0.0, 10)];

        let loaded = VolumeLoader::load_from_dicom_objects(&objects, SortBy::ImagePositionPatient)
            .expect("series loads");
        assert_eq!(loaded.volume.dimensions(), [3, 2, 1]);
        assert_eq!(loaded.volume.voxel([0, 0, 0]), Some(&10));

        let only_stray = vec![objects[0].clone()];
        let loaded = VolumeLoader::load_from_dicom_objects(&only_stray, SortBy::ImagePositionPatient)
            .expect("UID-less objects still load");
        assert_eq!(loaded.volume.voxel([0, 0, 0]), Some(&900));
    }

    #[test]
    fn empty_directory_has_no_series() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("notes.txt"), "not dicom").expect("write file");
        assert!(matches!(
            VolumeLoader::load_from_directory(dir.path(), SortBy::default()),
            Err(VolumeLoaderError::NoSeriesFound)
        ));
    }

    #[test]
    fn corrupt_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("broken.DCM"), b"garbage").expect("write file");
        assert!(matches!(
            VolumeLoader::load_from_directory(dir.path(), SortBy::default()),
            Err(VolumeLoaderError::ReadError(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            DicomDirectorySource::default().load(&dir.path().join("missing")),
            Err(VolumeLoaderError::Io(_))
        ));
    }
}
