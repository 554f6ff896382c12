use crate::config::NavigatorConfig;
use crate::coords::WorldPoint;
use crate::enums::{Axis, WindowLevelComponent};
use crate::mask_loader::{MaskLoader, MaskLoaderError, MaskSource};
use crate::measure::{DistanceTool, Measurement};
use crate::picker::CrosshairPicker;
use crate::surface::{AdvisoryLevel, AdvisorySink, NoAdvisories, ScreenPos};
use crate::sync::{Change, MaskReport, SyncController};
use crate::view_state::WindowLevel;
use crate::volume_loader::{DicomDirectorySource, VolumeLoaderError, VolumeSource};

use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum NavigatorError {
    #[error("No volume is loaded")]
    NoVolumeLoaded,

    #[error(transparent)]
    Load(#[from] VolumeLoaderError),

    #[error(transparent)]
    Mask(#[from] MaskLoaderError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickOutcome {
    /// All three views moved to these (x, y, z) slices.
    Crosshair([usize; 3]),
    /// First endpoint of a measurement placed.
    MeasurementStarted(WorldPoint),
    Measured(Measurement),
    /// The click hit nothing or no volume is loaded.
    Missed,
}

/// Entry points for the UI layer. Each event maps onto one controller or
/// picker operation; failures are reported to the advisory sink and returned.
pub struct Navigator {
    controller: Rc<SyncController>,
    volumes: Box<dyn VolumeSource>,
    masks: Box<dyn MaskSource>,
    advisories: Box<dyn AdvisorySink>,
    distance: DistanceTool,
}

impl Navigator {
    /// A navigator reading DICOM directories and NIfTI/DICOM masks.
    pub fn new(config: NavigatorConfig) -> Self {
        let volumes = DicomDirectorySource {
            sort_by: config.sort_by,
        };
        Self::with_sources(config, Box::new(volumes), Box::new(MaskLoader))
    }

    pub fn with_sources(
        config: NavigatorConfig,
        volumes: Box<dyn VolumeSource>,
        masks: Box<dyn MaskSource>,
    ) -> Self {
        Self {
            controller: Rc::new(SyncController::new(config)),
            volumes,
            masks,
            advisories: Box::new(NoAdvisories),
            distance: DistanceTool::default(),
        }
    }

    pub fn set_advisory_sink(&mut self, sink: Box<dyn AdvisorySink>) {
        self.advisories = sink;
    }

    /// The controller, for binding surfaces and controls.
    pub fn controller(&self) -> &Rc<SyncController> {
        &self.controller
    }

    /// Loads the volume at `path` and replaces the current session. On
    /// failure the current session is left untouched.
    pub fn on_open_volume(&mut self, path: &Path) -> Result<(), NavigatorError> {
        let loaded = match self.volumes.load(path) {
            Ok(loaded) => loaded,
            Err(err) => {
                let level = match err {
                    VolumeLoaderError::NoSeriesFound => AdvisoryLevel::Warning,
                    _ => AdvisoryLevel::Error,
                };
                self.advise(level, &err.to_string());
                return Err(err.into());
            }
        };
        info!(path = %path.display(), patient = %loaded.identity.name, "Opening volume");
        self.distance.clear();
        self.controller.initialize_session(loaded.volume, loaded.identity);
        Ok(())
    }

    /// Loads a label mask and overlays it on the current volume. A dimension
    /// mismatch is reported as a warning but the mask is still shown.
    pub fn on_load_mask(&mut self, path: &Path) -> Result<MaskReport, NavigatorError> {
        if !self.controller.has_session() {
            return Err(self.reject_without_volume("Open a volume before loading a mask"));
        }
        let labels = match self.masks.load(path) {
            Ok(labels) => labels,
            Err(err) => {
                self.advise(AdvisoryLevel::Error, &err.to_string());
                return Err(err.into());
            }
        };
        let Some(report) = self.controller.load_mask(labels) else {
            return Err(self.reject_without_volume("Open a volume before loading a mask"));
        };
        if let Some(mismatch) = &report.mismatch {
            self.advise(AdvisoryLevel::Warning, &mismatch.to_string());
        }
        Ok(report)
    }

    pub fn on_slider_changed(&self, axis: Axis, value: i64) -> Change<usize> {
        self.controller.on_slider_changed(axis, value)
    }

    pub fn on_window_level_slider_changed(
        &self,
        component: WindowLevelComponent,
        value: f64,
    ) -> Change<WindowLevel> {
        self.controller.on_window_level_slider_changed(component, value)
    }

    /// Enables or disables the distance tool. Enabling requires an open volume.
    pub fn on_measure_toggled(&mut self, enabled: bool) -> Result<(), NavigatorError> {
        if enabled && !self.controller.has_session() {
            return Err(self.reject_without_volume("Open a volume before measuring"));
        }
        self.distance.set_enabled(enabled);
        Ok(())
    }

    /// A click in the view of `axis`: places a measurement point while the
    /// distance tool is on, moves the cross-hair otherwise.
    pub fn on_pick_event(&mut self, axis: Axis, position: ScreenPos) -> PickOutcome {
        if !self.distance.is_enabled() {
            return CrosshairPicker::handle_pick(&self.controller, axis, position)
                .map_or(PickOutcome::Missed, PickOutcome::Crosshair);
        }
        let Some(point) = self.controller.pick(axis, position) else {
            return PickOutcome::Missed;
        };
        match self.distance.place(axis, point) {
            Some(measurement) => {
                info!(%axis, length = measurement.length(), "Measured distance");
                PickOutcome::Measured(measurement)
            }
            None => PickOutcome::MeasurementStarted(point),
        }
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        self.distance.last()
    }

    fn reject_without_volume(&mut self, message: &str) -> NavigatorError {
        self.advise(AdvisoryLevel::Warning, message);
        NavigatorError::NoVolumeLoaded
    }

    fn advise(&mut self, level: AdvisoryLevel, message: &str) {
        match level {
            AdvisoryLevel::Error => error!("{message}"),
            AdvisoryLevel::Warning => warn!("{message}"),
            AdvisoryLevel::Information => info!("{message}"),
        }
        self.advisories.advise(level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PatientIdentity;
    use crate::sync::tests::{EchoingSurface, Shared, volume};
    use crate::volume::{LabelVolume, VolumeGrid};
    use crate::volume_loader::LoadedSeries;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Serves volumes keyed by path; unknown paths have no series.
    struct FixtureVolumes(HashMap<PathBuf, [usize; 3]>);

    impl VolumeSource for FixtureVolumes {
        fn load(&self, path: &Path) -> Result<LoadedSeries, VolumeLoaderError> {
            match path.to_str() {
                Some("unreadable") => Err(VolumeLoaderError::ReadError("truncated file".into())),
                _ => self
                    .0
                    .get(path)
                    .map(|&dimensions| LoadedSeries {
                        volume: volume(dimensions),
                        identity: PatientIdentity::new(Some("DOE^JOHN"), Some("42")),
                    })
                    .ok_or(VolumeLoaderError::NoSeriesFound),
            }
        }
    }

    struct FixtureMasks;

    impl MaskSource for FixtureMasks {
        fn load(&self, path: &Path) -> Result<LabelVolume, MaskLoaderError> {
            let dimensions = match path.to_str() {
                Some("small") => [4, 4, 2],
                Some("full") => [10, 10, 10],
                _ => return Err(MaskLoaderError::UnsupportedFormat(path.display().to_string())),
            };
            let len: usize = dimensions.iter().product();
            VolumeGrid::from_vec(dimensions, [1.0; 3], [0.0; 3], vec![1; len])
                .map_err(|err| MaskLoaderError::ReadError(err.to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct CollectedAdvisories(Rc<RefCell<Vec<(AdvisoryLevel, String)>>>);

    impl AdvisorySink for CollectedAdvisories {
        fn advise(&mut self, level: AdvisoryLevel, message: &str) {
            self.0.borrow_mut().push((level, message.to_string()));
        }
    }

    fn navigator() -> (Navigator, CollectedAdvisories) {
        let volumes = FixtureVolumes(HashMap::from([
            (PathBuf::from("head"), [10, 10, 10]),
            (PathBuf::from("chest"), [256, 256, 100]),
        ]));
        let mut navigator = Navigator::with_sources(
            NavigatorConfig::default(),
            Box::new(volumes),
            Box::new(FixtureMasks),
        );
        let advisories = CollectedAdvisories::default();
        navigator.set_advisory_sink(Box::new(advisories.clone()));
        (navigator, advisories)
    }

    #[test]
    fn opening_a_volume_starts_mid_volume() {
        let (mut navigator, advisories) = navigator();
        navigator.on_open_volume(Path::new("chest")).expect("volume opens");
        let controller = navigator.controller();
        assert_eq!(controller.slice(Axis::Axial), Some(50));
        assert_eq!(controller.slice(Axis::Sagittal), Some(128));
        assert_eq!(controller.slice(Axis::Coronal), Some(128));
        assert!(advisories.0.borrow().is_empty());
    }

    #[test]
    fn failed_open_keeps_current_session() {
        let (mut navigator, advisories) = navigator();
        navigator.on_open_volume(Path::new("head")).expect("volume opens");
        navigator.on_slider_changed(Axis::Axial, 2);

        assert!(matches!(
            navigator.on_open_volume(Path::new("missing")),
            Err(NavigatorError::Load(VolumeLoaderError::NoSeriesFound))
        ));
        assert!(matches!(
            navigator.on_open_volume(Path::new("unreadable")),
            Err(NavigatorError::Load(VolumeLoaderError::ReadError(_)))
        ));
        assert_eq!(navigator.controller().slice(Axis::Axial), Some(2));

        let advisories = advisories.0.borrow();
        assert_eq!(advisories.len(), 2);
        assert_eq!(advisories[0].0, AdvisoryLevel::Warning);
        assert_eq!(advisories[1].0, AdvisoryLevel::Error);
    }

    #[test]
    fn mismatched_mask_warns_and_navigation_continues() {
        let (mut navigator, advisories) = navigator();
        navigator.on_open_volume(Path::new("head")).expect("volume opens");

        let report = navigator.on_load_mask(Path::new("small")).expect("mask loads");
        assert!(report.mismatch.is_some());
        assert_eq!(advisories.0.borrow()[0].0, AdvisoryLevel::Warning);

        assert_eq!(navigator.on_slider_changed(Axis::Axial, 9), Change::Applied(9));
        assert_eq!(navigator.on_slider_changed(Axis::Coronal, 0), Change::Applied(0));
    }

    #[test]
    fn mask_and_measure_need_a_volume() {
        let (mut navigator, advisories) = navigator();
        assert!(matches!(
            navigator.on_load_mask(Path::new("full")),
            Err(NavigatorError::NoVolumeLoaded)
        ));
        assert!(matches!(
            navigator.on_measure_toggled(true),
            Err(NavigatorError::NoVolumeLoaded)
        ));
        assert!(navigator.on_measure_toggled(false).is_ok());
        assert_eq!(advisories.0.borrow().len(), 2);
    }

    #[test]
    fn bad_mask_is_reported() {
        let (mut navigator, advisories) = navigator();
        navigator.on_open_volume(Path::new("head")).expect("volume opens");
        assert!(matches!(
            navigator.on_load_mask(Path::new("mask.png")),
            Err(NavigatorError::Mask(MaskLoaderError::UnsupportedFormat(_)))
        ));
        assert_eq!(advisories.0.borrow()[0].0, AdvisoryLevel::Error);
        assert!(navigator.controller().with_session(|s| s.overlay().is_none()).unwrap_or(false));
    }

    #[test]
    fn picks_move_crosshair_or_measure() {
        let (mut navigator, _) = navigator();
        let recorder = Shared::default();
        let mut surface = EchoingSurface::new(Axis::Axial, navigator.controller(), &recorder);
        surface.pick_result = Some([2.0, 3.0, 5.0]);
        navigator.controller().bind_surface(Axis::Axial, Box::new(surface));
        navigator.on_open_volume(Path::new("head")).expect("volume opens");

        assert_eq!(
            navigator.on_pick_event(Axis::Axial, ScreenPos::new(2.0, 3.0)),
            PickOutcome::Crosshair([2, 3, 5])
        );

        navigator.on_measure_toggled(true).expect("volume open");
        assert_eq!(
            navigator.on_pick_event(Axis::Axial, ScreenPos::new(2.0, 3.0)),
            PickOutcome::MeasurementStarted([2.0, 3.0, 5.0])
        );
        assert!(matches!(
            navigator.on_pick_event(Axis::Axial, ScreenPos::new(2.0, 3.0)),
            PickOutcome::Measured(m) if m.length() == 0.0
        ));
        assert!(navigator.measurement().is_some());
        assert_eq!(
            navigator.on_pick_event(Axis::Coronal, ScreenPos::new(0.0, 0.0)),
            PickOutcome::Missed
        );

        navigator.on_open_volume(Path::new("head")).expect("volume opens");
        assert!(navigator.measurement().is_none());
    }
}
