//! # DICOM-MPR library
//!
//! This crate provides the navigation core of a multi-planar reconstruction
//! (MPR) viewer for 3-D scalar volumes such as CT or MR series.

//!
//! A loaded volume is shown in three orthogonal views:
//!  - Sagittal (normal along X)
//!  - Coronal (normal along Y)
//!  - Axial (normal along Z)
//!
//!  plus an optional composite 3-D view. The [`SyncController`] keeps the
//!  slice and window/level state of all views consistent no matter where a
//!  change originates (sliders, mouse picks, volume loads), and swallows the
//!  notifications that bound sliders and surfaces echo back when the
//!  controller writes to them. On top of that the crate offers:
//!   - cross-hair navigation: a click in one view moves the other two
//!   - label-mask overlays with a discrete color lookup, kept on the
//!     current slice of every view
//!   - per-view annotations (identity, slice position, window/level)
//!   - two-point distance measurement
//!
//!  Rendering and UI toolkits plug in through the traits of [`surface`];
//!  [`headless::SnapshotSurface`] renders views into memory.
//!
//! # Examples
//!
//! ## Opening a DICOM directory and moving the cross-hair
//!
//! Read the first series of the dicom/ directory, bind an off-screen axial
//! view, then click into it and save what it shows.
//!
//! ```no_run
//! # use dicom_mpr::{Axis, Navigator, NavigatorConfig, ScreenPos, SnapshotSurface};
//! # use std::path::Path;
//! let mut navigator = Navigator::new(NavigatorConfig::default());
//! let axial = SnapshotSurface::new(Axis::Axial);
//! navigator
//!     .controller()
//!     .bind_surface(Axis::Axial, Box::new(axial.clone()));
//! navigator
//!     .on_open_volume(Path::new("dicom"))
//!     .expect("should have loaded a series from directory");
//! navigator.on_pick_event(Axis::Axial, ScreenPos::new(120.0, 200.0));
//! axial.save("axial.png").expect("should have written the axial view");
//! ```

pub mod annotation;
pub mod config;
pub mod coords;
pub mod enums;
pub mod headless;
pub mod identity;
mod interpolator;
pub mod mask_loader;
pub mod measure;
pub mod navigator;
pub mod overlay;
pub mod picker;
pub mod surface;
pub mod sync;
pub mod view_state;
pub mod volume;
pub mod volume_loader;

pub use config::NavigatorConfig;
pub use enums::{Axis, Interpolation, SortBy, WindowLevelComponent};
pub use headless::SnapshotSurface;
pub use navigator::{Navigator, NavigatorError, PickOutcome};
pub use surface::ScreenPos;
pub use sync::{Change, SyncController};
pub use view_state::WindowLevel;
pub use volume::{LabelVolume, VolumeGrid};
