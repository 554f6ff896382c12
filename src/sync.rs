//! The slice/contrast synchronization state machine.
//!
//! [`SyncController`] owns the live [`NavigatorSession`] and is the only place
//! where view state is mutated. Every mutation is published synchronously to a
//! fixed set of bound effects: the rendering surface and slider of the axis,
//! the composite 3-D view, the overlay window and the annotations.
//!
//! Bound surfaces and controls commonly report the values written to them as
//! if they were user input (a slider's value-changed signal, a viewer's
//! slice-changed event). While the controller writes downward to an axis it
//! holds a suppression guard for that axis, and any notification arriving
//! for it in that scope is answered with [`Change::Echo`] and ignored.
//!
//! A hook may also report a genuine change, e.g. a linked plane moving
//! another axis. Such a change is applied to the session at once, and its
//! publication is queued behind the one in progress.

use crate::annotation::{AnnotationFormatter, Annotations};
use crate::config::NavigatorConfig;
use crate::coords::WorldPoint;
use crate::enums::{Axis, WindowLevelComponent};
use crate::identity::PatientIdentity;
use crate::overlay::{DimensionMismatch, DisplayWindow, MaskOverlayPipeline, OverlayHandle};
use crate::surface::{CompositeView, ScreenPos, SliceControl, SliceSurface, WindowLevelControl};
use crate::view_state::{ViewState, WindowLevel};
use crate::volume::{LabelVolume, VolumeGrid};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tracing::{debug, info, trace};

/// Result of a change request or notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change<T> {
    /// The state changed to the contained value and was published.
    Applied(T),
    /// The (clamped) request matched the current value; nothing was published.
    Unchanged(T),
    /// The notification was caused by the controller's own write and was ignored.
    Echo,
    /// No volume is loaded.
    NoSession,
}

impl<T> Change<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Change::Applied(_))
    }
}

/// State of one loaded volume: the grid, identity, the three views and an
/// optional mask overlay.
pub struct NavigatorSession {
    volume: Rc<VolumeGrid>,
    identity: PatientIdentity,
    views: [ViewState; 3],
    overlay: Option<MaskOverlayPipeline>,
}

impl NavigatorSession {
    fn new(volume: VolumeGrid, identity: PatientIdentity, window_level: WindowLevel) -> Self {
        let views = Axis::ALL.map(|axis| ViewState::new(axis, volume.extent(axis), window_level));
        Self {
            volume: Rc::new(volume),
            identity,
            views,
            overlay: None,
        }
    }

    pub fn volume(&self) -> &VolumeGrid {
        &self.volume
    }

    pub fn volume_handle(&self) -> Weak<VolumeGrid> {
        Rc::downgrade(&self.volume)
    }

    pub fn identity(&self) -> &PatientIdentity {
        &self.identity
    }

    pub fn view(&self, axis: Axis) -> &ViewState {
        &self.views[axis.index()]
    }

    pub fn overlay(&self) -> Option<&MaskOverlayPipeline> {
        self.overlay.as_ref()
    }

    pub fn annotations(&self, axis: Axis) -> Annotations {
        AnnotationFormatter::format(self.view(axis), &self.identity, axis.label())
    }

    /// Current slice of every axis, (x, y, z).
    pub fn slices(&self) -> [usize; 3] {
        self.views.each_ref().map(ViewState::slice)
    }
}

/// Outcome of loading a mask into the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskReport {
    /// Size of the color lookup, i.e. highest label + 1.
    pub table_size: usize,
    pub mismatch: Option<DimensionMismatch>,
}

#[derive(Default)]
struct ViewBindings {
    surfaces: [Option<Box<dyn SliceSurface>>; 3],
    controls: [Option<Box<dyn SliceControl>>; 3],
    window_level_control: Option<Box<dyn WindowLevelControl>>,
    composite: Option<Box<dyn CompositeView>>,
}

/// A view or control handed to the controller.
enum Binding {
    Surface(Axis, Box<dyn SliceSurface>),
    Control(Axis, Box<dyn SliceControl>),
    WindowLevelControl(Box<dyn WindowLevelControl>),
    Composite(Box<dyn CompositeView>),
}

/// Work for the bound views, delivered in the order it was queued.
enum Publication {
    Bind(Binding),
    Detach,
    Slice(Axis, SliceUpdate),
    WindowLevel(WindowLevel, [Annotations; 3]),
    View(Axis),
    Composite,
    WindowLevelControl,
}

#[derive(Default)]
struct EchoSuppressor {
    slices: [Cell<u32>; 3],
    window_level: Cell<u32>,
}

impl EchoSuppressor {
    fn slice(&self, axis: Axis) -> DepthGuard<'_> {
        DepthGuard::engage(&self.slices[axis.index()])
    }

    fn window_level(&self) -> DepthGuard<'_> {
        DepthGuard::engage(&self.window_level)
    }

    fn is_slice_suppressed(&self, axis: Axis) -> bool {
        self.slices[axis.index()].get() > 0
    }

    fn is_window_level_suppressed(&self) -> bool {
        self.window_level.get() > 0
    }
}

/// Increments a depth counter until dropped.
struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> DepthGuard<'a> {
    fn engage(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Everything a slice change publishes, computed while the session is borrowed.
struct SliceUpdate {
    slice: usize,
    overlay_window: Option<Option<DisplayWindow>>,
    annotations: Annotations,
}

/// Everything needed to bring one bound view in line with the session.
struct ViewSnapshot {
    volume: Weak<VolumeGrid>,
    slice: usize,
    slice_min: usize,
    slice_max: usize,
    window_level: WindowLevel,
    overlay: Option<(OverlayHandle, Option<DisplayWindow>)>,
    annotations: Annotations,
}

/// Single owner of the live session and the bindings to the views showing it.
///
/// All methods take `&self` so that bound surfaces and controls may call back
/// into the controller while it is publishing. Work started from inside a
/// hook is queued and delivered once the hook returns.
pub struct SyncController {
    config: NavigatorConfig,
    session: RefCell<Option<NavigatorSession>>,
    bindings: RefCell<ViewBindings>,
    echo: EchoSuppressor,
    pending: RefCell<VecDeque<Publication>>,
    delivering: Cell<u32>,
}

impl SyncController {
    pub fn new(config: NavigatorConfig) -> Self {
        Self {
            config,
            session: RefCell::new(None),
            bindings: RefCell::new(ViewBindings::default()),
            echo: EchoSuppressor::default(),
            pending: RefCell::new(VecDeque::new()),
            delivering: Cell::new(0),
        }
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    pub fn bind_surface(&self, axis: Axis, surface: Box<dyn SliceSurface>) {
        self.publish(Publication::Bind(Binding::Surface(axis, surface)));
    }

    pub fn bind_control(&self, axis: Axis, control: Box<dyn SliceControl>) {
        self.publish(Publication::Bind(Binding::Control(axis, control)));
    }

    pub fn bind_window_level_control(&self, control: Box<dyn WindowLevelControl>) {
        self.publish(Publication::Bind(Binding::WindowLevelControl(control)));
    }

    pub fn bind_composite(&self, composite: Box<dyn CompositeView>) {
        self.publish(Publication::Bind(Binding::Composite(composite)));
    }

    pub fn has_session(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Runs `f` on the live session, if any.
    pub fn with_session<R>(&self, f: impl FnOnce(&NavigatorSession) -> R) -> Option<R> {
        self.session.borrow().as_ref().map(f)
    }

    pub fn slice(&self, axis: Axis) -> Option<usize> {
        self.with_session(|session| session.view(axis).slice())
    }

    pub fn window_level(&self) -> Option<WindowLevel> {
        self.with_session(|session| session.view(Axis::Axial).window_level())
    }

    pub fn annotations(&self, axis: Axis) -> Option<Annotations> {
        self.with_session(|session| session.annotations(axis))
    }

    /// Replaces the live session with one for `volume`.
    ///
    /// Views are detached from the old volume first, the new session is
    /// swapped in, the old one is released and only then are the views bound
    /// again, each starting on its middle slice with the default window/level.
    pub fn initialize_session(&self, volume: VolumeGrid, identity: PatientIdentity) {
        self.publish(Publication::Detach);

        let window_level = WindowLevel::new(
            self.config.default_window,
            self.config.default_level,
            self.config.min_window,
        );
        let session = NavigatorSession::new(volume, identity, window_level);
        info!(
            dimensions = ?session.volume().dimensions(),
            spacing = ?session.volume().spacing(),
            slices = ?session.slices(),
            "Initialized session"
        );

        let previous = self.session.replace(Some(session));
        drop(previous);

        for axis in Axis::ALL {
            self.publish(Publication::View(axis));
        }
        self.publish(Publication::Composite);
        self.publish(Publication::WindowLevelControl);
    }

    /// Moves `axis` to `index`, clamped to its slice range, and publishes the
    /// change if the slice actually moved.
    pub fn request_slice_change(&self, axis: Axis, index: i64) -> Change<usize> {
        let update = {
            let mut session = self.session.borrow_mut();
            let Some(session) = session.as_mut() else {
                return Change::NoSession;
            };
            let view = &mut session.views[axis.index()];
            if !view.set_slice(index) {
                return Change::Unchanged(view.slice());
            }
            let slice = view.slice();
            let overlay_window = session
                .overlay
                .as_mut()
                .map(|overlay| overlay.set_slice_window(axis, slice));
            SliceUpdate {
                slice,
                overlay_window,
                annotations: session.annotations(axis),
            }
        };

        trace!(%axis, requested = index, slice = update.slice, "Slice changed");
        let slice = update.slice;
        self.publish(Publication::Slice(axis, update));
        Change::Applied(slice)
    }

    /// A slider of `axis` reported `value`.
    pub fn on_slider_changed(&self, axis: Axis, value: i64) -> Change<usize> {
        if self.echo.is_slice_suppressed(axis) {
            trace!(%axis, value, "Swallowed slider echo");
            return Change::Echo;
        }
        self.request_slice_change(axis, value)
    }

    /// A surface of `axis` reports that its slice was moved by direct
    /// manipulation (mouse wheel, keyboard).
    pub fn on_surface_slice_changed(&self, axis: Axis, index: i64) -> Change<usize> {
        if self.echo.is_slice_suppressed(axis) {
            trace!(%axis, index, "Swallowed surface echo");
            return Change::Echo;
        }
        self.request_slice_change(axis, index)
    }

    /// Applies a window/level to all three views. Widths below the configured
    /// minimum are raised to it.
    pub fn request_window_level_change(&self, window: f64, level: f64) -> Change<WindowLevel> {
        let window_level = WindowLevel::new(window, level, self.config.min_window);
        let annotations = {
            let mut session = self.session.borrow_mut();
            let Some(session) = session.as_mut() else {
                return Change::NoSession;
            };
            if session.views.iter().all(|v| v.window_level() == window_level) {
                return Change::Unchanged(window_level);
            }
            for view in session.views.iter_mut() {
                view.window_level = window_level;
            }
            Axis::ALL.map(|axis| session.annotations(axis))
        };

        debug!(window = window_level.window, level = window_level.level, "Window/level changed");
        self.publish(Publication::WindowLevel(window_level, annotations));
        Change::Applied(window_level)
    }

    /// One of the window/level sliders reported `value`.
    pub fn on_window_level_slider_changed(
        &self,
        component: WindowLevelComponent,
        value: f64,
    ) -> Change<WindowLevel> {
        if self.echo.is_window_level_suppressed() {
            trace!(?component, value, "Swallowed window/level slider echo");
            return Change::Echo;
        }
        let Some(current) = self.window_level() else {
            return Change::NoSession;
        };
        match component {
            WindowLevelComponent::Window => self.request_window_level_change(value, current.level),
            WindowLevelComponent::Level => self.request_window_level_change(current.window, value),
        }
    }

    /// A surface reports a window/level drag.
    pub fn on_surface_window_level_changed(&self, window_level: WindowLevel) -> Change<WindowLevel> {
        if self.echo.is_window_level_suppressed() {
            trace!(?window_level, "Swallowed surface window/level echo");
            return Change::Echo;
        }
        self.request_window_level_change(window_level.window, window_level.level)
    }

    /// Replaces the session's overlay with one built from `labels`. `None`
    /// when no volume is loaded.
    pub fn load_mask(&self, labels: LabelVolume) -> Option<MaskReport> {
        let report = {
            let mut session = self.session.borrow_mut();
            let session = session.as_mut()?;
            let mut overlay = MaskOverlayPipeline::load(labels, session.volume(), &self.config.overlay);
            for axis in Axis::ALL {
                overlay.set_slice_window(axis, session.view(axis).slice());
            }
            let report = MaskReport {
                table_size: overlay.lookup().len(),
                mismatch: overlay.mismatch().copied(),
            };
            session.overlay = Some(overlay);
            report
        };

        info!(table_size = report.table_size, degenerate = report.mismatch.is_some(), "Loaded mask");
        for axis in Axis::ALL {
            self.publish(Publication::View(axis));
        }
        Some(report)
    }

    /// Asks the surface of `axis` to resolve a screen position.
    pub fn pick(&self, axis: Axis, position: ScreenPos) -> Option<WorldPoint> {
        let bindings = self.bindings.try_borrow().ok()?;
        bindings.surfaces[axis.index()].as_ref()?.pick(position)
    }

    /// Queues `publication` and delivers the queue, unless a delivery further
    /// up the stack is already draining it.
    fn publish(&self, publication: Publication) {
        self.pending.borrow_mut().push_back(publication);
        if self.delivering.get() > 0 {
            return;
        }
        let _delivering = DepthGuard::engage(&self.delivering);
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(publication) = next else {
                break;
            };
            self.deliver(publication);
        }
    }

    fn deliver(&self, publication: Publication) {
        match publication {
            Publication::Bind(binding) => self.install(binding),
            Publication::Detach => self.detach_views(),
            Publication::Slice(axis, update) => self.publish_slice(axis, &update),
            Publication::WindowLevel(window_level, annotations) => {
                self.publish_window_level(window_level, &annotations)
            }
            Publication::View(axis) => self.sync_view(axis),
            Publication::Composite => self.sync_composite(),
            Publication::WindowLevelControl => self.sync_window_level_control(),
        }
    }

    /// Stores a binding and brings it in line with the session before any
    /// other queued work.
    fn install(&self, binding: Binding) {
        let follow_up = {
            let mut bindings = self.bindings.borrow_mut();
            match binding {
                Binding::Surface(axis, surface) => {
                    bindings.surfaces[axis.index()] = Some(surface);
                    Publication::View(axis)
                }
                Binding::Control(axis, control) => {
                    bindings.controls[axis.index()] = Some(control);
                    Publication::View(axis)
                }
                Binding::WindowLevelControl(control) => {
                    bindings.window_level_control = Some(control);
                    Publication::WindowLevelControl
                }
                Binding::Composite(composite) => {
                    bindings.composite = Some(composite);
                    Publication::Composite
                }
            }
        };
        self.pending.borrow_mut().push_front(follow_up);
    }

    fn publish_slice(&self, axis: Axis, update: &SliceUpdate) {
        let _guard = self.echo.slice(axis);
        let mut bindings = self.bindings.borrow_mut();
        let i = axis.index();

        if let Some(surface) = bindings.surfaces[i].as_mut() {
            surface.set_slice(update.slice);
            if let Some(window) = update.overlay_window {
                surface.set_overlay_window(window);
            }
            surface.set_annotations(&update.annotations);
            surface.render();
        }
        if let Some(control) = bindings.controls[i].as_mut() {
            control.set_value(update.slice);
        }
        if let Some(composite) = bindings.composite.as_mut() {
            composite.set_plane(axis, update.slice);
            composite.render();
        }
    }

    fn publish_window_level(&self, window_level: WindowLevel, annotations: &[Annotations; 3]) {
        let _guard = self.echo.window_level();
        let mut bindings = self.bindings.borrow_mut();

        for (surface, annotations) in bindings.surfaces.iter_mut().zip(annotations) {
            if let Some(surface) = surface.as_mut() {
                surface.set_window_level(window_level);
                surface.set_annotations(annotations);
                surface.render();
            }
        }
        if let Some(control) = bindings.window_level_control.as_mut() {
            control.set_window_level(window_level);
        }
        if let Some(composite) = bindings.composite.as_mut() {
            composite.set_window_level(window_level);
            composite.render();
        }
    }

    fn detach_views(&self) {
        let _window_level = self.echo.window_level();
        let _guards = Axis::ALL.map(|axis| self.echo.slice(axis));
        let mut bindings = self.bindings.borrow_mut();

        for surface in bindings.surfaces.iter_mut().flatten() {
            surface.attach_overlay(None);
            surface.attach_volume(None);
        }
        if let Some(composite) = bindings.composite.as_mut() {
            composite.attach_volume(None);
        }
    }

    fn snapshot(&self, axis: Axis) -> Option<ViewSnapshot> {
        self.with_session(|session| {
            let view = session.view(axis);
            ViewSnapshot {
                volume: session.volume_handle(),
                slice: view.slice(),
                slice_min: view.slice_min(),
                slice_max: view.slice_max(),
                window_level: view.window_level(),
                overlay: session
                    .overlay()
                    .map(|overlay| (overlay.handle(), overlay.display_window(axis))),
                annotations: session.annotations(axis),
            }
        })
    }

    /// Pushes the complete state of `axis` to its bound surface and slider.
    fn sync_view(&self, axis: Axis) {
        let Some(snapshot) = self.snapshot(axis) else {
            return;
        };
        let _guard = self.echo.slice(axis);
        let _window_level = self.echo.window_level();
        let mut bindings = self.bindings.borrow_mut();
        let i = axis.index();

        if let Some(control) = bindings.controls[i].as_mut() {
            control.set_range(snapshot.slice_min, snapshot.slice_max);
            control.set_value(snapshot.slice);
        }
        if let Some(surface) = bindings.surfaces[i].as_mut() {
            surface.attach_volume(Some(snapshot.volume));
            surface.set_slice(snapshot.slice);
            surface.set_window_level(snapshot.window_level);
            match snapshot.overlay {
                Some((handle, window)) => {
                    surface.attach_overlay(Some(handle));
                    surface.set_overlay_window(window);
                }
                None => {
                    surface.attach_overlay(None);
                    surface.set_overlay_window(None);
                }
            }
            surface.set_annotations(&snapshot.annotations);
            surface.render();
        }
    }

    fn sync_composite(&self) {
        let Some((volume, slices, window_level)) = self.with_session(|session| {
            (
                session.volume_handle(),
                session.slices(),
                session.view(Axis::Axial).window_level(),
            )
        }) else {
            return;
        };
        let _window_level = self.echo.window_level();
        let _guards = Axis::ALL.map(|axis| self.echo.slice(axis));
        let mut bindings = self.bindings.borrow_mut();
        if let Some(composite) = bindings.composite.as_mut() {
            composite.attach_volume(Some(volume));
            for axis in Axis::ALL {
                composite.set_plane(axis, slices[axis.index()]);
            }
            composite.set_window_level(window_level);
            composite.render();
        }
    }

    fn sync_window_level_control(&self) {
        let Some(window_level) = self.window_level() else {
            return;
        };
        let _guard = self.echo.window_level();
        if let Some(control) = self.bindings.borrow_mut().window_level_control.as_mut() {
            control.set_window_level(window_level);
        }
    }
}
