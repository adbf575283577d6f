//! Windows and their lifecycle.
//!
//! A [`Window`] is a handle to per-window state stored in the display.
//! Depending on its type and hints it is realized as an xdg_toplevel, an
//! xdg_popup or a wl_subsurface when shown, and torn back down when hidden.
//! Contents are painted into shared-memory buffers which rotate through the
//! commit/release cycle tracked in [`buffers`].

pub(crate) mod buffers;
pub mod configure;
pub(crate) mod handlers;
pub(crate) mod role;

use bitflags::bitflags;
use smallvec::SmallVec;
use tracing::warn;
use wayland_client::backend::ObjectId;
use wayland_client::protocol::wl_output::WlOutput;
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_client::Proxy;
use wayland_protocols::xdg::foreign::zv1::client::zxdg_exported_v1::ZxdgExportedV1;
use wayland_protocols::xdg::foreign::zv1::client::zxdg_imported_v1::ZxdgImportedV1;
use wayland_protocols::xdg::shell::client::{xdg_popup, xdg_surface, xdg_toplevel};
use wayland_protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibitor_v1::ZwpKeyboardShortcutsInhibitorV1;
use wayland_protocols_plasma::server_decoration::client::org_kde_kwin_server_decoration::OrgKdeKwinServerDecoration;

use crate::frame::FrameTimings;
use crate::positioner::{MoveToRect, MovedToRectResult};
use crate::protocols::ctk_shell1::ctk_surface1::CtkSurface1;
use crate::protocols::xdg_shell_v6::{zxdg_popup_v6, zxdg_surface_v6, zxdg_toplevel_v6};
use crate::registry::{BackendError, DisplayInner, WaylandDisplay};
use crate::shm::ShmBuffer;
use crate::utils::{
    clamp_surface_size, truncate_at_char_boundary, Rectangle, Region, MAX_WL_BUFFER_SIZE,
};

use self::buffers::BufferSlots;
use self::configure::PendingConfigure;

/// Identifies a window for the lifetime of its display connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub(crate) u32);

bitflags! {
    /// The visible state of a window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowStateMask: u32 {
        const ICONIFIED = 1 << 1;
        const MAXIMIZED = 1 << 2;
        const STICKY = 1 << 3;
        const FULLSCREEN = 1 << 4;
        const FOCUSED = 1 << 7;
        const TILED = 1 << 8;
        const TOP_TILED = 1 << 9;
        const TOP_RESIZABLE = 1 << 10;
        const RIGHT_TILED = 1 << 11;
        const RIGHT_RESIZABLE = 1 << 12;
        const BOTTOM_TILED = 1 << 13;
        const BOTTOM_RESIZABLE = 1 << 14;
        const LEFT_TILED = 1 << 15;
        const LEFT_RESIZABLE = 1 << 16;
    }
}

/// What kind of surface a window wants to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// A normal window, realized as an xdg_toplevel.
    Toplevel,
    /// An override-redirect style window; realized as a popup or a
    /// subsurface depending on hints and parents.
    Temp,
    /// Always a wl_subsurface of its parent.
    Subsurface,
}

/// Semantic hints refining how a window is mapped and decorated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    #[default]
    Normal,
    Dialog,
    Menu,
    Toolbar,
    Splashscreen,
    Utility,
    Dock,
    Desktop,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
}

/// Size constraints, excluding shadow margins. Only the min and max sizes
/// can be told to the compositor; increments and aspect limits are applied
/// client-side when a suggested size is adopted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeHints {
    pub min_size: Option<(i32, i32)>,
    pub max_size: Option<(i32, i32)>,
    /// Resize step in pixels per axis, counted from the minimum size.
    pub resize_increments: Option<(i32, i32)>,
    /// Allowed width/height ratio range as (min, max).
    pub aspect: Option<(f64, f64)>,
}

impl SizeHints {
    pub fn constrain(&self, width: i32, height: i32) -> (i32, i32) {
        self.constrain_with_increments(width, height, true)
    }

    /// Applies the min/max clamp, the resize increments and the aspect
    /// range, in that order. Increments are skipped while the compositor
    /// owns the size.
    pub fn constrain_with_increments(
        &self,
        width: i32,
        height: i32,
        apply_increments: bool,
    ) -> (i32, i32) {
        let (min_width, min_height) = self.min_size.unwrap_or((1, 1));
        let (max_width, max_height) = self.max_size.unwrap_or((i32::MAX, i32::MAX));
        let (base_width, base_height) = self.min_size.unwrap_or((0, 0));
        let (x_inc, y_inc) = match self.resize_increments {
            Some((x_inc, y_inc)) if apply_increments => (x_inc.max(1), y_inc.max(1)),
            _ => (1, 1),
        };

        let mut width = width.max(min_width).min(max_width);
        let mut height = height.max(min_height).min(max_height);

        // Snap down to base + n * increment.
        width = base_width + floor_to(width - base_width, x_inc);
        height = base_height + floor_to(height - base_height, y_inc);

        if let Some((min_aspect, max_aspect)) = self.aspect {
            if min_aspect > 0.0 && max_aspect > 0.0 {
                if min_aspect * height as f64 > width as f64 {
                    let delta = floor_to((height as f64 - width as f64 / min_aspect) as i32, y_inc);
                    if height - delta >= min_height {
                        height -= delta;
                    } else {
                        let delta =
                            floor_to((height as f64 * min_aspect - width as f64) as i32, x_inc);
                        if width + delta <= max_width {
                            width += delta;
                        }
                    }
                }
                if max_aspect * (height as f64) < width as f64 {
                    let delta = floor_to((width as f64 - height as f64 * max_aspect) as i32, x_inc);
                    if width - delta >= min_width {
                        width -= delta;
                    } else {
                        let delta =
                            floor_to((width as f64 / max_aspect - height as f64) as i32, y_inc);
                        if height + delta <= max_height {
                            height += delta;
                        }
                    }
                }
            }
        }

        (width, height)
    }
}

fn floor_to(value: i32, base: i32) -> i32 {
    (value / base) * base
}

/// Shadow extents around the window geometry, in logical pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowMargins {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl ShadowMargins {
    pub fn horizontal(&self) -> i32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> i32 {
        self.top + self.bottom
    }
}

/// Edges for interactive resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    NorthWest,
    North,
    NorthEast,
    West,
    East,
    SouthWest,
    South,
    SouthEast,
}

/// How the window's position was last requested.
#[derive(Debug, Clone, Default)]
pub(crate) enum PositionMethod {
    #[default]
    None,
    MoveResize,
    MoveToRect(MoveToRect),
}

/// Properties exported over the ctk_surface1 dbus bridge.
#[derive(Debug, Clone, Default)]
pub struct DbusProperties {
    pub application_id: Option<String>,
    pub app_menu_path: Option<String>,
    pub menubar_path: Option<String>,
    pub window_object_path: Option<String>,
    pub application_object_path: Option<String>,
    pub unique_bus_name: Option<String>,
}

impl DbusProperties {
    fn is_empty(&self) -> bool {
        self.application_id.is_none()
            && self.app_menu_path.is_none()
            && self.menubar_path.is_none()
            && self.window_object_path.is_none()
            && self.application_object_path.is_none()
            && self.unique_bus_name.is_none()
    }
}

/// The shell role objects a window currently holds.
#[derive(Debug, Default)]
pub(crate) enum ShellObjects {
    #[default]
    None,
    XdgToplevel {
        xdg_surface: xdg_surface::XdgSurface,
        toplevel: xdg_toplevel::XdgToplevel,
    },
    XdgPopup {
        xdg_surface: xdg_surface::XdgSurface,
        popup: xdg_popup::XdgPopup,
    },
    V6Toplevel {
        xdg_surface: zxdg_surface_v6::ZxdgSurfaceV6,
        toplevel: zxdg_toplevel_v6::ZxdgToplevelV6,
    },
    V6Popup {
        xdg_surface: zxdg_surface_v6::ZxdgSurfaceV6,
        popup: zxdg_popup_v6::ZxdgPopupV6,
    },
    Subsurface {
        subsurface: wayland_client::protocol::wl_subsurface::WlSubsurface,
    },
}

impl ShellObjects {
    pub fn is_realized_toplevel(&self) -> bool {
        matches!(self, ShellObjects::XdgToplevel { .. } | ShellObjects::V6Toplevel { .. })
    }

    pub fn is_realized_popup(&self) -> bool {
        matches!(self, ShellObjects::XdgPopup { .. } | ShellObjects::V6Popup { .. })
    }

    pub fn is_realized_shell(&self) -> bool {
        self.is_realized_toplevel() || self.is_realized_popup()
    }
}

/// Foreign handle export state.
#[derive(Debug)]
pub(crate) struct ExportedState {
    pub exported: ZxdgExportedV1,
    pub handle: Option<String>,
    pub export_count: u32,
}

/// Initial properties for a new window.
#[derive(Debug, Clone)]
pub struct WindowAttributes {
    pub window_type: WindowType,
    pub hint: TypeHint,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub title: Option<String>,
    pub transient_for: Option<WindowId>,
    /// The application manages the surface role itself; show and hide only
    /// create and destroy the wl_surface.
    pub use_custom_surface: bool,
}

impl Default for WindowAttributes {
    fn default() -> Self {
        WindowAttributes {
            window_type: WindowType::Toplevel,
            hint: TypeHint::Normal,
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            title: None,
            transient_for: None,
            use_custom_surface: false,
        }
    }
}

/// Events surfaced through the backend's calloop callback.
#[derive(Debug, Clone)]
pub enum WindowEvent {
    /// The window adopted a new size.
    Configure {
        window: WindowId,
        width: i32,
        height: i32,
    },
    /// The visible state changed; `changed` holds the flags that differ.
    StateChanged {
        window: WindowId,
        changed: WindowStateMask,
        new_state: WindowStateMask,
    },
    /// The preferred buffer scale changed.
    ScaleChanged { window: WindowId, scale: i32 },
    /// The window got a surface and a role and is now mapped.
    Mapped { window: WindowId },
    /// The compositor asked the window to close.
    CloseRequested { window: WindowId },
    /// Staged contents were committed to the compositor.
    Committed { window: WindowId },
    /// The frame callback for the last commit fired; a new frame may be
    /// drawn. `frame_time` is the callback timestamp in milliseconds.
    Frame { window: WindowId, frame_time: u32 },
    /// The compositor dismissed the popup.
    PopupDone { window: WindowId },
    /// The final placement of a move-to-rect popup is known.
    MovedToRect {
        window: WindowId,
        result: MovedToRectResult,
    },
    /// An exported foreign handle became available.
    HandleExported { window: WindowId, handle: String },
    /// A shortcuts inhibitor became active or inactive.
    ShortcutsInhibited { window: WindowId, inhibited: bool },
}

/// Everything the display tracks about one window.
pub(crate) struct WindowState {
    pub id: WindowId,
    pub window_type: WindowType,
    pub hint: TypeHint,

    pub x: i32,
    pub y: i32,
    /// Current surface size including shadow margins.
    pub width: i32,
    pub height: i32,
    pub shadow: ShadowMargins,
    pub scale: i32,

    pub mapped: bool,
    pub use_custom_surface: bool,
    pub surface: Option<WlSurface>,
    pub shell: ShellObjects,
    pub ctk_surface: Option<CtkSurface1>,
    pub dbus: DbusProperties,
    pub dbus_properties_set: bool,
    pub modal: bool,
    pub decoration: Option<OrgKdeKwinServerDecoration>,
    pub using_csd: bool,

    pub title: Option<String>,
    pub transient_for: Option<WindowId>,
    pub imported_transient_for: Option<ZxdgImportedV1>,
    pub exported: Option<ExportedState>,
    pub shortcuts_inhibitors: SmallVec<[(ObjectId, ZwpKeyboardShortcutsInhibitorV1); 1]>,
    pub popup_parent: Option<WindowId>,
    pub startup_id: Option<String>,

    pub state: WindowStateMask,
    pub pending: PendingConfigure,
    pub pending_serial: Option<u32>,
    pub initial_configure_received: bool,
    pub configuring_popup: bool,
    pub position_method: PositionMethod,
    pub geometry_hints: Option<SizeHints>,

    pub opaque_region: Option<Region>,
    pub opaque_region_dirty: bool,
    pub input_region: Option<Region>,
    pub input_region_dirty: bool,
    /// Last geometry sent with set_window_geometry.
    pub committed_geometry: Option<Rectangle>,

    pub initial_fullscreen_output: Option<WlOutput>,
    pub entered_outputs: SmallVec<[WlOutput; 2]>,

    pub saved_size: Option<(i32, i32)>,
    pub saved_size_changed: bool,
    /// Size requested before the initial configure, excluding margins.
    pub unconfigured_size: (i32, i32),
    pub fixed_size: Option<(i32, i32)>,

    pub frame: FrameTimings,
    pub awaiting_frame: bool,
    /// Nonzero while configure or frame throttling holds back commits.
    pub freeze_count: u32,

    pub buffers: BufferSlots,
    pub pending_commit: bool,
    pub pending_buffer_attached: bool,
    pub pending_offset: (i32, i32),
    /// Children whose subsurface state latches on this window's next
    /// commit.
    pub commit_observers: SmallVec<[WindowId; 1]>,
}

impl WindowState {
    pub(crate) fn new(id: WindowId, attrs: &WindowAttributes) -> Self {
        WindowState {
            id,
            window_type: attrs.window_type,
            hint: attrs.hint,
            x: attrs.x,
            y: attrs.y,
            width: clamp_surface_size(attrs.width),
            height: clamp_surface_size(attrs.height),
            shadow: ShadowMargins::default(),
            scale: 1,
            mapped: false,
            use_custom_surface: attrs.use_custom_surface,
            surface: None,
            shell: ShellObjects::None,
            ctk_surface: None,
            dbus: DbusProperties::default(),
            dbus_properties_set: false,
            modal: false,
            decoration: None,
            using_csd: true,
            title: attrs.title.clone(),
            transient_for: attrs.transient_for,
            imported_transient_for: None,
            exported: None,
            shortcuts_inhibitors: SmallVec::new(),
            popup_parent: None,
            startup_id: None,
            state: WindowStateMask::empty(),
            pending: PendingConfigure::default(),
            pending_serial: None,
            initial_configure_received: false,
            configuring_popup: false,
            position_method: PositionMethod::None,
            geometry_hints: None,
            opaque_region: None,
            opaque_region_dirty: false,
            input_region: None,
            input_region_dirty: false,
            committed_geometry: None,
            initial_fullscreen_output: None,
            entered_outputs: SmallVec::new(),
            saved_size: None,
            saved_size_changed: false,
            unconfigured_size: (
                clamp_surface_size(attrs.width),
                clamp_surface_size(attrs.height),
            ),
            fixed_size: None,
            frame: FrameTimings::default(),
            awaiting_frame: false,
            freeze_count: 0,
            buffers: BufferSlots::default(),
            pending_commit: false,
            pending_buffer_attached: false,
            pending_offset: (0, 0),
            commit_observers: SmallVec::new(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_count > 0
    }

    /// Windows that place themselves never wait for a configure before
    /// resizing.
    pub fn resize_inhibit_exempt(&self) -> bool {
        matches!(self.shell, ShellObjects::Subsurface { .. })
            || self.use_custom_surface
            || self.hint == TypeHint::Dnd
            || self.shell.is_realized_popup()
    }

    pub fn geometry(&self) -> Rectangle {
        Rectangle::new(
            self.shadow.left,
            self.shadow.top,
            (self.width - self.shadow.horizontal()).max(1),
            (self.height - self.shadow.vertical()).max(1),
        )
    }

}

impl DisplayInner {
    pub fn window(&self, id: WindowId) -> Option<&WindowState> {
        self.windows.get(&id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut WindowState> {
        self.windows.get_mut(&id)
    }

    pub fn freeze(&mut self, id: WindowId) {
        if let Some(window) = self.window_mut(id) {
            window.freeze_count += 1;
        }
    }

    pub fn thaw(&mut self, id: WindowId) {
        if let Some(window) = self.window_mut(id) {
            window.freeze_count = window.freeze_count.saturating_sub(1);
        }
    }

    /// Whether a resize request has to wait for the initial configure.
    /// Only windows that are, or are about to become, toplevels wait;
    /// everything that places itself manages its own size.
    pub fn should_inhibit_resize(&self, id: WindowId) -> bool {
        let Some(window) = self.window(id) else {
            return false;
        };
        if window.resize_inhibit_exempt() {
            return false;
        }
        if role::should_map_as_popup(self, window) || role::should_map_as_subsurface(self, window) {
            return false;
        }
        !window.initial_configure_received
    }

    /// Adopts a new size and scale unconditionally, delivering a Configure
    /// and, when it changed, a ScaleChanged.
    pub fn configure(&mut self, id: WindowId, width: i32, height: i32, scale: i32) {
        let Some(window) = self.window_mut(id) else {
            return;
        };
        let scale_changed = window.scale != scale;
        window.width = width;
        window.height = height;
        window.scale = scale;
        self.emit(WindowEvent::Configure {
            window: id,
            width,
            height,
        });
        if scale_changed {
            self.emit(WindowEvent::ScaleChanged { window: id, scale });
        }
    }

    /// Applies an application-initiated size and scale change. The
    /// requested size is always stashed for the pre-configure fallback.
    pub fn maybe_configure(&mut self, id: WindowId, width: i32, height: i32, scale: i32) {
        let Some(window) = self.window_mut(id) else {
            return;
        };
        window.unconfigured_size = (
            (width - window.shadow.horizontal()).max(1),
            (height - window.shadow.vertical()).max(1),
        );

        if self.should_inhibit_resize(id) {
            return;
        }
        let Some(window) = self.window(id) else {
            return;
        };
        if window.width == width && window.height == height && window.scale == scale {
            return;
        }

        // A popup resized after mapping but before its initial configure
        // has to go through another map cycle; the compositor placed it
        // from the old size.
        let remap_popup = window.shell.is_realized_popup()
            && window.mapped
            && !window.initial_configure_received
            && !window.configuring_popup;

        if remap_popup {
            role::hide_window(self, id);
        }
        self.configure(id, width, height, scale);
        if remap_popup {
            if self.window(id).is_some_and(|window| window.mapped) {
                role::show_window(self, id);
            }
        }
    }

    /// Remembers the floating size so it can be restored when leaving
    /// maximized, fullscreen or tiled states.
    pub fn save_size(&mut self, id: WindowId) {
        let Some(window) = self.window_mut(id) else {
            return;
        };
        if configure::is_state_fixed_size(window.state) {
            return;
        }
        window.saved_size = Some((
            window.width - window.shadow.horizontal(),
            window.height - window.shadow.vertical(),
        ));
    }

    /// Updates the state mask, queueing a StateChanged for the difference.
    pub fn apply_state(&mut self, id: WindowId, new_state: WindowStateMask) {
        let Some(window) = self.window_mut(id) else {
            return;
        };
        let old_state = window.state;
        if old_state == new_state {
            return;
        }
        window.state = new_state;
        self.emit(WindowEvent::StateChanged {
            window: id,
            changed: old_state ^ new_state,
            new_state,
        });
    }

    /// Sets or clears flags locally when no compositor round trip will
    /// report them back, e.g. before the window is realized.
    pub fn synthesize_state(&mut self, id: WindowId, set: WindowStateMask, clear: WindowStateMask) {
        let Some(window) = self.window(id) else {
            return;
        };
        let new_state = (window.state | set) - clear;
        self.apply_state(id, new_state);
    }

    /// The scale a window should use: the largest scale of any output it
    /// is shown on, within the range buffers can be allocated for.
    /// Compositors too old for wl_surface.set_buffer_scale pin it at 1.
    pub fn preferred_scale(&self, window: &WindowState) -> i32 {
        if self.compositor.version() < 3 {
            return 1;
        }
        window
            .entered_outputs
            .iter()
            .map(|output| self.outputs.scale_of(output))
            .max()
            .unwrap_or(1)
            .clamp(1, crate::utils::MAX_THEME_SCALE)
    }

    /// Re-evaluates the scale of every window on the given output after
    /// its properties settled.
    pub fn rescale_windows_on_output(&mut self, output: &ObjectId) {
        let affected: Vec<WindowId> = self
            .windows
            .values()
            .filter(|window| {
                window
                    .entered_outputs
                    .iter()
                    .any(|entered| entered.id() == *output)
            })
            .map(|window| window.id)
            .collect();
        for id in affected {
            self.update_scale(id);
        }
    }

    pub fn update_scale(&mut self, id: WindowId) {
        let Some(window) = self.window(id) else {
            return;
        };
        let scale = self.preferred_scale(window);
        let (width, height) = (window.width, window.height);
        if scale != window.scale {
            self.maybe_configure(id, width, height, scale);
        }
    }

    /// The refresh interval in microseconds, taken from the first output
    /// the window entered.
    pub fn refresh_interval(&self, window: &WindowState) -> i64 {
        window
            .entered_outputs
            .first()
            .and_then(|output| self.outputs.refresh_of(output))
            .map(crate::frame::refresh_interval_from_millihertz)
            .unwrap_or(crate::frame::DEFAULT_REFRESH_INTERVAL)
    }

    /// Sends set_window_geometry when the geometry changed since the last
    /// commit.
    pub fn sync_margin(&mut self, id: WindowId) {
        let Some(window) = self.window_mut(id) else {
            return;
        };
        let geometry = window.geometry();
        if window.committed_geometry == Some(geometry) {
            return;
        }
        match &window.shell {
            ShellObjects::XdgToplevel { xdg_surface, .. }
            | ShellObjects::XdgPopup { xdg_surface, .. } => {
                xdg_surface.set_window_geometry(
                    geometry.x,
                    geometry.y,
                    geometry.width,
                    geometry.height,
                );
            }
            ShellObjects::V6Toplevel { xdg_surface, .. }
            | ShellObjects::V6Popup { xdg_surface, .. } => {
                xdg_surface.set_window_geometry(
                    geometry.x,
                    geometry.y,
                    geometry.width,
                    geometry.height,
                );
            }
            _ => return,
        }
        window.committed_geometry = Some(geometry);
    }

    pub fn sync_opaque_region(&mut self, id: WindowId) {
        let qh = self.qh.clone();
        let compositor = self.compositor.clone();
        let Some(window) = self.window_mut(id) else {
            return;
        };
        if !window.opaque_region_dirty {
            return;
        }
        if let Some(surface) = &window.surface {
            match &window.opaque_region {
                Some(region) => {
                    let wl_region = compositor.create_region(&qh, ());
                    for rect in region.rects() {
                        wl_region.add(rect.x, rect.y, rect.width, rect.height);
                    }
                    surface.set_opaque_region(Some(&wl_region));
                    wl_region.destroy();
                }
                None => surface.set_opaque_region(None),
            }
        }
        window.opaque_region_dirty = false;
    }

    pub fn sync_input_region(&mut self, id: WindowId) {
        let qh = self.qh.clone();
        let compositor = self.compositor.clone();
        let Some(window) = self.window_mut(id) else {
            return;
        };
        if !window.input_region_dirty {
            return;
        }
        if let Some(surface) = &window.surface {
            match &window.input_region {
                Some(region) => {
                    let wl_region = compositor.create_region(&qh, ());
                    for rect in region.rects() {
                        wl_region.add(rect.x, rect.y, rect.width, rect.height);
                    }
                    surface.set_input_region(Some(&wl_region));
                    wl_region.destroy();
                }
                None => surface.set_input_region(None),
            }
        }
        window.input_region_dirty = false;
    }
}

/// A window on the display.
///
/// Dropping the handle does not destroy the window; call
/// [`Window::destroy`] to remove it.
#[derive(Clone)]
pub struct Window {
    pub(crate) id: WindowId,
    pub(crate) display: WaylandDisplay,
}

impl WaylandDisplay {
    /// Creates a new, hidden window.
    pub fn create_window(&self, attrs: WindowAttributes) -> Window {
        let mut inner = self.inner.borrow_mut();
        let id = inner.alloc_window_id();
        let window = WindowState::new(id, &attrs);
        inner.windows.insert(id, window);
        Window {
            id,
            display: self.clone(),
        }
    }
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn state(&self) -> WindowStateMask {
        self.display
            .inner
            .borrow()
            .window(self.id)
            .map(|window| window.state)
            .unwrap_or_default()
    }

    pub fn is_mapped(&self) -> bool {
        self.display
            .inner
            .borrow()
            .window(self.id)
            .is_some_and(|window| window.mapped)
    }

    pub fn scale_factor(&self) -> i32 {
        self.display
            .inner
            .borrow()
            .window(self.id)
            .map(|window| window.scale)
            .unwrap_or(1)
    }

    pub fn size(&self) -> (i32, i32) {
        self.display
            .inner
            .borrow()
            .window(self.id)
            .map(|window| (window.width, window.height))
            .unwrap_or((1, 1))
    }

    /// Shows the window, creating its surface and shell role.
    pub fn show(&self) {
        let mut inner = self.display.inner.borrow_mut();
        role::show_window(&mut inner, self.id);
    }

    /// Hides the window, destroying its shell role and surface.
    pub fn hide(&self) {
        let mut inner = self.display.inner.borrow_mut();
        role::hide_window(&mut inner, self.id);
        if let Some(window) = inner.window_mut(self.id) {
            window.mapped = false;
        }
    }

    /// Hides the window and forgets any synthetic state.
    pub fn withdraw(&self) {
        self.hide();
        let mut inner = self.display.inner.borrow_mut();
        inner.apply_state(self.id, WindowStateMask::empty());
    }

    /// Removes the window from the display entirely.
    pub fn destroy(&self) {
        let mut inner = self.display.inner.borrow_mut();
        role::hide_window(&mut inner, self.id);
        inner.seats.forget_window(self.id);
        inner.orphan_dialogs.retain(|id| *id != self.id);
        inner.windows.remove(&self.id);
    }

    pub fn resize(&self, width: i32, height: i32) {
        self.move_resize_internal(None, width, height);
    }

    pub fn move_(&self, x: i32, y: i32) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.x = x;
            window.y = y;
            window.position_method = PositionMethod::MoveResize;
        }
        role::sync_position(&mut inner, self.id);
    }

    pub fn move_resize(&self, x: i32, y: i32, width: i32, height: i32) {
        self.move_resize_internal(Some((x, y)), width, height);
    }

    fn move_resize_internal(&self, position: Option<(i32, i32)>, width: i32, height: i32) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        let width = clamp_surface_size(width);
        let height = clamp_surface_size(height);
        if let Some((x, y)) = position {
            window.x = x;
            window.y = y;
            if !window.configuring_popup {
                window.position_method = PositionMethod::MoveResize;
            }
        }

        // While the compositor owns the size, remember the request so it
        // can be restored when the window floats again.
        let fixed_state = configure::is_state_fixed_size(window.state);
        if fixed_state {
            window.saved_size = Some((
                width - window.shadow.horizontal(),
                height - window.shadow.vertical(),
            ));
            window.saved_size_changed = true;
        }

        let scale = window.scale;
        if !fixed_state || window.fixed_size == Some((width, height)) {
            inner.maybe_configure(self.id, width, height, scale);
            inner.save_size(self.id);
        } else if !inner.should_inhibit_resize(self.id) {
            // The compositor holds the size; confirm the current one so
            // the application sees its request settled.
            let (current_width, current_height) = match inner.window(self.id) {
                Some(window) => (window.width, window.height),
                None => return,
            };
            inner.configure(self.id, current_width, current_height, scale);
        }
        role::sync_position(&mut inner, self.id);
    }

    /// Positions the window relative to an anchor rectangle on its
    /// transient parent, with compositor-side constraint resolution. Takes
    /// effect when the window is next shown.
    pub fn move_to_rect(&self, rect: MoveToRect) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.position_method = PositionMethod::MoveToRect(rect);
        }
    }

    pub fn set_title(&self, title: &str) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        let title = truncate_at_char_boundary(title, MAX_WL_BUFFER_SIZE);
        if window.title.as_deref() == Some(title) {
            return;
        }
        window.title = Some(title.to_owned());
        role::sync_title(&mut inner, self.id);
    }

    pub fn set_geometry_hints(&self, hints: SizeHints) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.geometry_hints = Some(hints);
        }
        role::sync_geometry_hints(&mut inner, self.id);
    }

    pub fn set_modal(&self, modal: bool) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        window.modal = modal;
        if let Some(ctk_surface) = &window.ctk_surface {
            if modal {
                ctk_surface.set_modal();
            } else {
                ctk_surface.unset_modal();
            }
        }
    }

    pub fn set_transient_for(&self, parent: Option<&Window>) {
        let mut inner = self.display.inner.borrow_mut();
        role::set_transient_for(&mut inner, self.id, parent.map(|window| window.id));
    }

    pub fn set_startup_id(&self, startup_id: &str) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.startup_id = Some(startup_id.to_owned());
        }
    }

    /// Requests keyboard focus, consuming the pending startup sequence
    /// when the timestamp is unknown (0).
    pub fn focus(&self, timestamp: u32) {
        let mut inner = self.display.inner.borrow_mut();
        let startup_id = if timestamp == 0 {
            inner.startup_notification_id.take()
        } else {
            None
        };
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        let startup_id = window.startup_id.clone().or(startup_id);
        let Some(ctk_surface) = &window.ctk_surface else {
            return;
        };
        if timestamp == 0 && ctk_surface.version() >= 3 {
            ctk_surface.request_focus(startup_id);
        } else {
            ctk_surface.present(timestamp);
        }
    }

    /// Rings the bell scoped to this window. Returns false when the
    /// compositor offers no bell.
    pub fn beep(&self) -> bool {
        let inner = self.display.inner.borrow();
        let Some(shell) = &inner.ctk_shell else {
            return false;
        };
        let surface = inner
            .window(self.id)
            .and_then(|window| window.ctk_surface.clone());
        shell.system_bell(surface.as_ref());
        true
    }

    pub fn maximize(&self) {
        let mut inner = self.display.inner.borrow_mut();
        inner.save_size(self.id);
        let Some(window) = inner.window(self.id) else {
            return;
        };
        match &window.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => toplevel.set_maximized(),
            ShellObjects::V6Toplevel { toplevel, .. } => toplevel.set_maximized(),
            _ => inner.synthesize_state(
                self.id,
                WindowStateMask::MAXIMIZED,
                WindowStateMask::empty(),
            ),
        }
    }

    pub fn unmaximize(&self) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window(self.id) else {
            return;
        };
        match &window.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => toplevel.unset_maximized(),
            ShellObjects::V6Toplevel { toplevel, .. } => toplevel.unset_maximized(),
            _ => inner.synthesize_state(
                self.id,
                WindowStateMask::empty(),
                WindowStateMask::MAXIMIZED,
            ),
        }
    }

    pub fn fullscreen(&self) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.initial_fullscreen_output = None;
        }
        fullscreen_on(&mut inner, self.id, None);
    }

    /// Fullscreens on the output with the given index, in announcement
    /// order.
    pub fn fullscreen_on_monitor(&self, monitor: usize) {
        let mut inner = self.display.inner.borrow_mut();
        let output = inner
            .outputs
            .iter()
            .nth(monitor)
            .map(|info| info.output.clone());
        let Some(output) = output else {
            warn!(monitor, "no such monitor to fullscreen on");
            return;
        };
        if let Some(window) = inner.window_mut(self.id) {
            if !window.shell.is_realized_toplevel() {
                window.initial_fullscreen_output = Some(output.clone());
            }
        }
        fullscreen_on(&mut inner, self.id, Some(output));
    }

    pub fn unfullscreen(&self) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.initial_fullscreen_output = None;
        }
        let Some(window) = inner.window(self.id) else {
            return;
        };
        match &window.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => toplevel.unset_fullscreen(),
            ShellObjects::V6Toplevel { toplevel, .. } => toplevel.unset_fullscreen(),
            _ => inner.synthesize_state(
                self.id,
                WindowStateMask::empty(),
                WindowStateMask::FULLSCREEN,
            ),
        }
    }

    pub fn iconify(&self) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window(self.id) else {
            return;
        };
        match &window.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => toplevel.set_minimized(),
            ShellObjects::V6Toplevel { toplevel, .. } => toplevel.set_minimized(),
            _ => inner.synthesize_state(
                self.id,
                WindowStateMask::ICONIFIED,
                WindowStateMask::empty(),
            ),
        }
    }

    pub fn deiconify(&self) {
        let mut inner = self.display.inner.borrow_mut();
        let mapped = inner
            .window(self.id)
            .is_some_and(|window| window.mapped);
        if mapped {
            role::show_window(&mut inner, self.id);
        } else {
            inner.synthesize_state(
                self.id,
                WindowStateMask::empty(),
                WindowStateMask::ICONIFIED,
            );
        }
    }

    /// Sticky windows are not expressible; the flag is kept locally so a
    /// later unstick restores the same state.
    pub fn stick(&self) {
        let mut inner = self.display.inner.borrow_mut();
        inner.synthesize_state(self.id, WindowStateMask::STICKY, WindowStateMask::empty());
    }

    pub fn unstick(&self) {
        let mut inner = self.display.inner.borrow_mut();
        inner.synthesize_state(self.id, WindowStateMask::empty(), WindowStateMask::STICKY);
    }

    /// Starts an interactive resize from the most recent implicit grab.
    pub fn begin_resize_drag(&self, edge: WindowEdge) {
        let mut inner = self.display.inner.borrow_mut();
        role::begin_resize_drag(&mut inner, self.id, edge);
    }

    /// Starts an interactive move from the most recent implicit grab.
    pub fn begin_move_drag(&self) {
        let mut inner = self.display.inner.borrow_mut();
        role::begin_move_drag(&mut inner, self.id);
    }

    /// Asks the compositor to show its window menu at the given surface
    /// coordinates. Returns false when the window cannot show one.
    pub fn show_window_menu(&self, x: i32, y: i32) -> bool {
        let inner = self.display.inner.borrow();
        let Some((seat, serial)) = inner.seats.implicit_grab() else {
            return false;
        };
        let Some(window) = inner.window(self.id) else {
            return false;
        };
        match &window.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => {
                toplevel.show_window_menu(seat, serial, x, y);
                true
            }
            ShellObjects::V6Toplevel { toplevel, .. } => {
                toplevel.show_window_menu(seat, serial, x, y);
                true
            }
            _ => false,
        }
    }

    pub fn set_opaque_region(&self, region: Option<Region>) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            if window.opaque_region != region {
                window.opaque_region = region;
                window.opaque_region_dirty = true;
            }
        }
    }

    pub fn set_input_region(&self, region: Option<Region>) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            if window.input_region != region {
                window.input_region = region;
                window.input_region_dirty = true;
            }
        }
    }

    /// Updates the shadow extents around the window geometry. The surface
    /// grows or shrinks so the geometry keeps its size.
    pub fn set_shadow_width(&self, left: i32, right: i32, top: i32, bottom: i32) {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        let new_shadow = ShadowMargins {
            left,
            right,
            top,
            bottom,
        };
        if window.shadow == new_shadow {
            return;
        }
        let new_width = window.width - window.shadow.horizontal() + new_shadow.horizontal();
        let new_height = window.height - window.shadow.vertical() + new_shadow.vertical();
        let scale = window.scale;
        // Resize before the margins change so the fallback size stash uses
        // the old extents consistently.
        inner.maybe_configure(self.id, new_width, new_height, scale);
        if let Some(window) = inner.window_mut(self.id) {
            window.shadow = new_shadow;
        }
    }

    /// Exports a foreign handle for this window. The handle arrives in a
    /// [`WindowEvent::HandleExported`] once the compositor assigns it, or
    /// immediately re-emits for subsequent exports.
    pub fn export_handle(&self) -> bool {
        let mut inner = self.display.inner.borrow_mut();
        crate::foreign::export_handle(&mut inner, self.id)
    }

    pub fn unexport_handle(&self) {
        let mut inner = self.display.inner.borrow_mut();
        crate::foreign::unexport_handle(&mut inner, self.id);
    }

    /// Makes this window transient for a foreign toplevel identified by an
    /// exported handle from another client.
    pub fn set_transient_for_exported(&self, handle: &str) -> bool {
        let mut inner = self.display.inner.borrow_mut();
        crate::foreign::set_transient_for_exported(&mut inner, self.id, handle)
    }

    /// Asks the compositor to deliver all keyboard events to this window,
    /// bypassing compositor shortcuts, on every known seat.
    pub fn inhibit_system_shortcuts(&self) {
        let mut inner = self.display.inner.borrow_mut();
        crate::shortcuts::inhibit(&mut inner, self.id);
    }

    pub fn restore_system_shortcuts(&self) {
        let mut inner = self.display.inner.borrow_mut();
        crate::shortcuts::restore(&mut inner, self.id);
    }

    /// Announces dbus-reachable menu and application paths on the window.
    pub fn set_dbus_properties(&self, properties: DbusProperties) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.dbus = properties;
        }
        role::maybe_set_dbus_properties(&mut inner, self.id);
    }

    /// Announces that this window draws its own decorations.
    pub fn announce_csd(&self) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.using_csd = true;
        }
        role::announce_decoration_mode(&mut inner, self.id);
    }

    /// Announces that the server should decorate this window.
    pub fn announce_ssd(&self) {
        let mut inner = self.display.inner.borrow_mut();
        if let Some(window) = inner.window_mut(self.id) {
            window.using_csd = false;
        }
        role::announce_decoration_mode(&mut inner, self.id);
    }

    /// Predicts the presentation time of the next frame, in microseconds
    /// on the monotonic clock. `frame_time` is the current tick time.
    pub fn before_paint(&self, frame_time: i64) -> i64 {
        let mut inner = self.display.inner.borrow_mut();
        let Some(window) = inner.window_mut(self.id) else {
            return frame_time;
        };
        window.frame.before_paint(frame_time);
        window
            .frame
            .predicted_presentation_time
            .unwrap_or(frame_time)
    }

    /// Paints `clip` through `f`, which receives the pixel buffer
    /// (premultiplied ARGB, native endian) and its stride in bytes.
    /// Pixels outside every clip painted this frame are carried over from
    /// the previous frame when the commit happens.
    pub fn paint<F>(&self, clip: &Region, f: F) -> Result<(), BackendError>
    where
        F: FnOnce(&mut [u8], usize),
    {
        let mut inner = self.display.inner.borrow_mut();
        self.ensure_staging(&mut inner)?;

        let Some(window) = inner.window_mut(self.id) else {
            return Ok(());
        };
        if let Some(staging) = &window.buffers.staging {
            let mut staging = staging.borrow_mut();
            let (logical_width, _) = staging.logical_size();
            let stride = (logical_width * staging.scale() * 4) as usize;
            f(staging.canvas(), stride);
        }
        self.end_paint(&mut inner, clip);
        Ok(())
    }

    /// Commits staged contents, if any, and schedules the frame callback.
    pub fn after_paint(&self) {
        let mut inner = self.display.inner.borrow_mut();
        role::after_paint(&mut inner, self.id);
    }

    fn ensure_staging(&self, inner: &mut DisplayInner) -> Result<(), BackendError> {
        let qh = inner.qh.clone();
        let shm = inner.shm.clone();
        let Some(window) = inner.window_mut(self.id) else {
            return Ok(());
        };
        let size = (window.width, window.height);
        let scale = window.scale;
        if window.buffers.needs_staging(size, scale) {
            let buffer = ShmBuffer::new(&shm, &qh, self.id, size.0, size.1, scale)?;
            window.buffers.set_staging(buffer);
        }
        Ok(())
    }

    fn end_paint(&self, inner: &mut DisplayInner, painted: &Region) {
        let Some(window) = inner.window_mut(self.id) else {
            return;
        };
        if painted.is_empty() {
            return;
        }
        let Some(surface) = window.surface.clone() else {
            return;
        };
        let Some(staging) = &window.buffers.staging else {
            return;
        };

        let staging = staging.borrow();
        let (offset_x, offset_y) = std::mem::take(&mut window.pending_offset);
        surface.attach(Some(staging.wl_buffer()), offset_x, offset_y);
        if surface.version() >= 3 {
            surface.set_buffer_scale(staging.scale());
        }
        drop(staging);

        for rect in painted.rects() {
            surface.damage(rect.x, rect.y, rect.width, rect.height);
        }
        window.buffers.note_staged_update(painted);
        window.pending_commit = true;
        window.pending_buffer_attached = true;

        inner.sync_margin(self.id);
        inner.sync_opaque_region(self.id);
        inner.sync_input_region(self.id);
    }
}

fn fullscreen_on(
    inner: &mut DisplayInner,
    id: WindowId,
    output: Option<WlOutput>,
) {
    inner.save_size(id);
    let Some(window) = inner.window(id) else {
        return;
    };
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => toplevel.set_fullscreen(output.as_ref()),
        ShellObjects::V6Toplevel { toplevel, .. } => toplevel.set_fullscreen(output.as_ref()),
        _ => inner.synthesize_state(id, WindowStateMask::FULLSCREEN, WindowStateMask::empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_hints_constrain_in_both_directions() {
        let hints = SizeHints {
            min_size: Some((200, 100)),
            max_size: Some((400, 300)),
            ..Default::default()
        };
        assert_eq!(hints.constrain(50, 50), (200, 100));
        assert_eq!(hints.constrain(500, 200), (400, 200));
        assert_eq!(hints.constrain(300, 900), (300, 300));
    }

    #[test]
    fn size_hints_snap_to_resize_increments() {
        let hints = SizeHints {
            min_size: Some((100, 100)),
            resize_increments: Some((7, 13)),
            ..Default::default()
        };
        // Sizes snap down to min + n * increment.
        assert_eq!(hints.constrain(120, 120), (114, 113));
        assert_eq!(hints.constrain(100, 100), (100, 100));
        // Skipped while the compositor owns the size.
        assert_eq!(hints.constrain_with_increments(120, 120, false), (120, 120));
    }

    #[test]
    fn size_hints_keep_the_aspect_ratio_range() {
        let hints = SizeHints {
            aspect: Some((1.0, 1.0)),
            ..Default::default()
        };
        assert_eq!(hints.constrain(200, 100), (100, 100));
        assert_eq!(hints.constrain(100, 200), (100, 100));

        let wide = SizeHints {
            aspect: Some((2.0, 4.0)),
            ..Default::default()
        };
        // Already inside the range; untouched.
        assert_eq!(wide.constrain(300, 100), (300, 100));
    }

    #[test]
    fn self_placing_windows_never_wait_for_a_configure() {
        let window = WindowState::new(WindowId(1), &WindowAttributes::default());
        // A plain unconfigured window has to wait.
        assert!(!window.resize_inhibit_exempt());
        assert!(!window.initial_configure_received);

        let custom = WindowState::new(
            WindowId(2),
            &WindowAttributes {
                use_custom_surface: true,
                ..Default::default()
            },
        );
        assert!(custom.resize_inhibit_exempt());

        let dnd = WindowState::new(
            WindowId(3),
            &WindowAttributes {
                hint: TypeHint::Dnd,
                ..Default::default()
            },
        );
        assert!(dnd.resize_inhibit_exempt());
    }

    #[test]
    fn shadow_margins_sum_per_axis() {
        let shadow = ShadowMargins {
            left: 10,
            right: 15,
            top: 20,
            bottom: 5,
        };
        assert_eq!(shadow.horizontal(), 25);
        assert_eq!(shadow.vertical(), 25);
    }

    #[test]
    fn dbus_properties_emptiness() {
        assert!(DbusProperties::default().is_empty());
        let properties = DbusProperties {
            application_id: Some("org.example.App".into()),
            ..Default::default()
        };
        assert!(!properties.is_empty());
    }
}
