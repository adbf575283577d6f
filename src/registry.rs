//! Connection setup, global tracking and the calloop event source.
//!
//! All protocol state lives in [`DisplayInner`], shared between the
//! [`WaylandBackend`] event source and the handles the application holds.
//! Dispatch implementations record what happened and queue
//! [`WindowEvent`]s; the backend replays them into the calloop callback
//! after each dispatch.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::env;
use std::rc::Rc;

use calloop::{EventSource, Poll, PostAction, Readiness, Token, TokenFactory};
use calloop_wayland_source::WaylandSource;
use tracing::{debug, info, warn};
use wayland_client::globals::{registry_queue_init, BindError, GlobalError, GlobalListContents};
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_output::WlOutput;
use wayland_client::protocol::wl_region::WlRegion;
use wayland_client::protocol::wl_registry::{self, WlRegistry};
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::protocol::wl_shm::WlShm;
use wayland_client::protocol::wl_shm_pool::WlShmPool;
use wayland_client::protocol::wl_subcompositor::WlSubcompositor;
use wayland_client::protocol::wl_subsurface::WlSubsurface;
use wayland_client::{
    delegate_noop, ConnectError, Connection, Dispatch, DispatchError, QueueHandle,
};
use wayland_protocols::xdg::foreign::zv1::client::zxdg_exporter_v1::ZxdgExporterV1;
use wayland_protocols::xdg::foreign::zv1::client::zxdg_importer_v1::ZxdgImporterV1;
use wayland_protocols::xdg::shell::client::xdg_positioner::XdgPositioner;
use wayland_protocols::xdg::shell::client::xdg_wm_base::{self, XdgWmBase};
use wayland_protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibit_manager_v1::ZwpKeyboardShortcutsInhibitManagerV1;
use wayland_protocols_plasma::server_decoration::client::org_kde_kwin_server_decoration::Mode as DecorationMode;
use wayland_protocols_plasma::server_decoration::client::org_kde_kwin_server_decoration_manager::{
    self, OrgKdeKwinServerDecorationManager,
};

use crate::output::OutputTracker;
use crate::protocols::ctk_shell1::ctk_shell1::{self, CtkShell1};
use crate::protocols::xdg_shell_v6::zxdg_positioner_v6::ZxdgPositionerV6;
use crate::protocols::xdg_shell_v6::zxdg_shell_v6::{self, ZxdgShellV6};
use crate::seat::SeatTracker;
use crate::shm::ShmError;
use crate::window::{WindowEvent, WindowId, WindowState};

/// Errors from connecting to or talking with the compositor.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Failed to connect to a Wayland compositor.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The initial registry exchange failed.
    #[error(transparent)]
    Global(#[from] GlobalError),

    /// A required global could not be bound.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Error while dispatching events.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Error when using the wayland connection.
    #[error(transparent)]
    Connection(#[from] wayland_client::backend::WaylandError),

    /// The compositor supports neither xdg_wm_base nor zxdg_shell_v6.
    #[error("server is missing the {0} global")]
    MissingGlobal(&'static str),

    /// Buffer allocation failed.
    #[error(transparent)]
    Shm(#[from] ShmError),
}

/// The shell protocol picked at startup. The stable protocol is preferred;
/// the v6 predecessor is kept for older compositors.
#[derive(Debug, Clone)]
pub(crate) enum Shell {
    Xdg(XdgWmBase),
    V6(ZxdgShellV6),
}

/// Dispatch state for the single event queue.
pub struct State {
    pub(crate) inner: Rc<RefCell<DisplayInner>>,
}

pub(crate) struct DisplayInner {
    pub conn: Connection,
    pub qh: QueueHandle<State>,

    pub compositor: WlCompositor,
    pub subcompositor: WlSubcompositor,
    pub shm: WlShm,
    pub shell: Shell,
    pub ctk_shell: Option<CtkShell1>,
    pub shell_capabilities: u32,
    pub exporter: Option<ZxdgExporterV1>,
    pub importer: Option<ZxdgImporterV1>,
    pub shortcuts_inhibit_manager: Option<ZwpKeyboardShortcutsInhibitManagerV1>,
    pub server_decoration_manager: Option<OrgKdeKwinServerDecorationManager>,
    pub server_decoration_default_mode: Option<DecorationMode>,

    pub outputs: OutputTracker,
    pub seats: SeatTracker,

    pub windows: HashMap<WindowId, WindowState>,
    next_window_id: u32,
    /// Dialogs without a transient parent, re-parented to the focused
    /// toplevel as focus moves.
    pub orphan_dialogs: Vec<WindowId>,
    /// Mapped popups, newest last. Only the newest may parent another popup.
    pub current_popups: Vec<WindowId>,

    pub events: VecDeque<WindowEvent>,
    pub startup_notification_id: Option<String>,
    pub application_id: String,
    /// Registry name to interface, for routing global_remove.
    pub known_globals: HashMap<u32, String>,
}

impl DisplayInner {
    pub fn emit(&mut self, event: WindowEvent) {
        self.events.push_back(event);
    }

    pub fn alloc_window_id(&mut self) -> WindowId {
        self.next_window_id += 1;
        WindowId(self.next_window_id)
    }
}

fn default_application_id() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "cdk-wayland".to_owned())
}

/// A handle to the display, used to create windows and flush requests.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct WaylandDisplay {
    pub(crate) inner: Rc<RefCell<DisplayInner>>,
}

impl WaylandDisplay {
    pub fn connection(&self) -> Connection {
        self.inner.borrow().conn.clone()
    }

    /// Flushes pending requests to the compositor.
    pub fn flush(&self) -> Result<(), BackendError> {
        self.inner.borrow().conn.flush()?;
        Ok(())
    }

    /// Sets the startup notification id consumed by the next focus request.
    pub fn set_startup_notification_id(&self, id: impl Into<String>) {
        self.inner.borrow_mut().startup_notification_id = Some(id.into());
    }

    /// Overrides the application id announced on new toplevels.
    pub fn set_application_id(&self, id: impl Into<String>) {
        self.inner.borrow_mut().application_id = id.into();
    }

    /// Signals that application startup is complete, ending the launch
    /// feedback the compositor shows for the startup id. Falls back to the
    /// id recorded on the display when none is given.
    pub fn notify_startup_complete(&self, startup_id: Option<&str>) {
        let inner = self.inner.borrow();
        let startup_id = match startup_id {
            Some(id) => id.to_owned(),
            None => match &inner.startup_notification_id {
                Some(id) => id.clone(),
                None => return,
            },
        };
        if let Some(shell) = &inner.ctk_shell {
            shell.set_startup_id(Some(startup_id));
        }
    }

    /// Rings the system bell, not tied to any window.
    pub fn beep(&self) -> bool {
        let inner = self.inner.borrow();
        match &inner.ctk_shell {
            Some(shell) => {
                shell.system_bell(None);
                true
            }
            None => false,
        }
    }
}

/// A connection to a Wayland compositor.
///
/// This is an event source that handles communication with the compositor
/// and surfaces window events through its calloop callback.
pub struct WaylandBackend {
    source: WaylandSource<State>,
    state: State,
}

impl WaylandBackend {
    /// Connects to the compositor named by the environment and binds every
    /// global the windowing layer uses.
    pub fn connect() -> Result<(WaylandBackend, WaylandDisplay), BackendError> {
        let conn = Connection::connect_to_env()?;
        info!("connected to Wayland compositor");

        let (globals, event_queue) = registry_queue_init::<State>(&conn)?;
        let qh = event_queue.handle();

        let compositor: WlCompositor = globals.bind(&qh, 1..=3, ())?;
        let subcompositor: WlSubcompositor = globals.bind(&qh, 1..=1, ())?;
        let shm: WlShm = globals.bind(&qh, 1..=1, ())?;

        let shell = match globals.bind::<XdgWmBase, _, _>(&qh, 1..=3, ()) {
            Ok(wm_base) => Shell::Xdg(wm_base),
            Err(_) => match globals.bind::<ZxdgShellV6, _, _>(&qh, 1..=1, ()) {
                Ok(shell) => {
                    debug!("falling back to zxdg_shell_v6");
                    Shell::V6(shell)
                }
                Err(_) => {
                    warn!("compositor offers no xdg shell, windows cannot be mapped");
                    return Err(BackendError::MissingGlobal("xdg_wm_base"));
                }
            },
        };

        let ctk_shell = globals.bind::<CtkShell1, _, _>(&qh, 1..=3, ()).ok();
        if ctk_shell.is_none() {
            debug!("compositor does not offer ctk_shell1");
        }
        let exporter = globals.bind::<ZxdgExporterV1, _, _>(&qh, 1..=1, ()).ok();
        let importer = globals.bind::<ZxdgImporterV1, _, _>(&qh, 1..=1, ()).ok();
        let shortcuts_inhibit_manager = globals
            .bind::<ZwpKeyboardShortcutsInhibitManagerV1, _, _>(&qh, 1..=1, ())
            .ok();
        let server_decoration_manager = globals
            .bind::<OrgKdeKwinServerDecorationManager, _, _>(&qh, 1..=1, ())
            .ok();

        let mut outputs = OutputTracker::default();
        let mut seats = SeatTracker::default();
        let mut known_globals = HashMap::new();
        let registry = globals.registry();
        globals.contents().with_list(|list| {
            for global in list {
                known_globals.insert(global.name, global.interface.clone());
                match global.interface.as_str() {
                    "wl_output" => {
                        let output = registry.bind::<WlOutput, _, _>(
                            global.name,
                            global.version.min(2),
                            &qh,
                            global.name,
                        );
                        outputs.add(output, global.name);
                    }
                    "wl_seat" => {
                        let seat = registry.bind::<WlSeat, _, _>(
                            global.name,
                            global.version.min(5),
                            &qh,
                            global.name,
                        );
                        seats.add(seat, global.name);
                    }
                    _ => {}
                }
            }
        });

        // Matches the convention of taking over the startup sequence the
        // launcher began; the variable must not leak to children.
        let startup_notification_id = env::var("DESKTOP_STARTUP_ID").ok();
        env::remove_var("DESKTOP_STARTUP_ID");

        let inner = Rc::new(RefCell::new(DisplayInner {
            conn: conn.clone(),
            qh,
            compositor,
            subcompositor,
            shm,
            shell,
            ctk_shell,
            shell_capabilities: 0,
            exporter,
            importer,
            shortcuts_inhibit_manager,
            server_decoration_manager,
            server_decoration_default_mode: None,
            outputs,
            seats,
            windows: HashMap::new(),
            next_window_id: 0,
            orphan_dialogs: Vec::new(),
            current_popups: Vec::new(),
            events: VecDeque::new(),
            startup_notification_id,
            application_id: default_application_id(),
            known_globals,
        }));

        let mut state = State { inner: inner.clone() };

        // Pick up initial output modes, scales and seat capabilities before
        // the first window is created.
        let mut event_queue = event_queue;
        event_queue.roundtrip(&mut state)?;

        let source = WaylandSource::new(conn, event_queue);

        Ok((
            WaylandBackend { source, state },
            WaylandDisplay { inner },
        ))
    }

    /// The display handle for this connection.
    pub fn display(&self) -> WaylandDisplay {
        WaylandDisplay {
            inner: self.state.inner.clone(),
        }
    }

    fn replay_events<F>(&mut self, mut callback: F)
    where
        F: FnMut(WindowEvent, &mut ()),
    {
        loop {
            // Events are drained one at a time; the callback may call back
            // into window methods that queue more.
            let event = self.state.inner.borrow_mut().events.pop_front();
            match event {
                Some(event) => callback(event, &mut ()),
                None => break,
            }
        }
    }
}

impl EventSource for WaylandBackend {
    type Event = WindowEvent;
    type Metadata = ();
    type Ret = ();
    type Error = calloop::Error;

    const NEEDS_EXTRA_LIFECYCLE_EVENTS: bool = true;

    fn process_events<F>(
        &mut self,
        readiness: Readiness,
        token: Token,
        callback: F,
    ) -> calloop::Result<PostAction>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        let state = &mut self.state;
        let action = self
            .source
            .process_events(readiness, token, |_, queue| queue.dispatch_pending(state))?;

        self.replay_events(callback);

        Ok(action)
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.source.register(poll, token_factory)
    }

    fn reregister(
        &mut self,
        poll: &mut Poll,
        token_factory: &mut TokenFactory,
    ) -> calloop::Result<()> {
        self.source.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.source.unregister(poll)
    }

    fn before_sleep(&mut self) -> calloop::Result<Option<(Readiness, Token)>> {
        self.source.before_sleep()
    }

    fn before_handle_events(&mut self, events: calloop::EventIterator<'_>) {
        self.source.before_handle_events(events);
    }
}

impl Dispatch<WlRegistry, GlobalListContents> for State {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                match interface.as_str() {
                    "wl_output" => {
                        let output =
                            registry.bind::<WlOutput, _, _>(name, version.min(2), qh, name);
                        inner.outputs.add(output, name);
                    }
                    "wl_seat" => {
                        let seat = registry.bind::<WlSeat, _, _>(name, version.min(5), qh, name);
                        inner.seats.add(seat, name);
                    }
                    _ => {}
                }
                inner.known_globals.insert(name, interface);
            }
            wl_registry::Event::GlobalRemove { name } => {
                match inner.known_globals.remove(&name).as_deref() {
                    Some("wl_output") => {
                        if inner.outputs.remove(name).is_some() {
                            debug!(output = name, "output removed");
                        }
                    }
                    Some("wl_seat") => {
                        if inner.seats.remove(name).is_some() {
                            debug!(seat = name, "seat removed");
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgWmBase, ()> for State {
    fn event(
        _state: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<ZxdgShellV6, ()> for State {
    fn event(
        _state: &mut Self,
        shell: &ZxdgShellV6,
        event: zxdg_shell_v6::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zxdg_shell_v6::Event::Ping { serial } = event {
            shell.pong(serial);
        }
    }
}

impl Dispatch<CtkShell1, ()> for State {
    fn event(
        state: &mut Self,
        _shell: &CtkShell1,
        event: ctk_shell1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let ctk_shell1::Event::Capabilities { capabilities } = event {
            state.inner.borrow_mut().shell_capabilities = capabilities;
        }
    }
}

impl Dispatch<OrgKdeKwinServerDecorationManager, ()> for State {
    fn event(
        state: &mut Self,
        _manager: &OrgKdeKwinServerDecorationManager,
        event: org_kde_kwin_server_decoration_manager::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // The mode argument is untyped on the wire; reject unknown values.
        if let org_kde_kwin_server_decoration_manager::Event::DefaultMode { mode } = event {
            if let Ok(mode) = DecorationMode::try_from(mode) {
                state.inner.borrow_mut().server_decoration_default_mode = Some(mode);
            }
        }
    }
}

delegate_noop!(State: WlCompositor);
delegate_noop!(State: WlSubcompositor);
delegate_noop!(State: ignore WlShm);
delegate_noop!(State: WlShmPool);
delegate_noop!(State: WlRegion);
delegate_noop!(State: WlSubsurface);
delegate_noop!(State: XdgPositioner);
delegate_noop!(State: ZxdgPositionerV6);
delegate_noop!(State: ZxdgExporterV1);
delegate_noop!(State: ZxdgImporterV1);
delegate_noop!(State: ZwpKeyboardShortcutsInhibitManagerV1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_without_a_compositor_fails_cleanly() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        // Point the connection at a socket that cannot exist.
        env::set_var("WAYLAND_DISPLAY", "cdk-wayland-test-no-such-socket");
        env::remove_var("WAYLAND_SOCKET");
        let result = WaylandBackend::connect();
        assert!(matches!(result, Err(BackendError::Connect(_))));
    }

    #[test]
    fn default_application_id_is_nonempty() {
        assert!(!default_application_id().is_empty());
    }
}
