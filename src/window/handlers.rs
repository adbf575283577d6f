//! Protocol event handling for window objects.
//!
//! Every window-owned proxy carries the [`WindowId`] as user data, so each
//! handler looks its window up in the display and applies the event there.

use tracing::debug;
use wayland_client::protocol::wl_buffer::{self, WlBuffer};
use wayland_client::protocol::wl_callback::{self, WlCallback};
use wayland_client::protocol::wl_surface::{self, WlSurface};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};
use wayland_protocols::xdg::shell::client::{xdg_popup, xdg_surface, xdg_toplevel};
use wayland_protocols_plasma::server_decoration::client::org_kde_kwin_server_decoration::{
    self, Mode as DecorationMode, OrgKdeKwinServerDecoration,
};

use crate::frame::now_monotonic;
use crate::positioner::calculate_moved_to_rect_result;
use crate::protocols::ctk_shell1::ctk_surface1::{self, CtkSurface1};
use crate::protocols::xdg_shell_v6::{zxdg_popup_v6, zxdg_surface_v6, zxdg_toplevel_v6};
use crate::registry::{DisplayInner, State};
use crate::window::{
    configure, role, PositionMethod, ShellObjects, TypeHint, WindowEvent, WindowId,
    WindowStateMask,
};

impl Dispatch<WlSurface, WindowId> for State {
    fn event(
        state: &mut Self,
        _surface: &WlSurface,
        event: wl_surface::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            wl_surface::Event::Enter { output } => {
                if let Some(window) = inner.window_mut(*id) {
                    if !window.entered_outputs.contains(&output) {
                        window.entered_outputs.push(output);
                    }
                }
                inner.update_scale(*id);
            }
            wl_surface::Event::Leave { output } => {
                if let Some(window) = inner.window_mut(*id) {
                    window.entered_outputs.retain(|entered| *entered != output);
                }
                inner.update_scale(*id);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlCallback, WindowId> for State {
    fn event(
        state: &mut Self,
        _callback: &WlCallback,
        event: wl_callback::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let wl_callback::Event::Done { callback_data } = event else {
            return;
        };
        let mut inner = state.inner.borrow_mut();
        let refresh_millihertz = inner
            .window(*id)
            .and_then(|window| window.entered_outputs.first().cloned())
            .and_then(|output| inner.outputs.refresh_of(&output));
        let Some(window) = inner.window_mut(*id) else {
            return;
        };
        if !window.awaiting_frame {
            return;
        }
        window.awaiting_frame = false;
        window.freeze_count = window.freeze_count.saturating_sub(1);
        window
            .frame
            .note_frame_callback(now_monotonic(), callback_data, refresh_millihertz);
        inner.emit(WindowEvent::Frame {
            window: *id,
            frame_time: callback_data,
        });
    }
}

impl Dispatch<WlBuffer, WindowId> for State {
    fn event(
        state: &mut Self,
        buffer: &WlBuffer,
        event: wl_buffer::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            let mut inner = state.inner.borrow_mut();
            if let Some(window) = inner.window_mut(*id) {
                window.buffers.on_release(&buffer.id());
            }
        }
    }
}

/// Applies an accumulated configure sequence once the compositor commits
/// it with xdg_surface.configure.
fn handle_configure(inner: &mut DisplayInner, id: WindowId, serial: u32) {
    let Some(window) = inner.window_mut(id) else {
        return;
    };

    if !window.initial_configure_received {
        window.initial_configure_received = true;
        // Commits were held back since role creation.
        window.freeze_count = window.freeze_count.saturating_sub(1);
    }

    let ack = |shell: &ShellObjects| match shell {
        ShellObjects::XdgToplevel { xdg_surface, .. }
        | ShellObjects::XdgPopup { xdg_surface, .. } => xdg_surface.ack_configure(serial),
        ShellObjects::V6Toplevel { xdg_surface, .. }
        | ShellObjects::V6Popup { xdg_surface, .. } => xdg_surface.ack_configure(serial),
        _ => {}
    };

    if window.shell.is_realized_popup() {
        // Placement was already handled from the popup configure event.
        ack(&window.shell);
        return;
    }

    let pending = window.pending.take();
    let outcome = configure::apply_toplevel_configure(
        pending,
        (window.shadow.horizontal(), window.shadow.vertical()),
        window.saved_size,
        window.saved_size_changed,
        window.unconfigured_size,
        window.geometry_hints.as_ref(),
    );
    window.saved_size_changed = false;
    window.fixed_size = outcome
        .fixed_size
        .then_some((outcome.width, outcome.height));
    let scale = window.scale;
    let hint = window.hint;
    ack(&window.shell);

    inner.apply_state(id, outcome.state);
    // Compositor-driven sizes are adopted and announced unconditionally,
    // even when they match the current size.
    inner.configure(id, outcome.width, outcome.height, scale);
    if outcome.compositor_size && !outcome.fixed_size {
        inner.save_size(id);
    }

    // A window becoming focused adopts any dialogs still floating without
    // a parent, except dialogs themselves.
    if hint != TypeHint::Dialog && outcome.state.contains(WindowStateMask::FOCUSED) {
        role::reparent_orphan_dialogs(inner, id);
    }
}

/// The compositor reported a popup's final placement. Only popups placed
/// with move-to-rect carry it back to the application.
fn handle_popup_configure(
    inner: &mut DisplayInner,
    id: WindowId,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
) {
    let Some(window) = inner.window(id) else {
        return;
    };
    let PositionMethod::MoveToRect(params) = window.position_method.clone() else {
        return;
    };
    let Some(parent) = window.popup_parent else {
        return;
    };

    let (local_x, local_y) = role::translate_from_parent_geometry(inner, window, parent, x, y);
    let result = calculate_moved_to_rect_result(&params, local_x, local_y, width, height);
    debug!(
        window = id.0,
        x = local_x,
        y = local_y,
        width,
        height,
        flipped_x = result.flipped_x,
        flipped_y = result.flipped_y,
        "popup placed"
    );

    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let (surface_width, surface_height) = (
        width + window.shadow.horizontal(),
        height + window.shadow.vertical(),
    );
    let scale = window.scale;
    window.x = local_x;
    window.y = local_y;
    window.configuring_popup = true;
    inner.maybe_configure(id, surface_width, surface_height, scale);
    if let Some(window) = inner.window_mut(id) {
        window.configuring_popup = false;
    }

    inner.emit(WindowEvent::MovedToRect { window: id, result });
}

fn handle_popup_done(inner: &mut DisplayInner, id: WindowId) {
    role::hide_window(inner, id);
    if let Some(window) = inner.window_mut(id) {
        window.mapped = false;
    }
    inner.emit(WindowEvent::PopupDone { window: id });
}

impl Dispatch<xdg_surface::XdgSurface, WindowId> for State {
    fn event(
        state: &mut Self,
        _surface: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            let mut inner = state.inner.borrow_mut();
            handle_configure(&mut inner, *id, serial);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, WindowId> for State {
    fn event(
        state: &mut Self,
        _toplevel: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                if let Some(window) = inner.window_mut(*id) {
                    window.pending.set_size(width, height);
                    window
                        .pending
                        .merge_state(configure::parse_toplevel_states(&states));
                }
            }
            xdg_toplevel::Event::Close => {
                inner.emit(WindowEvent::CloseRequested { window: *id });
            }
            _ => {}
        }
    }
}

impl Dispatch<xdg_popup::XdgPopup, WindowId> for State {
    fn event(
        state: &mut Self,
        _popup: &xdg_popup::XdgPopup,
        event: xdg_popup::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            xdg_popup::Event::Configure {
                x,
                y,
                width,
                height,
            } => handle_popup_configure(&mut inner, *id, x, y, width, height),
            xdg_popup::Event::PopupDone => handle_popup_done(&mut inner, *id),
            _ => {}
        }
    }
}

impl Dispatch<zxdg_surface_v6::ZxdgSurfaceV6, WindowId> for State {
    fn event(
        state: &mut Self,
        _surface: &zxdg_surface_v6::ZxdgSurfaceV6,
        event: zxdg_surface_v6::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zxdg_surface_v6::Event::Configure { serial } = event {
            let mut inner = state.inner.borrow_mut();
            handle_configure(&mut inner, *id, serial);
        }
    }
}

impl Dispatch<zxdg_toplevel_v6::ZxdgToplevelV6, WindowId> for State {
    fn event(
        state: &mut Self,
        _toplevel: &zxdg_toplevel_v6::ZxdgToplevelV6,
        event: zxdg_toplevel_v6::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            zxdg_toplevel_v6::Event::Configure {
                width,
                height,
                states,
            } => {
                if let Some(window) = inner.window_mut(*id) {
                    window.pending.set_size(width, height);
                    window
                        .pending
                        .merge_state(configure::parse_toplevel_states(&states));
                }
            }
            zxdg_toplevel_v6::Event::Close => {
                inner.emit(WindowEvent::CloseRequested { window: *id });
            }
            _ => {}
        }
    }
}

impl Dispatch<zxdg_popup_v6::ZxdgPopupV6, WindowId> for State {
    fn event(
        state: &mut Self,
        _popup: &zxdg_popup_v6::ZxdgPopupV6,
        event: zxdg_popup_v6::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            zxdg_popup_v6::Event::Configure {
                x,
                y,
                width,
                height,
            } => handle_popup_configure(&mut inner, *id, x, y, width, height),
            zxdg_popup_v6::Event::PopupDone => handle_popup_done(&mut inner, *id),
            _ => {}
        }
    }
}

impl Dispatch<CtkSurface1, WindowId> for State {
    fn event(
        state: &mut Self,
        _surface: &CtkSurface1,
        event: ctk_surface1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        let Some(window) = inner.window_mut(*id) else {
            return;
        };
        match event {
            ctk_surface1::Event::Configure { states } => {
                window
                    .pending
                    .merge_state(configure::parse_surface_states(&states));
            }
            ctk_surface1::Event::ConfigureEdges { constraints } => {
                window
                    .pending
                    .merge_state(configure::parse_edge_constraints(&constraints));
            }
            _ => {}
        }
    }
}

impl Dispatch<OrgKdeKwinServerDecoration, WindowId> for State {
    fn event(
        state: &mut Self,
        _decoration: &OrgKdeKwinServerDecoration,
        event: org_kde_kwin_server_decoration::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let org_kde_kwin_server_decoration::Event::Mode { mode } = event else {
            return;
        };
        // The mode argument is untyped on the wire; reject unknown values.
        let Ok(mode) = DecorationMode::try_from(mode) else {
            return;
        };
        let mut inner = state.inner.borrow_mut();
        let mismatch = inner.window(*id).is_some_and(|window| {
            (mode == DecorationMode::Client) != window.using_csd
        });
        // The compositor may override the mode; insist on ours.
        if mismatch {
            role::announce_decoration_mode(&mut inner, *id);
        }
    }
}
