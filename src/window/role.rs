//! Surface role selection and lifecycle.
//!
//! Mapping a window picks between toplevel, popup and subsurface from its
//! type, hints, transient parent and whether an input grab is active.
//! Hiding destroys the role objects so the next show can pick a different
//! one.

use smallvec::SmallVec;
use tracing::{debug, warn};
use wayland_client::Proxy;
use wayland_protocols::xdg::shell::client::{xdg_positioner, xdg_toplevel};

use crate::positioner::{
    anchor_for, anchor_for_legacy, constraint_adjustment_for, constraint_adjustment_for_legacy,
    gravity_for, gravity_for_legacy, sanitize_anchor_rect, simple_anchor_rect,
};
use crate::protocols::xdg_shell_v6::{zxdg_positioner_v6, zxdg_toplevel_v6};
use crate::registry::{DisplayInner, Shell};
use crate::utils::{Rectangle, Region};
use crate::window::{
    PositionMethod, ShellObjects, TypeHint, WindowEdge, WindowEvent, WindowId, WindowState,
    WindowStateMask, WindowType,
};

fn should_be_mapped(window: &WindowState) -> bool {
    // Temp windows parked offscreen exist only to own a surface-less grab.
    if window.window_type == WindowType::Temp && window.x < 0 && window.y < 0 {
        return false;
    }
    window.hint != TypeHint::Dnd
}

pub(crate) fn should_map_as_popup(inner: &DisplayInner, window: &WindowState) -> bool {
    if window.window_type == WindowType::Temp
        && window.transient_for.is_some()
        && inner.seats.implicit_grab().is_some()
    {
        return true;
    }
    if matches!(
        window.hint,
        TypeHint::PopupMenu | TypeHint::DropdownMenu | TypeHint::Combo
    ) {
        return true;
    }
    matches!(window.position_method, PositionMethod::MoveToRect(_))
}

pub(crate) fn should_map_as_subsurface(inner: &DisplayInner, window: &WindowState) -> bool {
    if window.window_type == WindowType::Subsurface {
        return true;
    }
    if window.window_type != WindowType::Temp {
        return false;
    }
    if should_map_as_popup(inner, window) {
        return false;
    }
    match window.transient_for.and_then(|parent| inner.window(parent)) {
        Some(parent) => {
            if parent.mapped {
                true
            } else {
                warn!(
                    window = window.id.0,
                    "couldn't map window as subsurface because its parent is not mapped"
                );
                false
            }
        }
        None => false,
    }
}

/// Whether a new popup may stack on `parent_id`: the topmost mapped popup
/// when the stack is non-empty, a realized toplevel otherwise.
fn popup_parent_is_topmost(
    current_popups: &[WindowId],
    parent_id: WindowId,
    parent_is_realized_toplevel: bool,
) -> bool {
    match current_popups.last() {
        Some(topmost) => *topmost == parent_id,
        None => parent_is_realized_toplevel,
    }
}

/// Walks the transient chain to the first window that holds a shell role.
fn popup_parent(inner: &DisplayInner, start: WindowId) -> Option<WindowId> {
    let mut current = Some(start);
    while let Some(id) = current {
        let window = inner.window(id)?;
        if window.shell.is_realized_shell() {
            return Some(id);
        }
        current = window.transient_for;
    }
    None
}

pub(crate) fn create_surface(inner: &mut DisplayInner, id: WindowId) {
    let qh = inner.qh.clone();
    let compositor = inner.compositor.clone();
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    if window.surface.is_none() {
        window.surface = Some(compositor.create_surface(&qh, id));
        window.opaque_region_dirty = window.opaque_region.is_some();
        window.input_region_dirty = window.input_region.is_some();
    }
}

pub(crate) fn show_window(inner: &mut DisplayInner, id: WindowId) {
    create_surface(inner, id);
    map_window(inner, id);
    inner.emit(WindowEvent::Mapped { window: id });

    // Contents staged before the hide survive in the staging buffer;
    // reattach them so the window reappears without a repaint.
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    window.mapped = true;
    if let (Some(surface), Some(staging)) = (&window.surface, &window.buffers.staging) {
        let staging = staging.borrow();
        surface.attach(Some(staging.wl_buffer()), 0, 0);
        if surface.version() >= 3 {
            surface.set_buffer_scale(staging.scale());
        }
        let (width, height) = staging.logical_size();
        surface.damage(0, 0, width, height);
        drop(staging);
        window.pending_commit = true;
        window.pending_buffer_attached = true;
    }
}

fn map_window(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window(id) else {
        return;
    };
    if !matches!(window.shell, ShellObjects::None)
        || window.use_custom_surface
        || !should_be_mapped(window)
    {
        return;
    }
    if window.window_type == WindowType::Temp && window.transient_for.is_none() {
        debug!(window = id.0, "temp window mapped without a transient parent");
    }

    if should_map_as_subsurface(inner, window) {
        let parent = window.transient_for;
        let parent_has_surface = parent
            .and_then(|parent| inner.window(parent))
            .is_some_and(|parent| parent.surface.is_some());
        if let (Some(parent), true) = (parent, parent_has_surface) {
            create_subsurface(inner, id, parent);
        } else {
            warn!(
                window = id.0,
                "couldn't map window as subsurface because it doesn't have a parent"
            );
        }
    } else if should_map_as_popup(inner, window) {
        // Menus torn off from a menubar are created without a parent;
        // attribute them to the window under the pointer.
        let transient_for = window.transient_for.or_else(|| {
            if window.hint == TypeHint::PopupMenu {
                inner.seats.pointer_focus()
            } else {
                None
            }
        });
        let parent = transient_for.and_then(|parent| popup_parent(inner, parent));
        match parent {
            Some(parent) => create_xdg_popup(inner, id, parent),
            None => {
                warn!(
                    window = id.0,
                    "couldn't map window as popup because it doesn't have a parent"
                );
                create_xdg_toplevel(inner, id);
            }
        }
    } else {
        create_xdg_toplevel(inner, id);
    }
}

fn create_xdg_toplevel(inner: &mut DisplayInner, id: WindowId) {
    let qh = inner.qh.clone();
    let shell = inner.shell.clone();
    let ctk_shell = inner.ctk_shell.clone();
    let default_app_id = inner.application_id.clone();

    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let Some(surface) = window.surface.clone() else {
        return;
    };

    // Commits are held back until the initial configure arrives.
    window.freeze_count += 1;

    window.shell = match &shell {
        Shell::Xdg(wm_base) => {
            let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, id);
            let toplevel = xdg_surface.get_toplevel(&qh, id);
            ShellObjects::XdgToplevel {
                xdg_surface,
                toplevel,
            }
        }
        Shell::V6(shell) => {
            let xdg_surface = shell.get_xdg_surface(&surface, &qh, id);
            let toplevel = xdg_surface.get_toplevel(&qh, id);
            ShellObjects::V6Toplevel {
                xdg_surface,
                toplevel,
            }
        }
    };

    if let Some(ctk_shell) = &ctk_shell {
        if window.ctk_surface.is_none() {
            window.ctk_surface = Some(ctk_shell.get_ctk_surface(&surface, &qh, id));
        }
    }

    let app_id = window
        .dbus
        .application_id
        .clone()
        .unwrap_or(default_app_id);
    let state = window.state;
    let fullscreen_output = window.initial_fullscreen_output.clone();
    let modal = window.modal;

    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => {
            toplevel.set_app_id(app_id);
            if state.contains(WindowStateMask::MAXIMIZED) {
                toplevel.set_maximized();
            }
            if state.contains(WindowStateMask::FULLSCREEN) {
                toplevel.set_fullscreen(fullscreen_output.as_ref());
            }
        }
        ShellObjects::V6Toplevel { toplevel, .. } => {
            toplevel.set_app_id(app_id);
            if state.contains(WindowStateMask::MAXIMIZED) {
                toplevel.set_maximized();
            }
            if state.contains(WindowStateMask::FULLSCREEN) {
                toplevel.set_fullscreen(fullscreen_output.as_ref());
            }
        }
        _ => unreachable!(),
    }

    if modal {
        if let Some(ctk_surface) = &window.ctk_surface {
            ctk_surface.set_modal();
        }
    }

    let is_orphan_dialog = window.hint == TypeHint::Dialog && window.transient_for.is_none();

    sync_parent(inner, id);
    crate::foreign::sync_parent_of_imported(inner, id);
    sync_title(inner, id);
    sync_geometry_hints(inner, id);
    maybe_set_dbus_properties(inner, id);
    announce_decoration_mode(inner, id);

    if is_orphan_dialog && !inner.orphan_dialogs.contains(&id) {
        inner.orphan_dialogs.push(id);
    }

    surface.commit();
}

fn create_xdg_popup(inner: &mut DisplayInner, id: WindowId, parent_id: WindowId) {
    let qh = inner.qh.clone();
    let shell = inner.shell.clone();
    let grab = inner
        .seats
        .implicit_grab()
        .map(|(seat, serial)| (seat.clone(), serial));

    {
        let Some(window) = inner.window(id) else {
            return;
        };
        if window.surface.is_none() {
            return;
        }
        if window.shell.is_realized_toplevel() {
            warn!(window = id.0, "can't map popup, already mapped as toplevel");
            return;
        }
        if window.shell.is_realized_popup() {
            return;
        }
        let Some(parent) = inner.window(parent_id) else {
            return;
        };
        if !parent.shell.is_realized_shell() {
            return;
        }
        if !popup_parent_is_topmost(
            &inner.current_popups,
            parent_id,
            parent.shell.is_realized_toplevel(),
        ) {
            warn!(window = id.0, "tried to map a popup with a non-topmost parent");
            return;
        }
    }

    // Compute placement inputs before taking any mutable borrows.
    let (geometry, move_to_rect, simple_rect) = {
        let window = inner.window(id).unwrap();
        let parent = inner.window(parent_id).unwrap();
        let geometry = window.geometry();
        match &window.position_method {
            PositionMethod::MoveToRect(params) => {
                let mut params = params.clone();
                sanitize_anchor_rect(&mut params.rect);
                translate_to_parent_geometry(inner, window, parent_id, &mut params.rect);
                (geometry, Some(params), Rectangle::from_size(1, 1))
            }
            _ => {
                let rect = simple_anchor_rect(
                    (window.x, window.y),
                    (geometry.x, geometry.y),
                    (parent.x, parent.y),
                    (parent.shadow.left, parent.shadow.top),
                );
                (geometry, None, rect)
            }
        }
    };

    let parent_shell = match &inner.window(parent_id).unwrap().shell {
        ShellObjects::XdgToplevel { xdg_surface, .. }
        | ShellObjects::XdgPopup { xdg_surface, .. } => Ok(xdg_surface.clone()),
        ShellObjects::V6Toplevel { xdg_surface, .. }
        | ShellObjects::V6Popup { xdg_surface, .. } => Err(xdg_surface.clone()),
        _ => return,
    };

    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let surface = window.surface.clone().unwrap();
    window.freeze_count += 1;

    window.shell = match (&shell, parent_shell) {
        (Shell::Xdg(wm_base), Ok(parent_xdg_surface)) => {
            let positioner = wm_base.create_positioner(&qh, ());
            match &move_to_rect {
                Some(params) => {
                    positioner.set_size(geometry.width, geometry.height);
                    positioner.set_anchor_rect(
                        params.rect.x,
                        params.rect.y,
                        params.rect.width,
                        params.rect.height,
                    );
                    positioner.set_offset(params.rect_anchor_dx, params.rect_anchor_dy);
                    positioner.set_anchor(anchor_for(params.rect_anchor));
                    positioner.set_gravity(gravity_for(params.window_anchor));
                    // The request takes the raw bitfield.
                    positioner.set_constraint_adjustment(
                        constraint_adjustment_for(params.anchor_hints).bits(),
                    );
                }
                None => {
                    positioner.set_size(geometry.width, geometry.height);
                    positioner.set_anchor_rect(simple_rect.x, simple_rect.y, 1, 1);
                    positioner.set_anchor(xdg_positioner::Anchor::TopLeft);
                    positioner.set_gravity(xdg_positioner::Gravity::BottomRight);
                }
            }
            let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, id);
            let popup = xdg_surface.get_popup(Some(&parent_xdg_surface), &positioner, &qh, id);
            positioner.destroy();
            if let Some((seat, serial)) = &grab {
                popup.grab(seat, *serial);
            }
            ShellObjects::XdgPopup { xdg_surface, popup }
        }
        (Shell::V6(v6_shell), Err(parent_xdg_surface)) => {
            let positioner = v6_shell.create_positioner(&qh, ());
            match &move_to_rect {
                Some(params) => {
                    positioner.set_size(geometry.width, geometry.height);
                    positioner.set_anchor_rect(
                        params.rect.x,
                        params.rect.y,
                        params.rect.width,
                        params.rect.height,
                    );
                    positioner.set_offset(params.rect_anchor_dx, params.rect_anchor_dy);
                    positioner.set_anchor(anchor_for_legacy(params.rect_anchor));
                    positioner.set_gravity(gravity_for_legacy(params.window_anchor));
                    positioner.set_constraint_adjustment(
                        constraint_adjustment_for_legacy(params.anchor_hints).bits(),
                    );
                }
                None => {
                    positioner.set_size(geometry.width, geometry.height);
                    positioner.set_anchor_rect(simple_rect.x, simple_rect.y, 1, 1);
                    positioner.set_anchor(
                        zxdg_positioner_v6::Anchor::Top | zxdg_positioner_v6::Anchor::Left,
                    );
                    positioner.set_gravity(
                        zxdg_positioner_v6::Gravity::Bottom | zxdg_positioner_v6::Gravity::Right,
                    );
                }
            }
            let xdg_surface = v6_shell.get_xdg_surface(&surface, &qh, id);
            let popup = xdg_surface.get_popup(&parent_xdg_surface, &positioner, &qh, id);
            positioner.destroy();
            if let Some((seat, serial)) = &grab {
                popup.grab(seat, *serial);
            }
            ShellObjects::V6Popup { xdg_surface, popup }
        }
        _ => {
            window.freeze_count -= 1;
            return;
        }
    };

    if let Some(params) = move_to_rect {
        window.position_method = PositionMethod::MoveToRect(params);
    }
    window.popup_parent = Some(parent_id);
    surface.commit();
    inner.current_popups.push(id);
}

fn create_subsurface(inner: &mut DisplayInner, id: WindowId, parent_id: WindowId) {
    let qh = inner.qh.clone();
    let subcompositor = inner.subcompositor.clone();
    let parent_surface = match inner.window(parent_id).and_then(|parent| parent.surface.clone()) {
        Some(surface) => surface,
        None => return,
    };
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let Some(surface) = window.surface.clone() else {
        return;
    };

    let subsurface = subcompositor.get_subsurface(&surface, &parent_surface, &qh, ());
    subsurface.set_position(window.x, window.y);
    window.shell = ShellObjects::Subsurface { subsurface };

    // The subsurface stays synchronized until the parent commits, so the
    // initial position latches together with the parent's frame content.
    if let Some(parent) = inner.window_mut(parent_id) {
        observe_parent_commit(parent, id);
    }
    request_parent_commit(inner, id);

    inner.sync_input_region(id);
}

fn observe_parent_commit(parent: &mut WindowState, child: WindowId) {
    if !parent.commit_observers.contains(&child) {
        parent.commit_observers.push(child);
    }
}

/// Asks the window's transient parent to commit on its next frame, so
/// state that only latches on a parent commit, such as a subsurface
/// position, takes effect.
fn request_parent_commit(inner: &mut DisplayInner, id: WindowId) {
    let Some(parent_id) = inner.window(id).and_then(|window| window.transient_for) else {
        return;
    };
    let Some(parent) = inner.window_mut(parent_id) else {
        return;
    };
    if parent.surface.is_none() || parent.pending_commit {
        return;
    }
    parent.pending_commit = true;
}

/// Translates a rectangle from the coordinate space of the window's
/// transient parent into the popup parent's window geometry.
fn translate_to_parent_geometry(
    inner: &DisplayInner,
    window: &WindowState,
    parent_id: WindowId,
    rect: &mut Rectangle,
) {
    let mut current = window.transient_for;
    while let Some(id) = current {
        if id == parent_id {
            break;
        }
        let Some(intermediate) = inner.window(id) else {
            break;
        };
        rect.x += intermediate.x;
        rect.y += intermediate.y;
        current = intermediate.transient_for;
    }
    if let Some(parent) = inner.window(parent_id) {
        rect.x -= parent.shadow.left;
        rect.y -= parent.shadow.top;
    }
}

/// The inverse of [`translate_to_parent_geometry`], used when the configure
/// event reports the popup's final placement.
pub(crate) fn translate_from_parent_geometry(
    inner: &DisplayInner,
    window: &WindowState,
    parent_id: WindowId,
    x: i32,
    y: i32,
) -> (i32, i32) {
    let mut dx = 0;
    let mut dy = 0;
    let mut current = window.transient_for;
    while let Some(id) = current {
        if id == parent_id {
            break;
        }
        let Some(intermediate) = inner.window(id) else {
            break;
        };
        dx += intermediate.x;
        dy += intermediate.y;
        current = intermediate.transient_for;
    }
    let (shadow_left, shadow_top) = inner
        .window(parent_id)
        .map(|parent| (parent.shadow.left, parent.shadow.top))
        .unwrap_or((0, 0));
    (x - dx + shadow_left, y - dy + shadow_top)
}

pub(crate) fn hide_window(inner: &mut DisplayInner, id: WindowId) {
    // Children must not outlive the surface their popups are stacked on.
    let child_popups: Vec<WindowId> = inner
        .current_popups
        .iter()
        .copied()
        .filter(|popup| {
            inner
                .window(*popup)
                .and_then(|window| window.popup_parent)
                == Some(id)
        })
        .collect();
    for popup in child_popups {
        warn!(window = id.0, popup = popup.0, "tried to unmap the parent of a popup");
        hide_window(inner, popup);
        if let Some(window) = inner.window_mut(popup) {
            window.mapped = false;
        }
    }

    crate::foreign::unset_transient_for_exported(inner, id);

    let Some(window) = inner.window_mut(id) else {
        return;
    };

    let had_role = !matches!(window.shell, ShellObjects::None);
    match std::mem::take(&mut window.shell) {
        ShellObjects::XdgToplevel {
            xdg_surface,
            toplevel,
        } => {
            toplevel.destroy();
            xdg_surface.destroy();
        }
        ShellObjects::XdgPopup { xdg_surface, popup } => {
            popup.destroy();
            xdg_surface.destroy();
        }
        ShellObjects::V6Toplevel {
            xdg_surface,
            toplevel,
        } => {
            toplevel.destroy();
            xdg_surface.destroy();
        }
        ShellObjects::V6Popup { xdg_surface, popup } => {
            popup.destroy();
            xdg_surface.destroy();
        }
        ShellObjects::Subsurface { subsurface } => {
            subsurface.destroy();
        }
        ShellObjects::None => {}
    }

    if had_role {
        if !window.initial_configure_received {
            // The configure freeze is still held; release it.
            window.freeze_count = window.freeze_count.saturating_sub(1);
        } else {
            window.initial_configure_received = false;
        }
    }
    if window.awaiting_frame {
        window.awaiting_frame = false;
        window.freeze_count = window.freeze_count.saturating_sub(1);
    }

    // ctk_surface1 has no destructor request; dropping the handle is all
    // a client can do.
    if window.ctk_surface.take().is_some() {
        window.dbus_properties_set = false;
    }
    if let Some(decoration) = window.decoration.take() {
        decoration.release();
    }
    if let Some(surface) = window.surface.take() {
        surface.destroy();
    }

    window.entered_outputs.clear();
    window.popup_parent = None;
    window.saved_size = None;
    window.saved_size_changed = false;
    window.fixed_size = None;
    window.pending_serial = None;
    window.configuring_popup = false;
    window.committed_geometry = None;
    window.pending_commit = false;
    window.pending_buffer_attached = false;
    window.commit_observers.clear();
    window.buffers.clear();

    inner.orphan_dialogs.retain(|orphan| *orphan != id);
    inner.current_popups.retain(|popup| *popup != id);
}

pub(crate) fn sync_parent(inner: &mut DisplayInner, id: WindowId) {
    let parent_toplevel = inner
        .window(id)
        .and_then(|window| window.transient_for)
        .and_then(|parent| inner.window(parent))
        .map(|parent| match &parent.shell {
            ShellObjects::XdgToplevel { toplevel, .. } => Some(Ok(toplevel.clone())),
            ShellObjects::V6Toplevel { toplevel, .. } => Some(Err(toplevel.clone())),
            _ => None,
        });
    let Some(window) = inner.window(id) else {
        return;
    };
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => {
            let parent = match parent_toplevel.flatten() {
                Some(Ok(parent)) => Some(parent),
                _ => None,
            };
            toplevel.set_parent(parent.as_ref());
        }
        ShellObjects::V6Toplevel { toplevel, .. } => {
            let parent = match parent_toplevel.flatten() {
                Some(Err(parent)) => Some(parent),
                _ => None,
            };
            toplevel.set_parent(parent.as_ref());
        }
        _ => {}
    }
}

pub(crate) fn sync_title(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window(id) else {
        return;
    };
    let Some(title) = window.title.clone() else {
        return;
    };
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => toplevel.set_title(title),
        ShellObjects::V6Toplevel { toplevel, .. } => toplevel.set_title(title),
        _ => {}
    }
}

pub(crate) fn sync_geometry_hints(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window(id) else {
        return;
    };
    let Some(hints) = window.geometry_hints else {
        return;
    };
    if !window.shell.is_realized_toplevel() {
        return;
    }
    let shadow = window.shadow;
    let (min_width, min_height) = hints
        .min_size
        .map(|(width, height)| {
            (
                (width - shadow.horizontal()).max(0),
                (height - shadow.vertical()).max(0),
            )
        })
        .unwrap_or((0, 0));
    let (max_width, max_height) = hints
        .max_size
        .map(|(width, height)| {
            (
                (width - shadow.horizontal()).max(0),
                (height - shadow.vertical()).max(0),
            )
        })
        .unwrap_or((0, 0));
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => {
            toplevel.set_min_size(min_width, min_height);
            toplevel.set_max_size(max_width, max_height);
        }
        ShellObjects::V6Toplevel { toplevel, .. } => {
            toplevel.set_min_size(min_width, min_height);
            toplevel.set_max_size(max_width, max_height);
        }
        _ => {}
    }
}

/// Applies a position change for roles where the client places itself.
pub(crate) fn sync_position(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window(id) else {
        return;
    };
    if let ShellObjects::Subsurface { subsurface } = &window.shell {
        subsurface.set_position(window.x, window.y);
        request_parent_commit(inner, id);
    }
}

pub(crate) fn set_transient_for(
    inner: &mut DisplayInner,
    id: WindowId,
    parent: Option<WindowId>,
) {
    // Reject loops in the transient chain.
    if let Some(parent) = parent {
        let mut current = Some(parent);
        while let Some(ancestor) = current {
            if ancestor == id {
                warn!(
                    window = id.0,
                    "rejecting transient parent that would create a loop"
                );
                return;
            }
            current = inner.window(ancestor).and_then(|window| window.transient_for);
        }
    }

    crate::foreign::unset_transient_for_exported(inner, id);

    let previous = inner
        .window(id)
        .and_then(|window| window.transient_for);
    let was_subsurface = inner
        .window(id)
        .is_some_and(|window| matches!(window.shell, ShellObjects::Subsurface { .. }));

    if let Some(window) = inner.window_mut(id) {
        window.transient_for = parent;
    }

    // A mapped subsurface belongs to its old parent's surface tree and
    // must be re-created under the new one.
    if was_subsurface && previous != parent {
        let mapped = inner.window(id).is_some_and(|window| window.mapped);
        hide_window(inner, id);
        if let Some(window) = inner.window_mut(id) {
            window.mapped = false;
        }
        if mapped {
            show_window(inner, id);
        }
        return;
    }

    // Dialogs gaining a parent stop floating between focused toplevels.
    if parent.is_some() {
        inner.orphan_dialogs.retain(|orphan| *orphan != id);
    } else if inner.window(id).is_some_and(|window| {
        window.hint == TypeHint::Dialog && window.shell.is_realized_toplevel()
    }) && !inner.orphan_dialogs.contains(&id)
    {
        inner.orphan_dialogs.push(id);
    }

    sync_parent(inner, id);
}

/// Re-parents parentless dialogs onto the toplevel that holds focus.
pub(crate) fn reparent_orphan_dialogs(inner: &mut DisplayInner, focused: WindowId) {
    let orphans: Vec<WindowId> = inner
        .orphan_dialogs
        .iter()
        .copied()
        .filter(|orphan| *orphan != focused)
        .collect();
    for orphan in orphans {
        if let Some(window) = inner.window_mut(orphan) {
            window.transient_for = Some(focused);
        }
        sync_parent(inner, orphan);
        if let Some(window) = inner.window_mut(orphan) {
            window.transient_for = None;
        }
    }
}

pub(crate) fn maybe_set_dbus_properties(inner: &mut DisplayInner, id: WindowId) {
    let qh = inner.qh.clone();
    let ctk_shell = inner.ctk_shell.clone();
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    if window.dbus_properties_set || window.dbus.is_empty() {
        return;
    }
    if window.ctk_surface.is_none() {
        let (Some(ctk_shell), Some(surface)) = (&ctk_shell, &window.surface) else {
            return;
        };
        window.ctk_surface = Some(ctk_shell.get_ctk_surface(surface, &qh, id));
    }
    let ctk_surface = window.ctk_surface.as_ref().unwrap();
    let dbus = &window.dbus;
    ctk_surface.set_dbus_properties(
        dbus.application_id.clone(),
        dbus.app_menu_path.clone(),
        dbus.menubar_path.clone(),
        dbus.window_object_path.clone(),
        dbus.application_object_path.clone(),
        dbus.unique_bus_name.clone(),
    );
    window.dbus_properties_set = true;
}

pub(crate) fn announce_decoration_mode(inner: &mut DisplayInner, id: WindowId) {
    use wayland_protocols_plasma::server_decoration::client::org_kde_kwin_server_decoration::Mode;

    let qh = inner.qh.clone();
    let Some(manager) = inner.server_decoration_manager.clone() else {
        return;
    };
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let Some(surface) = &window.surface else {
        return;
    };
    if window.decoration.is_none() {
        window.decoration = Some(manager.create(surface, &qh, id));
    }
    let mode = if window.using_csd {
        Mode::Client
    } else {
        Mode::Server
    };
    window
        .decoration
        .as_ref()
        .unwrap()
        .request_mode(mode as u32);
}

fn resize_edge(edge: WindowEdge) -> xdg_toplevel::ResizeEdge {
    use xdg_toplevel::ResizeEdge;
    match edge {
        WindowEdge::NorthWest => ResizeEdge::TopLeft,
        WindowEdge::North => ResizeEdge::Top,
        WindowEdge::NorthEast => ResizeEdge::TopRight,
        WindowEdge::West => ResizeEdge::Left,
        WindowEdge::East => ResizeEdge::Right,
        WindowEdge::SouthWest => ResizeEdge::BottomLeft,
        WindowEdge::South => ResizeEdge::Bottom,
        WindowEdge::SouthEast => ResizeEdge::BottomRight,
    }
}

fn resize_edge_legacy(edge: WindowEdge) -> zxdg_toplevel_v6::ResizeEdge {
    use zxdg_toplevel_v6::ResizeEdge;
    match edge {
        WindowEdge::NorthWest => ResizeEdge::TopLeft,
        WindowEdge::North => ResizeEdge::Top,
        WindowEdge::NorthEast => ResizeEdge::TopRight,
        WindowEdge::West => ResizeEdge::Left,
        WindowEdge::East => ResizeEdge::Right,
        WindowEdge::SouthWest => ResizeEdge::BottomLeft,
        WindowEdge::South => ResizeEdge::Bottom,
        WindowEdge::SouthEast => ResizeEdge::BottomRight,
    }
}

pub(crate) fn begin_resize_drag(inner: &mut DisplayInner, id: WindowId, edge: WindowEdge) {
    let Some((seat, serial)) = inner
        .seats
        .implicit_grab()
        .map(|(seat, serial)| (seat.clone(), serial))
    else {
        return;
    };
    let Some(window) = inner.window(id) else {
        return;
    };
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => {
            toplevel.resize(&seat, serial, resize_edge(edge));
        }
        ShellObjects::V6Toplevel { toplevel, .. } => {
            toplevel.resize(&seat, serial, resize_edge_legacy(edge));
        }
        _ => return,
    }

    // The compositor absorbs the grab's input from here on; the serial
    // must not feed another grab.
    inner.seats.end_implicit_grab(&seat);
}

pub(crate) fn begin_move_drag(inner: &mut DisplayInner, id: WindowId) {
    let Some((seat, serial)) = inner
        .seats
        .implicit_grab()
        .map(|(seat, serial)| (seat.clone(), serial))
    else {
        return;
    };
    let Some(window) = inner.window(id) else {
        return;
    };
    match &window.shell {
        ShellObjects::XdgToplevel { toplevel, .. } => toplevel._move(&seat, serial),
        ShellObjects::V6Toplevel { toplevel, .. } => toplevel._move(&seat, serial),
        _ => return,
    }

    inner.seats.end_implicit_grab(&seat);
}

/// Commits staged contents and schedules the next frame callback.
pub(crate) fn after_paint(inner: &mut DisplayInner, id: WindowId) {
    let qh = inner.qh.clone();
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    if !window.pending_commit || window.is_frozen() {
        return;
    }
    let Some(surface) = window.surface.clone() else {
        return;
    };

    surface.frame(&qh, id);
    window.freeze_count += 1;
    window.awaiting_frame = true;

    // Once committed the buffer is live; backfill anything this frame did
    // not repaint from the previously committed contents first.
    if window.pending_buffer_attached {
        let whole_window = Region::from_rect(Rectangle::from_size(window.width, window.height));
        window.buffers.read_back(&whole_window);
    }

    surface.commit();

    if window.pending_buffer_attached {
        window.buffers.mark_committed();
    }
    window.pending_commit = false;
    window.pending_buffer_attached = false;

    inner.emit(WindowEvent::Committed { window: id });

    // Subsurfaces waiting for this commit can go desynchronized now that
    // their initial state is latched.
    let observers = match inner.window_mut(id) {
        Some(window) => std::mem::take(&mut window.commit_observers),
        None => SmallVec::new(),
    };
    for child in observers {
        if let Some(window) = inner.window(child) {
            if let ShellObjects::Subsurface { subsurface } = &window.shell {
                subsurface.set_desync();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowAttributes;

    #[test]
    fn only_the_topmost_popup_may_parent_another_popup() {
        let stack = [WindowId(1), WindowId(2)];
        assert!(popup_parent_is_topmost(&stack, WindowId(2), false));
        assert!(!popup_parent_is_topmost(&stack, WindowId(1), false));
        // Even a realized toplevel has to wait until the stack unwinds.
        assert!(!popup_parent_is_topmost(&stack, WindowId(3), true));
    }

    #[test]
    fn an_empty_popup_stack_requires_a_realized_toplevel_parent() {
        assert!(popup_parent_is_topmost(&[], WindowId(3), true));
        assert!(!popup_parent_is_topmost(&[], WindowId(3), false));
    }

    #[test]
    fn a_child_waits_on_its_parent_commit_only_once() {
        let attrs = WindowAttributes::default();
        let mut parent = WindowState::new(WindowId(1), &attrs);
        observe_parent_commit(&mut parent, WindowId(2));
        observe_parent_commit(&mut parent, WindowId(2));
        observe_parent_commit(&mut parent, WindowId(3));
        assert_eq!(parent.commit_observers.as_slice(), [WindowId(2), WindowId(3)]);
    }
}
