//! Keyboard shortcuts inhibition.
//!
//! While inhibited, the compositor routes all key events to the window
//! instead of acting on its own bindings. One inhibitor is held per seat.

use tracing::debug;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};
use wayland_protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibitor_v1::{
    self, ZwpKeyboardShortcutsInhibitorV1,
};

use crate::registry::{DisplayInner, State};
use crate::window::{WindowEvent, WindowId};

pub(crate) fn inhibit(inner: &mut DisplayInner, id: WindowId) {
    let qh = inner.qh.clone();
    let Some(manager) = inner.shortcuts_inhibit_manager.clone() else {
        debug!("compositor does not support shortcuts inhibition");
        return;
    };
    let seats: Vec<_> = inner.seats.iter().map(|info| info.seat.clone()).collect();
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let Some(surface) = window.surface.clone() else {
        return;
    };
    for seat in seats {
        let already_inhibited = window
            .shortcuts_inhibitors
            .iter()
            .any(|(seat_id, _)| *seat_id == seat.id());
        if already_inhibited {
            continue;
        }
        let inhibitor = manager.inhibit_shortcuts(&surface, &seat, &qh, id);
        window.shortcuts_inhibitors.push((seat.id(), inhibitor));
    }
}

pub(crate) fn restore(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    for (_, inhibitor) in window.shortcuts_inhibitors.drain(..) {
        inhibitor.destroy();
    }
}

impl Dispatch<ZwpKeyboardShortcutsInhibitorV1, WindowId> for State {
    fn event(
        state: &mut Self,
        _inhibitor: &ZwpKeyboardShortcutsInhibitorV1,
        event: zwp_keyboard_shortcuts_inhibitor_v1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let inhibited = match event {
            zwp_keyboard_shortcuts_inhibitor_v1::Event::Active => true,
            zwp_keyboard_shortcuts_inhibitor_v1::Event::Inactive => false,
            _ => return,
        };
        state.inner.borrow_mut().emit(WindowEvent::ShortcutsInhibited {
            window: *id,
            inhibited,
        });
    }
}
