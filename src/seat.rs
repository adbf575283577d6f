//! Seat and input device bookkeeping.
//!
//! Windows need very little from input: which window the pointer is over
//! and the serial of the most recent button, touch or key event. That
//! serial is what popup grabs, interactive moves and resizes and window
//! menus hand back to the compositor.

use tracing::debug;
use wayland_client::protocol::wl_keyboard::{self, WlKeyboard};
use wayland_client::protocol::wl_pointer::{self, ButtonState, WlPointer};
use wayland_client::protocol::wl_seat::{self, Capability, WlSeat};
use wayland_client::protocol::wl_touch::{self, WlTouch};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

use crate::registry::State;
use crate::window::WindowId;

#[derive(Debug)]
pub(crate) struct SeatInfo {
    pub seat: WlSeat,
    /// Registry name of the global, used for removal.
    pub name: u32,
    pointer: Option<WlPointer>,
    keyboard: Option<WlKeyboard>,
    touch: Option<WlTouch>,
    /// Serial of the newest button press, touch down or key press.
    pub implicit_grab_serial: Option<u32>,
    /// Ordering stamp for `implicit_grab_serial`; serials from different
    /// seats are not comparable.
    grab_stamp: u64,
    pub pointer_focus: Option<WindowId>,
}

#[derive(Debug, Default)]
pub(crate) struct SeatTracker {
    seats: Vec<SeatInfo>,
    stamp: u64,
}

impl SeatTracker {
    pub fn add(&mut self, seat: WlSeat, name: u32) {
        self.seats.push(SeatInfo {
            seat,
            name,
            pointer: None,
            keyboard: None,
            touch: None,
            implicit_grab_serial: None,
            grab_stamp: 0,
            pointer_focus: None,
        });
    }

    pub fn remove(&mut self, name: u32) -> Option<SeatInfo> {
        let index = self.seats.iter().position(|info| info.name == name)?;
        let info = self.seats.remove(index);
        if let Some(pointer) = &info.pointer {
            pointer.release();
        }
        if let Some(keyboard) = &info.keyboard {
            keyboard.release();
        }
        if let Some(touch) = &info.touch {
            touch.release();
        }
        info.seat.release();
        Some(info)
    }

    fn find_mut(&mut self, seat: &WlSeat) -> Option<&mut SeatInfo> {
        self.seats.iter_mut().find(|info| info.seat == *seat)
    }

    fn device_seat_mut(
        &mut self,
        matches: impl Fn(&SeatInfo) -> bool,
    ) -> Option<&mut SeatInfo> {
        self.seats.iter_mut().find(|info| matches(info))
    }

    fn note_serial(info: &mut SeatInfo, serial: u32, stamp: u64) {
        info.implicit_grab_serial = Some(serial);
        info.grab_stamp = stamp;
    }

    /// Forgets a seat's implicit grab serial after the compositor took it
    /// over, as it does for an interactive move or resize. The serial is
    /// spent and must not back a later popup grab.
    pub fn end_implicit_grab(&mut self, seat: &WlSeat) {
        if let Some(info) = self.find_mut(seat) {
            info.implicit_grab_serial = None;
        }
    }

    /// The seat holding the most recent implicit grab, with its serial.
    /// This is the seat a popup grab or interactive drag is attributed to.
    pub fn implicit_grab(&self) -> Option<(&WlSeat, u32)> {
        self.seats
            .iter()
            .filter_map(|info| info.implicit_grab_serial.map(|serial| (info, serial)))
            .max_by_key(|(info, _)| info.grab_stamp)
            .map(|(info, serial)| (&info.seat, serial))
    }

    /// The window currently under a pointer, if any.
    pub fn pointer_focus(&self) -> Option<WindowId> {
        self.seats.iter().find_map(|info| info.pointer_focus)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeatInfo> {
        self.seats.iter()
    }

    /// Drops any recorded focus on a window that went away.
    pub fn forget_window(&mut self, window: WindowId) {
        for info in &mut self.seats {
            if info.pointer_focus == Some(window) {
                info.pointer_focus = None;
            }
        }
    }
}

impl Dispatch<WlSeat, u32> for State {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: wl_seat::Event,
        _name: &u32,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(capabilities),
            } => {
                let Some(info) = inner.seats.find_mut(seat) else {
                    return;
                };
                if capabilities.contains(Capability::Pointer) && info.pointer.is_none() {
                    info.pointer = Some(seat.get_pointer(qh, ()));
                } else if !capabilities.contains(Capability::Pointer) {
                    if let Some(pointer) = info.pointer.take() {
                        pointer.release();
                        info.pointer_focus = None;
                    }
                }
                if capabilities.contains(Capability::Keyboard) && info.keyboard.is_none() {
                    info.keyboard = Some(seat.get_keyboard(qh, ()));
                } else if !capabilities.contains(Capability::Keyboard) {
                    if let Some(keyboard) = info.keyboard.take() {
                        keyboard.release();
                    }
                }
                if capabilities.contains(Capability::Touch) && info.touch.is_none() {
                    info.touch = Some(seat.get_touch(qh, ()));
                } else if !capabilities.contains(Capability::Touch) {
                    if let Some(touch) = info.touch.take() {
                        touch.release();
                    }
                }
            }
            wl_seat::Event::Name { name } => {
                debug!(seat = %name, "seat announced");
            }
            _ => {}
        }
    }
}

impl Dispatch<WlPointer, ()> for State {
    fn event(
        state: &mut Self,
        pointer: &WlPointer,
        event: wl_pointer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        let stamp = inner.seats.stamp.wrapping_add(1);
        inner.seats.stamp = stamp;
        let Some(info) = inner
            .seats
            .device_seat_mut(|info| info.pointer.as_ref() == Some(pointer))
        else {
            return;
        };
        match event {
            wl_pointer::Event::Enter { surface, .. } => {
                info.pointer_focus = surface.data::<WindowId>().copied();
            }
            wl_pointer::Event::Leave { .. } => {
                info.pointer_focus = None;
            }
            wl_pointer::Event::Button {
                serial,
                state: WEnum::Value(ButtonState::Pressed),
                ..
            } => {
                SeatTracker::note_serial(info, serial, stamp);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlKeyboard, ()> for State {
    fn event(
        state: &mut Self,
        keyboard: &WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        let stamp = inner.seats.stamp.wrapping_add(1);
        inner.seats.stamp = stamp;
        let Some(info) = inner
            .seats
            .device_seat_mut(|info| info.keyboard.as_ref() == Some(keyboard))
        else {
            return;
        };
        if let wl_keyboard::Event::Key {
            serial,
            state: WEnum::Value(wl_keyboard::KeyState::Pressed),
            ..
        } = event
        {
            SeatTracker::note_serial(info, serial, stamp);
        }
    }
}

impl Dispatch<WlTouch, ()> for State {
    fn event(
        state: &mut Self,
        touch: &WlTouch,
        event: wl_touch::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        let stamp = inner.seats.stamp.wrapping_add(1);
        inner.seats.stamp = stamp;
        let Some(info) = inner
            .seats
            .device_seat_mut(|info| info.touch.as_ref() == Some(touch))
        else {
            return;
        };
        if let wl_touch::Event::Down { serial, surface, .. } = event {
            SeatTracker::note_serial(info, serial, stamp);
            if info.pointer_focus.is_none() {
                info.pointer_focus = surface.data::<WindowId>().copied();
            }
        }
    }
}
