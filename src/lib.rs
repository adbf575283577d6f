//! A Wayland windowing backend.
//!
//! This crate maps a desktop-toolkit window model onto Wayland. Windows
//! are realized as xdg_toplevels, xdg_popups or wl_subsurfaces depending
//! on their type and hints, with support for the v6 predecessor of the
//! xdg-shell protocol on older compositors. Contents are software
//! rendered into shared-memory buffers, with partial repaints carried
//! over between frames and repaint pacing driven by the compositor's
//! frame callbacks.
//!
//! Beyond the core lifecycle, the backend covers shadow margins and
//! window geometry, interactive moves and resizes, server-side decoration
//! negotiation, foreign toplevel handles, keyboard shortcuts inhibition
//! and per-output scale tracking.
//!
//! The [`WaylandBackend`] is a [`calloop`] event source; window events
//! are delivered through the event loop:
//!
//! ```no_run
//! use calloop::EventLoop;
//! use cdk_wayland::{WaylandBackend, WindowAttributes, WindowEvent};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (backend, display) = WaylandBackend::connect()?;
//!     let mut event_loop: EventLoop<()> = EventLoop::try_new()?;
//!     event_loop.handle().insert_source(backend, |event, _, _| {
//!         if let WindowEvent::CloseRequested { .. } = event {
//!             std::process::exit(0);
//!         }
//!     })?;
//!
//!     let window = display.create_window(WindowAttributes::default());
//!     window.show();
//!     display.flush()?;
//!
//!     loop {
//!         event_loop.dispatch(None, &mut ())?;
//!     }
//! }
//! ```

pub mod frame;
mod foreign;
mod output;
pub mod positioner;
mod protocols;
mod registry;
mod seat;
pub mod shm;
mod shortcuts;
pub mod utils;
pub mod window;

pub use registry::{BackendError, WaylandBackend, WaylandDisplay};
pub use window::{
    DbusProperties, SizeHints, Window, WindowAttributes, WindowEdge, WindowEvent, WindowId,
    WindowStateMask, WindowType, TypeHint,
};
