//! Generated bindings for protocols not shipped by wayland-protocols.
//!
//! The legacy v6 xdg-shell was dropped from wayland-protocols releases, but
//! compositors predating the stable protocol still speak it and the shell
//! fallback path needs it. ctk-shell1 is the private compositor extension
//! carrying per-surface metadata (D-Bus properties, modality, startup
//! notification, tiled edge states).

pub mod ctk_shell1;
pub mod xdg_shell_v6;
