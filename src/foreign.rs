//! Foreign toplevel handles (xdg-foreign).
//!
//! Exporting gives a window a string handle another process can use to
//! make its own windows transient for this one; importing consumes such a
//! handle from elsewhere. Export is refcounted so independent callers can
//! share one handle.

use tracing::warn;
use wayland_client::Proxy;
use wayland_protocols::xdg::foreign::zv1::client::zxdg_exported_v1::{self, ZxdgExportedV1};
use wayland_protocols::xdg::foreign::zv1::client::zxdg_imported_v1::{self, ZxdgImportedV1};
use wayland_client::{Connection, Dispatch, QueueHandle};

use crate::registry::{DisplayInner, State};
use crate::window::{role, ExportedState, WindowEvent, WindowId};

pub(crate) fn export_handle(inner: &mut DisplayInner, id: WindowId) -> bool {
    let qh = inner.qh.clone();
    let Some(exporter) = inner.exporter.clone() else {
        warn!("server is missing xdg_foreign support");
        return false;
    };
    let Some(window) = inner.window_mut(id) else {
        return false;
    };
    let Some(surface) = window.surface.clone() else {
        return false;
    };

    let known_handle = match &mut window.exported {
        Some(exported) => {
            exported.export_count += 1;
            exported.handle.clone()
        }
        None => {
            let exported = exporter.export(&surface, &qh, id);
            window.exported = Some(ExportedState {
                exported,
                handle: None,
                export_count: 1,
            });
            None
        }
    };

    // Re-exports see the handle right away instead of waiting for an
    // event that already came.
    if let Some(handle) = known_handle {
        inner.emit(WindowEvent::HandleExported { window: id, handle });
    }
    true
}

pub(crate) fn unexport_handle(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    let Some(exported) = &mut window.exported else {
        return;
    };
    exported.export_count = exported.export_count.saturating_sub(1);
    if exported.export_count == 0 {
        if let Some(exported) = window.exported.take() {
            exported.exported.destroy();
        }
    }
}

pub(crate) fn set_transient_for_exported(
    inner: &mut DisplayInner,
    id: WindowId,
    handle: &str,
) -> bool {
    {
        let Some(window) = inner.window(id) else {
            return false;
        };
        if role::should_map_as_subsurface(inner, window)
            || role::should_map_as_popup(inner, window)
        {
            warn!(
                window = id.0,
                "window would be mapped as subsurface or popup, not setting transient for exported"
            );
            return false;
        }
    }
    let qh = inner.qh.clone();
    let Some(importer) = inner.importer.clone() else {
        warn!("server is missing xdg_foreign support");
        return false;
    };

    unset_transient_for_exported(inner, id);
    let Some(window) = inner.window_mut(id) else {
        return false;
    };
    window.transient_for = None;
    window.imported_transient_for = Some(importer.import(handle.to_owned(), &qh, id));

    role::sync_parent(inner, id);
    sync_parent_of_imported(inner, id);
    true
}

pub(crate) fn unset_transient_for_exported(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window_mut(id) else {
        return;
    };
    if let Some(imported) = window.imported_transient_for.take() {
        imported.destroy();
    }
}

/// Tells the imported toplevel in the other process that our surface is
/// its child.
pub(crate) fn sync_parent_of_imported(inner: &mut DisplayInner, id: WindowId) {
    let Some(window) = inner.window(id) else {
        return;
    };
    let Some(imported) = &window.imported_transient_for else {
        return;
    };
    let Some(surface) = &window.surface else {
        return;
    };
    if window.shell.is_realized_toplevel() {
        imported.set_parent_of(surface);
    }
}

impl Dispatch<ZxdgExportedV1, WindowId> for State {
    fn event(
        state: &mut Self,
        exported: &ZxdgExportedV1,
        event: zxdg_exported_v1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let zxdg_exported_v1::Event::Handle { handle } = event else {
            return;
        };
        let mut inner = state.inner.borrow_mut();
        let Some(window) = inner.window_mut(*id) else {
            return;
        };
        match &mut window.exported {
            Some(state) if state.exported.id() == exported.id() => {
                state.handle = Some(handle.clone());
            }
            _ => return,
        }
        inner.emit(WindowEvent::HandleExported {
            window: *id,
            handle,
        });
    }
}

impl Dispatch<ZxdgImportedV1, WindowId> for State {
    fn event(
        state: &mut Self,
        _imported: &ZxdgImportedV1,
        event: zxdg_imported_v1::Event,
        id: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let zxdg_imported_v1::Event::Destroyed = event else {
            return;
        };
        // The foreign toplevel went away; drop the relationship.
        let mut inner = state.inner.borrow_mut();
        unset_transient_for_exported(&mut inner, *id);
        role::sync_parent(&mut inner, *id);
    }
}
