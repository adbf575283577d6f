//! Tracks advertised outputs and the two properties windows care about:
//! the buffer scale and the refresh rate of the mode currently in use.
//!
//! Properties are accumulated per output and only applied once the
//! compositor terminates the burst with `done`, at which point any window
//! shown on that output gets its scale re-evaluated.

use tracing::debug;
use wayland_client::protocol::wl_output::{self, WlOutput};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

use crate::registry::State;

#[derive(Debug)]
pub struct OutputInfo {
    pub output: WlOutput,
    /// Registry name of the global, used for removal.
    pub name: u32,
    pub scale: i32,
    /// Refresh rate of the current mode in millihertz, 0 if unknown.
    pub refresh: i32,
    pending_scale: i32,
    pending_refresh: i32,
    /// Set once the initial property burst has been terminated by `done`.
    pub done: bool,
}

#[derive(Debug, Default)]
pub struct OutputTracker {
    outputs: Vec<OutputInfo>,
}

impl OutputTracker {
    pub fn add(&mut self, output: WlOutput, name: u32) {
        self.outputs.push(OutputInfo {
            output,
            name,
            scale: 1,
            refresh: 0,
            pending_scale: 1,
            pending_refresh: 0,
            done: false,
        });
    }

    /// Removes the output with the given registry name and returns it.
    pub fn remove(&mut self, name: u32) -> Option<OutputInfo> {
        let index = self.outputs.iter().position(|info| info.name == name)?;
        Some(self.outputs.remove(index))
    }

    pub fn find(&self, output: &WlOutput) -> Option<&OutputInfo> {
        self.outputs.iter().find(|info| info.output == *output)
    }

    fn find_mut(&mut self, output: &WlOutput) -> Option<&mut OutputInfo> {
        self.outputs.iter_mut().find(|info| info.output == *output)
    }

    pub fn scale_of(&self, output: &WlOutput) -> i32 {
        self.find(output).map(|info| info.scale).unwrap_or(1)
    }

    pub fn refresh_of(&self, output: &WlOutput) -> Option<i32> {
        self.find(output)
            .map(|info| info.refresh)
            .filter(|refresh| *refresh > 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputInfo> {
        self.outputs.iter()
    }
}

impl Dispatch<WlOutput, u32> for State {
    fn event(
        state: &mut Self,
        output: &WlOutput,
        event: wl_output::Event,
        _name: &u32,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let mut inner = state.inner.borrow_mut();
        match event {
            wl_output::Event::Mode {
                flags: WEnum::Value(flags),
                refresh,
                ..
            } => {
                if flags.contains(wl_output::Mode::Current) {
                    if let Some(info) = inner.outputs.find_mut(output) {
                        info.pending_refresh = refresh;
                    }
                }
            }
            wl_output::Event::Scale { factor } => {
                if let Some(info) = inner.outputs.find_mut(output) {
                    info.pending_scale = factor;
                }
            }
            wl_output::Event::Done => {
                let changed = match inner.outputs.find_mut(output) {
                    Some(info) => {
                        let changed = !info.done
                            || info.scale != info.pending_scale
                            || info.refresh != info.pending_refresh;
                        info.scale = info.pending_scale;
                        info.refresh = info.pending_refresh;
                        info.done = true;
                        debug!(
                            output = info.name,
                            scale = info.scale,
                            refresh = info.refresh,
                            "output properties settled"
                        );
                        changed
                    }
                    None => false,
                };
                if changed {
                    let id = output.id();
                    inner.rescale_windows_on_output(&id);
                }
            }
            _ => {}
        }
    }
}
