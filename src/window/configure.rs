//! Application of toplevel configure events.
//!
//! The rules for turning a compositor-suggested size and state set into the
//! size a window actually adopts live here, free of protocol objects, so
//! the whole handshake can be exercised without a compositor.

use super::{SizeHints, WindowStateMask};

/// Accumulated state of a configure sequence, reset after each
/// xdg_surface.configure.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingConfigure {
    /// Suggested window geometry size; 0x0 means "pick your own size".
    pub width: i32,
    pub height: i32,
    pub state: WindowStateMask,
}

impl PendingConfigure {
    pub fn merge_state(&mut self, state: WindowStateMask) {
        self.state |= state;
    }

    pub fn set_size(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
    }

    /// Takes the accumulated set, leaving the size for the next sequence
    /// but clearing the states (they are re-sent in full every time).
    pub fn take(&mut self) -> PendingConfigure {
        let taken = *self;
        self.state = WindowStateMask::empty();
        taken
    }
}

/// States under which the compositor owns the window size and resize
/// requests from the application must not be forwarded.
pub fn is_state_fixed_size(state: WindowStateMask) -> bool {
    state.intersects(
        WindowStateMask::MAXIMIZED | WindowStateMask::FULLSCREEN | WindowStateMask::TILED,
    )
}

/// The size a configure sequence resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureOutcome {
    /// Surface size to adopt, including shadow margins.
    pub width: i32,
    pub height: i32,
    pub state: WindowStateMask,
    /// The compositor dictated the size (fixed states were present).
    pub fixed_size: bool,
    /// The size came straight from the compositor rather than from the
    /// saved floating size; record it so an identical resize request can
    /// be recognized later.
    pub compositor_size: bool,
}

/// Resolves a toplevel configure against the window's remembered sizes.
///
/// `saved_size` is the floating size remembered before entering a fixed
/// state, excluding margins. `unconfigured_size` is the last size requested
/// before the initial configure, excluding margins. `margins` is the total
/// shadow extent as (horizontal, vertical).
pub fn apply_toplevel_configure(
    pending: PendingConfigure,
    margins: (i32, i32),
    saved_size: Option<(i32, i32)>,
    saved_size_changed: bool,
    unconfigured_size: (i32, i32),
    hints: Option<&SizeHints>,
) -> ConfigureOutcome {
    let fixed_size = is_state_fixed_size(pending.state);
    let no_suggested_size = pending.width == 0 && pending.height == 0;

    let mut width = pending.width;
    let mut height = pending.height;
    let mut used_saved_size = false;

    if !fixed_size && (no_suggested_size || saved_size_changed) {
        if let Some((saved_width, saved_height)) = saved_size {
            width = saved_width;
            height = saved_height;
            used_saved_size = true;
        }
    }

    if width > 0 && height > 0 {
        if !used_saved_size {
            if let Some(hints) = hints {
                // Increments do not apply while the compositor dictates
                // the size; a maximized window fills whatever it is given.
                let (constrained_width, constrained_height) =
                    hints.constrain_with_increments(width, height, !fixed_size);
                width = constrained_width;
                height = constrained_height;
            }
        }
        ConfigureOutcome {
            width: width + margins.0,
            height: height + margins.1,
            state: pending.state,
            fixed_size,
            compositor_size: !used_saved_size,
        }
    } else {
        // Neither the compositor nor the saved size gave us anything; fall
        // back to the size the application asked for before it was mapped.
        ConfigureOutcome {
            width: unconfigured_size.0 + margins.0,
            height: unconfigured_size.1 + margins.1,
            state: pending.state,
            fixed_size,
            compositor_size: false,
        }
    }
}

/// Maps an xdg_toplevel state wire value to the window state mask.
/// Unknown values are ignored; `resizing` is deliberately not surfaced.
pub fn toplevel_state_flag(state: u32) -> WindowStateMask {
    // Values shared by the stable protocol and its v6 predecessor.
    match state {
        1 => WindowStateMask::MAXIMIZED,
        2 => WindowStateMask::FULLSCREEN,
        4 => WindowStateMask::FOCUSED,
        _ => WindowStateMask::empty(),
    }
}

/// Folds a wl_array of 32-bit state values into a state mask.
pub fn parse_toplevel_states(states: &[u8]) -> WindowStateMask {
    states
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .fold(WindowStateMask::empty(), |mask, state| {
            mask | toplevel_state_flag(state)
        })
}

/// Folds a ctk_surface1.configure states array into the tiled flags.
/// Every per-edge tiled state also sets the general tiled flag.
pub fn parse_surface_states(states: &[u8]) -> WindowStateMask {
    states
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .fold(WindowStateMask::empty(), |mask, state| {
            mask | match state {
                1 => WindowStateMask::TILED,
                2 => WindowStateMask::TILED | WindowStateMask::TOP_TILED,
                3 => WindowStateMask::TILED | WindowStateMask::RIGHT_TILED,
                4 => WindowStateMask::TILED | WindowStateMask::BOTTOM_TILED,
                5 => WindowStateMask::TILED | WindowStateMask::LEFT_TILED,
                _ => WindowStateMask::empty(),
            }
        })
}

/// Folds a ctk_surface1.configure_edges constraints array into the
/// per-edge resizable flags.
pub fn parse_edge_constraints(constraints: &[u8]) -> WindowStateMask {
    constraints
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .fold(WindowStateMask::empty(), |mask, constraint| {
            mask | match constraint {
                1 => WindowStateMask::TOP_RESIZABLE,
                2 => WindowStateMask::RIGHT_RESIZABLE,
                3 => WindowStateMask::BOTTOM_RESIZABLE,
                4 => WindowStateMask::LEFT_RESIZABLE,
                _ => WindowStateMask::empty(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(width: i32, height: i32, state: WindowStateMask) -> PendingConfigure {
        PendingConfigure { width, height, state }
    }

    #[test]
    fn initial_configure_without_size_uses_requested_size() {
        let outcome = apply_toplevel_configure(
            pending(0, 0, WindowStateMask::empty()),
            (0, 0),
            None,
            false,
            (640, 480),
            None,
        );
        assert_eq!((outcome.width, outcome.height), (640, 480));
        assert!(!outcome.fixed_size);
        assert!(!outcome.compositor_size);
    }

    #[test]
    fn maximize_adopts_compositor_size() {
        let outcome = apply_toplevel_configure(
            pending(1920, 1080, WindowStateMask::MAXIMIZED | WindowStateMask::FOCUSED),
            (20, 20),
            Some((640, 480)),
            false,
            (640, 480),
            None,
        );
        assert_eq!((outcome.width, outcome.height), (1940, 1100));
        assert!(outcome.fixed_size);
        assert!(outcome.compositor_size);
    }

    #[test]
    fn unmaximize_restores_saved_size() {
        // The compositor suggests nothing when leaving maximized; the size
        // remembered before maximizing wins.
        let outcome = apply_toplevel_configure(
            pending(0, 0, WindowStateMask::FOCUSED),
            (20, 20),
            Some((640, 480)),
            false,
            (100, 100),
            None,
        );
        assert_eq!((outcome.width, outcome.height), (660, 500));
        assert!(!outcome.fixed_size);
        assert!(!outcome.compositor_size);
    }

    #[test]
    fn resize_while_maximized_is_deferred_to_saved_size() {
        // A programmatic resize arrived while maximized; when the
        // compositor later re-configures the floating window, the changed
        // saved size takes precedence over the suggested size.
        let outcome = apply_toplevel_configure(
            pending(800, 600, WindowStateMask::empty()),
            (0, 0),
            Some((1024, 768)),
            true,
            (100, 100),
            None,
        );
        assert_eq!((outcome.width, outcome.height), (1024, 768));
        assert!(!outcome.compositor_size);
    }

    #[test]
    fn tiled_counts_as_fixed_size() {
        let outcome = apply_toplevel_configure(
            pending(960, 1080, WindowStateMask::TILED),
            (0, 0),
            Some((640, 480)),
            true,
            (640, 480),
            None,
        );
        assert_eq!((outcome.width, outcome.height), (960, 1080));
        assert!(outcome.fixed_size);
    }

    #[test]
    fn hints_constrain_compositor_size() {
        let hints = SizeHints {
            min_size: Some((400, 300)),
            max_size: Some((800, 600)),
            ..SizeHints::default()
        };
        let outcome = apply_toplevel_configure(
            pending(1000, 200, WindowStateMask::empty()),
            (0, 0),
            None,
            false,
            (640, 480),
            Some(&hints),
        );
        assert_eq!((outcome.width, outcome.height), (800, 300));
    }

    #[test]
    fn fixed_states_ignore_resize_increments() {
        let hints = SizeHints {
            resize_increments: Some((16, 16)),
            ..SizeHints::default()
        };

        // The compositor owns a maximized window's size; increments must
        // not shave pixels off it.
        let outcome = apply_toplevel_configure(
            pending(1927, 1087, WindowStateMask::MAXIMIZED),
            (0, 0),
            None,
            false,
            (640, 480),
            Some(&hints),
        );
        assert_eq!((outcome.width, outcome.height), (1927, 1087));

        // Floating windows still snap.
        let outcome = apply_toplevel_configure(
            pending(1927, 1087, WindowStateMask::empty()),
            (0, 0),
            None,
            false,
            (640, 480),
            Some(&hints),
        );
        assert_eq!((outcome.width, outcome.height), (1920, 1072));
    }

    #[test]
    fn edge_tiled_states_imply_tiled() {
        for value in [2u32, 3, 4, 5] {
            let mask = parse_surface_states(&value.to_ne_bytes());
            assert!(mask.contains(WindowStateMask::TILED), "state {value}");
        }
    }

    #[test]
    fn state_array_parsing() {
        let mut bytes = Vec::new();
        for value in [1u32, 2, 3, 4, 99] {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        let mask = parse_toplevel_states(&bytes);
        assert_eq!(
            mask,
            WindowStateMask::MAXIMIZED | WindowStateMask::FULLSCREEN | WindowStateMask::FOCUSED
        );
    }

    #[test]
    fn surface_state_and_edge_parsing() {
        let mut bytes = Vec::new();
        for value in [1u32, 2, 5] {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        assert_eq!(
            parse_surface_states(&bytes),
            WindowStateMask::TILED | WindowStateMask::TOP_TILED | WindowStateMask::LEFT_TILED
        );

        let mut bytes = Vec::new();
        for value in [1u32, 3] {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        assert_eq!(
            parse_edge_constraints(&bytes),
            WindowStateMask::TOP_RESIZABLE | WindowStateMask::BOTTOM_RESIZABLE
        );
    }

    #[test]
    fn pending_take_clears_states_but_keeps_size() {
        let mut pending = PendingConfigure::default();
        pending.merge_state(WindowStateMask::MAXIMIZED);
        pending.set_size(800, 600);
        let taken = pending.take();
        assert_eq!(taken.state, WindowStateMask::MAXIMIZED);
        assert_eq!((taken.width, taken.height), (800, 600));
        assert_eq!(pending.state, WindowStateMask::empty());
        assert_eq!((pending.width, pending.height), (800, 600));
    }
}
