//! Popup placement: translating toolkit anchor/gravity pairs into shell
//! positioner state, and reconstructing the compositor's placement decision
//! from the popup configure event.
//!
//! The math here is kept free of protocol objects; the window code feeds it
//! parent-relative coordinates and applies the results to whichever shell
//! variant is in use.

use bitflags::bitflags;

use crate::protocols::xdg_shell_v6::zxdg_positioner_v6;
use crate::utils::Rectangle;
use wayland_protocols::xdg::shell::client::xdg_positioner;

/// Which point of a rectangle an anchor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
    /// Treated as north-west for placement purposes.
    Static,
}

bitflags! {
    /// How the compositor may adjust a constrained popup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AnchorHints: u32 {
        const FLIP_X = 1 << 0;
        const FLIP_Y = 1 << 1;
        const SLIDE_X = 1 << 2;
        const SLIDE_Y = 1 << 3;
        const RESIZE_X = 1 << 4;
        const RESIZE_Y = 1 << 5;
        const FLIP = Self::FLIP_X.bits() | Self::FLIP_Y.bits();
        const SLIDE = Self::SLIDE_X.bits() | Self::SLIDE_Y.bits();
        const RESIZE = Self::RESIZE_X.bits() | Self::RESIZE_Y.bits();
    }
}

/// Placement parameters stashed by a move-to-rect request, applied when the
/// popup role is created and consulted again when its configure arrives.
#[derive(Debug, Clone, Copy)]
pub struct MoveToRect {
    /// Anchor rectangle in the parent's window coordinates, sanitized.
    pub rect: Rectangle,
    pub rect_anchor: Gravity,
    pub window_anchor: Gravity,
    pub anchor_hints: AnchorHints,
    pub rect_anchor_dx: i32,
    pub rect_anchor_dy: i32,
}

/// Zero-sized anchor rectangles are a protocol error; collapse them to a
/// 1x1 rectangle at the same edge and clamp to non-negative coordinates.
pub fn sanitize_anchor_rect(rect: &mut Rectangle) {
    let original_width = rect.width;
    let original_height = rect.height;

    rect.width = rect.width.max(1);
    rect.height = rect.height.max(1);
    rect.x = (rect.x + original_width - rect.width).max(0);
    rect.y = (rect.y + original_height - rect.height).max(0);
}

pub fn anchor_for(rect_anchor: Gravity) -> xdg_positioner::Anchor {
    use xdg_positioner::Anchor;
    match rect_anchor {
        Gravity::NorthWest | Gravity::Static => Anchor::TopLeft,
        Gravity::North => Anchor::Top,
        Gravity::NorthEast => Anchor::TopRight,
        Gravity::West => Anchor::Left,
        Gravity::Center => Anchor::None,
        Gravity::East => Anchor::Right,
        Gravity::SouthWest => Anchor::BottomLeft,
        Gravity::South => Anchor::Bottom,
        Gravity::SouthEast => Anchor::BottomRight,
    }
}

pub fn gravity_for(window_anchor: Gravity) -> xdg_positioner::Gravity {
    use xdg_positioner::Gravity as G;
    match window_anchor {
        Gravity::NorthWest | Gravity::Static => G::BottomRight,
        Gravity::North => G::Bottom,
        Gravity::NorthEast => G::BottomLeft,
        Gravity::West => G::Right,
        Gravity::Center => G::None,
        Gravity::East => G::Left,
        Gravity::SouthWest => G::TopRight,
        Gravity::South => G::Top,
        Gravity::SouthEast => G::TopLeft,
    }
}

pub fn anchor_for_legacy(rect_anchor: Gravity) -> zxdg_positioner_v6::Anchor {
    use zxdg_positioner_v6::Anchor;
    match rect_anchor {
        Gravity::NorthWest | Gravity::Static => Anchor::Top | Anchor::Left,
        Gravity::North => Anchor::Top,
        Gravity::NorthEast => Anchor::Top | Anchor::Right,
        Gravity::West => Anchor::Left,
        Gravity::Center => Anchor::None,
        Gravity::East => Anchor::Right,
        Gravity::SouthWest => Anchor::Bottom | Anchor::Left,
        Gravity::South => Anchor::Bottom,
        Gravity::SouthEast => Anchor::Bottom | Anchor::Right,
    }
}

pub fn gravity_for_legacy(window_anchor: Gravity) -> zxdg_positioner_v6::Gravity {
    use zxdg_positioner_v6::Gravity as G;
    match window_anchor {
        Gravity::NorthWest | Gravity::Static => G::Bottom | G::Right,
        Gravity::North => G::Bottom,
        Gravity::NorthEast => G::Bottom | G::Left,
        Gravity::West => G::Right,
        Gravity::Center => G::None,
        Gravity::East => G::Left,
        Gravity::SouthWest => G::Top | G::Right,
        Gravity::South => G::Top,
        Gravity::SouthEast => G::Top | G::Left,
    }
}

pub fn constraint_adjustment_for(hints: AnchorHints) -> xdg_positioner::ConstraintAdjustment {
    use xdg_positioner::ConstraintAdjustment as CA;
    let mut adjustment = CA::None;
    if hints.contains(AnchorHints::FLIP_X) {
        adjustment |= CA::FlipX;
    }
    if hints.contains(AnchorHints::FLIP_Y) {
        adjustment |= CA::FlipY;
    }
    if hints.contains(AnchorHints::SLIDE_X) {
        adjustment |= CA::SlideX;
    }
    if hints.contains(AnchorHints::SLIDE_Y) {
        adjustment |= CA::SlideY;
    }
    if hints.contains(AnchorHints::RESIZE_X) {
        adjustment |= CA::ResizeX;
    }
    if hints.contains(AnchorHints::RESIZE_Y) {
        adjustment |= CA::ResizeY;
    }
    adjustment
}

pub fn constraint_adjustment_for_legacy(
    hints: AnchorHints,
) -> zxdg_positioner_v6::ConstraintAdjustment {
    use zxdg_positioner_v6::ConstraintAdjustment as CA;
    let mut adjustment = CA::None;
    if hints.contains(AnchorHints::FLIP_X) {
        adjustment |= CA::FlipX;
    }
    if hints.contains(AnchorHints::FLIP_Y) {
        adjustment |= CA::FlipY;
    }
    if hints.contains(AnchorHints::SLIDE_X) {
        adjustment |= CA::SlideX;
    }
    if hints.contains(AnchorHints::SLIDE_Y) {
        adjustment |= CA::SlideY;
    }
    if hints.contains(AnchorHints::RESIZE_X) {
        adjustment |= CA::ResizeX;
    }
    if hints.contains(AnchorHints::RESIZE_Y) {
        adjustment |= CA::ResizeY;
    }
    adjustment
}

pub fn flip_anchor_horizontally(anchor: Gravity) -> Gravity {
    match anchor {
        Gravity::Static | Gravity::NorthWest => Gravity::NorthEast,
        Gravity::North => Gravity::North,
        Gravity::NorthEast => Gravity::NorthWest,
        Gravity::West => Gravity::East,
        Gravity::Center => Gravity::Center,
        Gravity::East => Gravity::West,
        Gravity::SouthWest => Gravity::SouthEast,
        Gravity::South => Gravity::South,
        Gravity::SouthEast => Gravity::SouthWest,
    }
}

pub fn flip_anchor_vertically(anchor: Gravity) -> Gravity {
    match anchor {
        Gravity::Static | Gravity::NorthWest => Gravity::SouthWest,
        Gravity::North => Gravity::South,
        Gravity::NorthEast => Gravity::SouthEast,
        Gravity::West => Gravity::West,
        Gravity::Center => Gravity::Center,
        Gravity::East => Gravity::East,
        Gravity::SouthWest => Gravity::NorthWest,
        Gravity::South => Gravity::North,
        Gravity::SouthEast => Gravity::NorthEast,
    }
}

/// Where the popup would land for a given anchor pair, ignoring
/// constraints. Coordinates are in the parent's window geometry; `size` is
/// the popup's window geometry size.
pub fn calculate_popup_rect(
    params: &MoveToRect,
    rect_anchor: Gravity,
    window_anchor: Gravity,
    size: (i32, i32),
) -> Rectangle {
    let anchor_rect = Rectangle::new(
        params.rect.x + params.rect_anchor_dx,
        params.rect.y + params.rect_anchor_dy,
        params.rect.width,
        params.rect.height,
    );

    let (mut x, mut y) = match rect_anchor {
        Gravity::Static | Gravity::NorthWest => (anchor_rect.x, anchor_rect.y),
        Gravity::North => (anchor_rect.x + anchor_rect.width / 2, anchor_rect.y),
        Gravity::NorthEast => (anchor_rect.x + anchor_rect.width, anchor_rect.y),
        Gravity::West => (anchor_rect.x, anchor_rect.y + anchor_rect.height / 2),
        Gravity::Center => (
            anchor_rect.x + anchor_rect.width / 2,
            anchor_rect.y + anchor_rect.height / 2,
        ),
        Gravity::East => (
            anchor_rect.x + anchor_rect.width,
            anchor_rect.y + anchor_rect.height / 2,
        ),
        Gravity::SouthWest => (anchor_rect.x, anchor_rect.y + anchor_rect.height),
        Gravity::South => (
            anchor_rect.x + anchor_rect.width / 2,
            anchor_rect.y + anchor_rect.height,
        ),
        Gravity::SouthEast => (
            anchor_rect.x + anchor_rect.width,
            anchor_rect.y + anchor_rect.height,
        ),
    };

    let (width, height) = size;
    match window_anchor {
        Gravity::Static | Gravity::NorthWest => {}
        Gravity::North => x -= width / 2,
        Gravity::NorthEast => x -= width,
        Gravity::West => y -= height / 2,
        Gravity::Center => {
            x -= width / 2;
            y -= height / 2;
        }
        Gravity::East => {
            x -= width;
            y -= height / 2;
        }
        Gravity::SouthWest => y -= height,
        Gravity::South => {
            x -= width / 2;
            y -= height;
        }
        Gravity::SouthEast => {
            x -= width;
            y -= height;
        }
    }

    Rectangle::new(x, y, width, height)
}

/// The compositor's placement decision, reverse-engineered from a popup
/// configure event for consumers that asked to be told about flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovedToRectResult {
    /// Unconstrained placement, with axes the compositor flipped replaced
    /// by the actual position.
    pub flipped_rect: Rectangle,
    /// The placement the configure event reported.
    pub final_rect: Rectangle,
    pub flipped_x: bool,
    pub flipped_y: bool,
}

/// Compares the configured placement (`x`, `y`, `width`, `height`, in the
/// parent's window geometry) against the placements the anchor pair and its
/// flipped variants would produce.
///
/// An axis counts as flipped only when flipping the anchors on that axis
/// reproduces the configured coordinate exactly; a slide or resize
/// adjustment leaves the axis unflipped.
pub fn calculate_moved_to_rect_result(
    params: &MoveToRect,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
) -> MovedToRectResult {
    let final_rect = Rectangle::new(x, y, width, height);
    let best_rect = calculate_popup_rect(params, params.rect_anchor, params.window_anchor, (width, height));
    let mut flipped_rect = best_rect;

    if x != best_rect.x && params.anchor_hints.contains(AnchorHints::FLIP_X) {
        let flipped_x_rect = calculate_popup_rect(
            params,
            flip_anchor_horizontally(params.rect_anchor),
            flip_anchor_horizontally(params.window_anchor),
            (width, height),
        );
        if flipped_x_rect.x == x {
            flipped_rect.x = x;
        }
    }
    if y != best_rect.y && params.anchor_hints.contains(AnchorHints::FLIP_Y) {
        let flipped_y_rect = calculate_popup_rect(
            params,
            flip_anchor_vertically(params.rect_anchor),
            flip_anchor_vertically(params.window_anchor),
            (width, height),
        );
        if flipped_y_rect.y == y {
            flipped_rect.y = y;
        }
    }

    MovedToRectResult {
        flipped_rect,
        final_rect,
        flipped_x: flipped_rect.x != best_rect.x,
        flipped_y: flipped_rect.y != best_rect.y,
    }
}

/// Anchor rectangle for a popup placed at explicit coordinates: a 1x1
/// rectangle at the popup's position relative to the parent's geometry,
/// anchored top-left with bottom-right gravity.
pub fn simple_anchor_rect(
    window_pos: (i32, i32),
    geometry_offset: (i32, i32),
    parent_pos: (i32, i32),
    parent_geometry_offset: (i32, i32),
) -> Rectangle {
    Rectangle::new(
        (window_pos.0 + geometry_offset.0) - (parent_pos.0 + parent_geometry_offset.0),
        (window_pos.1 + geometry_offset.1) - (parent_pos.1 + parent_geometry_offset.1),
        1,
        1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rect: Rectangle, rect_anchor: Gravity, window_anchor: Gravity, hints: AnchorHints) -> MoveToRect {
        MoveToRect {
            rect,
            rect_anchor,
            window_anchor,
            anchor_hints: hints,
            rect_anchor_dx: 0,
            rect_anchor_dy: 0,
        }
    }

    #[test]
    fn anchor_rect_sanitation() {
        let mut rect = Rectangle::new(10, 20, 0, 0);
        sanitize_anchor_rect(&mut rect);
        assert_eq!(rect, Rectangle::new(9, 19, 1, 1));

        let mut rect = Rectangle::new(0, 0, -4, 5);
        sanitize_anchor_rect(&mut rect);
        assert_eq!(rect, Rectangle::new(0, 0, 1, 5));

        let mut rect = Rectangle::new(3, 3, 7, 7);
        sanitize_anchor_rect(&mut rect);
        assert_eq!(rect, Rectangle::new(3, 3, 7, 7));
    }

    #[test]
    fn anchor_gravity_mapping() {
        assert_eq!(anchor_for(Gravity::Static), xdg_positioner::Anchor::TopLeft);
        assert_eq!(anchor_for(Gravity::Center), xdg_positioner::Anchor::None);
        assert_eq!(anchor_for(Gravity::SouthEast), xdg_positioner::Anchor::BottomRight);
        // The window anchor names the popup corner that sits on the anchor
        // point, so it maps to the opposite shell gravity.
        assert_eq!(gravity_for(Gravity::NorthWest), xdg_positioner::Gravity::BottomRight);
        assert_eq!(gravity_for(Gravity::South), xdg_positioner::Gravity::Top);
    }

    #[test]
    fn legacy_mapping_uses_edge_flags() {
        use zxdg_positioner_v6::{Anchor, Gravity as G};
        assert_eq!(anchor_for_legacy(Gravity::NorthWest), Anchor::Top | Anchor::Left);
        assert_eq!(anchor_for_legacy(Gravity::South), Anchor::Bottom);
        assert_eq!(gravity_for_legacy(Gravity::SouthEast), G::Top | G::Left);
        assert_eq!(gravity_for_legacy(Gravity::Center), G::None);
    }

    #[test]
    fn constraint_adjustment_mapping() {
        use xdg_positioner::ConstraintAdjustment as CA;
        assert_eq!(constraint_adjustment_for(AnchorHints::empty()), CA::None);
        assert_eq!(
            constraint_adjustment_for(AnchorHints::FLIP_X | AnchorHints::SLIDE_Y),
            CA::FlipX | CA::SlideY
        );
        assert_eq!(
            constraint_adjustment_for(AnchorHints::RESIZE),
            CA::ResizeX | CA::ResizeY
        );
    }

    #[test]
    fn popup_rect_for_menu_below_item() {
        // A 50x40 menu attached below a menu item row.
        let p = params(
            Rectangle::new(5, 90, 20, 10),
            Gravity::SouthWest,
            Gravity::NorthWest,
            AnchorHints::FLIP_Y,
        );
        let rect = calculate_popup_rect(&p, p.rect_anchor, p.window_anchor, (50, 40));
        assert_eq!(rect, Rectangle::new(5, 100, 50, 40));
    }

    #[test]
    fn popup_rect_honours_offset() {
        let mut p = params(
            Rectangle::new(10, 10, 10, 10),
            Gravity::NorthEast,
            Gravity::NorthWest,
            AnchorHints::empty(),
        );
        p.rect_anchor_dx = 3;
        p.rect_anchor_dy = -2;
        let rect = calculate_popup_rect(&p, p.rect_anchor, p.window_anchor, (30, 30));
        assert_eq!(rect, Rectangle::new(23, 8, 30, 30));
    }

    #[test]
    fn vertical_flip_is_detected() {
        // Menu would open below the anchor row but the compositor flipped
        // it above: the configure reports exactly the flipped placement.
        let p = params(
            Rectangle::new(0, 90, 10, 10),
            Gravity::SouthWest,
            Gravity::NorthWest,
            AnchorHints::FLIP_Y,
        );
        let result = calculate_moved_to_rect_result(&p, 0, 40, 50, 50);
        assert!(result.flipped_y);
        assert!(!result.flipped_x);
        assert_eq!(result.final_rect, Rectangle::new(0, 40, 50, 50));
        assert_eq!(result.flipped_rect, Rectangle::new(0, 40, 50, 50));
    }

    #[test]
    fn slide_is_not_reported_as_flip() {
        // Same setup, but the configure reports a position that matches
        // neither the direct nor the flipped placement (a slide).
        let p = params(
            Rectangle::new(0, 90, 10, 10),
            Gravity::SouthWest,
            Gravity::NorthWest,
            AnchorHints::FLIP_Y | AnchorHints::SLIDE_Y,
        );
        let result = calculate_moved_to_rect_result(&p, 0, 75, 50, 50);
        assert!(!result.flipped_y);
        assert_eq!(result.flipped_rect, Rectangle::new(0, 100, 50, 50));
        assert_eq!(result.final_rect, Rectangle::new(0, 75, 50, 50));
    }

    #[test]
    fn unconstrained_popup_reports_no_flip() {
        let p = params(
            Rectangle::new(10, 10, 10, 10),
            Gravity::SouthWest,
            Gravity::NorthWest,
            AnchorHints::FLIP,
        );
        let result = calculate_moved_to_rect_result(&p, 10, 20, 30, 30);
        assert!(!result.flipped_x);
        assert!(!result.flipped_y);
        assert_eq!(result.flipped_rect, result.final_rect);
    }

    #[test]
    fn simple_positioner_anchor_rect() {
        let rect = simple_anchor_rect((120, 80), (5, 5), (100, 50), (2, 2));
        assert_eq!(rect, Rectangle::new(23, 33, 1, 1));
    }
}
