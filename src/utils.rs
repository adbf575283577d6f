//! Geometry primitives and small helpers shared across the backend.
//!
//! Everything here is in logical (surface-local) coordinates. Buffer
//! coordinates only exist inside the shm module, scaled by the window's
//! buffer scale.

/// Longest string the wire can carry in a single message, minus header.
pub const MAX_WL_BUFFER_SIZE: usize = 4083;

/// Largest buffer scale we will follow an output to.
pub const MAX_THEME_SCALE: i32 = 4;

/// Compositors get confused by sizes outside the 16-bit range.
pub fn clamp_surface_size(size: i32) -> i32 {
    size.clamp(1, 65535)
}

/// A rectangle in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle { x, y, width, height }
    }

    pub fn from_size(width: i32, height: i32) -> Self {
        Rectangle { x: 0, y: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Rectangle::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    pub fn overlaps(&self, other: &Rectangle) -> bool {
        self.intersection(other).is_some()
    }

    pub fn contains_rect(&self, other: &Rectangle) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// The parts of `self` not covered by `other`, as up to four bands.
    fn subtract(&self, other: &Rectangle) -> impl Iterator<Item = Rectangle> {
        let mut out = [Rectangle::default(); 4];
        let mut n = 0;
        match self.intersection(other) {
            None => {
                out[0] = *self;
                n = 1;
            }
            Some(clip) => {
                if clip.y > self.y {
                    out[n] = Rectangle::new(self.x, self.y, self.width, clip.y - self.y);
                    n += 1;
                }
                if clip.bottom() < self.bottom() {
                    out[n] =
                        Rectangle::new(self.x, clip.bottom(), self.width, self.bottom() - clip.bottom());
                    n += 1;
                }
                if clip.x > self.x {
                    out[n] = Rectangle::new(self.x, clip.y, clip.x - self.x, clip.height);
                    n += 1;
                }
                if clip.right() < self.right() {
                    out[n] =
                        Rectangle::new(clip.right(), clip.y, self.right() - clip.right(), clip.height);
                    n += 1;
                }
            }
        }
        out.into_iter().take(n)
    }
}

/// A set of rectangles, kept as a non-canonical band list.
///
/// Union may leave overlapping rectangles; that is harmless for damage
/// reporting and for the covered/uncovered queries the windowing code
/// needs. Subtraction produces exact remainders.
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    pub fn new() -> Self {
        Region::default()
    }

    pub fn from_rect(rect: Rectangle) -> Self {
        let mut region = Region::new();
        region.union_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn union_rect(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| r.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains_rect(r));
        self.rects.push(rect);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    pub fn subtract_rect(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(self.rects.len());
        for r in self.rects.drain(..) {
            remaining.extend(r.subtract(&rect));
        }
        self.rects = remaining;
    }

    pub fn subtract(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract_rect(*rect);
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects
            .iter()
            .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom())
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Region) -> bool {
        // Shape equality: each covers the other.
        let mut a = self.clone();
        a.subtract(other);
        if !a.is_empty() {
            return false;
        }
        let mut b = other.clone();
        b.subtract(self);
        b.is_empty()
    }
}

/// Truncates `title` to at most `max_bytes`, never splitting a character.
pub fn truncate_at_char_boundary(title: &str, max_bytes: usize) -> &str {
    if title.len() <= max_bytes {
        return title;
    }
    let mut end = max_bytes;
    while end > 0 && !title.is_char_boundary(end) {
        end -= 1;
    }
    &title[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection() {
        let a = Rectangle::new(0, 0, 100, 100);
        let b = Rectangle::new(50, 50, 100, 100);
        assert_eq!(a.intersection(&b), Some(Rectangle::new(50, 50, 50, 50)));
        let c = Rectangle::new(200, 200, 10, 10);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn region_subtract_splits() {
        let mut region = Region::from_rect(Rectangle::new(0, 0, 100, 100));
        region.subtract_rect(Rectangle::new(25, 25, 50, 50));
        assert!(!region.is_empty());
        assert!(region.contains_point(0, 0));
        assert!(region.contains_point(99, 99));
        assert!(!region.contains_point(50, 50));
        region.subtract_rect(Rectangle::new(0, 0, 100, 100));
        assert!(region.is_empty());
    }

    #[test]
    fn region_union_absorbs_covered_rects() {
        let mut region = Region::from_rect(Rectangle::new(10, 10, 10, 10));
        region.union_rect(Rectangle::new(0, 0, 100, 100));
        assert_eq!(region.rects().len(), 1);
        region.union_rect(Rectangle::new(20, 20, 5, 5));
        assert_eq!(region.rects().len(), 1);
    }

    #[test]
    fn region_shape_equality() {
        let mut a = Region::from_rect(Rectangle::new(0, 0, 10, 10));
        a.union_rect(Rectangle::new(10, 0, 10, 10));
        let b = Region::from_rect(Rectangle::new(0, 0, 20, 10));
        assert_eq!(a, b);
        let c = Region::from_rect(Rectangle::new(0, 0, 21, 10));
        assert_ne!(a, c);
    }

    #[test]
    fn title_truncation_respects_utf8() {
        assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
        assert_eq!(truncate_at_char_boundary("hello", 3), "hel");
        // U+00E9 is two bytes; cutting inside it must back off.
        assert_eq!(truncate_at_char_boundary("caf\u{e9}", 4), "caf");
        assert_eq!(truncate_at_char_boundary("caf\u{e9}", 5), "caf\u{e9}");
    }

    #[test]
    fn surface_size_clamping() {
        assert_eq!(clamp_surface_size(0), 1);
        assert_eq!(clamp_surface_size(-5), 1);
        assert_eq!(clamp_surface_size(400), 400);
        assert_eq!(clamp_surface_size(1 << 20), 65535);
    }
}
