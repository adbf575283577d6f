//! The per-window buffer rotation.
//!
//! Three slots cycle through the paint loop. `staging` is the buffer the
//! application draws into next. On commit it moves to `committed` and stays
//! there until the compositor releases it. While a committed buffer is
//! outstanding, freshly painted regions are remembered in `staged_updates`
//! and the old contents are kept reachable through `backfill`. Just before
//! the next commit the unpainted part of the staging buffer is copied over
//! from the backfill instead of being repainted.

use std::cell::RefCell;
use std::rc::Rc;

use wayland_client::backend::ObjectId;

use crate::shm::ShmBuffer;
use crate::utils::Region;

pub(crate) type SharedBuffer = Rc<RefCell<ShmBuffer>>;

/// What to do with a buffer the compositor has released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// The buffer was replaced while the compositor held it; drop it.
    DestroyReleased,
    /// Newer content has been staged on top of it; it cannot be reused.
    DestroyCommitted,
    /// Nothing has been painted since; recycle it as the staging buffer.
    ReuseAsStaging { destroy_current_staging: bool },
}

/// Decides the fate of a released buffer without touching any state.
pub fn release_action(
    released_is_committed: bool,
    staged_updates_nonempty: bool,
    staging_present: bool,
) -> ReleaseAction {
    if !released_is_committed {
        ReleaseAction::DestroyReleased
    } else if staged_updates_nonempty {
        ReleaseAction::DestroyCommitted
    } else {
        ReleaseAction::ReuseAsStaging {
            destroy_current_staging: staging_present,
        }
    }
}

/// The part of the window whose pixels must be carried over from the
/// previous contents because no paint of this frame touched them.
pub fn carry_over_region(window_region: &Region, staged_updates: Option<&Region>) -> Region {
    let mut missing = window_region.clone();
    if let Some(staged) = staged_updates {
        missing.subtract(staged);
    }
    missing
}

#[derive(Debug, Default)]
pub(crate) struct BufferSlots {
    pub staging: Option<SharedBuffer>,
    pub committed: Option<SharedBuffer>,
    pub backfill: Option<SharedBuffer>,
    /// Regions painted since `committed` went out, `None` when no partial
    /// paint tracking is active.
    pub staged_updates: Option<Region>,
}

impl BufferSlots {
    /// True when the staging buffer is missing or no longer matches the
    /// window's logical size and scale.
    pub fn needs_staging(&self, size: (i32, i32), scale: i32) -> bool {
        match &self.staging {
            Some(buffer) => {
                let buffer = buffer.borrow();
                buffer.logical_size() != size || buffer.scale() != scale
            }
            None => true,
        }
    }

    pub fn set_staging(&mut self, buffer: ShmBuffer) {
        if let Some(old) = self.staging.take() {
            destroy_shared(old);
        }
        self.staging = Some(Rc::new(RefCell::new(buffer)));
    }

    /// Copies everything the frame's paints did not cover from the last
    /// committed contents into the staging buffer, then stops tracking.
    /// Runs right before the commit so every paint of the frame has been
    /// accounted for.
    pub fn read_back(&mut self, window_region: &Region) {
        let staged = self.staged_updates.take();
        let Some(backfill) = self.backfill.take() else {
            return;
        };

        let missing = carry_over_region(window_region, staged.as_ref());
        if !missing.is_empty() {
            if let Some(staging) = &self.staging {
                let source = backfill.borrow();
                staging.borrow_mut().copy_region_from(&source, &missing);
            }
        }
        drop_shared(backfill);
    }

    /// Records a paint while a committed buffer is still outstanding. The
    /// first paint after a commit starts tracking and pins the committed
    /// contents as the backfill source; later paints extend the tracked
    /// region even after the committed slot has moved on.
    pub fn note_staged_update(&mut self, painted: &Region) {
        match &mut self.staged_updates {
            Some(region) => region.union(painted),
            None => {
                if self.committed.is_none() {
                    return;
                }
                self.staged_updates = Some(painted.clone());
                self.backfill = self.committed.clone();
            }
        }
    }

    /// Moves the staging buffer to the committed slot after wl_surface.commit.
    pub fn mark_committed(&mut self) {
        self.committed = self.staging.take();
    }

    /// Handles a wl_buffer.release for the buffer with the given id.
    pub fn on_release(&mut self, released: &ObjectId) {
        let released_is_committed = self
            .committed
            .as_ref()
            .is_some_and(|buffer| buffer.borrow().id() == *released);
        let staged_nonempty = self
            .staged_updates
            .as_ref()
            .is_some_and(|region| !region.is_empty());

        match release_action(released_is_committed, staged_nonempty, self.staging.is_some()) {
            ReleaseAction::DestroyReleased => {
                // A stale buffer from before the last size or scale change.
                // Its owner already left the slots; only the protocol
                // objects remain to clean up. Releases for slot-owned
                // buffers never take this path.
            }
            ReleaseAction::DestroyCommitted => {
                if let Some(committed) = self.committed.take() {
                    destroy_shared(committed);
                }
            }
            ReleaseAction::ReuseAsStaging { destroy_current_staging } => {
                if destroy_current_staging {
                    if let Some(staging) = self.staging.take() {
                        destroy_shared(staging);
                    }
                }
                self.staged_updates = None;
                self.staging = self.committed.take();
            }
        }
    }

    /// Drops everything; used when the surface goes away.
    pub fn clear(&mut self) {
        if let Some(staging) = self.staging.take() {
            destroy_shared(staging);
        }
        if let Some(committed) = self.committed.take() {
            destroy_shared(committed);
        }
        if let Some(backfill) = self.backfill.take() {
            drop_shared(backfill);
        }
        self.staged_updates = None;
    }
}

/// Destroys the protocol objects if this was the last reference.
fn destroy_shared(buffer: SharedBuffer) {
    if let Ok(cell) = Rc::try_unwrap(buffer) {
        cell.into_inner().destroy();
    }
}

/// Drops a reference, destroying only when it was the last one.
fn drop_shared(buffer: SharedBuffer) {
    destroy_shared(buffer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Rectangle;

    #[test]
    fn carry_over_excludes_the_painted_regions() {
        let window = Region::from_rect(Rectangle::from_size(100, 100));
        let mut painted = Region::from_rect(Rectangle::new(0, 0, 40, 40));
        painted.union_rect(Rectangle::new(60, 60, 40, 40));

        let missing = carry_over_region(&window, Some(&painted));
        assert!(!missing.contains_point(10, 10));
        assert!(!missing.contains_point(70, 70));
        assert!(missing.contains_point(50, 50));
        assert!(missing.contains_point(70, 10));
    }

    #[test]
    fn untracked_frames_carry_over_the_whole_window() {
        let window = Region::from_rect(Rectangle::from_size(100, 100));
        let missing = carry_over_region(&window, None);
        assert!(missing.contains_point(0, 0));
        assert!(missing.contains_point(99, 99));
    }

    #[test]
    fn later_paints_extend_the_tracked_region() {
        // Once tracking has started it keeps accumulating, even after the
        // committed slot was emptied by a release.
        let mut slots = BufferSlots::default();
        slots.staged_updates = Some(Region::from_rect(Rectangle::new(0, 0, 10, 10)));
        slots.note_staged_update(&Region::from_rect(Rectangle::new(20, 0, 10, 10)));

        let window = Region::from_rect(Rectangle::from_size(40, 10));
        let missing = carry_over_region(&window, slots.staged_updates.as_ref());
        assert!(!missing.contains_point(5, 5));
        assert!(!missing.contains_point(25, 5));
        assert!(missing.contains_point(15, 5));
        assert!(missing.contains_point(35, 5));
    }

    #[test]
    fn tracking_does_not_start_without_a_committed_buffer() {
        let mut slots = BufferSlots::default();
        slots.note_staged_update(&Region::from_rect(Rectangle::new(0, 0, 10, 10)));
        assert!(slots.staged_updates.is_none());
        assert!(slots.backfill.is_none());
    }

    #[test]
    fn released_committed_buffer_is_recycled() {
        // Nothing painted since the commit: the compositor handing the
        // buffer back means it can serve as the next staging buffer.
        let action = release_action(true, false, false);
        assert_eq!(
            action,
            ReleaseAction::ReuseAsStaging {
                destroy_current_staging: false
            }
        );
    }

    #[test]
    fn recycling_replaces_an_existing_staging_buffer() {
        let action = release_action(true, false, true);
        assert_eq!(
            action,
            ReleaseAction::ReuseAsStaging {
                destroy_current_staging: true
            }
        );
    }

    #[test]
    fn stale_buffer_is_destroyed() {
        // The committed slot moved on (resize, scale change) before the
        // compositor released the old buffer.
        assert_eq!(release_action(false, false, false), ReleaseAction::DestroyReleased);
        assert_eq!(release_action(false, true, true), ReleaseAction::DestroyReleased);
    }

    #[test]
    fn outdated_committed_buffer_is_destroyed() {
        // Paints landed while the buffer was out; its contents are behind
        // the staging buffer and it must not rotate back in.
        assert_eq!(release_action(true, true, true), ReleaseAction::DestroyCommitted);
    }
}
