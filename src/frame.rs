//! Timing glue between compositor frame callbacks and the toolkit's paint
//! clock.
//!
//! A frame callback carries only the low 32 bits of the monotonic clock in
//! milliseconds. The functions here reconstruct a full monotonic timestamp
//! from that, derive the presentation time for the frame that was just
//! drawn, and predict the presentation time of the frame about to be drawn.
//! All times are microseconds on the monotonic clock unless noted.

use rustix::time::{clock_gettime, ClockId};

/// Fallback refresh interval when no output has reported a mode yet (60Hz).
pub const DEFAULT_REFRESH_INTERVAL: i64 = 16_667;

/// Current monotonic time in microseconds.
pub fn now_monotonic() -> i64 {
    let ts = clock_gettime(ClockId::Monotonic);
    ts.tv_sec * 1_000_000 + ts.tv_nsec / 1_000
}

/// Refresh interval from a wl_output mode refresh rate in millihertz.
pub fn refresh_interval_from_millihertz(millihertz: i32) -> i64 {
    if millihertz > 0 {
        1_000_000_000 / millihertz as i64
    } else {
        DEFAULT_REFRESH_INTERVAL
    }
}

/// Reconstructs the presentation time of the frame a callback reported.
///
/// The callback timestamp is, on the common DRM path, the monotonic time of
/// the vblank at which drawing of the previous frame started; presentation
/// then happens one refresh interval later. The timestamp only carries the
/// low 32 bits of the millisecond clock, so it is matched against the
/// current time and rejected when it lands more than a second away (some
/// compositors report times on an unrelated timebase).
pub fn presentation_time_from_callback(
    now_monotonic: i64,
    frame_time: u32,
    refresh_interval: i64,
) -> Option<i64> {
    let now_monotonic_low = (now_monotonic / 1000) as u32;
    let delta = frame_time.wrapping_sub(now_monotonic_low);

    if delta >= 1000 && delta <= 1000u32.wrapping_neg() {
        return None;
    }

    let mut last_frame_time = now_monotonic + 1000 * (delta as i32 as i64);
    if (now_monotonic_low as i32) < 0 && (frame_time as i32) > 0 {
        last_frame_time += 1000 * 0x1_0000_0000_i64;
    } else if (now_monotonic_low as i32) > 0 && (frame_time as i32) < 0 {
        last_frame_time -= 1000 * 0x1_0000_0000_i64;
    }

    Some(last_frame_time + refresh_interval)
}

/// Rolls a known presentation time forward to the first refresh boundary at
/// or after `frame_time`.
pub fn next_presentation_after(
    frame_time: i64,
    last_presentation_time: i64,
    refresh_interval: i64,
) -> i64 {
    if refresh_interval <= 0 || last_presentation_time >= frame_time {
        return last_presentation_time;
    }
    let behind = frame_time - last_presentation_time;
    let periods = (behind + refresh_interval - 1) / refresh_interval;
    last_presentation_time + periods * refresh_interval
}

/// Predicts when the frame being painted now will reach the screen.
///
/// With a known refresh phase the compositor starts compositing at the next
/// vblank and presents at the one after. Without one, assume we are halfway
/// through a refresh cycle.
pub fn predicted_presentation_time(
    frame_time: i64,
    last_presentation_time: Option<i64>,
    refresh_interval: i64,
) -> i64 {
    match last_presentation_time {
        Some(last) => {
            next_presentation_after(frame_time, last, refresh_interval) + refresh_interval
        }
        None => frame_time + refresh_interval / 2 + refresh_interval,
    }
}

/// Per-window frame timing state carried between paint cycles.
#[derive(Debug, Clone, Default)]
pub struct FrameTimings {
    /// Refresh interval of the output the window was last presented on.
    pub refresh_interval: Option<i64>,
    /// Reconstructed presentation time of the last completed frame.
    pub presentation_time: Option<i64>,
    /// Prediction for the frame currently being painted.
    pub predicted_presentation_time: Option<i64>,
}

impl FrameTimings {
    pub fn refresh_interval(&self) -> i64 {
        self.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    /// Updates timings from a frame callback. `refresh_millihertz` is the
    /// refresh rate of the window's most recently entered output, if known.
    pub fn note_frame_callback(
        &mut self,
        now_monotonic: i64,
        frame_time: u32,
        refresh_millihertz: Option<i32>,
    ) {
        self.refresh_interval = Some(match refresh_millihertz {
            Some(mhz) if mhz > 0 => refresh_interval_from_millihertz(mhz),
            _ => DEFAULT_REFRESH_INTERVAL,
        });
        self.presentation_time =
            presentation_time_from_callback(now_monotonic, frame_time, self.refresh_interval());
    }

    /// Computes the prediction for a paint cycle starting at `frame_time`.
    pub fn before_paint(&mut self, frame_time: i64) {
        self.predicted_presentation_time = Some(predicted_presentation_time(
            frame_time,
            self.presentation_time,
            self.refresh_interval(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_interval_conversion() {
        assert_eq!(refresh_interval_from_millihertz(60_000), 16_666);
        assert_eq!(refresh_interval_from_millihertz(144_000), 6_944);
        assert_eq!(refresh_interval_from_millihertz(0), DEFAULT_REFRESH_INTERVAL);
        assert_eq!(refresh_interval_from_millihertz(-1), DEFAULT_REFRESH_INTERVAL);
    }

    #[test]
    fn presentation_time_close_to_now() {
        // 5000s of uptime, callback timestamp 3ms in the past.
        let now = 5_000_000_000i64;
        let frame_time = (now / 1000 - 3) as u32;
        let presentation = presentation_time_from_callback(now, frame_time, 16_667);
        assert_eq!(presentation, Some(now - 3_000 + 16_667));
    }

    #[test]
    fn presentation_time_slightly_in_future() {
        let now = 5_000_000_000i64;
        let frame_time = (now / 1000 + 2) as u32;
        let presentation = presentation_time_from_callback(now, frame_time, 16_667);
        assert_eq!(presentation, Some(now + 2_000 + 16_667));
    }

    #[test]
    fn presentation_time_rejected_outside_window() {
        let now = 5_000_000_000i64;
        let stale = (now / 1000 - 10_000) as u32;
        assert_eq!(presentation_time_from_callback(now, stale, 16_667), None);
        let future = (now / 1000 + 5_000) as u32;
        assert_eq!(presentation_time_from_callback(now, future, 16_667), None);
    }

    #[test]
    fn presentation_time_with_high_uptime() {
        // 25 days of uptime puts the millisecond clock in the upper half of
        // the 32-bit range; reconstruction must still land next to now.
        let now_ms = 0x8000_1000i64;
        let now = now_ms * 1000;
        let frame_time = (now_ms as u32).wrapping_sub(16);
        let presentation = presentation_time_from_callback(now, frame_time, 16_667);
        assert_eq!(presentation, Some(now - 16_000 + 16_667));
    }

    #[test]
    fn prediction_with_known_phase() {
        let mut timings = FrameTimings {
            refresh_interval: Some(10_000),
            presentation_time: Some(1_000_000),
            predicted_presentation_time: None,
        };
        // Frame starts 25ms past the last presentation; the next vblank is
        // at +30ms, presentation one interval later.
        timings.before_paint(1_025_000);
        assert_eq!(timings.predicted_presentation_time, Some(1_040_000));
    }

    #[test]
    fn prediction_without_phase() {
        let mut timings = FrameTimings::default();
        timings.before_paint(2_000_000);
        assert_eq!(
            timings.predicted_presentation_time,
            Some(2_000_000 + DEFAULT_REFRESH_INTERVAL / 2 + DEFAULT_REFRESH_INTERVAL)
        );
    }

    #[test]
    fn callback_updates_refresh_interval() {
        let now = 1_000_000_000i64;
        let mut timings = FrameTimings::default();
        timings.note_frame_callback(now, (now / 1000) as u32, Some(60_000));
        assert_eq!(timings.refresh_interval, Some(16_666));
        assert_eq!(timings.presentation_time, Some(now + 16_666));

        timings.note_frame_callback(now, (now / 1000) as u32, None);
        assert_eq!(timings.refresh_interval, Some(DEFAULT_REFRESH_INTERVAL));
    }
}
