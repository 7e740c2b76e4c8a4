//! LMS ⇄ renderer volume mapping.
//!
//! LMS volume commands arrive as a gain value shaped by a fixed piecewise
//! curve (one entry per percent step, up to 128). The inverse scan maps a
//! gain back to a percentage, which is then scaled onto the device's
//! `max_volume` range. Feedback from the renderer reverses the scaling.

use crate::protocol_constants::LMS_VOLUME_MAP;

/// Maps an LMS gain value to the renderer's volume scale.
#[must_use]
pub fn lms_to_renderer(gain: u32, max_volume: u32) -> u32 {
    let mut percent = 100usize;
    while percent > 0 && gain < u32::from(LMS_VOLUME_MAP[percent]) {
        percent -= 1;
    }
    (percent as u32 * max_volume) / 100
}

/// Maps a renderer volume back to the LMS 0-100 scale.
#[must_use]
pub fn renderer_to_lms(volume: u32, max_volume: u32) -> u16 {
    if max_volume == 0 {
        return 0;
    }
    ((volume * 100) / max_volume).min(100) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_map_to_extremes() {
        assert_eq!(lms_to_renderer(0, 100), 0);
        assert_eq!(lms_to_renderer(128, 100), 100);
        assert_eq!(lms_to_renderer(128, 30), 30);
    }

    #[test]
    fn mapping_is_monotonic_after_scaling() {
        for max_volume in [100, 30, 25] {
            let mut last = 0;
            for gain in 0..=128u32 {
                let v = lms_to_renderer(gain, max_volume);
                assert!(v >= last, "gain={} max={} v={} last={}", gain, max_volume, v, last);
                last = v;
            }
        }
    }

    #[test]
    fn feedback_scaling_is_clamped() {
        assert_eq!(renderer_to_lms(50, 100), 50);
        assert_eq!(renderer_to_lms(30, 30), 100);
        assert_eq!(renderer_to_lms(60, 30), 100);
        assert_eq!(renderer_to_lms(10, 0), 0);
    }

    #[test]
    fn curve_lookup_matches_table_steps() {
        // gain 11 is exactly the 19% step; gain 12 crosses into 20%
        assert_eq!(lms_to_renderer(11, 100), 19);
        assert_eq!(lms_to_renderer(12, 100), 20);
    }
}
