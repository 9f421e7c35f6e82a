/// Offsets closer than this to the end of the stream tend to fail to decode
const END_MARGIN: f64 = 0.1;

/// Videos at or below this length get evenly spaced offsets
const SHORT_VIDEO_SECS: f64 = 10.0;

/// Pick `count` time offsets (seconds) to sample from a video of `duration` seconds.
///
/// Short videos are split evenly. Longer ones are anchored at 10%, 50% and 90%
/// (opening, core, closing), with extra points inserted before the closing anchor.
/// Returns an empty plan for non-positive durations.
pub fn plan(duration: f64, count: usize) -> Vec<f64> {
    if !(duration > 0.0) || count == 0 {
        return Vec::new();
    }

    let mut positions: Vec<f64> = if duration <= SHORT_VIDEO_SECS {
        (0..count)
            .map(|i| duration * (i + 1) as f64 / (count + 1) as f64)
            .collect()
    } else {
        let mut anchors = vec![
            (duration * 0.1).max(1.0),
            duration * 0.5,
            (duration * 0.9).min(duration - 1.0),
        ];

        // keep the closing anchor last
        while anchors.len() < count {
            let extra = duration * (anchors.len() + 1) as f64 / (count + 1) as f64;
            let last = anchors.len() - 1;
            anchors.insert(last, extra);
        }

        anchors
    };

    for pos in positions.iter_mut() {
        *pos = pos.min(duration - END_MARGIN).max(0.0);
    }

    positions.truncate(count);
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_duration() {
        assert!(plan(0.0, 3).is_empty());
        assert!(plan(-1.0, 3).is_empty());
        assert!(plan(f64::NAN, 3).is_empty());
    }

    #[test]
    fn test_short_video_even_spacing() {
        let offsets = plan(8.0, 3);
        assert_eq!(offsets, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_long_video_anchors() {
        let offsets = plan(30.0, 3);
        assert_eq!(offsets, vec![3.0, 15.0, 27.0]);

        // just past the short-video threshold
        let offsets = plan(10.5, 3);
        assert_eq!(offsets.len(), 3);
        assert!((offsets[0] - 1.05).abs() < 1e-9);
        assert!((offsets[2] - 9.45).abs() < 1e-9);
    }

    #[test]
    fn test_extra_offsets_inserted_before_last_anchor() {
        let offsets = plan(100.0, 5);
        assert_eq!(offsets.len(), 5);
        assert_eq!(offsets[0], 10.0);
        assert_eq!(offsets[1], 50.0);
        assert_eq!(*offsets.last().unwrap(), 90.0);
        assert!((offsets[2] - 100.0 * 4.0 / 6.0).abs() < 1e-9);
        assert!((offsets[3] - 100.0 * 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_fewer_than_three_truncates() {
        assert_eq!(plan(30.0, 1), vec![3.0]);
        assert_eq!(plan(30.0, 2), vec![3.0, 15.0]);
    }

    #[test]
    fn test_offsets_within_duration() {
        let durations = [0.05, 0.1, 0.5, 1.0, 3.3, 10.0, 10.01, 11.0, 59.9, 3600.0];
        for &d in &durations {
            for c in 1..=5 {
                let offsets = plan(d, c);
                assert_eq!(offsets.len(), c, "duration {d} count {c}");
                for o in &offsets {
                    assert!(*o >= 0.0 && *o < d, "offset {o} outside [0, {d})");
                }
            }
        }
    }
}
