//! Converts sparse per-frame detections into merged blur segments.

use serde::{Deserialize, Serialize};

/// A padded time range (seconds) that gets blurred in the rendered video
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SegmentError {
    #[error("got {timestamps} timestamps but {confs} confidences")]
    LengthMismatch { timestamps: usize, confs: usize },
    #[error("{0} must be a finite, non-negative number")]
    InvalidParameter(&'static str),
}

/// Keep timestamps whose confidence is at least `threshold`, pad each into
/// `[t - pad, t + pad]` and merge intervals separated by `merge_gap` or less.
///
/// Output is sorted by start and non-overlapping. Starts are clamped at zero.
/// Negative or non-finite timestamps and non-finite confidences are ignored.
pub fn timestamps_to_segments(
    timestamps: &[f64],
    confs: &[f32],
    threshold: f32,
    merge_gap: f64,
    pad: f64,
) -> Result<Vec<Segment>, SegmentError> {
    if timestamps.len() != confs.len() {
        return Err(SegmentError::LengthMismatch {
            timestamps: timestamps.len(),
            confs: confs.len(),
        });
    }
    if !pad.is_finite() || pad < 0.0 {
        return Err(SegmentError::InvalidParameter("pad"));
    }
    if !merge_gap.is_finite() || merge_gap < 0.0 {
        return Err(SegmentError::InvalidParameter("merge_gap"));
    }

    let mut flagged: Vec<f64> = timestamps
        .iter()
        .zip(confs)
        .filter(|(t, c)| t.is_finite() && **t >= 0.0 && c.is_finite() && **c >= threshold)
        .map(|(t, _)| *t)
        .collect();
    flagged.sort_by(|a, b| a.total_cmp(b));

    let mut segments: Vec<Segment> = Vec::new();
    for t in flagged {
        let start = (t - pad).max(0.0);
        let end = t + pad;

        match segments.last_mut() {
            // Starts never decrease, so only the tail can absorb the next interval
            Some(last) if start - last.end <= merge_gap => last.end = last.end.max(end),
            _ => segments.push(Segment { start, end }),
        }
    }

    Ok(segments)
}

/// Clamp segment ends to the media duration, dropping segments that start at
/// or after it.
pub fn clamp_to(segments: Vec<Segment>, duration: f64) -> Vec<Segment> {
    segments
        .into_iter()
        .filter(|s| s.start < duration)
        .map(|s| Segment {
            start: s.start,
            end: s.end.min(duration),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> Segment {
        Segment { start, end }
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert_eq!(timestamps_to_segments(&[], &[], 0.8, 0.0, 0.5), Ok(vec![]));
    }

    #[test]
    fn drops_detections_below_threshold() {
        let segments =
            timestamps_to_segments(&[0.0, 2.0, 4.0], &[0.1, 0.79, 0.5], 0.8, 0.0, 0.5).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let segments = timestamps_to_segments(&[4.0], &[0.8], 0.8, 0.0, 0.5).unwrap();
        assert_eq!(segments, vec![seg(3.5, 4.5)]);
    }

    #[test]
    fn pads_and_clamps_start_at_zero() {
        let segments = timestamps_to_segments(&[0.0, 10.0], &[0.9, 0.95], 0.8, 0.0, 1.0).unwrap();
        assert_eq!(segments, vec![seg(0.0, 1.0), seg(9.0, 11.0)]);
    }

    #[test]
    fn overlapping_pads_merge() {
        let segments =
            timestamps_to_segments(&[2.0, 3.0, 4.0], &[0.9, 0.9, 0.9], 0.8, 0.0, 0.75).unwrap();
        assert_eq!(segments, vec![seg(1.25, 4.75)]);
    }

    #[test]
    fn gap_merge_is_inclusive() {
        // [1.5, 2.5] and [3.5, 4.5] are exactly one second apart
        let merged = timestamps_to_segments(&[2.0, 4.0], &[0.9, 0.9], 0.8, 1.0, 0.5).unwrap();
        assert_eq!(merged, vec![seg(1.5, 4.5)]);

        let split = timestamps_to_segments(&[2.0, 4.0], &[0.9, 0.9], 0.8, 0.99, 0.5).unwrap();
        assert_eq!(split, vec![seg(1.5, 2.5), seg(3.5, 4.5)]);
    }

    #[test]
    fn zero_pad_keeps_point_intervals() {
        let segments =
            timestamps_to_segments(&[2.0, 2.0, 6.0], &[0.9, 0.9, 0.9], 0.8, 0.0, 0.0).unwrap();
        assert_eq!(segments, vec![seg(2.0, 2.0), seg(6.0, 6.0)]);
    }

    #[test]
    fn unsorted_input_is_ordered() {
        let segments =
            timestamps_to_segments(&[8.0, 2.0, 5.0], &[0.9, 0.9, 0.1], 0.8, 0.0, 0.5).unwrap();
        assert_eq!(segments, vec![seg(1.5, 2.5), seg(7.5, 8.5)]);
    }

    #[test]
    fn skips_invalid_samples() {
        let segments = timestamps_to_segments(
            &[f64::NAN, -3.0, 4.0, 6.0],
            &[0.9, 0.9, f32::NAN, 0.9],
            0.8,
            0.0,
            0.5,
        )
        .unwrap();
        assert_eq!(segments, vec![seg(5.5, 6.5)]);
    }

    #[test]
    fn output_is_sorted_and_separated() {
        let timestamps: Vec<f64> = (0..50).map(|i| (i * 7 % 50) as f64 * 0.5).collect();
        let confs: Vec<f32> = (0..50).map(|i| if i % 3 == 0 { 0.9 } else { 0.2 }).collect();
        let segments = timestamps_to_segments(&timestamps, &confs, 0.8, 0.25, 0.1).unwrap();

        assert!(!segments.is_empty());
        for s in &segments {
            assert!(s.start <= s.end);
        }
        for pair in segments.windows(2) {
            assert!(pair[1].start - pair[0].end > 0.25);
        }
    }

    #[test]
    fn rejects_mismatched_lengths() {
        assert_eq!(
            timestamps_to_segments(&[1.0, 2.0], &[0.9], 0.8, 0.0, 0.5),
            Err(SegmentError::LengthMismatch {
                timestamps: 2,
                confs: 1
            })
        );
    }

    #[test]
    fn rejects_negative_parameters() {
        assert_eq!(
            timestamps_to_segments(&[1.0], &[0.9], 0.8, 0.0, -0.5),
            Err(SegmentError::InvalidParameter("pad"))
        );
        assert_eq!(
            timestamps_to_segments(&[1.0], &[0.9], 0.8, f64::INFINITY, 0.5),
            Err(SegmentError::InvalidParameter("merge_gap"))
        );
    }

    #[test]
    fn clamp_trims_to_duration() {
        let clamped = clamp_to(vec![seg(0.0, 1.0), seg(9.5, 10.5), seg(11.0, 12.0)], 10.0);
        assert_eq!(clamped, vec![seg(0.0, 1.0), seg(9.5, 10.0)]);

        // Starting exactly at the end would leave an empty [d, d] range
        let clamped = clamp_to(vec![seg(8.0, 9.0), seg(10.0, 10.5)], 10.0);
        assert_eq!(clamped, vec![seg(8.0, 9.0)]);
    }
}
