//! Group a detection stream into per-frame bundles.
//!
//! The tracker consumes detections one frame at a time; detections sharing a
//! frame are handed over as a set. The repository contract delivers
//! detections in ascending frame order, so a frame regression is an input
//! defect and the whole stream is rejected.

use itertools::Itertools;

use aforo_types::{Detection, TrackId};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameBundle {
    pub frame: u64,
    pub detections: Vec<Detection>,
}

pub fn bundle_frames(mut detections: Vec<Detection>) -> Result<Vec<FrameBundle>> {
    if let Some(bad) = detections
        .windows(2)
        .find(|w| w[1].frame < w[0].frame)
        .map(|w| &w[1])
    {
        let track = bad
            .track_hint
            .map(|t| TrackId::new(t.to_string()))
            .unwrap_or_else(|| TrackId::new(format!("frame_{}", bad.frame)));
        return Err(Error::DegenerateTrack { track });
    }
    // Frames already ascend; the stable sort only fixes the within-frame
    // order so the tracker's tie-breaks stay deterministic.
    detections.sort_by(|a, b| (a.frame, a.track_hint).cmp(&(b.frame, b.track_hint)));
    let grouped = detections.into_iter().chunk_by(|d| d.frame);
    Ok(grouped
        .into_iter()
        .map(|(frame, chunk)| FrameBundle {
            frame,
            detections: chunk.collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aforo_types::ObjectClass;

    fn det(frame: u64, track: i64) -> Detection {
        Detection {
            frame,
            track_hint: Some(track),
            x: 0.0,
            y: 0.0,
            class: ObjectClass::new("car"),
            confidence: 1.0,
            bbox: None,
        }
    }

    #[test]
    fn ascending_frames_group_into_bundles() {
        let bundles =
            bundle_frames(vec![det(0, 2), det(2, 1), det(5, 1), det(5, 0)]).unwrap();
        let frames: Vec<u64> = bundles.iter().map(|b| b.frame).collect();
        assert_eq!(frames, vec![0, 2, 5]);
        assert_eq!(bundles[2].detections.len(), 2);
        // Within a frame, detections are ordered by track hint.
        assert_eq!(bundles[2].detections[0].track_hint, Some(0));
    }

    #[test]
    fn frame_regression_is_rejected() {
        let result = bundle_frames(vec![det(5, 1), det(0, 2)]);
        assert!(matches!(result, Err(Error::DegenerateTrack { .. })));
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(bundle_frames(vec![]).unwrap().is_empty());
    }
}
