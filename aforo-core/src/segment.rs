//! Select one entry access and one exit access per track.
//!
//! The scan picks the first position classifying to some access as the
//! entry, and the last position classifying to a different access as the
//! exit; with no different access the track is a U-turn candidate. When both
//! trajectory endpoints have distinct nearest accesses, the endpoints take
//! precedence and anchor the segment to the track's first and last frames,
//! compensating for detections missed inside the access zones.

use aforo_types::{AccessPoint, Cardinal, PixelPoint, Track, TrackPoint};
use tracing::trace;

use crate::access;

/// At most one of these per track.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub entry_access: String,
    pub entry_cardinal: Cardinal,
    pub exit_access: String,
    pub exit_cardinal: Cardinal,
    pub entry_frame: u64,
    pub exit_frame: u64,
    /// Per-frame points over `[entry_frame, exit_frame]`.
    pub points: Vec<TrackPoint>,
}

struct Crossing<'a> {
    index: usize,
    access: &'a AccessPoint,
}

pub fn segment_track(track: &Track, accesses: &[AccessPoint]) -> Option<Segment> {
    if accesses.is_empty() || track.points.len() < 2 {
        return None;
    }

    let mut entry: Option<Crossing> = None;
    let mut exit: Option<Crossing> = None;

    for (index, point) in track.points.iter().enumerate() {
        let pt = PixelPoint::new(point.x, point.y);
        let Some(hit) = access::classify(pt, accesses) else {
            continue;
        };
        match &entry {
            None => entry = Some(Crossing { index, access: hit }),
            Some(first) => {
                if hit.id != first.access.id {
                    exit = Some(Crossing { index, access: hit });
                }
            }
        }
    }

    let entry = entry?;
    // No different access seen: U-turn candidate through the entry access.
    // The exit becomes the last position still classifying to it.
    let exit = match exit {
        Some(e) => e,
        None => {
            let mut last = entry.index;
            for (index, point) in track.points.iter().enumerate().skip(entry.index + 1) {
                let pt = PixelPoint::new(point.x, point.y);
                if let Some(hit) = access::classify(pt, accesses) {
                    if hit.id == entry.access.id {
                        last = index;
                    }
                }
            }
            Crossing {
                index: last,
                access: entry.access,
            }
        }
    };

    let (mut entry, mut exit) = (entry, exit);

    // Endpoint override: when the trajectory endpoints resolve to two
    // different nearest accesses, anchor the segment to the endpoints.
    if track.points.len() >= 3 {
        let first_pt = {
            let p = &track.points[0];
            PixelPoint::new(p.x, p.y)
        };
        let last_pt = {
            let p = &track.points[track.points.len() - 1];
            PixelPoint::new(p.x, p.y)
        };
        if let (Some(start), Some(end)) = (
            access::nearest(first_pt, accesses),
            access::nearest(last_pt, accesses),
        ) {
            if start.id != end.id {
                trace!(track = %track.id, entry = %start.id, exit = %end.id,
                       "endpoint override");
                entry = Crossing {
                    index: 0,
                    access: start,
                };
                exit = Crossing {
                    index: track.points.len() - 1,
                    access: end,
                };
            }
        }
    }

    let entry_frame = track.points[entry.index].frame;
    let exit_frame = track.points[exit.index].frame;
    if entry_frame >= exit_frame {
        return None;
    }

    Some(Segment {
        entry_access: entry.access.id.clone(),
        entry_cardinal: entry.access.cardinal,
        exit_access: exit.access.id.clone(),
        exit_cardinal: exit.access.cardinal,
        entry_frame,
        exit_frame,
        points: track.points[entry.index..=exit.index].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aforo_types::{ObjectClass, TrackId};

    fn polygon_access(id: &str, cardinal: Cardinal, x: f64, y: f64) -> AccessPoint {
        AccessPoint {
            id: id.to_string(),
            cardinal,
            x,
            y,
            polygon: Some(vec![
                PixelPoint::new(x - 10.0, y - 5.0),
                PixelPoint::new(x + 10.0, y - 5.0),
                PixelPoint::new(x + 10.0, y + 5.0),
                PixelPoint::new(x - 10.0, y + 5.0),
            ]),
            gate: None,
        }
    }

    fn straight_track(n: usize, from_y: f64, to_y: f64) -> Track {
        let points = (0..n)
            .map(|i| {
                let ratio = i as f64 / (n - 1) as f64;
                TrackPoint {
                    frame: i as u64,
                    x: 100.0,
                    y: from_y + (to_y - from_y) * ratio,
                    confidence: 0.9,
                    interpolated: false,
                }
            })
            .collect();
        Track {
            id: TrackId::new("track_1"),
            class: ObjectClass::new("car"),
            points,
        }
    }

    fn north_south() -> Vec<AccessPoint> {
        vec![
            polygon_access("north", Cardinal::N, 100.0, 5.0),
            polygon_access("south", Cardinal::S, 100.0, 195.0),
        ]
    }

    #[test]
    fn straight_crossing_anchors_to_endpoints() {
        let track = straight_track(151, 5.0, 195.0);
        let seg = segment_track(&track, &north_south()).unwrap();
        assert_eq!(seg.entry_access, "north");
        assert_eq!(seg.exit_access, "south");
        assert_eq!(seg.entry_frame, 0);
        assert_eq!(seg.exit_frame, 150);
        assert_eq!(seg.points.len(), 151);
        assert_eq!(seg.entry_cardinal, Cardinal::N);
        assert_eq!(seg.exit_cardinal, Cardinal::S);
    }

    #[test]
    fn u_turn_track_keeps_same_access() {
        // Down from the north zone, around, and back into it.
        let mut points = Vec::new();
        for i in 0..40u64 {
            points.push(TrackPoint {
                frame: i,
                x: 100.0,
                y: 5.0 + i as f64,
                confidence: 0.9,
                interpolated: false,
            });
        }
        for i in 40..80u64 {
            points.push(TrackPoint {
                frame: i,
                x: 100.0,
                y: 45.0 - (i as f64 - 40.0),
                confidence: 0.9,
                interpolated: false,
            });
        }
        let track = Track {
            id: TrackId::new("track_2"),
            class: ObjectClass::new("car"),
            points,
        };
        // Only the north access exists, so both ends resolve to it.
        let accesses = vec![polygon_access("north", Cardinal::N, 100.0, 5.0)];
        let seg = segment_track(&track, &accesses).unwrap();
        assert_eq!(seg.entry_access, "north");
        assert_eq!(seg.exit_access, "north");
        assert!(seg.entry_frame < seg.exit_frame);
    }

    #[test]
    fn no_accesses_no_segment() {
        let track = straight_track(20, 0.0, 100.0);
        assert!(segment_track(&track, &[]).is_none());
    }

    #[test]
    fn single_point_track_is_rejected() {
        let mut track = straight_track(10, 0.0, 100.0);
        track.points.truncate(1);
        assert!(segment_track(&track, &north_south()).is_none());
    }
}
