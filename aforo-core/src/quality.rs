//! Multi-stage quality rejection, applied between segmentation and the
//! correction overlay. First reject wins; every reject carries a reason the
//! QC summary counts.

use aforo_types::{AnalysisSettings, MovementKind, RilsaCode, TrackPoint};

/// Displacement angle changes above this count as a direction change.
const DIRECTION_CHANGE_RADIANS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RejectReason {
    PathTooShort,
    TooManyDirectionChanges,
    LowNetOverPathRatio,
    PedestrianTooBrief,
    PedestrianStalled,
    VehicleParked,
    VehicleTooBrief,
    StraightTooFast,
    StraightTooSlow,
    TurnTooFast,
    TurnTooSlow,
    UTurnTooFast,
    UTurnTooSlow,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::PathTooShort => "path_too_short",
            RejectReason::TooManyDirectionChanges => "too_many_direction_changes",
            RejectReason::LowNetOverPathRatio => "low_net_over_path_ratio",
            RejectReason::PedestrianTooBrief => "pedestrian_too_brief",
            RejectReason::PedestrianStalled => "pedestrian_stalled",
            RejectReason::VehicleParked => "vehicle_parked",
            RejectReason::VehicleTooBrief => "vehicle_too_brief",
            RejectReason::StraightTooFast => "straight_too_fast",
            RejectReason::StraightTooSlow => "straight_too_slow",
            RejectReason::TurnTooFast => "turn_too_fast",
            RejectReason::TurnTooSlow => "turn_too_slow",
            RejectReason::UTurnTooFast => "u_turn_too_fast",
            RejectReason::UTurnTooSlow => "u_turn_too_slow",
        }
    }
}

/// Movement-type-aware duration windows, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindows {
    pub pedestrian_min_s: f64,
    pub pedestrian_max_s: f64,
    pub vehicle_parked_s: f64,
    pub vehicle_min_s: f64,
    pub straight_min_s: f64,
    pub straight_max_s: f64,
    pub turn_min_s: f64,
    pub turn_max_s: f64,
    pub u_turn_min_s: f64,
    pub u_turn_max_s: f64,
}

impl Default for TimeWindows {
    fn default() -> Self {
        TimeWindows {
            pedestrian_min_s: 0.3,
            pedestrian_max_s: 15.0,
            vehicle_parked_s: 30.0,
            vehicle_min_s: 1.5,
            straight_min_s: 2.5,
            straight_max_s: 25.0,
            turn_min_s: 1.5,
            turn_max_s: 25.0,
            u_turn_min_s: 4.0,
            u_turn_max_s: 30.0,
        }
    }
}

/// Sum of inter-frame segment lengths, in pixels.
pub fn path_length_pixels(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let dx = w[1].x - w[0].x;
            let dy = w[1].y - w[0].y;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

/// Chord length from first to last position, in pixels.
pub fn net_displacement_pixels(points: &[TrackPoint]) -> f64 {
    match (points.first(), points.last()) {
        (Some(a), Some(b)) => {
            let dx = b.x - a.x;
            let dy = b.y - a.y;
            (dx * dx + dy * dy).sqrt()
        }
        _ => 0.0,
    }
}

/// Count angle jumps above one radian between consecutive non-degenerate
/// displacement vectors.
pub fn direction_changes(points: &[TrackPoint]) -> u32 {
    let mut angles = Vec::new();
    for w in points.windows(2) {
        let dx = w[1].x - w[0].x;
        let dy = w[1].y - w[0].y;
        if dx == 0.0 && dy == 0.0 {
            continue;
        }
        angles.push(dy.atan2(dx));
    }
    let mut changes = 0;
    for w in angles.windows(2) {
        let mut diff = (w[1] - w[0]).abs();
        if diff > std::f64::consts::PI {
            diff = 2.0 * std::f64::consts::PI - diff;
        }
        if diff > DIRECTION_CHANGE_RADIANS {
            changes += 1;
        }
    }
    changes
}

/// Track-level geometric filters. Pedestrians bypass all three.
pub fn check_geometry(
    points: &[TrackPoint],
    settings: &AnalysisSettings,
    is_pedestrian: bool,
) -> Result<(), RejectReason> {
    if is_pedestrian {
        return Ok(());
    }
    let path_px = path_length_pixels(points);
    let path_m = path_px * settings.pixel_to_meter;
    if path_m < settings.min_length_m {
        return Err(RejectReason::PathTooShort);
    }
    if direction_changes(points) > settings.max_direction_changes {
        return Err(RejectReason::TooManyDirectionChanges);
    }
    let ratio = net_displacement_pixels(points) / path_px.max(1e-9);
    if ratio < settings.min_net_over_path_ratio {
        return Err(RejectReason::LowNetOverPathRatio);
    }
    Ok(())
}

/// Event-level duration windows, per class and movement type.
pub fn check_duration(
    duration_s: f64,
    is_pedestrian: bool,
    code: RilsaCode,
    windows: &TimeWindows,
) -> Result<(), RejectReason> {
    if is_pedestrian {
        if duration_s < windows.pedestrian_min_s {
            return Err(RejectReason::PedestrianTooBrief);
        }
        if duration_s > windows.pedestrian_max_s {
            return Err(RejectReason::PedestrianStalled);
        }
        return Ok(());
    }
    if duration_s > windows.vehicle_parked_s {
        return Err(RejectReason::VehicleParked);
    }
    if duration_s < windows.vehicle_min_s {
        return Err(RejectReason::VehicleTooBrief);
    }
    match code.kind() {
        MovementKind::Straight => {
            if duration_s < windows.straight_min_s {
                return Err(RejectReason::StraightTooFast);
            }
            if duration_s > windows.straight_max_s {
                return Err(RejectReason::StraightTooSlow);
            }
        }
        MovementKind::Left | MovementKind::Right => {
            if duration_s < windows.turn_min_s {
                return Err(RejectReason::TurnTooFast);
            }
            if duration_s > windows.turn_max_s {
                return Err(RejectReason::TurnTooSlow);
            }
        }
        MovementKind::UTurn => {
            if duration_s < windows.u_turn_min_s {
                return Err(RejectReason::UTurnTooFast);
            }
            if duration_s > windows.u_turn_max_s {
                return Err(RejectReason::UTurnTooSlow);
            }
        }
        MovementKind::Pedestrian => {}
    }
    Ok(())
}

/// The full filter chain for one segmented, mapped track.
pub fn check_event(
    track_points: &[TrackPoint],
    code: RilsaCode,
    is_pedestrian: bool,
    duration_s: f64,
    settings: &AnalysisSettings,
    windows: &TimeWindows,
) -> Result<(), RejectReason> {
    check_geometry(track_points, settings, is_pedestrian)?;
    check_duration(duration_s, is_pedestrian, code, windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(n: usize, step_x: f64, step_y: f64) -> Vec<TrackPoint> {
        (0..n)
            .map(|i| TrackPoint {
                frame: i as u64,
                x: step_x * i as f64,
                y: step_y * i as f64,
                confidence: 1.0,
                interpolated: false,
            })
            .collect()
    }

    fn code(s: &str) -> RilsaCode {
        s.parse().unwrap()
    }

    #[test]
    fn path_and_net_lengths() {
        let pts = line(11, 3.0, 4.0);
        assert_relative_eq!(path_length_pixels(&pts), 50.0, epsilon = 1e-9);
        assert_relative_eq!(net_displacement_pixels(&pts), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn direction_changes_on_a_zigzag() {
        let mut pts = Vec::new();
        for i in 0..10u64 {
            pts.push(TrackPoint {
                frame: i,
                x: i as f64,
                y: if i % 2 == 0 { 0.0 } else { 5.0 },
                confidence: 1.0,
                interpolated: false,
            });
        }
        assert!(direction_changes(&pts) >= 8);
        assert_eq!(direction_changes(&line(10, 1.0, 0.0)), 0);
    }

    #[test]
    fn direction_changes_wrap_around_pi() {
        // Nearly straight leftward motion oscillating across the ±π axis
        // must not count as direction changes.
        let mut pts = Vec::new();
        let mut x = 100.0;
        let mut y = 0.0;
        for i in 0..10u64 {
            pts.push(TrackPoint {
                frame: i,
                x,
                y,
                confidence: 1.0,
                interpolated: false,
            });
            x -= 10.0;
            y += if i % 2 == 0 { 0.1 } else { -0.1 };
        }
        assert_eq!(direction_changes(&pts), 0);
    }

    #[test]
    fn geometry_rejects_short_and_wandering_tracks() {
        let settings = AnalysisSettings::default();
        // 10 px at 0.1 m/px is 1 m, under the 5 m minimum.
        let short = line(11, 1.0, 0.0);
        assert_eq!(
            check_geometry(&short, &settings, false),
            Err(RejectReason::PathTooShort)
        );
        // Pedestrians bypass.
        assert_eq!(check_geometry(&short, &settings, true), Ok(()));

        // Long but loops back onto itself: low net-over-path ratio.
        let mut loopy = line(60, 2.0, 0.0);
        let back: Vec<TrackPoint> = (0..59)
            .map(|i| TrackPoint {
                frame: 60 + i as u64,
                x: 118.0 - 2.0 * i as f64,
                y: 0.5,
                confidence: 1.0,
                interpolated: false,
            })
            .collect();
        loopy.extend(back);
        assert_eq!(
            check_geometry(&loopy, &settings, false),
            Err(RejectReason::LowNetOverPathRatio)
        );

        let fine = line(100, 2.0, 0.0);
        assert_eq!(check_geometry(&fine, &settings, false), Ok(()));
    }

    #[test]
    fn duration_windows_per_movement_type() {
        let w = TimeWindows::default();
        // Pedestrians.
        assert_eq!(
            check_duration(0.2, true, code("P1"), &w),
            Err(RejectReason::PedestrianTooBrief)
        );
        assert_eq!(
            check_duration(16.0, true, code("P1"), &w),
            Err(RejectReason::PedestrianStalled)
        );
        assert_eq!(check_duration(3.0, true, code("P1"), &w), Ok(()));
        // Vehicles: the class-wide gates fire first.
        assert_eq!(
            check_duration(31.0, false, code("1"), &w),
            Err(RejectReason::VehicleParked)
        );
        assert_eq!(
            check_duration(1.0, false, code("1"), &w),
            Err(RejectReason::VehicleTooBrief)
        );
        // Straights.
        assert_eq!(
            check_duration(2.0, false, code("1"), &w),
            Err(RejectReason::StraightTooFast)
        );
        assert_eq!(
            check_duration(26.0, false, code("2"), &w),
            Err(RejectReason::StraightTooSlow)
        );
        assert_eq!(check_duration(5.0, false, code("1"), &w), Ok(()));
        // Turns.
        assert_eq!(check_duration(2.0, false, code("5"), &w), Ok(()));
        assert_eq!(
            check_duration(26.0, false, code("9_1"), &w),
            Err(RejectReason::TurnTooSlow)
        );
        // U-turns.
        assert_eq!(
            check_duration(3.0, false, code("10_1"), &w),
            Err(RejectReason::UTurnTooFast)
        );
        assert_eq!(check_duration(10.0, false, code("10_1"), &w), Ok(()));
    }

    #[test]
    fn exact_boundary_durations_are_admitted() {
        let w = TimeWindows::default();
        assert_eq!(check_duration(2.5, false, code("1"), &w), Ok(()));
        assert_eq!(check_duration(25.0, false, code("1"), &w), Ok(()));
        assert_eq!(check_duration(0.3, true, code("P2"), &w), Ok(()));
    }
}
