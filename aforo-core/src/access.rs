//! Map a trajectory point to the access it belongs to.
//!
//! Stage order: polygon membership, near-polygon, gate proximity, then pure
//! centroid proximity. Ties break to the lexicographically lowest access id.

use aforo_types::{AccessPoint, PixelPoint};

use crate::geom;

/// Full four-stage classification. Returns `None` only when the access set
/// is empty (the proximity fallback always matches otherwise).
pub fn classify<'a>(pt: PixelPoint, accesses: &'a [AccessPoint]) -> Option<&'a AccessPoint> {
    // 1. Polygon membership.
    let inside = accesses
        .iter()
        .filter(|a| {
            a.polygon
                .as_deref()
                .map(|poly| geom::point_in_polygon(pt, poly))
                .unwrap_or(false)
        })
        .min_by(|a, b| a.id.cmp(&b.id));
    if inside.is_some() {
        return inside;
    }

    // 2. Near a polygon: closest centroid among those in range.
    let near = accesses
        .iter()
        .filter(|a| {
            a.polygon
                .as_deref()
                .map(|poly| geom::near_polygon(pt, poly))
                .unwrap_or(false)
        })
        .min_by(|a, b| {
            let da = geom::euclidean_distance(pt, a.centroid());
            let db = geom::euclidean_distance(pt, b.centroid());
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
    if near.is_some() {
        return near;
    }

    // 3. Gate proximity.
    let by_gate = accesses
        .iter()
        .filter(|a| {
            a.gate
                .as_ref()
                .map(|gate| geom::near_gate(pt, gate))
                .unwrap_or(false)
        })
        .min_by(|a, b| {
            let da = a.gate.as_ref().map(|g| geom::gate_distance(pt, g)).unwrap_or(f64::MAX);
            let db = b.gate.as_ref().map(|g| geom::gate_distance(pt, g)).unwrap_or(f64::MAX);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
    if by_gate.is_some() {
        return by_gate;
    }

    // 4. Pure proximity fallback.
    nearest(pt, accesses)
}

/// Proximity-only lookup: the access with the smallest centroid distance.
pub fn nearest<'a>(pt: PixelPoint, accesses: &'a [AccessPoint]) -> Option<&'a AccessPoint> {
    accesses.iter().min_by(|a, b| {
        let da = geom::euclidean_distance(pt, a.centroid());
        let db = geom::euclidean_distance(pt, b.centroid());
        da.partial_cmp(&db)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aforo_types::{Cardinal, Gate};

    fn access(id: &str, cardinal: Cardinal, x: f64, y: f64) -> AccessPoint {
        AccessPoint {
            id: id.to_string(),
            cardinal,
            x,
            y,
            polygon: None,
            gate: None,
        }
    }

    fn with_polygon(mut a: AccessPoint, poly: &[(f64, f64)]) -> AccessPoint {
        a.polygon = Some(poly.iter().map(|&(x, y)| PixelPoint::new(x, y)).collect());
        a
    }

    #[test]
    fn polygon_membership_wins_over_proximity() {
        let north = with_polygon(
            access("north", Cardinal::N, 100.0, 0.0),
            &[(90.0, 0.0), (110.0, 0.0), (110.0, 10.0), (90.0, 10.0)],
        );
        let south = access("south", Cardinal::S, 100.0, 6.0);
        // (100, 5) is inside the north polygon even though the south
        // centroid is closer.
        let accesses = vec![south, north];
        let hit = classify(PixelPoint::new(100.0, 5.0), &accesses).unwrap();
        assert_eq!(hit.id, "north");
    }

    #[test]
    fn near_polygon_beats_gate_and_fallback() {
        let north = with_polygon(
            access("north", Cardinal::N, 100.0, 5.0),
            &[(90.0, 0.0), (110.0, 0.0), (110.0, 10.0), (90.0, 10.0)],
        );
        let mut east = access("east", Cardinal::E, 400.0, 5.0);
        east.gate = Some(Gate {
            x1: 150.0,
            y1: 0.0,
            x2: 150.0,
            y2: 10.0,
        });
        let accesses = vec![north, east];
        // Slightly outside the polygon, but within its expanded radius
        // (radius sqrt(125) * 1.8 ≈ 20) and also within 50 px of the gate.
        let hit = classify(PixelPoint::new(115.0, 5.0), &accesses).unwrap();
        assert_eq!(hit.id, "north");
    }

    #[test]
    fn gate_used_when_no_polygon_matches() {
        let mut west = access("west", Cardinal::O, 0.0, 100.0);
        west.gate = Some(Gate {
            x1: 10.0,
            y1: 80.0,
            x2: 10.0,
            y2: 120.0,
        });
        let far = access("far", Cardinal::E, 20.0, 100.0);
        let accesses = vec![far, west];
        // 30 px from the gate; the fallback would pick "far" (closer
        // centroid), the gate stage must pick "west".
        let hit = classify(PixelPoint::new(40.0, 100.0), &accesses).unwrap();
        assert_eq!(hit.id, "west");
    }

    #[test]
    fn fallback_always_matches_when_accesses_exist() {
        let accesses = vec![
            access("a_east", Cardinal::E, 200.0, 0.0),
            access("a_west", Cardinal::O, 0.0, 0.0),
        ];
        let hit = classify(PixelPoint::new(30.0, 0.0), &accesses).unwrap();
        assert_eq!(hit.id, "a_west");
        assert!(classify(PixelPoint::new(0.0, 0.0), &[]).is_none());
    }

    #[test]
    fn equidistant_ties_break_to_lowest_id() {
        let accesses = vec![
            access("b", Cardinal::E, 10.0, 0.0),
            access("a", Cardinal::O, -10.0, 0.0),
        ];
        let hit = nearest(PixelPoint::new(0.0, 0.0), &accesses).unwrap();
        assert_eq!(hit.id, "a");
    }
}
