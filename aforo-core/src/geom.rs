//! Pixel-space geometry shared by the access classifier.

use aforo_types::{Gate, PixelPoint};

/// A point within this perpendicular distance of a gate segment counts as
/// near the gate.
pub const GATE_NEAR_PIXELS: f64 = 50.0;

/// Near-polygon radius as a multiple of the polygon's max vertex distance
/// from its centroid.
pub const NEAR_RADIUS_FACTOR: f64 = 1.8;

pub fn euclidean_distance(a: PixelPoint, b: PixelPoint) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Ray-casting membership test with a horizontal ray.
///
/// An edge is crossed when the point's y is strictly above the edge's lower
/// vertex and at or below its upper vertex, which keeps shared vertices from
/// being counted twice.
pub fn point_in_polygon(pt: PixelPoint, polygon: &[PixelPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let pi = polygon[i];
        let pj = polygon[j];
        if (pi.y > pt.y) != (pj.y > pt.y) {
            let x_cross = pj.x + (pt.y - pj.y) / (pi.y - pj.y) * (pi.x - pj.x);
            if pt.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Vertex mean of the polygon.
pub fn polygon_centroid(polygon: &[PixelPoint]) -> PixelPoint {
    let n = polygon.len().max(1) as f64;
    let sx: f64 = polygon.iter().map(|p| p.x).sum();
    let sy: f64 = polygon.iter().map(|p| p.y).sum();
    PixelPoint::new(sx / n, sy / n)
}

/// Largest vertex distance from the centroid.
pub fn max_vertex_radius(polygon: &[PixelPoint], centroid: PixelPoint) -> f64 {
    polygon
        .iter()
        .map(|p| euclidean_distance(*p, centroid))
        .fold(0.0, f64::max)
}

/// Inside the polygon, or within `NEAR_RADIUS_FACTOR` times the polygon's
/// vertex radius of its centroid.
pub fn near_polygon(pt: PixelPoint, polygon: &[PixelPoint]) -> bool {
    if point_in_polygon(pt, polygon) {
        return true;
    }
    let centroid = polygon_centroid(polygon);
    let radius = max_vertex_radius(polygon, centroid);
    euclidean_distance(pt, centroid) <= radius * NEAR_RADIUS_FACTOR
}

/// Distance from `pt` to the segment `(a, b)`, projecting onto the segment
/// and clamping the projection parameter to `[0, 1]`.
pub fn distance_to_segment(pt: PixelPoint, a: PixelPoint, b: PixelPoint) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return euclidean_distance(pt, a);
    }
    let t = (((pt.x - a.x) * dx + (pt.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    let closest = PixelPoint::new(a.x + t * dx, a.y + t * dy);
    euclidean_distance(pt, closest)
}

pub fn gate_distance(pt: PixelPoint, gate: &Gate) -> f64 {
    distance_to_segment(
        pt,
        PixelPoint::new(gate.x1, gate.y1),
        PixelPoint::new(gate.x2, gate.y2),
    )
}

pub fn near_gate(pt: PixelPoint, gate: &Gate) -> bool {
    gate_distance(pt, gate) < GATE_NEAR_PIXELS
}
