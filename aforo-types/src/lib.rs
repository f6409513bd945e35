//! Core data model for the aforo pipeline.
//!
//! Everything that crosses a subsystem boundary lives here: raw detections,
//! finalized tracks, access geometry, the RILSA code space, movement events,
//! manual corrections, and the derived 15-minute counts. All records are
//! serde-serializable so the repository layer can persist them without
//! translation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(thiserror::Error, Debug)]
pub enum AforoTypesError {
    #[error("unrecognized cardinal: {0:?}")]
    ParseCardinal(String),
    #[error("unrecognized RILSA code: {0:?}")]
    ParseRilsaCode(String),
    #[error("RILSA approach index out of range: {0}")]
    InvalidApproach(u8),
}

// Identifiers ----------------------------------------------------------------

/// Opaque dataset identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new<S: Into<String>>(s: S) -> Self {
        DatasetId(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tracker-assigned trajectory identifier, unique within a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new<S: Into<String>>(s: S) -> Self {
        TrackId(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Cardinals ------------------------------------------------------------------

/// Cardinal direction of an access. `O` (oeste) is west.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cardinal {
    N,
    S,
    E,
    O,
}

impl Cardinal {
    pub const ALL: [Cardinal; 4] = [Cardinal::N, Cardinal::S, Cardinal::O, Cardinal::E];

    /// RILSA approach index in the fixed order N=1, S=2, O=3, E=4.
    pub fn rilsa_index(&self) -> u8 {
        match self {
            Cardinal::N => 1,
            Cardinal::S => 2,
            Cardinal::O => 3,
            Cardinal::E => 4,
        }
    }

    pub fn opposite(&self) -> Cardinal {
        match self {
            Cardinal::N => Cardinal::S,
            Cardinal::S => Cardinal::N,
            Cardinal::E => Cardinal::O,
            Cardinal::O => Cardinal::E,
        }
    }
}

impl fmt::Display for Cardinal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let c = match self {
            Cardinal::N => "N",
            Cardinal::S => "S",
            Cardinal::E => "E",
            Cardinal::O => "O",
        };
        f.write_str(c)
    }
}

impl FromStr for Cardinal {
    type Err = AforoTypesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "W" is accepted as an alias for the west access.
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Cardinal::N),
            "S" => Ok(Cardinal::S),
            "E" => Ok(Cardinal::E),
            "O" | "W" => Ok(Cardinal::O),
            other => Err(AforoTypesError::ParseCardinal(other.to_string())),
        }
    }
}

impl Serialize for Cardinal {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cardinal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// RILSA codes ----------------------------------------------------------------

/// Movement family of a RILSA code. The derived order (straights, lefts,
/// rights, U-turns, pedestrians) is the canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MovementKind {
    Straight,
    Left,
    Right,
    UTurn,
    Pedestrian,
}

impl MovementKind {
    pub fn is_turn(&self) -> bool {
        matches!(self, MovementKind::Left | MovementKind::Right)
    }
}

/// One of the 20 canonical intersection movements.
///
/// `approach` is the RILSA index of the origin cardinal (1..=4). The string
/// forms are `1`..`4` (straight), `5`..`8` (left), `9_1`..`9_4` (right),
/// `10_1`..`10_4` (U-turn) and `P1`..`P4` (pedestrian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RilsaCode {
    kind: MovementKind,
    approach: u8,
}

impl RilsaCode {
    pub fn new(kind: MovementKind, approach: u8) -> Result<Self, AforoTypesError> {
        if !(1..=4).contains(&approach) {
            return Err(AforoTypesError::InvalidApproach(approach));
        }
        Ok(RilsaCode { kind, approach })
    }

    pub fn from_origin(kind: MovementKind, origin: Cardinal) -> Self {
        RilsaCode {
            kind,
            approach: origin.rilsa_index(),
        }
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn approach(&self) -> u8 {
        self.approach
    }

    pub fn is_pedestrian(&self) -> bool {
        self.kind == MovementKind::Pedestrian
    }
}

impl fmt::Display for RilsaCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            MovementKind::Straight => write!(f, "{}", self.approach),
            MovementKind::Left => write!(f, "{}", 4 + self.approach),
            MovementKind::Right => write!(f, "9_{}", self.approach),
            MovementKind::UTurn => write!(f, "10_{}", self.approach),
            MovementKind::Pedestrian => write!(f, "P{}", self.approach),
        }
    }
}

impl FromStr for RilsaCode {
    type Err = AforoTypesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let bad = || AforoTypesError::ParseRilsaCode(raw.to_string());
        if let Some(rest) = raw.strip_prefix("10_") {
            let i: u8 = rest.parse().map_err(|_| bad())?;
            return RilsaCode::new(MovementKind::UTurn, i);
        }
        if let Some(rest) = raw.strip_prefix("9_") {
            let i: u8 = rest.parse().map_err(|_| bad())?;
            return RilsaCode::new(MovementKind::Right, i);
        }
        if let Some(rest) = raw.strip_prefix('P').or_else(|| raw.strip_prefix('p')) {
            let i: u8 = rest.parse().map_err(|_| bad())?;
            return RilsaCode::new(MovementKind::Pedestrian, i);
        }
        let n: u8 = raw.parse().map_err(|_| bad())?;
        match n {
            1..=4 => RilsaCode::new(MovementKind::Straight, n),
            5..=8 => RilsaCode::new(MovementKind::Left, n - 4),
            _ => Err(bad()),
        }
    }
}

impl Serialize for RilsaCode {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RilsaCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Object classes -------------------------------------------------------------

/// Raw detector label. Canonicalization folds the truck subtypes and the
/// pedestrian synonyms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectClass(String);

impl ObjectClass {
    pub fn new<S: Into<String>>(s: S) -> Self {
        ObjectClass(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn canonical(&self) -> ObjectClass {
        let lower = self.0.to_ascii_lowercase();
        if lower.starts_with("truck_") || lower == "truck" {
            return ObjectClass("truck".to_string());
        }
        match lower.as_str() {
            "person" | "pedestrian" | "peaton" => ObjectClass("pedestrian".to_string()),
            _ => ObjectClass(lower),
        }
    }

    pub fn is_pedestrian(&self) -> bool {
        self.canonical().0 == "pedestrian"
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Geometry records -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        PixelPoint { x, y }
    }
}

/// Axis-aligned detection box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        BoundingBox {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Square box of side `side` centered at `(x, y)`.
    pub fn centered(x: f64, y: f64, side: f64) -> Self {
        let half = side / 2.0;
        BoundingBox::new(x - half, y - half, x + half, y + half)
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Intersection over union with `other`, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let xx1 = self.x_min.max(other.x_min);
        let yy1 = self.y_min.max(other.y_min);
        let xx2 = self.x_max.min(other.x_max);
        let yy2 = self.y_max.min(other.y_max);
        let w = (xx2 - xx1).max(0.0);
        let h = (yy2 - yy1).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        intersection / union.max(1e-6)
    }
}

/// Legacy line-segment membership test for an access.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

// Detections and tracks ------------------------------------------------------

fn default_confidence() -> f64 {
    1.0
}

/// One normalized detector output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub frame: u64,
    /// Track hint carried by some input shapes; the tracker assigns its own
    /// identifiers regardless.
    #[serde(default)]
    pub track_hint: Option<i64>,
    pub x: f64,
    pub y: f64,
    pub class: ObjectClass,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// Video-level metadata recovered by the detection normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for VideoMetadata {
    fn default() -> Self {
        VideoMetadata {
            width: 1280,
            height: 720,
            fps: 30.0,
        }
    }
}

/// One per-frame position of a finalized track. Gap-filled rows carry
/// `interpolated = true` and confidence 0, distinguishing them from real
/// zero-confidence detections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub frame: u64,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub interpolated: bool,
}

/// A finalized trajectory: contiguous frames from first to last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub class: ObjectClass,
    pub points: Vec<TrackPoint>,
}

impl Track {
    pub fn first_frame(&self) -> Option<u64> {
        self.points.first().map(|p| p.frame)
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.points.last().map(|p| p.frame)
    }

    /// Number of real (non-interpolated) detections.
    pub fn observed_count(&self) -> usize {
        self.points.iter().filter(|p| !p.interpolated).count()
    }

    /// Mean confidence over real detections.
    pub fn mean_confidence(&self) -> f64 {
        let real: Vec<f64> = self
            .points
            .iter()
            .filter(|p| !p.interpolated)
            .map(|p| p.confidence)
            .collect();
        if real.is_empty() {
            0.0
        } else {
            real.iter().sum::<f64>() / real.len() as f64
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[1].frame == w[0].frame + 1)
    }
}

// Access configuration -------------------------------------------------------

/// A labeled entry/exit zone of the intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub id: String,
    pub cardinal: Cardinal,
    pub x: f64,
    pub y: f64,
    /// Zone polygon (≥ 3 vertices, implicitly closed). Preferred membership
    /// test when present.
    #[serde(default)]
    pub polygon: Option<Vec<PixelPoint>>,
    #[serde(default)]
    pub gate: Option<Gate>,
}

impl AccessPoint {
    pub fn centroid(&self) -> PixelPoint {
        PixelPoint::new(self.x, self.y)
    }
}

/// One (origin, destination) → code rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RilsaRule {
    pub origin: Cardinal,
    pub dest: Cardinal,
    pub code: RilsaCode,
}

/// The per-dataset vehicle rule table. Pedestrian codes are derived from the
/// origin cardinal alone and never consult this table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RilsaRuleMap {
    pub rules: Vec<RilsaRule>,
}

impl RilsaRuleMap {
    pub fn lookup(&self, origin: Cardinal, dest: Cardinal) -> Option<RilsaCode> {
        self.rules
            .iter()
            .find(|r| r.origin == origin && r.dest == dest)
            .map(|r| r.code)
    }

    /// True when all 16 vehicle (origin, dest) pairs are covered.
    pub fn is_total(&self) -> bool {
        Cardinal::ALL
            .iter()
            .all(|o| Cardinal::ALL.iter().all(|d| self.lookup(*o, *d).is_some()))
    }
}

impl Default for RilsaRuleMap {
    /// The canonical mapping: straights 1-4, lefts 5-8, rights 9_i,
    /// U-turns 10_i, indexed by origin cardinal.
    fn default() -> Self {
        let mut rules = Vec::with_capacity(16);
        for origin in Cardinal::ALL {
            for dest in Cardinal::ALL {
                let kind = if dest == origin {
                    MovementKind::UTurn
                } else if dest == origin.opposite() {
                    MovementKind::Straight
                } else {
                    match (origin, dest) {
                        (Cardinal::N, Cardinal::E)
                        | (Cardinal::S, Cardinal::O)
                        | (Cardinal::O, Cardinal::N)
                        | (Cardinal::E, Cardinal::S) => MovementKind::Left,
                        _ => MovementKind::Right,
                    }
                };
                rules.push(RilsaRule {
                    origin,
                    dest,
                    code: RilsaCode::from_origin(kind, origin),
                });
            }
        }
        RilsaRuleMap { rules }
    }
}

fn default_interval_minutes() -> u32 {
    15
}
fn default_min_length_m() -> f64 {
    5.0
}
fn default_max_direction_changes() -> u32 {
    20
}
fn default_min_net_over_path_ratio() -> f64 {
    0.2
}
fn default_pixel_to_meter() -> f64 {
    0.1
}
fn default_ttc_threshold_s() -> f64 {
    1.5
}

/// Tunable analysis parameters, per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_min_length_m")]
    pub min_length_m: f64,
    #[serde(default = "default_max_direction_changes")]
    pub max_direction_changes: u32,
    #[serde(default = "default_min_net_over_path_ratio")]
    pub min_net_over_path_ratio: f64,
    /// Meters per pixel calibration for the path-length filter.
    #[serde(default = "default_pixel_to_meter")]
    pub pixel_to_meter: f64,
    /// Carried for the external conflict reporter.
    #[serde(default = "default_ttc_threshold_s")]
    pub ttc_threshold_s: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            interval_minutes: default_interval_minutes(),
            min_length_m: default_min_length_m(),
            max_direction_changes: default_max_direction_changes(),
            min_net_over_path_ratio: default_min_net_over_path_ratio(),
            pixel_to_meter: default_pixel_to_meter(),
            ttc_threshold_s: default_ttc_threshold_s(),
        }
    }
}

/// A movement the engineering study flags as not allowed at this
/// intersection. Does not alter mapping; only tags events for QC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenMovement {
    pub rilsa_code: RilsaCode,
    #[serde(default)]
    pub description: String,
}

/// Everything the core needs to know about one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatasetConfig {
    #[serde(default)]
    pub accesses: Vec<AccessPoint>,
    #[serde(default)]
    pub rilsa_map: RilsaRuleMap,
    #[serde(default)]
    pub analysis_settings: AnalysisSettings,
    #[serde(default)]
    pub forbidden_movements: Vec<ForbiddenMovement>,
    /// Wall-clock instant of frame 0. Epoch when unset.
    #[serde(default)]
    pub base_time: Option<DateTime<Utc>>,
}

impl DatasetConfig {
    pub fn access(&self, id: &str) -> Option<&AccessPoint> {
        self.accesses.iter().find(|a| a.id == id)
    }
}

/// Wall-clock timestamp for a frame number: `base + frame / fps`.
///
/// Microsecond rounding keeps the derivation deterministic across replays.
pub fn frame_timestamp(base: Option<DateTime<Utc>>, frame: u64, fps: f64) -> DateTime<Utc> {
    let base = base.unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let micros = (frame as f64 / fps * 1_000_000.0).round() as i64;
    base + chrono::Duration::microseconds(micros)
}

// Events, corrections, counts ------------------------------------------------

/// One entry of the append-only per-event audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRevision {
    pub version: u32,
    pub changes: BTreeMap<String, serde_json::Value>,
    pub changed_by: String,
    pub timestamp: DateTime<Utc>,
}

/// A completed movement: one per track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    pub track_id: TrackId,
    pub class: ObjectClass,
    pub origin_access: String,
    pub dest_access: String,
    pub origin_cardinal: Cardinal,
    pub destination_cardinal: Cardinal,
    pub rilsa_code: RilsaCode,
    pub frame_entry: u64,
    pub frame_exit: u64,
    pub timestamp_entry: DateTime<Utc>,
    pub timestamp_exit: DateTime<Utc>,
    /// One position per frame over `[frame_entry, frame_exit]`.
    pub positions: Vec<PixelPoint>,
    /// Mean confidence of the track's real detections.
    pub confidence: f64,
    #[serde(default)]
    pub hide_in_report: bool,
    #[serde(default)]
    pub discarded: bool,
    #[serde(default)]
    pub revisions: Vec<EventRevision>,
}

impl TrajectoryEvent {
    pub fn duration_seconds(&self) -> f64 {
        (self.timestamp_exit - self.timestamp_entry).num_milliseconds() as f64 / 1000.0
    }

    /// Counted by the aggregator?
    pub fn is_counted(&self) -> bool {
        !self.discarded
    }

    /// Visible in public report rollups?
    pub fn is_visible(&self) -> bool {
        !self.discarded && !self.hide_in_report
    }

    pub fn next_revision_version(&self) -> u32 {
        self.revisions.last().map(|r| r.version + 1).unwrap_or(1)
    }
}

/// Manual per-track override. Never removed implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrajectoryCorrection {
    #[serde(default)]
    pub new_origin: Option<Cardinal>,
    #[serde(default)]
    pub new_dest: Option<Cardinal>,
    #[serde(default)]
    pub new_class: Option<ObjectClass>,
    #[serde(default)]
    pub discard: bool,
    #[serde(default)]
    pub hide_in_report: bool,
}

/// Derived 15-minute volume count for one movement code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementCount {
    pub dataset: DatasetId,
    pub rilsa_code: RilsaCode,
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    pub counts_by_class: BTreeMap<String, u64>,
    pub total: u64,
}

/// Pipeline-run statistics persisted for QC reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackStats {
    pub total_tracks_raw: u64,
    pub tracks_below_min_hits: u64,
    pub tracks_without_event: u64,
    /// Reject reason → count, over the quality filter layer.
    pub rejected_by_filter: BTreeMap<String, u64>,
    pub events_emitted: u64,
}

/// Append-only audit record of a repository mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rilsa_code_string_forms() {
        let cases = [
            (RilsaCode::new(MovementKind::Straight, 1).unwrap(), "1"),
            (RilsaCode::new(MovementKind::Straight, 4).unwrap(), "4"),
            (RilsaCode::new(MovementKind::Left, 1).unwrap(), "5"),
            (RilsaCode::new(MovementKind::Left, 4).unwrap(), "8"),
            (RilsaCode::new(MovementKind::Right, 2).unwrap(), "9_2"),
            (RilsaCode::new(MovementKind::UTurn, 3).unwrap(), "10_3"),
            (RilsaCode::new(MovementKind::Pedestrian, 4).unwrap(), "P4"),
        ];
        for (code, s) in cases {
            assert_eq!(code.to_string(), s);
            assert_eq!(s.parse::<RilsaCode>().unwrap(), code);
        }
    }

    #[test]
    fn rilsa_code_rejects_garbage() {
        for s in ["0", "11", "9_5", "10_0", "P9", "x", ""] {
            assert!(s.parse::<RilsaCode>().is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn rilsa_code_order_is_canonical() {
        let mut codes: Vec<RilsaCode> = ["P1", "10_2", "9_1", "5", "2", "1"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        codes.sort();
        let rendered: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["1", "2", "5", "9_1", "10_2", "P1"]);
    }

    #[test]
    fn cardinal_indexes_follow_fixed_order() {
        assert_eq!(Cardinal::N.rilsa_index(), 1);
        assert_eq!(Cardinal::S.rilsa_index(), 2);
        assert_eq!(Cardinal::O.rilsa_index(), 3);
        assert_eq!(Cardinal::E.rilsa_index(), 4);
        assert_eq!("w".parse::<Cardinal>().unwrap(), Cardinal::O);
    }

    #[test]
    fn default_rule_map_matches_spec_table() {
        let map = RilsaRuleMap::default();
        assert!(map.is_total());
        let expect = [
            (Cardinal::N, Cardinal::S, "1"),
            (Cardinal::S, Cardinal::N, "2"),
            (Cardinal::O, Cardinal::E, "3"),
            (Cardinal::E, Cardinal::O, "4"),
            (Cardinal::N, Cardinal::E, "5"),
            (Cardinal::S, Cardinal::O, "6"),
            (Cardinal::O, Cardinal::N, "7"),
            (Cardinal::E, Cardinal::S, "8"),
            (Cardinal::N, Cardinal::O, "9_1"),
            (Cardinal::S, Cardinal::E, "9_2"),
            (Cardinal::O, Cardinal::S, "9_3"),
            (Cardinal::E, Cardinal::N, "9_4"),
            (Cardinal::N, Cardinal::N, "10_1"),
            (Cardinal::E, Cardinal::E, "10_4"),
        ];
        for (origin, dest, code) in expect {
            assert_eq!(
                map.lookup(origin, dest).unwrap().to_string(),
                code,
                "{origin}->{dest}"
            );
        }
    }

    #[test]
    fn object_class_canonicalization() {
        assert_eq!(ObjectClass::new("truck_c2").canonical().as_str(), "truck");
        assert_eq!(ObjectClass::new("Person").canonical().as_str(), "pedestrian");
        assert_eq!(ObjectClass::new("peaton").canonical().as_str(), "pedestrian");
        assert_eq!(ObjectClass::new("car").canonical().as_str(), "car");
        assert!(ObjectClass::new("pedestrian").is_pedestrian());
        assert!(!ObjectClass::new("bus").is_pedestrian());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        use approx::assert_relative_eq;
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_relative_eq!(a.iou(&a), 1.0, epsilon = 1e-9);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_relative_eq!(a.iou(&b), 0.0, epsilon = 1e-12);
        let c = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert_relative_eq!(a.iou(&c), 50.0 / 150.0, epsilon = 1e-9);
    }

    #[test]
    fn frame_timestamps_are_deterministic() {
        let t = frame_timestamp(None, 150, 30.0);
        assert_eq!(t.timestamp(), 5);
        let base = Utc.with_ymd_and_hms(2025, 11, 7, 14, 0, 0).unwrap();
        let t = frame_timestamp(Some(base), 90, 30.0);
        assert_eq!(t, base + chrono::Duration::seconds(3));
    }

    #[test]
    fn track_contiguity_and_observed_count() {
        let mk = |frame, interpolated| TrackPoint {
            frame,
            x: 0.0,
            y: 0.0,
            confidence: if interpolated { 0.0 } else { 0.9 },
            interpolated,
        };
        let track = Track {
            id: TrackId::new("t1"),
            class: ObjectClass::new("car"),
            points: vec![mk(3, false), mk(4, true), mk(5, false)],
        };
        assert!(track.is_contiguous());
        assert_eq!(track.observed_count(), 2);
        let broken = Track {
            points: vec![mk(3, false), mk(5, false)],
            ..track
        };
        assert!(!broken.is_contiguous());
    }
}
