//! Detection normalizer: heterogeneous raw detection blobs in, the canonical
//! frame/track/class/x/y table out.
//!
//! The blob is an opaque JSON value. Three shapes are recognized; anything
//! else is rejected with `columns-not-mappable` and the columns seen.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use aforo_types::{BoundingBox, Detection, ObjectClass, VideoMetadata};

use crate::error::{Error, Result};

const FRAME_ALIASES: &[&str] = &["frame_id", "frame", "frame_idx", "frame_index", "frame_number"];
const TRACK_ALIASES: &[&str] = &["track_id", "id", "track", "trackid", "object_id"];
const X_ALIASES: &[&str] = &["x", "xc", "x_center", "xcentre", "cx", "bbox_center_x"];
const Y_ALIASES: &[&str] = &["y", "yc", "y_center", "ycentre", "cy", "bbox_center_y"];
const CLASS_ALIASES: &[&str] = &[
    "object_class",
    "cls",
    "class",
    "label",
    "object_type",
    "category",
];
const CONFIDENCE_ALIASES: &[&str] = &["confidence", "conf", "confianza", "score"];

const BBOX_LTWH: [&str; 4] = ["bbox_left", "bbox_top", "bbox_width", "bbox_height"];
const BBOX_MINMAX: [&str; 4] = ["xmin", "ymin", "xmax", "ymax"];
const BBOX_SHORT: [&str; 4] = ["left", "top", "width", "height"];

const STRUCTURED_KEYS: [&str; 4] = ["metadata", "detecciones", "trayectorias", "config"];

/// Normalizer output: the canonical detection table plus recovered video
/// metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDetections {
    pub detections: Vec<Detection>,
    pub metadata: VideoMetadata,
}

/// The recognized input shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawShape {
    /// Flat rows with aliased frame/track/x/y/class columns.
    Tabular,
    /// Flat rows whose position comes from a bounding-box column set.
    BBoxOnly,
    /// The detector's structured dump: `{metadata, detecciones,
    /// trayectorias, config}`.
    Structured,
}

/// A classified view of the raw blob, one projector per variant.
#[derive(Debug)]
pub enum RawDetections<'a> {
    Tabular(&'a [Value]),
    BBoxOnly(&'a [Value]),
    Structured(&'a Map<String, Value>),
}

impl<'a> RawDetections<'a> {
    pub fn shape(&self) -> RawShape {
        match self {
            RawDetections::Tabular(_) => RawShape::Tabular,
            RawDetections::BBoxOnly(_) => RawShape::BBoxOnly,
            RawDetections::Structured(_) => RawShape::Structured,
        }
    }

    /// Decide which shape the blob has, without projecting it yet.
    pub fn classify(blob: &'a Value) -> Result<Self> {
        if let Some(obj) = blob.as_object() {
            if STRUCTURED_KEYS.iter().all(|k| obj.contains_key(*k)) {
                return Ok(RawDetections::Structured(obj));
            }
            return Err(shape_mismatch_keys(obj));
        }
        if let Some(rows) = blob.as_array() {
            let Some(first) = rows.iter().find_map(Value::as_object) else {
                if rows.is_empty() {
                    return Ok(RawDetections::Tabular(rows));
                }
                return Err(Error::InputShapeMismatch {
                    columns: vec!["<non-record rows>".to_string()],
                });
            };
            let has = |aliases: &[&str]| resolve_ci(first, aliases).is_some();
            let mappable = has(FRAME_ALIASES) && has(TRACK_ALIASES) && has(CLASS_ALIASES);
            if mappable && has(X_ALIASES) && has(Y_ALIASES) {
                return Ok(RawDetections::Tabular(rows));
            }
            if mappable && bbox_columns(first).is_some() {
                return Ok(RawDetections::BBoxOnly(rows));
            }
            return Err(shape_mismatch_keys(first));
        }
        Err(Error::InputShapeMismatch {
            columns: vec![format!("<{}>", json_type_name(blob))],
        })
    }

    /// Project the classified blob onto the canonical detection schema.
    pub fn project(&self) -> Result<NormalizedDetections> {
        match self {
            RawDetections::Tabular(rows) => project_rows(rows, false),
            RawDetections::BBoxOnly(rows) => project_rows(rows, true),
            RawDetections::Structured(obj) => project_structured(obj),
        }
    }
}

/// Normalize a raw blob in one step.
pub fn normalize(blob: &Value) -> Result<NormalizedDetections> {
    let raw = RawDetections::classify(blob)?;
    let normalized = raw.project()?;
    debug!(
        shape = ?raw.shape(),
        detections = normalized.detections.len(),
        fps = normalized.metadata.fps,
        "normalized raw detections"
    );
    Ok(normalized)
}

/// Render detections back into canonical tabular rows. Re-normalizing the
/// result reproduces the same detection set.
pub fn to_canonical_rows(detections: &[Detection]) -> Value {
    let rows: Vec<Value> = detections
        .iter()
        .map(|d| {
            let mut row = Map::new();
            row.insert("frame_id".to_string(), Value::from(d.frame));
            row.insert(
                "track_id".to_string(),
                d.track_hint.map(Value::from).unwrap_or(Value::Null),
            );
            row.insert("x".to_string(), Value::from(d.x));
            row.insert("y".to_string(), Value::from(d.y));
            row.insert(
                "object_class".to_string(),
                Value::from(d.class.as_str().to_string()),
            );
            row.insert("confidence".to_string(), Value::from(d.confidence));
            if let Some(bbox) = &d.bbox {
                row.insert("xmin".to_string(), Value::from(bbox.x_min));
                row.insert("ymin".to_string(), Value::from(bbox.y_min));
                row.insert("xmax".to_string(), Value::from(bbox.x_max));
                row.insert("ymax".to_string(), Value::from(bbox.y_max));
            }
            Value::Object(row)
        })
        .collect();
    Value::Array(rows)
}

// -----------------------------------------------------------------------------

fn shape_mismatch_keys(obj: &Map<String, Value>) -> Error {
    Error::InputShapeMismatch {
        columns: obj.keys().cloned().collect(),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Case-insensitive column lookup.
fn resolve_ci<'m>(obj: &'m Map<String, Value>, aliases: &[&str]) -> Option<&'m Value> {
    for alias in aliases {
        if let Some(v) = obj.get(*alias) {
            return Some(v);
        }
    }
    for alias in aliases {
        for (key, v) in obj {
            if key.eq_ignore_ascii_case(alias) {
                return Some(v);
            }
        }
    }
    None
}

fn value_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Which bbox column set does this row expose?
fn bbox_columns(obj: &Map<String, Value>) -> Option<[&'static str; 4]> {
    for set in [BBOX_LTWH, BBOX_MINMAX, BBOX_SHORT] {
        if set.iter().all(|c| resolve_ci(obj, &[*c]).is_some()) {
            return Some(set);
        }
    }
    None
}

fn bbox_from_row(obj: &Map<String, Value>, set: [&'static str; 4]) -> Option<BoundingBox> {
    let a = value_f64(resolve_ci(obj, &[set[0]])?)?;
    let b = value_f64(resolve_ci(obj, &[set[1]])?)?;
    let c = value_f64(resolve_ci(obj, &[set[2]])?)?;
    let d = value_f64(resolve_ci(obj, &[set[3]])?)?;
    if set == BBOX_MINMAX {
        Some(BoundingBox::new(a, b, c, d))
    } else {
        // left/top/width/height flavors.
        Some(BoundingBox::new(a, b, a + c, b + d))
    }
}

fn project_rows(rows: &[Value], bbox_only: bool) -> Result<NormalizedDetections> {
    let mut detections = Vec::with_capacity(rows.len());
    let mut seen = BTreeSet::new();

    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let Some(frame) = resolve_ci(obj, FRAME_ALIASES).and_then(value_f64) else {
            continue;
        };
        if frame < 0.0 || !frame.is_finite() {
            continue;
        }
        let frame = frame.round() as u64;
        let Some(track) = resolve_ci(obj, TRACK_ALIASES).and_then(value_i64) else {
            continue;
        };
        let Some(class) = resolve_ci(obj, CLASS_ALIASES).and_then(value_string) else {
            continue;
        };
        let bbox = bbox_columns(obj).and_then(|set| bbox_from_row(obj, set));
        let (x, y) = if bbox_only {
            match &bbox {
                Some(b) => {
                    let c = b.center();
                    (c.x, c.y)
                }
                None => continue,
            }
        } else {
            let x = resolve_ci(obj, X_ALIASES).and_then(value_f64);
            let y = resolve_ci(obj, Y_ALIASES).and_then(value_f64);
            match (x, y) {
                (Some(x), Some(y)) => (x, y),
                _ => continue,
            }
        };
        let confidence = resolve_ci(obj, CONFIDENCE_ALIASES)
            .and_then(value_f64)
            .unwrap_or(1.0);

        // At most one detection per (frame, track); first occurrence wins.
        if !seen.insert((frame, track)) {
            continue;
        }

        detections.push(Detection {
            frame,
            track_hint: Some(track),
            x,
            y,
            class: ObjectClass::new(class),
            confidence,
            bbox,
        });
    }

    detections.sort_by(|a, b| (a.frame, a.track_hint).cmp(&(b.frame, b.track_hint)));

    let mut metadata = VideoMetadata::default();
    let mut seen_meta = MetadataSeen::default();
    for row in rows {
        extract_metadata(row, &mut metadata, &mut seen_meta);
    }
    Ok(NormalizedDetections {
        detections,
        metadata,
    })
}

fn project_structured(obj: &Map<String, Value>) -> Result<NormalizedDetections> {
    let detecciones = obj
        .get("detecciones")
        .and_then(Value::as_array)
        .ok_or_else(|| shape_mismatch_keys(obj))?;

    let mut detections = Vec::with_capacity(detecciones.len());
    for record in detecciones {
        let Some(rec) = record.as_object() else {
            return Err(Error::InputShapeMismatch {
                columns: vec!["<non-record detection>".to_string()],
            });
        };
        let Some(frame) = rec.get("fotograma").and_then(value_f64) else {
            continue;
        };
        if frame < 0.0 || !frame.is_finite() {
            continue;
        }
        let bbox_value = rec.get("bbox").ok_or_else(|| shape_mismatch_keys(rec))?;
        let bbox = parse_structured_bbox(bbox_value).ok_or_else(|| shape_mismatch_keys(rec))?;
        let class = rec
            .get("clase")
            .and_then(value_string)
            .ok_or_else(|| shape_mismatch_keys(rec))?;
        let confidence = rec.get("confianza").and_then(value_f64).unwrap_or(1.0);
        let center = bbox.center();
        detections.push(Detection {
            frame: frame.round() as u64,
            track_hint: None,
            x: center.x,
            y: center.y,
            class: ObjectClass::new(class),
            confidence,
            bbox: Some(bbox),
        });
    }

    detections.sort_by(|a, b| a.frame.cmp(&b.frame));

    let mut metadata = VideoMetadata::default();
    if let Some(meta) = obj.get("metadata") {
        extract_metadata(meta, &mut metadata, &mut MetadataSeen::default());
    }
    Ok(NormalizedDetections {
        detections,
        metadata,
    })
}

fn parse_structured_bbox(v: &Value) -> Option<BoundingBox> {
    let arr = v.as_array()?;
    if arr.len() != 4 {
        return None;
    }
    let coords: Vec<f64> = arr.iter().filter_map(value_f64).collect();
    if coords.len() != 4 {
        return None;
    }
    if coords[2] < coords[0] || coords[3] < coords[1] {
        return None;
    }
    Some(BoundingBox::new(coords[0], coords[1], coords[2], coords[3]))
}

#[derive(Default)]
struct MetadataSeen {
    width: bool,
    height: bool,
    fps: bool,
}

/// Walk the blob for width/height/fps, first hit wins.
fn extract_metadata(node: &Value, out: &mut VideoMetadata, seen: &mut MetadataSeen) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                let lower = key.to_ascii_lowercase();
                match lower.as_str() {
                    "width" | "w" | "frame_width" if !seen.width => {
                        if let Some(v) = value_f64(value) {
                            out.width = v as u32;
                            seen.width = true;
                        }
                    }
                    "height" | "h" | "frame_height" if !seen.height => {
                        if let Some(v) = value_f64(value) {
                            out.height = v as u32;
                            seen.height = true;
                        }
                    }
                    "fps" | "frame_rate" | "frames_per_second" if !seen.fps => {
                        if let Some(v) = value_f64(value) {
                            if v > 0.0 {
                                out.fps = v;
                                seen.fps = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            for value in map.values() {
                extract_metadata(value, out, seen);
            }
        }
        Value::Array(items) => {
            for item in items {
                extract_metadata(item, out, seen);
            }
        }
        _ => {}
    }
}
