//! Frame-sequential SORT: Kalman predict, IoU association, track lifecycle,
//! gap interpolation.
//!
//! One `BoxTracker` per dataset, strictly single-threaded. Detections arrive
//! one frame bundle at a time in ascending frame order; finalized tracks
//! come out contiguous, with gap positions linearly interpolated and marked.

use std::collections::BTreeSet;

use adskalman::{CovarianceUpdateMethod, StateAndCovariance};
use adskalman::{ObservationModel as _, TransitionModelLinearNoControl as _};
use nalgebra::U7;
use pathfinding::prelude::{kuhn_munkres, Matrix};
use tracing::{debug, trace};

use box_tracking::box_motion_model::ConstantVelocityBoxModel;
use box_tracking::box_observation_model::BoxObservationModel;
use box_tracking::{bbox_to_observation, initial_box_estimate, state_to_bbox};

use aforo_types::{BoundingBox, Detection, ObjectClass, Track, TrackId, TrackPoint};

#[derive(Debug, Clone, Copy)]
pub struct TrackerParams {
    /// Frames without a detection before a hypothesis is retired.
    pub max_age_frames: u32,
    /// Minimum real detections for a vehicle hypothesis to become a track.
    pub min_hits_vehicle: usize,
    /// Minimum real detections for a pedestrian hypothesis.
    pub min_hits_pedestrian: usize,
    /// Matched pairs below this IoU are rejected.
    pub iou_threshold: f64,
    pub motion_noise_scale: f64,
    pub observation_noise_pixels: f64,
    /// Side of the nominal square box used when a detection carries no box.
    pub default_box_side: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        TrackerParams {
            max_age_frames: 30,
            min_hits_vehicle: 8,
            min_hits_pedestrian: 3,
            iou_threshold: 0.3,
            motion_noise_scale: 1.0,
            observation_noise_pixels: 1.0,
            default_box_side: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    frame: u64,
    x: f64,
    y: f64,
    confidence: f64,
}

#[derive(Debug)]
struct Hypothesis {
    id: u64,
    class: ObjectClass,
    estimate: StateAndCovariance<f64, U7>,
    frames_since_update: u32,
    observations: Vec<Observation>,
}

impl Hypothesis {
    fn bbox(&self) -> BoundingBox {
        let b = state_to_bbox(self.estimate.state());
        BoundingBox::new(b[0], b[1], b[2], b[3])
    }

    fn min_hits(&self, params: &TrackerParams) -> usize {
        if self.class.is_pedestrian() {
            params.min_hits_pedestrian
        } else {
            params.min_hits_vehicle
        }
    }
}

/// Counters for the QC summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerRunStats {
    pub hypotheses_spawned: u64,
    pub discarded_min_hits: u64,
    pub degenerate_dropped: u64,
}

pub struct BoxTracker {
    params: TrackerParams,
    motion_generator: ConstantVelocityBoxModel<f64>,
    observation_model: BoxObservationModel<f64>,
    live: Vec<Hypothesis>,
    finished: Vec<(u64, Track)>,
    next_id: u64,
    current_frame: Option<u64>,
    stats: TrackerRunStats,
}

impl BoxTracker {
    pub fn new(params: TrackerParams) -> Self {
        BoxTracker {
            motion_generator: ConstantVelocityBoxModel::new(params.motion_noise_scale),
            observation_model: BoxObservationModel::new(params.observation_noise_pixels),
            params,
            live: Vec::new(),
            finished: Vec::new(),
            next_id: 1,
            current_frame: None,
            stats: TrackerRunStats::default(),
        }
    }

    fn detection_box(&self, det: &Detection) -> BoundingBox {
        det.bbox
            .unwrap_or_else(|| BoundingBox::centered(det.x, det.y, self.params.default_box_side))
    }

    /// Advance the tracker by one frame bundle. Frames must arrive in
    /// strictly ascending order.
    pub fn process_frame(&mut self, frame: u64, detections: &[Detection]) {
        let gap = match self.current_frame {
            None => 1,
            Some(prev) => {
                debug_assert!(frame > prev, "frames must ascend");
                frame.saturating_sub(prev).max(1)
            }
        };
        self.current_frame = Some(frame);

        self.predict(gap);

        let det_boxes: Vec<BoundingBox> =
            detections.iter().map(|d| self.detection_box(d)).collect();
        let iou: Vec<Vec<f64>> = self
            .live
            .iter()
            .map(|hyp| {
                let hyp_box = hyp.bbox();
                det_boxes.iter().map(|b| hyp_box.iou(b)).collect()
            })
            .collect();
        let matches = associate(&iou, self.params.iou_threshold);
        trace!(frame, live = self.live.len(), detections = detections.len(),
               matched = matches.len(), "associated frame");

        let mut matched_dets = vec![false; detections.len()];
        let mut dead = BTreeSet::new();
        for (hyp_idx, det_idx) in matches {
            matched_dets[det_idx] = true;
            let det = &detections[det_idx];
            let bbox = &det_boxes[det_idx];
            let z = bbox_to_observation(bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max);
            let hyp = &mut self.live[hyp_idx];
            match self
                .observation_model
                .update(&hyp.estimate, &z, CovarianceUpdateMethod::JosephForm)
            {
                Ok(posterior) => {
                    hyp.estimate = posterior;
                    hyp.frames_since_update = 0;
                    hyp.observations.push(Observation {
                        frame,
                        x: det.x,
                        y: det.y,
                        confidence: det.confidence,
                    });
                }
                Err(err) => {
                    debug!(hypothesis = hyp.id, error = %err, "update failed, dropping hypothesis");
                    dead.insert(hyp_idx);
                }
            }
        }
        if !dead.is_empty() {
            self.stats.degenerate_dropped += dead.len() as u64;
            let mut idx = 0;
            self.live.retain(|_| {
                let keep = !dead.contains(&idx);
                idx += 1;
                keep
            });
        }

        for (det_idx, det) in detections.iter().enumerate() {
            if !matched_dets[det_idx] {
                self.spawn(frame, det, &det_boxes[det_idx]);
            }
        }

        self.retire_stale();
    }

    fn predict(&mut self, gap: u64) {
        let motion = self.motion_generator.calc_for_dt(gap as f64);
        let mut retained = Vec::with_capacity(self.live.len());
        for mut hyp in std::mem::take(&mut self.live) {
            // An area collapsing through zero gets its area velocity reset
            // before the prediction step.
            let state = hyp.estimate.state();
            if state[2] + state[6] * gap as f64 <= 0.0 {
                let mut fixed = state.clone();
                fixed[6] = 0.0;
                hyp.estimate =
                    StateAndCovariance::new(fixed, hyp.estimate.covariance().clone());
            }
            let predicted = motion.predict(&hyp.estimate);
            if !predicted.state().iter().all(|v| v.is_finite())
                || predicted.state()[2] <= 0.0
            {
                debug!(hypothesis = hyp.id, "dropping hypothesis with degenerate prediction");
                self.stats.degenerate_dropped += 1;
                continue;
            }
            hyp.estimate = predicted;
            hyp.frames_since_update += gap as u32;
            retained.push(hyp);
        }
        self.live = retained;
    }

    fn spawn(&mut self, frame: u64, det: &Detection, bbox: &BoundingBox) {
        let z = bbox_to_observation(bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max);
        let hyp = Hypothesis {
            id: self.next_id,
            class: det.class.canonical(),
            estimate: initial_box_estimate(&z),
            frames_since_update: 0,
            observations: vec![Observation {
                frame,
                x: det.x,
                y: det.y,
                confidence: det.confidence,
            }],
        };
        trace!(hypothesis = hyp.id, frame, class = %hyp.class, "spawned hypothesis");
        self.next_id += 1;
        self.stats.hypotheses_spawned += 1;
        self.live.push(hyp);
    }

    fn retire_stale(&mut self) {
        let max_age = self.params.max_age_frames;
        let stale: Vec<Hypothesis> = {
            let mut keep = Vec::with_capacity(self.live.len());
            let mut retired = Vec::new();
            for hyp in std::mem::take(&mut self.live) {
                if hyp.frames_since_update > max_age {
                    retired.push(hyp);
                } else {
                    keep.push(hyp);
                }
            }
            self.live = keep;
            retired
        };
        for hyp in stale {
            self.finalize_hypothesis(hyp);
        }
    }

    fn finalize_hypothesis(&mut self, hyp: Hypothesis) {
        if hyp.observations.len() < hyp.min_hits(&self.params) {
            trace!(hypothesis = hyp.id, hits = hyp.observations.len(), "below min hits");
            self.stats.discarded_min_hits += 1;
            return;
        }
        if hyp.observations.len() < 2
            || hyp.observations.windows(2).any(|w| w[1].frame <= w[0].frame)
        {
            // Degenerate track: dropped silently.
            self.stats.degenerate_dropped += 1;
            return;
        }
        let points = interpolate_points(&hyp.observations);
        let track = Track {
            id: TrackId::new(format!("track_{}", hyp.id)),
            class: hyp.class,
            points,
        };
        self.finished.push((hyp.id, track));
    }

    /// Retire everything still alive and hand back the finalized tracks in
    /// (first frame, id) order.
    pub fn finalize(mut self) -> (Vec<Track>, TrackerRunStats) {
        for hyp in std::mem::take(&mut self.live) {
            self.finalize_hypothesis(hyp);
        }
        self.finished
            .sort_by_key(|(id, track)| (track.first_frame().unwrap_or(0), *id));
        (
            self.finished.into_iter().map(|(_, t)| t).collect(),
            self.stats,
        )
    }
}

/// Fill frame gaps between real observations by linear interpolation.
/// Interpolated rows carry confidence 0 and the interpolated flag.
fn interpolate_points(observations: &[Observation]) -> Vec<TrackPoint> {
    let mut points = Vec::new();
    for window in observations.windows(2) {
        let (a, b) = (window[0], window[1]);
        points.push(TrackPoint {
            frame: a.frame,
            x: a.x,
            y: a.y,
            confidence: a.confidence,
            interpolated: false,
        });
        for frame in (a.frame + 1)..b.frame {
            let ratio = (frame - a.frame) as f64 / (b.frame - a.frame) as f64;
            points.push(TrackPoint {
                frame,
                x: a.x + (b.x - a.x) * ratio,
                y: a.y + (b.y - a.y) * ratio,
                confidence: 0.0,
                interpolated: true,
            });
        }
    }
    if let Some(last) = observations.last() {
        points.push(TrackPoint {
            frame: last.frame,
            x: last.x,
            y: last.y,
            confidence: last.confidence,
            interpolated: false,
        });
    }
    points
}

/// Match hypotheses (rows) to detections (columns) on IoU.
///
/// When thresholding already yields a one-to-one matching it is used
/// directly; otherwise the maximum-IoU assignment is solved and pairs under
/// the threshold are rejected. Exactly-tied IoU goes to the older (lower
/// index, hence lower id) hypothesis.
fn associate(iou: &[Vec<f64>], threshold: f64) -> Vec<(usize, usize)> {
    let n_hyps = iou.len();
    let n_dets = iou.first().map(|row| row.len()).unwrap_or(0);
    if n_hyps == 0 || n_dets == 0 {
        return Vec::new();
    }

    // Shortcut: the thresholded matrix is already a one-to-one matching.
    let mut row_sums = vec![0usize; n_hyps];
    let mut col_sums = vec![0usize; n_dets];
    for (h, row) in iou.iter().enumerate() {
        for (d, &value) in row.iter().enumerate() {
            if value > threshold {
                row_sums[h] += 1;
                col_sums[d] += 1;
            }
        }
    }
    let max_row = row_sums.iter().copied().max().unwrap_or(0);
    let max_col = col_sums.iter().copied().max().unwrap_or(0);
    if max_row == 1 && max_col == 1 {
        let mut matches = Vec::new();
        for (h, row) in iou.iter().enumerate() {
            for (d, &value) in row.iter().enumerate() {
                if value > threshold {
                    matches.push((h, d));
                }
            }
        }
        return matches;
    }

    let pairs = solve_assignment(iou, n_hyps, n_dets);
    pairs
        .into_iter()
        .filter(|&(h, d)| iou[h][d] >= threshold)
        .collect()
}

/// Hungarian assignment maximizing total IoU. Weights are IoU scaled to
/// integers with a small age bonus so ties resolve toward older hypotheses.
fn solve_assignment(iou: &[Vec<f64>], n_hyps: usize, n_dets: usize) -> Vec<(usize, usize)> {
    const AGE_SLOTS: i64 = 1024;
    let weight = |h: usize, d: usize| -> i64 {
        let quantized = (iou[h][d] * 1e9).round() as i64;
        let age_bonus = AGE_SLOTS - 1 - (h as i64).min(AGE_SLOTS - 1);
        quantized * AGE_SLOTS + age_bonus
    };

    // kuhn_munkres wants rows <= columns.
    if n_hyps <= n_dets {
        let weights = Matrix::from_fn(n_hyps, n_dets, |(r, c)| weight(r, c));
        let (_, assignment) = kuhn_munkres(&weights);
        assignment.into_iter().enumerate().collect()
    } else {
        let weights = Matrix::from_fn(n_dets, n_hyps, |(r, c)| weight(c, r));
        let (_, assignment) = kuhn_munkres(&weights);
        assignment
            .into_iter()
            .enumerate()
            .map(|(d, h)| (h, d))
            .collect()
    }
}
