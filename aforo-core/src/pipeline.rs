//! Per-dataset orchestration: detections through tracker, segmenter, mapper,
//! filters and correction overlay into persisted events and rebuilt
//! aggregates.
//!
//! One logical job per dataset, single-threaded inside the dataset, parallel
//! across datasets. Any event or correction mutation triggers a full
//! aggregate rebuild for the affected dataset, so the derived counts are
//! always a pure function of the current event set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use aforo_types::{
    frame_timestamp, DatasetConfig, DatasetId, Detection, PixelPoint, Track, TrackId, TrackStats,
    TrajectoryCorrection, TrajectoryEvent, VideoMetadata,
};

use crate::aggregate::IntervalAggregator;
use crate::bundler;
use crate::corrections::{self, CorrectionOutcome};
use crate::error::{Error, Result};
use crate::normalize;
use crate::quality::{self, TimeWindows};
use crate::repository::Repository;
use crate::rilsa;
use crate::segment;
use crate::tracking_core::{BoxTracker, TrackerParams};

/// Outcome of one dataset run. A cancelled run persists nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub dataset: DatasetId,
    pub cancelled: bool,
    pub events_total: usize,
    pub stats: TrackStats,
}

pub struct Pipeline<R: Repository> {
    repo: Arc<R>,
    tracker_params: TrackerParams,
    windows: TimeWindows,
    cancel: Arc<AtomicBool>,
}

impl<R: Repository> Pipeline<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Pipeline {
            repo,
            tracker_params: TrackerParams::default(),
            windows: TimeWindows::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_tracker_params(mut self, params: TrackerParams) -> Self {
        self.tracker_params = params;
        self
    }

    pub fn with_time_windows(mut self, windows: TimeWindows) -> Self {
        self.windows = windows;
        self
    }

    /// Flag checked between frames; setting it aborts the run cooperatively.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Normalize a raw detection blob and persist the canonical table.
    pub fn ingest_raw(
        &self,
        dataset: &DatasetId,
        blob: &serde_json::Value,
    ) -> Result<VideoMetadata> {
        let _lock = self.repo.try_lock_dataset(dataset)?;
        let normalized = normalize::normalize(blob)?;
        let metadata = normalized.metadata;
        let count = normalized.detections.len();
        self.repo
            .replace_detections(dataset, normalized.detections, metadata)?;
        self.repo.record_history(
            dataset,
            "ingest",
            json!({ "detections": count, "fps": metadata.fps }),
        )?;
        info!(dataset = %dataset, detections = count, "ingested raw detections");
        Ok(metadata)
    }

    /// Run the full analysis for one dataset: track, segment, map, filter,
    /// overlay corrections, persist events and rebuild aggregates.
    pub fn run_dataset(&self, dataset: &DatasetId) -> Result<RunSummary> {
        let _lock = self.repo.try_lock_dataset(dataset)?;

        let config = self.repo.load_config(dataset)?;
        warn_on_config_gaps(dataset, &config);
        let metadata = self.repo.load_video_metadata(dataset)?;
        let fps = if metadata.fps > 0.0 {
            metadata.fps
        } else {
            VideoMetadata::default().fps
        };
        let detections: Vec<Detection> =
            self.repo.load_detections(dataset)?.collect::<Result<_>>()?;
        let corrections_map = self.repo.load_corrections(dataset)?;

        let bundles = bundler::bundle_frames(detections)?;
        let mut tracker = BoxTracker::new(self.tracker_params);
        for bundle in &bundles {
            if self.cancel.load(Ordering::Relaxed) {
                info!(dataset = %dataset, frame = bundle.frame, "run cancelled, nothing persisted");
                return Ok(RunSummary {
                    dataset: dataset.clone(),
                    cancelled: true,
                    events_total: 0,
                    stats: TrackStats::default(),
                });
            }
            tracker.process_frame(bundle.frame, &bundle.detections);
        }
        let (tracks, tracker_stats) = tracker.finalize();

        let mut stats = TrackStats {
            total_tracks_raw: tracker_stats.hypotheses_spawned,
            tracks_below_min_hits: tracker_stats.discarded_min_hits,
            ..Default::default()
        };

        let mut events = Vec::new();
        for track in &tracks {
            match self.build_event(track, &config, fps, &mut stats) {
                Some(mut event) => {
                    if let Some(correction) = corrections_map.get(&track.id) {
                        let changed_at = event.timestamp_exit;
                        let outcome = corrections::apply_correction(
                            &mut event,
                            correction,
                            &config.rilsa_map,
                            &config.accesses,
                            "correction",
                            changed_at,
                        );
                        if outcome == CorrectionOutcome::MappingGap {
                            *stats
                                .rejected_by_filter
                                .entry("mapping_gap".to_string())
                                .or_insert(0) += 1;
                        }
                    }
                    events.push(event);
                }
                None => stats.tracks_without_event += 1,
            }
        }

        // Events come out in entry-frame order.
        events.sort_by(|a, b| {
            (a.frame_entry, a.track_id.as_str()).cmp(&(b.frame_entry, b.track_id.as_str()))
        });
        stats.events_emitted = events.iter().filter(|e| e.is_counted()).count() as u64;

        self.repo.replace_events(dataset, events.clone())?;
        let mut aggregator = IntervalAggregator::new(config.analysis_settings.interval_minutes);
        aggregator.rebuild_from_events(dataset, &events);
        self.repo
            .replace_movement_counts(dataset, aggregator.movement_counts(dataset))?;
        self.repo.replace_track_stats(dataset, &stats)?;
        self.repo.record_history(
            dataset,
            "analysis_run",
            json!({
                "tracks": tracks.len(),
                "events": events.len(),
                "counted": stats.events_emitted,
            }),
        )?;

        info!(
            dataset = %dataset,
            tracks = tracks.len(),
            events = events.len(),
            "analysis run complete"
        );
        Ok(RunSummary {
            dataset: dataset.clone(),
            cancelled: false,
            events_total: events.len(),
            stats,
        })
    }

    /// Segment one finalized track, map it and run the quality filters.
    /// `None` means no event (the reason lands in `stats`).
    fn build_event(
        &self,
        track: &Track,
        config: &DatasetConfig,
        fps: f64,
        stats: &mut TrackStats,
    ) -> Option<TrajectoryEvent> {
        let seg = segment::segment_track(track, &config.accesses)?;
        let code = match rilsa::map_movement(
            seg.entry_cardinal,
            seg.exit_cardinal,
            &track.class,
            &config.rilsa_map,
        ) {
            Some(code) => code,
            None => {
                debug!(track = %track.id, origin = %seg.entry_cardinal,
                       dest = %seg.exit_cardinal, "mapping gap, no event");
                *stats
                    .rejected_by_filter
                    .entry("mapping_gap".to_string())
                    .or_insert(0) += 1;
                return None;
            }
        };

        let duration_s = (seg.exit_frame - seg.entry_frame) as f64 / fps;
        let is_pedestrian = track.class.is_pedestrian();
        if let Err(reason) = quality::check_event(
            &track.points,
            code,
            is_pedestrian,
            duration_s,
            &config.analysis_settings,
            &self.windows,
        ) {
            debug!(track = %track.id, reason = reason.as_str(), "rejected by quality filter");
            *stats
                .rejected_by_filter
                .entry(reason.as_str().to_string())
                .or_insert(0) += 1;
            return None;
        }

        Some(TrajectoryEvent {
            track_id: track.id.clone(),
            class: track.class.clone(),
            origin_access: seg.entry_access.clone(),
            dest_access: seg.exit_access.clone(),
            origin_cardinal: seg.entry_cardinal,
            destination_cardinal: seg.exit_cardinal,
            rilsa_code: code,
            frame_entry: seg.entry_frame,
            frame_exit: seg.exit_frame,
            timestamp_entry: frame_timestamp(config.base_time, seg.entry_frame, fps),
            timestamp_exit: frame_timestamp(config.base_time, seg.exit_frame, fps),
            positions: seg
                .points
                .iter()
                .map(|p| PixelPoint::new(p.x, p.y))
                .collect(),
            confidence: track.mean_confidence(),
            hide_in_report: false,
            discarded: false,
            revisions: Vec::new(),
        })
    }

    /// Apply one manual correction and rebuild the dataset's aggregates.
    ///
    /// Rejected with `InvalidCorrectionTarget` (and no state change) when no
    /// event carries the track id.
    pub fn apply_correction(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        correction: &TrajectoryCorrection,
        changed_by: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<CorrectionOutcome> {
        let _lock = self.repo.try_lock_dataset(dataset)?;
        let mut events = self.repo.load_events(dataset)?;
        let Some(idx) = events.iter().position(|e| e.track_id == *track) else {
            return Err(Error::InvalidCorrectionTarget {
                dataset: dataset.clone(),
                track: track.clone(),
            });
        };
        let config = self.repo.load_config(dataset)?;

        self.repo.save_correction(dataset, track, correction)?;
        let outcome = corrections::apply_correction(
            &mut events[idx],
            correction,
            &config.rilsa_map,
            &config.accesses,
            changed_by,
            changed_at,
        );
        if outcome != CorrectionOutcome::Unchanged {
            if let Some(revision) = events[idx].revisions.last() {
                self.repo.append_revision(dataset, track, revision)?;
            }
        }
        self.repo.upsert_event(dataset, &events[idx])?;

        let mut aggregator = IntervalAggregator::new(config.analysis_settings.interval_minutes);
        aggregator.rebuild_from_events(dataset, &events);
        self.repo
            .replace_movement_counts(dataset, aggregator.movement_counts(dataset))?;
        self.repo.record_history(
            dataset,
            "correction",
            json!({ "track": track.as_str(), "outcome": format!("{outcome:?}") }),
        )?;
        Ok(outcome)
    }

    /// Replace the dataset configuration and rebuild the aggregates — a
    /// rule-map or interval change reshapes the derived counts.
    pub fn update_config(&self, dataset: &DatasetId, config: &DatasetConfig) -> Result<()> {
        let _lock = self.repo.try_lock_dataset(dataset)?;
        self.repo.save_config(dataset, config)?;
        let events = self.repo.load_events(dataset)?;
        let mut aggregator = IntervalAggregator::new(config.analysis_settings.interval_minutes);
        aggregator.rebuild_from_events(dataset, &events);
        self.repo
            .replace_movement_counts(dataset, aggregator.movement_counts(dataset))?;
        self.repo.record_history(
            dataset,
            "config_update",
            json!({ "accesses": config.accesses.len() }),
        )?;
        Ok(())
    }

    /// Rebuild the aggregates from the currently stored events, e.g. after an
    /// external event mutation.
    pub fn rebuild_aggregates(&self, dataset: &DatasetId) -> Result<()> {
        let _lock = self.repo.try_lock_dataset(dataset)?;
        let events = self.repo.load_events(dataset)?;
        let config = self.repo.load_config(dataset)?;
        let mut aggregator = IntervalAggregator::new(config.analysis_settings.interval_minutes);
        aggregator.rebuild_from_events(dataset, &events);
        self.repo
            .replace_movement_counts(dataset, aggregator.movement_counts(dataset))?;
        self.repo
            .record_history(dataset, "rebuild", json!({ "events": events.len() }))?;
        Ok(())
    }
}

fn warn_on_config_gaps(dataset: &DatasetId, config: &DatasetConfig) {
    if config.accesses.is_empty() {
        warn!(dataset = %dataset, "no accesses configured, no events will be produced");
    }
    let mut seen = std::collections::BTreeSet::new();
    for access in &config.accesses {
        if !seen.insert(access.cardinal) {
            warn!(dataset = %dataset, cardinal = %access.cardinal,
                  "cardinal appears on more than one access");
        }
        if let Some(polygon) = &access.polygon {
            if polygon.len() < 3 {
                warn!(dataset = %dataset, access = %access.id, "polygon has fewer than 3 vertices");
            }
        }
    }
    if !config.rilsa_map.is_total() {
        warn!(dataset = %dataset, "rule map does not cover all 16 vehicle movements");
    }
}

/// Run several datasets concurrently, one worker per dataset. Tracker state
/// is worker-local; the repository is the only shared state.
pub fn process_datasets<R: Repository + 'static>(
    repo: Arc<R>,
    datasets: &[DatasetId],
    tracker_params: TrackerParams,
    windows: TimeWindows,
) -> Vec<(DatasetId, Result<RunSummary>)> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = datasets
            .iter()
            .map(|dataset| {
                let repo = Arc::clone(&repo);
                let dataset = dataset.clone();
                scope.spawn(move || {
                    let pipeline = Pipeline::new(repo)
                        .with_tracker_params(tracker_params)
                        .with_time_windows(windows);
                    let result = pipeline.run_dataset(&dataset);
                    (dataset, result)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("dataset worker panicked"))
            .collect()
    })
}
