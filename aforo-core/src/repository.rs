//! The persistence contract the core consumes, plus the in-memory
//! implementation used by tests and embedders.
//!
//! All write operations are serialized per dataset through an advisory lock;
//! reads are lock-free and may observe any committed prior state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};

use aforo_types::{
    DatasetConfig, DatasetId, Detection, EventRevision, HistoryEntry, MovementCount, TrackId,
    TrackStats, TrajectoryCorrection, TrajectoryEvent, VideoMetadata,
};

use crate::error::{Error, Result};

/// Holds the dataset-scoped advisory lock for the span of a mutation and the
/// rebuild it triggers.
pub struct DatasetLock {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

/// Typed CRUD the core requires from persistence. The backing store is
/// opaque; `replace_*` operations are atomic, `append_*` and
/// `record_history` are append-only.
pub trait Repository: Send + Sync {
    fn replace_detections(
        &self,
        dataset: &DatasetId,
        detections: Vec<Detection>,
        metadata: VideoMetadata,
    ) -> Result<()>;
    /// Detections in ascending frame order. `MissingTrajectoryData` when the
    /// dataset has never been normalized.
    fn load_detections(
        &self,
        dataset: &DatasetId,
    ) -> Result<Box<dyn Iterator<Item = Result<Detection>> + Send>>;
    fn load_video_metadata(&self, dataset: &DatasetId) -> Result<VideoMetadata>;

    fn save_config(&self, dataset: &DatasetId, config: &DatasetConfig) -> Result<()>;
    fn load_config(&self, dataset: &DatasetId) -> Result<DatasetConfig>;

    fn save_correction(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        correction: &TrajectoryCorrection,
    ) -> Result<()>;
    fn load_corrections(
        &self,
        dataset: &DatasetId,
    ) -> Result<BTreeMap<TrackId, TrajectoryCorrection>>;

    /// Atomic: after return, either all new events are visible or none.
    fn replace_events(&self, dataset: &DatasetId, events: Vec<TrajectoryEvent>) -> Result<()>;
    fn upsert_event(&self, dataset: &DatasetId, event: &TrajectoryEvent) -> Result<()>;
    fn load_events(&self, dataset: &DatasetId) -> Result<Vec<TrajectoryEvent>>;

    fn append_revision(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        revision: &EventRevision,
    ) -> Result<()>;

    fn replace_movement_counts(
        &self,
        dataset: &DatasetId,
        counts: Vec<MovementCount>,
    ) -> Result<()>;
    fn load_movement_counts(&self, dataset: &DatasetId) -> Result<Vec<MovementCount>>;

    fn replace_track_stats(&self, dataset: &DatasetId, stats: &TrackStats) -> Result<()>;
    fn load_track_stats(&self, dataset: &DatasetId) -> Result<TrackStats>;

    fn record_history(
        &self,
        dataset: &DatasetId,
        action: &str,
        details: serde_json::Value,
    ) -> Result<()>;
    fn load_history(&self, dataset: &DatasetId) -> Result<Vec<HistoryEntry>>;

    /// Take the dataset's advisory lock, failing fast on contention.
    fn try_lock_dataset(&self, dataset: &DatasetId) -> Result<DatasetLock>;
}

/// Shared helper for lock tables kept by repository implementations.
#[derive(Default)]
pub struct DatasetLockTable {
    locks: Mutex<BTreeMap<DatasetId, Arc<Mutex<()>>>>,
}

impl DatasetLockTable {
    pub fn try_lock(&self, dataset: &DatasetId) -> Result<DatasetLock> {
        let lock = {
            let mut table = self.locks.lock();
            table.entry(dataset.clone()).or_default().clone()
        };
        match lock.try_lock_arc() {
            Some(guard) => Ok(DatasetLock { _guard: guard }),
            None => Err(Error::RepositoryConflict {
                dataset: dataset.clone(),
            }),
        }
    }
}

#[derive(Default)]
struct DatasetState {
    detections: Option<Vec<Detection>>,
    metadata: VideoMetadata,
    config: Option<DatasetConfig>,
    corrections: BTreeMap<TrackId, TrajectoryCorrection>,
    events: Vec<TrajectoryEvent>,
    counts: Vec<MovementCount>,
    stats: TrackStats,
    revisions: Vec<(TrackId, EventRevision)>,
    history: Vec<HistoryEntry>,
}

/// In-memory repository. A dataset exists once anything has been stored
/// under its id; dropping the repository drops everything.
#[derive(Default)]
pub struct MemoryRepository {
    datasets: RwLock<BTreeMap<DatasetId, DatasetState>>,
    locks: DatasetLockTable,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_dataset<T>(&self, dataset: &DatasetId, f: impl FnOnce(&DatasetState) -> T) -> T {
        let guard = self.datasets.read();
        match guard.get(dataset) {
            Some(state) => f(state),
            None => f(&DatasetState::default()),
        }
    }

    fn with_dataset_mut<T>(
        &self,
        dataset: &DatasetId,
        f: impl FnOnce(&mut DatasetState) -> T,
    ) -> T {
        let mut guard = self.datasets.write();
        f(guard.entry(dataset.clone()).or_default())
    }

    /// Remove a dataset and everything it owns.
    pub fn delete_dataset(&self, dataset: &DatasetId) {
        self.datasets.write().remove(dataset);
    }
}

impl Repository for MemoryRepository {
    fn replace_detections(
        &self,
        dataset: &DatasetId,
        detections: Vec<Detection>,
        metadata: VideoMetadata,
    ) -> Result<()> {
        self.with_dataset_mut(dataset, |state| {
            state.detections = Some(detections);
            state.metadata = metadata;
        });
        Ok(())
    }

    fn load_detections(
        &self,
        dataset: &DatasetId,
    ) -> Result<Box<dyn Iterator<Item = Result<Detection>> + Send>> {
        let detections = self.with_dataset(dataset, |state| state.detections.clone());
        match detections {
            Some(dets) => Ok(Box::new(dets.into_iter().map(Ok))),
            None => Err(Error::MissingTrajectoryData {
                dataset: dataset.clone(),
            }),
        }
    }

    fn load_video_metadata(&self, dataset: &DatasetId) -> Result<VideoMetadata> {
        Ok(self.with_dataset(dataset, |state| state.metadata))
    }

    fn save_config(&self, dataset: &DatasetId, config: &DatasetConfig) -> Result<()> {
        self.with_dataset_mut(dataset, |state| state.config = Some(config.clone()));
        Ok(())
    }

    fn load_config(&self, dataset: &DatasetId) -> Result<DatasetConfig> {
        Ok(self.with_dataset(dataset, |state| state.config.clone().unwrap_or_default()))
    }

    fn save_correction(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        correction: &TrajectoryCorrection,
    ) -> Result<()> {
        self.with_dataset_mut(dataset, |state| {
            state.corrections.insert(track.clone(), correction.clone());
        });
        Ok(())
    }

    fn load_corrections(
        &self,
        dataset: &DatasetId,
    ) -> Result<BTreeMap<TrackId, TrajectoryCorrection>> {
        Ok(self.with_dataset(dataset, |state| state.corrections.clone()))
    }

    fn replace_events(&self, dataset: &DatasetId, events: Vec<TrajectoryEvent>) -> Result<()> {
        self.with_dataset_mut(dataset, |state| state.events = events);
        Ok(())
    }

    fn upsert_event(&self, dataset: &DatasetId, event: &TrajectoryEvent) -> Result<()> {
        self.with_dataset_mut(dataset, |state| {
            match state
                .events
                .iter_mut()
                .find(|e| e.track_id == event.track_id)
            {
                Some(existing) => *existing = event.clone(),
                None => state.events.push(event.clone()),
            }
        });
        Ok(())
    }

    fn load_events(&self, dataset: &DatasetId) -> Result<Vec<TrajectoryEvent>> {
        Ok(self.with_dataset(dataset, |state| state.events.clone()))
    }

    fn append_revision(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        revision: &EventRevision,
    ) -> Result<()> {
        self.with_dataset_mut(dataset, |state| {
            state.revisions.push((track.clone(), revision.clone()));
        });
        Ok(())
    }

    fn replace_movement_counts(
        &self,
        dataset: &DatasetId,
        counts: Vec<MovementCount>,
    ) -> Result<()> {
        self.with_dataset_mut(dataset, |state| state.counts = counts);
        Ok(())
    }

    fn load_movement_counts(&self, dataset: &DatasetId) -> Result<Vec<MovementCount>> {
        Ok(self.with_dataset(dataset, |state| state.counts.clone()))
    }

    fn replace_track_stats(&self, dataset: &DatasetId, stats: &TrackStats) -> Result<()> {
        self.with_dataset_mut(dataset, |state| state.stats = stats.clone());
        Ok(())
    }

    fn load_track_stats(&self, dataset: &DatasetId) -> Result<TrackStats> {
        Ok(self.with_dataset(dataset, |state| state.stats.clone()))
    }

    fn record_history(
        &self,
        dataset: &DatasetId,
        action: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        self.with_dataset_mut(dataset, |state| {
            state.history.push(HistoryEntry {
                action: action.to_string(),
                details,
                timestamp: Utc::now(),
            });
        });
        Ok(())
    }

    fn load_history(&self, dataset: &DatasetId) -> Result<Vec<HistoryEntry>> {
        Ok(self.with_dataset(dataset, |state| state.history.clone()))
    }

    fn try_lock_dataset(&self, dataset: &DatasetId) -> Result<DatasetLock> {
        self.locks.try_lock(dataset)
    }
}
