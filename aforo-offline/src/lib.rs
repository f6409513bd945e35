//! Offline driver for the aforo pipeline.
//!
//! `DirRepository` persists one dataset per subdirectory of a data root:
//!
//! ```text
//! <root>/<dataset>/
//!   config.json           dataset configuration
//!   corrections.json      track id → manual correction
//!   normalized.json       canonical detections + video metadata
//!   events.jsonl          one trajectory event per line (atomic replace)
//!   movement_counts.csv   long-form interval counts (atomic replace)
//!   track_stats.json      QC counters of the last run
//!   revisions.jsonl       append-only revision log
//!   history.jsonl         append-only audit log
//! ```
//!
//! Replace operations write a temporary file and rename it into place, so a
//! reader sees either the previous or the new state, never a partial one.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use aforo_core::repository::{DatasetLock, DatasetLockTable};
use aforo_core::{Error as CoreError, Pipeline, Repository, RunSummary};
use aforo_types::{
    DatasetConfig, DatasetId, Detection, EventRevision, HistoryEntry, MovementCount, RilsaCode,
    TrackId, TrackStats, TrajectoryCorrection, TrajectoryEvent, VideoMetadata,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Core {
        #[from]
        source: CoreError,
    },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("{source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

const CONFIG_FNAME: &str = "config.json";
const CORRECTIONS_FNAME: &str = "corrections.json";
const NORMALIZED_FNAME: &str = "normalized.json";
const EVENTS_FNAME: &str = "events.jsonl";
const MOVEMENT_COUNTS_FNAME: &str = "movement_counts.csv";
const TRACK_STATS_FNAME: &str = "track_stats.json";
const REVISIONS_FNAME: &str = "revisions.jsonl";
const HISTORY_FNAME: &str = "history.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct StoredDetections {
    metadata: VideoMetadata,
    detections: Vec<Detection>,
}

/// One `movement_counts.csv` row: a single (code, interval, class) cell.
#[derive(Debug, Serialize, Deserialize)]
struct CountRow {
    rilsa_code: RilsaCode,
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
    class: String,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RevisionRow {
    track_id: TrackId,
    #[serde(flatten)]
    revision: EventRevision,
}

/// File-backed repository: one directory per dataset under `root`.
pub struct DirRepository {
    root: PathBuf,
    locks: DatasetLockTable,
}

impl DirRepository {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DirRepository {
            root: root.into(),
            locks: DatasetLockTable::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset: &DatasetId) -> PathBuf {
        self.root.join(dataset.as_str())
    }

    fn ensure_dir(&self, dataset: &DatasetId) -> aforo_core::Result<PathBuf> {
        let dir = self.dataset_dir(dataset);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn read_json_opt<T: DeserializeOwned>(&self, path: &Path) -> aforo_core::Result<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> aforo_core::Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> aforo_core::Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes)
    }

    fn append_jsonl<T: Serialize>(&self, path: &Path, value: &T) -> aforo_core::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> aforo_core::Result<Vec<T>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut rows = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(line)?);
        }
        Ok(rows)
    }

    /// Datasets present under the root, by directory name.
    pub fn list_datasets(&self) -> Result<Vec<DatasetId>> {
        let mut datasets = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(datasets),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    datasets.push(DatasetId::new(name));
                }
            }
        }
        datasets.sort();
        Ok(datasets)
    }
}

impl Repository for DirRepository {
    fn replace_detections(
        &self,
        dataset: &DatasetId,
        detections: Vec<Detection>,
        metadata: VideoMetadata,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        self.write_json_atomic(
            &dir.join(NORMALIZED_FNAME),
            &StoredDetections {
                metadata,
                detections,
            },
        )
    }

    fn load_detections(
        &self,
        dataset: &DatasetId,
    ) -> aforo_core::Result<Box<dyn Iterator<Item = aforo_core::Result<Detection>> + Send>> {
        let path = self.dataset_dir(dataset).join(NORMALIZED_FNAME);
        match self.read_json_opt::<StoredDetections>(&path)? {
            Some(stored) => Ok(Box::new(stored.detections.into_iter().map(Ok))),
            None => Err(CoreError::MissingTrajectoryData {
                dataset: dataset.clone(),
            }),
        }
    }

    fn load_video_metadata(&self, dataset: &DatasetId) -> aforo_core::Result<VideoMetadata> {
        let path = self.dataset_dir(dataset).join(NORMALIZED_FNAME);
        Ok(self
            .read_json_opt::<StoredDetections>(&path)?
            .map(|stored| stored.metadata)
            .unwrap_or_default())
    }

    fn save_config(&self, dataset: &DatasetId, config: &DatasetConfig) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        self.write_json_atomic(&dir.join(CONFIG_FNAME), config)
    }

    fn load_config(&self, dataset: &DatasetId) -> aforo_core::Result<DatasetConfig> {
        let path = self.dataset_dir(dataset).join(CONFIG_FNAME);
        match self.read_json_opt(&path) {
            Ok(config) => Ok(config.unwrap_or_default()),
            Err(CoreError::Json { source }) => Err(CoreError::ConfigurationIncomplete {
                reason: format!("{} is malformed: {source}", CONFIG_FNAME),
            }),
            Err(err) => Err(err),
        }
    }

    fn save_correction(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        correction: &TrajectoryCorrection,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        let path = dir.join(CORRECTIONS_FNAME);
        let mut corrections: BTreeMap<TrackId, TrajectoryCorrection> =
            self.read_json_opt(&path)?.unwrap_or_default();
        corrections.insert(track.clone(), correction.clone());
        self.write_json_atomic(&path, &corrections)
    }

    fn load_corrections(
        &self,
        dataset: &DatasetId,
    ) -> aforo_core::Result<BTreeMap<TrackId, TrajectoryCorrection>> {
        let path = self.dataset_dir(dataset).join(CORRECTIONS_FNAME);
        Ok(self.read_json_opt(&path)?.unwrap_or_default())
    }

    fn replace_events(
        &self,
        dataset: &DatasetId,
        events: Vec<TrajectoryEvent>,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        let mut buffer = Vec::new();
        for event in &events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }
        self.write_atomic(&dir.join(EVENTS_FNAME), &buffer)
    }

    fn upsert_event(
        &self,
        dataset: &DatasetId,
        event: &TrajectoryEvent,
    ) -> aforo_core::Result<()> {
        let mut events = self.load_events(dataset)?;
        match events.iter_mut().find(|e| e.track_id == event.track_id) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        self.replace_events(dataset, events)
    }

    fn load_events(&self, dataset: &DatasetId) -> aforo_core::Result<Vec<TrajectoryEvent>> {
        self.read_jsonl(&self.dataset_dir(dataset).join(EVENTS_FNAME))
    }

    fn append_revision(
        &self,
        dataset: &DatasetId,
        track: &TrackId,
        revision: &EventRevision,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        self.append_jsonl(
            &dir.join(REVISIONS_FNAME),
            &RevisionRow {
                track_id: track.clone(),
                revision: revision.clone(),
            },
        )
    }

    fn replace_movement_counts(
        &self,
        dataset: &DatasetId,
        counts: Vec<MovementCount>,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        let mut buffer = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut buffer);
            for count in &counts {
                for (class, n) in &count.counts_by_class {
                    writer.serialize(CountRow {
                        rilsa_code: count.rilsa_code,
                        interval_start: count.interval_start,
                        interval_end: count.interval_end,
                        class: class.clone(),
                        count: *n,
                    })?;
                }
            }
            writer.flush()?;
        }
        self.write_atomic(&dir.join(MOVEMENT_COUNTS_FNAME), &buffer)
    }

    fn load_movement_counts(
        &self,
        dataset: &DatasetId,
    ) -> aforo_core::Result<Vec<MovementCount>> {
        let path = self.dataset_dir(dataset).join(MOVEMENT_COUNTS_FNAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut grouped: BTreeMap<(RilsaCode, DateTime<Utc>), (DateTime<Utc>, BTreeMap<String, u64>)> =
            BTreeMap::new();
        for row in reader.deserialize() {
            let row: CountRow = row?;
            let entry = grouped
                .entry((row.rilsa_code, row.interval_start))
                .or_insert_with(|| (row.interval_end, BTreeMap::new()));
            entry.1.insert(row.class, row.count);
        }
        Ok(grouped
            .into_iter()
            .map(|((code, start), (end, by_class))| MovementCount {
                dataset: dataset.clone(),
                rilsa_code: code,
                interval_start: start,
                interval_end: end,
                total: by_class.values().sum(),
                counts_by_class: by_class,
            })
            .collect())
    }

    fn replace_track_stats(
        &self,
        dataset: &DatasetId,
        stats: &TrackStats,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        self.write_json_atomic(&dir.join(TRACK_STATS_FNAME), stats)
    }

    fn load_track_stats(&self, dataset: &DatasetId) -> aforo_core::Result<TrackStats> {
        let path = self.dataset_dir(dataset).join(TRACK_STATS_FNAME);
        Ok(self.read_json_opt(&path)?.unwrap_or_default())
    }

    fn record_history(
        &self,
        dataset: &DatasetId,
        action: &str,
        details: serde_json::Value,
    ) -> aforo_core::Result<()> {
        let dir = self.ensure_dir(dataset)?;
        self.append_jsonl(
            &dir.join(HISTORY_FNAME),
            &HistoryEntry {
                action: action.to_string(),
                details,
                timestamp: Utc::now(),
            },
        )
    }

    fn load_history(&self, dataset: &DatasetId) -> aforo_core::Result<Vec<HistoryEntry>> {
        self.read_jsonl(&self.dataset_dir(dataset).join(HISTORY_FNAME))
    }

    fn try_lock_dataset(&self, dataset: &DatasetId) -> aforo_core::Result<DatasetLock> {
        self.locks.try_lock(dataset)
    }
}

/// Normalize a raw JSON detection dump into the dataset directory.
pub fn normalize_into(
    root: &Path,
    dataset: &DatasetId,
    input: &Path,
) -> Result<VideoMetadata> {
    let blob: serde_json::Value = serde_json::from_slice(&fs::read(input)?)?;
    let repo = std::sync::Arc::new(DirRepository::new(root));
    let pipeline = Pipeline::new(repo);
    let metadata = pipeline.ingest_raw(dataset, &blob)?;
    info!(dataset = %dataset, input = %input.display(), "normalized raw detections");
    Ok(metadata)
}

/// Run the full pipeline for one dataset directory.
pub fn run_dataset_dir(root: &Path, dataset: &DatasetId) -> Result<RunSummary> {
    let repo = std::sync::Arc::new(DirRepository::new(root));
    let pipeline = Pipeline::new(repo);
    Ok(pipeline.run_dataset(dataset)?)
}
