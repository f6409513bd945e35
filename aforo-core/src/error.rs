use aforo_types::{Cardinal, DatasetId, TrackId};

/// Error kinds surfaced by the core.
///
/// Dataset-level kinds abort the current operation. The event-local kinds
/// (`MappingGap`, `DegenerateTrack`) are usually counted in QC statistics
/// instead of propagating; `DegenerateTrack` also surfaces when the frame
/// bundler rejects an out-of-order detection stream, which is a defect of
/// the whole input.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("columns-not-mappable: input does not expose the detection schema; saw [{}]", .columns.join(", "))]
    InputShapeMismatch { columns: Vec<String> },
    #[error("dataset {dataset} has no normalized detections")]
    MissingTrajectoryData { dataset: DatasetId },
    #[error("dataset configuration incomplete: {reason}")]
    ConfigurationIncomplete { reason: String },
    #[error("correction targets unknown track {track} in dataset {dataset}")]
    InvalidCorrectionTarget { dataset: DatasetId, track: TrackId },
    #[error("rule map has no entry for ({origin}, {dest})")]
    MappingGap { origin: Cardinal, dest: Cardinal },
    #[error("degenerate track {track}")]
    DegenerateTrack { track: TrackId },
    #[error("dataset {dataset} is locked by a concurrent mutation")]
    RepositoryConflict { dataset: DatasetId },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
    #[error("{source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("{source}")]
    Types {
        #[from]
        source: aforo_types::AforoTypesError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
