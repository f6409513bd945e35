//! Round trips through the directory-backed repository.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use aforo_core::{Pipeline, Repository};
use aforo_offline::{normalize_into, run_dataset_dir, DirRepository};
use aforo_types::{
    AccessPoint, Cardinal, DatasetConfig, DatasetId, MovementCount, PixelPoint, RilsaRuleMap,
    TrackId, TrajectoryCorrection,
};

fn rect_polygon(x0: f64, x1: f64, y0: f64, y1: f64) -> Vec<PixelPoint> {
    vec![
        PixelPoint::new(x0, y0),
        PixelPoint::new(x1, y0),
        PixelPoint::new(x1, y1),
        PixelPoint::new(x0, y1),
    ]
}

fn intersection_config() -> DatasetConfig {
    let mk = |id: &str, cardinal, x, y, poly| AccessPoint {
        id: id.to_string(),
        cardinal,
        x,
        y,
        polygon: Some(poly),
        gate: None,
    };
    DatasetConfig {
        accesses: vec![
            mk("north", Cardinal::N, 100.0, 0.0, rect_polygon(90.0, 110.0, 0.0, 10.0)),
            mk("south", Cardinal::S, 100.0, 200.0, rect_polygon(90.0, 110.0, 190.0, 200.0)),
            mk("east", Cardinal::E, 300.0, 100.0, rect_polygon(290.0, 310.0, 90.0, 110.0)),
        ],
        rilsa_map: RilsaRuleMap::default(),
        ..Default::default()
    }
}

/// A raw tabular blob with one car crossing north to south in five seconds.
fn raw_blob() -> serde_json::Value {
    let rows: Vec<serde_json::Value> = (0..=150u64)
        .map(|f| {
            let ratio = f as f64 / 150.0;
            json!({
                "frame": f,
                "id": 1,
                "x": 100.0,
                "y": 5.0 + 190.0 * ratio,
                "label": "car",
                "confidence": 0.9,
            })
        })
        .collect();
    json!(rows)
}

#[test]
fn raw_blob_to_counts_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = DatasetId::new("crossing");
    let repo = DirRepository::new(dir.path());
    repo.save_config(&dataset, &intersection_config()).unwrap();

    let input = dir.path().join("raw.json");
    std::fs::write(&input, serde_json::to_vec(&raw_blob()).unwrap()).unwrap();
    let metadata = normalize_into(dir.path(), &dataset, &input).unwrap();
    assert_eq!(metadata.fps, 30.0);

    let summary = run_dataset_dir(dir.path(), &dataset).unwrap();
    assert_eq!(summary.events_total, 1);

    // Everything is on disk now; a fresh repository instance sees it.
    let fresh = DirRepository::new(dir.path());
    let events = fresh.load_events(&dataset).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rilsa_code.to_string(), "1");
    let counts = fresh.load_movement_counts(&dataset).unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].counts_by_class["car"], 1);
    assert!(!fresh.load_history(&dataset).unwrap().is_empty());
}

#[test]
fn corrections_persist_and_rebuild_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = DatasetId::new("corrected");
    let repo = Arc::new(DirRepository::new(dir.path()));
    repo.save_config(&dataset, &intersection_config()).unwrap();
    let input = dir.path().join("raw.json");
    std::fs::write(&input, serde_json::to_vec(&raw_blob()).unwrap()).unwrap();
    normalize_into(dir.path(), &dataset, &input).unwrap();

    let pipeline = Pipeline::new(Arc::clone(&repo));
    pipeline.run_dataset(&dataset).unwrap();
    pipeline
        .apply_correction(
            &dataset,
            &TrackId::new("track_1"),
            &TrajectoryCorrection {
                new_dest: Some(Cardinal::E),
                ..Default::default()
            },
            "editor",
            Utc.with_ymd_and_hms(2025, 11, 7, 12, 0, 0).unwrap(),
        )
        .unwrap();

    let fresh = DirRepository::new(dir.path());
    let corrections = fresh.load_corrections(&dataset).unwrap();
    assert_eq!(
        corrections[&TrackId::new("track_1")].new_dest,
        Some(Cardinal::E)
    );
    let events = fresh.load_events(&dataset).unwrap();
    assert_eq!(events[0].rilsa_code.to_string(), "5");
    assert_eq!(events[0].revisions.len(), 1);
    let counts = fresh.load_movement_counts(&dataset).unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].rilsa_code.to_string(), "5");
}

#[test]
fn movement_counts_survive_a_csv_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = DatasetId::new("counts");
    let repo = DirRepository::new(dir.path());

    let interval = Utc.with_ymd_and_hms(2025, 11, 7, 14, 15, 0).unwrap();
    let counts = vec![
        MovementCount {
            dataset: dataset.clone(),
            rilsa_code: "1".parse().unwrap(),
            interval_start: interval,
            interval_end: interval + chrono::Duration::minutes(15),
            counts_by_class: [("bus".to_string(), 2), ("car".to_string(), 7)]
                .into_iter()
                .collect(),
            total: 9,
        },
        MovementCount {
            dataset: dataset.clone(),
            rilsa_code: "9_2".parse().unwrap(),
            interval_start: interval,
            interval_end: interval + chrono::Duration::minutes(15),
            counts_by_class: [("pedestrian".to_string(), 1)].into_iter().collect(),
            total: 1,
        },
    ];
    repo.replace_movement_counts(&dataset, counts.clone()).unwrap();
    let loaded = repo.load_movement_counts(&dataset).unwrap();
    assert_eq!(loaded, counts);
}

#[test]
fn missing_dataset_reads_are_empty_and_runs_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let repo = DirRepository::new(dir.path());
    let dataset = DatasetId::new("ghost");
    assert!(repo.load_events(&dataset).unwrap().is_empty());
    assert!(repo.load_movement_counts(&dataset).unwrap().is_empty());
    assert!(repo.list_datasets().unwrap().is_empty());
    assert!(run_dataset_dir(dir.path(), &dataset).is_err());
}
